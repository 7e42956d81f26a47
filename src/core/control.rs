//! Control loop: every accepted mutation is persisted first, then the
//! frontend is reconciled from a fresh snapshot of the whole store.
//!
//! Mutations hold a single async lock across "save, load all, update" so two
//! concurrent reconciliations never interleave their directory rewrites. A
//! failed reconcile is reported to the caller but the write is kept; the next
//! successful reconcile (or an explicit one) converges the frontend.
use std::sync::Arc;

use http::StatusCode;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{
    core::route::{Route, ValidationError, validate_backends},
    ports::{
        frontend::{Frontend, FrontendError},
        route_store::{RouteStore, StoreError, StoreResult},
    },
};

/// Everything a control plane operation can fail with.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ControlError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("route '{0}' not found")]
    NotFound(String),

    #[error("route '{0}' already exists")]
    AlreadyExists(String),

    #[error(transparent)]
    Store(StoreError),

    #[error("reconcile failed: {0}")]
    Frontend(#[from] FrontendError),

    #[error("{0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ControlError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(name) => ControlError::NotFound(name),
            other => ControlError::Store(other),
        }
    }
}

impl ControlError {
    /// HTTP status the control API answers with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ControlError::Validation(_) | ControlError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ControlError::NotFound(_) => StatusCode::NOT_FOUND,
            ControlError::AlreadyExists(_) => StatusCode::CONFLICT,
            ControlError::Store(_) | ControlError::Frontend(_) | ControlError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

pub type ControlResult<T> = Result<T, ControlError>;

/// Sequences store writes and frontend reconciliation.
pub struct ControlPlane {
    store: Arc<dyn RouteStore>,
    frontend: Arc<dyn Frontend>,
    write_lock: Mutex<()>,
}

impl ControlPlane {
    pub fn new(store: Arc<dyn RouteStore>, frontend: Arc<dyn Frontend>) -> Self {
        Self {
            store,
            frontend,
            write_lock: Mutex::new(()),
        }
    }

    /// Run a store call on the blocking pool.
    async fn with_store<T, F>(&self, f: F) -> ControlResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RouteStore) -> StoreResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| ControlError::Internal(e.to_string()))?
            .map_err(ControlError::from)
    }

    pub async fn list_routes(&self) -> ControlResult<Vec<Route>> {
        self.with_store(|store| store.load_all()).await
    }

    pub async fn get_route(&self, name: &str) -> ControlResult<Route> {
        let name = name.to_string();
        self.with_store(move |store| store.load(&name)).await
    }

    /// Validate and persist a new route, then reconcile.
    pub async fn create_route(&self, route: Route) -> ControlResult<Route> {
        route.validate()?;

        let _guard = self.write_lock.lock().await;
        let name = route.name.clone();
        let exists = self
            .with_store(move |store| match store.load(&name) {
                Ok(_) => Ok(true),
                Err(StoreError::NotFound(_)) => Ok(false),
                Err(e) => Err(e),
            })
            .await?;
        if exists {
            return Err(ControlError::AlreadyExists(route.name));
        }

        let saved = route.clone();
        self.with_store(move |store| store.save(&saved)).await?;
        tracing::info!(route = %route.name, port = route.port, "Route created");

        self.reconcile_locked().await?;
        Ok(route)
    }

    pub async fn get_backends(&self, name: &str) -> ControlResult<Vec<String>> {
        Ok(self.get_route(name).await?.backends)
    }

    /// Replace a route's backend list wholesale, then reconcile.
    pub async fn set_backends(
        &self,
        name: &str,
        backends: Vec<String>,
    ) -> ControlResult<Vec<String>> {
        validate_backends(&backends)?;

        let _guard = self.write_lock.lock().await;
        let name = name.to_string();
        let updated = self
            .with_store(move |store| {
                let mut route = store.load(&name)?;
                route.backends = backends;
                store.save(&route)?;
                Ok(route)
            })
            .await?;
        tracing::info!(
            route = %updated.name,
            backends = updated.backends.len(),
            "Route backends replaced"
        );

        self.reconcile_locked().await?;
        Ok(updated.backends)
    }

    pub async fn delete_route(&self, name: &str) -> ControlResult<()> {
        let _guard = self.write_lock.lock().await;
        let owned = name.to_string();
        self.with_store(move |store| store.delete(&owned)).await?;
        tracing::info!(route = %name, "Route deleted");

        self.reconcile_locked().await?;
        Ok(())
    }

    /// Bring the frontend in line with the store. Returns the number of
    /// routes in the snapshot.
    pub async fn reconcile(&self) -> ControlResult<usize> {
        let _guard = self.write_lock.lock().await;
        self.reconcile_locked().await
    }

    async fn reconcile_locked(&self) -> ControlResult<usize> {
        let routes = self.with_store(|store| store.load_all()).await?;
        let routable = routes.iter().filter(|r| r.is_routable()).count();

        if let Err(e) = self.frontend.update(&routes).await {
            tracing::error!(error = %e, routes = routes.len(), "Reconcile failed");
            return Err(e.into());
        }

        tracing::debug!(routes = routes.len(), routable, "Reconciled frontend");
        Ok(routes.len())
    }

    /// Close the underlying store. Later operations fail.
    pub async fn close(&self) -> ControlResult<()> {
        let _guard = self.write_lock.lock().await;
        self.with_store(|store| store.close()).await
    }
}
