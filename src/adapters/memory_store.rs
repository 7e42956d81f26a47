//! Volatile route store used by tests and dry runs.
use std::{
    collections::BTreeMap,
    sync::{
        RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{
    core::route::Route,
    ports::route_store::{RouteStore, StoreError, StoreResult},
};

/// Route store adapter keeping everything in an ordered map.
#[derive(Debug, Default)]
pub struct MemoryRouteStore {
    routes: RwLock<BTreeMap<String, Route>>,
    closed: AtomicBool,
}

impl MemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with an initial set of routes.
    pub fn with_routes(routes: impl IntoIterator<Item = Route>) -> Self {
        let map = routes
            .into_iter()
            .map(|route| (route.name.clone(), route))
            .collect();
        Self {
            routes: RwLock::new(map),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn poisoned<T>(_: T) -> StoreError {
        StoreError::Storage("route map lock poisoned".to_string())
    }
}

impl RouteStore for MemoryRouteStore {
    fn save(&self, route: &Route) -> StoreResult<()> {
        self.ensure_open()?;
        self.routes
            .write()
            .map_err(Self::poisoned)?
            .insert(route.name.clone(), route.clone());
        Ok(())
    }

    fn load(&self, name: &str) -> StoreResult<Route> {
        self.ensure_open()?;
        self.routes
            .read()
            .map_err(Self::poisoned)?
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn load_all(&self) -> StoreResult<Vec<Route>> {
        self.ensure_open()?;
        Ok(self
            .routes
            .read()
            .map_err(Self::poisoned)?
            .values()
            .cloned()
            .collect())
    }

    fn delete(&self, name: &str) -> StoreResult<()> {
        self.ensure_open()?;
        self.routes
            .write()
            .map_err(Self::poisoned)?
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}
