//! Durable route store on top of `sled`.
//!
//! Keys are route names as UTF-8 bytes, so iteration follows byte-wise name
//! order. Values are protobuf-encoded [`Route`] records. Every mutation is
//! flushed before returning so an acknowledged write survives a crash.
use std::{
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

use prost::Message;

use crate::{
    core::route::Route,
    ports::route_store::{RouteStore, StoreError, StoreResult},
};

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}

/// Route store adapter backed by an embedded sled tree.
#[derive(Debug)]
pub struct SledRouteStore {
    db: sled::Db,
    closed: AtomicBool,
}

impl SledRouteStore {
    /// Open (or create) a store rooted at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        tracing::info!(
            path = %path.display(),
            routes = db.len(),
            recovered = db.was_recovered(),
            "Route store opened"
        );
        Ok(Self {
            db,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn decode(name: &str, bytes: &[u8]) -> StoreResult<Route> {
        Route::decode(bytes).map_err(|e| StoreError::Decode {
            name: name.to_string(),
            message: e.to_string(),
        })
    }
}

impl RouteStore for SledRouteStore {
    fn save(&self, route: &Route) -> StoreResult<()> {
        self.ensure_open()?;
        self.db
            .insert(route.name.as_bytes(), route.encode_to_vec())?;
        self.db.flush()?;
        tracing::debug!(route = %route.name, "Route saved");
        Ok(())
    }

    fn load(&self, name: &str) -> StoreResult<Route> {
        self.ensure_open()?;
        match self.db.get(name.as_bytes())? {
            Some(bytes) => Self::decode(name, &bytes),
            None => Err(StoreError::NotFound(name.to_string())),
        }
    }

    fn load_all(&self) -> StoreResult<Vec<Route>> {
        self.ensure_open()?;
        self.db
            .iter()
            .map(|entry| {
                let (key, value) = entry?;
                Self::decode(&String::from_utf8_lossy(&key), &value)
            })
            .collect()
    }

    fn delete(&self, name: &str) -> StoreResult<()> {
        self.ensure_open()?;
        if self.db.remove(name.as_bytes())?.is_none() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        self.db.flush()?;
        tracing::debug!(route = %name, "Route deleted");
        Ok(())
    }

    fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::Closed);
        }
        self.db.flush()?;
        tracing::info!("Route store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn open_test_store() -> (SledRouteStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SledRouteStore::open(temp_dir.path().join("routes.db")).unwrap();
        (store, temp_dir)
    }

    fn route(name: &str, backends: &[&str]) -> Route {
        Route::new(name, 80, vec![format!("{name}.example.com")])
            .with_backends(backends.iter().map(|b| b.to_string()).collect())
    }

    #[test]
    fn test_open_close() {
        let (store, _dir) = open_test_store();
        assert!(store.close().is_ok());
        assert!(matches!(store.close(), Err(StoreError::Closed)));
    }

    #[test]
    fn test_save_load_round_trip() {
        let (store, _dir) = open_test_store();

        let with_backends = route("api", &["10.0.0.1:9000", "10.0.0.2:9000"]);
        let without_backends = route("web", &[]);
        store.save(&with_backends).unwrap();
        store.save(&without_backends).unwrap();

        assert_eq!(store.load("api").unwrap(), with_backends);
        assert_eq!(store.load("web").unwrap(), without_backends);
    }

    #[test]
    fn test_save_overwrites_existing_name() {
        let (store, _dir) = open_test_store();

        store.save(&route("api", &[])).unwrap();
        store.save(&route("api", &["10.0.0.1:9000"])).unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].backends, vec!["10.0.0.1:9000".to_string()]);
    }

    #[test]
    fn test_load_all_and_delete() {
        let (store, _dir) = open_test_store();

        let routes = vec![route("a", &[]), route("b", &["10.0.0.1:1"]), route("c", &[])];
        for r in &routes {
            store.save(r).unwrap();
        }
        assert_eq!(store.load_all().unwrap(), routes);

        store.delete("b").unwrap();
        let remaining = store.load_all().unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|r| r.name != "b"));
    }

    #[test]
    fn test_missing_names_are_not_found() {
        let (store, _dir) = open_test_store();

        let err = store.load("ghost").unwrap_err();
        assert!(err.is_not_found());

        let err = store.delete("ghost").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_operations_after_close_fail() {
        let (store, _dir) = open_test_store();
        store.close().unwrap();

        assert!(matches!(store.save(&route("a", &[])), Err(StoreError::Closed)));
        assert!(matches!(store.load("a"), Err(StoreError::Closed)));
        assert!(matches!(store.load_all(), Err(StoreError::Closed)));
    }
}
