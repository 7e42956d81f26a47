use thiserror::Error;

use crate::core::route::Route;

/// Error type for route store operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// No record exists under the requested name
    #[error("route '{0}' not found")]
    NotFound(String),

    /// The store was closed and can no longer be used
    #[error("route store is closed")]
    Closed,

    /// The backing engine failed to read or write
    #[error("storage error: {0}")]
    Storage(String),

    /// A persisted record could not be decoded
    #[error("corrupt record for route '{name}': {message}")]
    Decode { name: String, message: String },
}

impl StoreError {
    /// Whether this is the distinguished "no such route" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Result type for route store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// RouteStore defines the port (interface) for durable route persistence.
///
/// Operations are synchronous; async callers should run them on the blocking
/// pool. Implementations serialize writes per key and assume a single writer
/// process.
pub trait RouteStore: Send + Sync + 'static {
    /// Insert or overwrite the record stored under `route.name`
    fn save(&self, route: &Route) -> StoreResult<()>;

    /// Load a single route, failing with [`StoreError::NotFound`] if absent
    fn load(&self, name: &str) -> StoreResult<Route>;

    /// Load every route in the store's natural key order
    fn load_all(&self) -> StoreResult<Vec<Route>>;

    /// Remove a route, failing with [`StoreError::NotFound`] if absent
    fn delete(&self, name: &str) -> StoreResult<()>;

    /// Flush and release resources. Later calls fail with [`StoreError::Closed`]
    fn close(&self) -> StoreResult<()>;
}
