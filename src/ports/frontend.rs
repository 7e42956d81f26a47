use async_trait::async_trait;
use thiserror::Error;

use crate::core::route::Route;

/// Error type for frontend reconciliation
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FrontendError {
    /// Reading, writing or removing generated configuration failed
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The proxy process could not be launched
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The reload signal could not be delivered
    #[error("failed to signal frontend: {0}")]
    Signal(String),
}

impl FrontendError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        FrontendError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Result type for frontend operations
pub type FrontendResult<T> = Result<T, FrontendError>;

/// Frontend defines the port (interface) for the reverse proxy whose
/// configuration follows the route set.
#[async_trait]
pub trait Frontend: Send + Sync + 'static {
    /// Bring the proxy in line with `routes`, the complete current route set.
    ///
    /// Implementations reconcile from scratch on every call, so repeating a
    /// call with the same input yields the same result.
    async fn update(&self, routes: &[Route]) -> FrontendResult<()>;
}
