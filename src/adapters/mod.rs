pub mod api;
pub mod listener;
pub mod memory_store;
pub mod nginx;
pub mod passthrough;
pub mod sled_store;

/// Re-export commonly used types from adapters
pub use api::ApiHandler;
pub use listener::IngressListener;
pub use memory_store::MemoryRouteStore;
pub use nginx::{ConfigRenderer, ConfigWriter, NginxFrontend, NginxOptions};
pub use passthrough::{BackendAddr, Passthrough, TunnelError, TunnelSide, TunnelStats};
pub use sled_store::SledRouteStore;
