pub mod frontend;
pub mod route_store;

pub use frontend::{Frontend, FrontendError, FrontendResult};
pub use route_store::{RouteStore, StoreError, StoreResult};
