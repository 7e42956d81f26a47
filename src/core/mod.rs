pub mod control;
pub mod route;
pub mod router;

pub use control::{ControlError, ControlPlane, ControlResult};
pub use route::{Route, ValidationError};
pub use router::{Dispatch, Router, RouterBuilder, Verb};
