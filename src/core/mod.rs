//! Core abstractions for the runner
//!
//! Error type, lifecycle state, the engine and compiler traits, the route
//! registry and the script directory loader.

pub mod error;
pub mod loader;
pub mod registry;
pub mod status;
pub mod traits;


pub use error::{ErrorContext, RunnerError, RunnerResult};
pub use loader::{LoadReport, ScriptDirectoryLoader, ScriptFailure};
pub use registry::{RegistryStats, RouteRegistry};
pub use status::{RuntimeState, StateCell};
pub use traits::*;
