//! Pipeline scripts and their compiled form.

pub mod compiler;
pub mod definition;

pub use compiler::YamlPipelineCompiler;
pub use definition::{Endpoint, RouteDefinition, ScriptResource, Step};

/// File suffix identifying pipeline scripts in the routes directory.
pub const PIPELINE_SUFFIX: &str = ".pipeline";
