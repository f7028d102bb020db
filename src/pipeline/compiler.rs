//! Declarative pipeline compiler
//!
//! Compiles a YAML pipeline script into a [`RouteDefinition`]. Parse and
//! validation failures are reported as [`RunnerError::Compilation`] against
//! the script path, so a single bad script never affects its neighbours.

use log::{debug, trace};
use validator::Validate;

use crate::core::{PipelineCompiler, RunnerError, RunnerResult};

use super::definition::{RouteDefinition, ScriptResource};

#[derive(Debug, Default, Clone, Copy)]
pub struct YamlPipelineCompiler;

impl YamlPipelineCompiler {
    pub fn new() -> Self {
        Self
    }

    /// Parse and validate a pipeline document.
    pub fn from_yaml(content: &str) -> Result<RouteDefinition, String> {
        trace!("Read pipeline script: {content}");
        let definition: RouteDefinition =
            serde_yaml::from_str(content).map_err(|e| format!("unable to parse pipeline: {e}"))?;

        definition
            .validate()
            .map_err(|e| format!("pipeline validation failed: {e}"))?;

        Ok(definition)
    }
}

impl PipelineCompiler for YamlPipelineCompiler {
    fn compile(&self, script: &ScriptResource) -> RunnerResult<RouteDefinition> {
        let compilation_error = |reason: String| RunnerError::Compilation {
            script: script.path().to_path_buf(),
            reason,
        };

        let content = script
            .read()
            .map_err(|e| compilation_error(format!("unable to read script: {e}")))?;

        let definition = Self::from_yaml(&content)
            .map_err(compilation_error)?
            .with_source(script.path());

        debug!("Compiled pipeline from '{script}' consuming {}", definition.from);
        Ok(definition)
    }
}
