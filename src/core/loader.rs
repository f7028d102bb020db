//! Script directory loading
//!
//! Enumerates pipeline scripts in the routes directory and compiles each one.
//! A script that fails to compile is logged and left out; it never stops the
//! remaining scripts from loading.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{error, info, warn};

use super::{
    error::{RunnerError, RunnerResult},
    traits::PipelineCompiler,
};
use crate::pipeline::{RouteDefinition, ScriptResource, PIPELINE_SUFFIX};

/// Loads every pipeline script found in a directory
pub struct ScriptDirectoryLoader {
    compiler: Arc<dyn PipelineCompiler>,
    suffix: String,
}

impl ScriptDirectoryLoader {
    pub fn new(compiler: Arc<dyn PipelineCompiler>) -> Self {
        Self {
            compiler,
            suffix: PIPELINE_SUFFIX.to_string(),
        }
    }

    /// Compile every script in `directory`, dropping the ones that fail.
    pub fn load_all(&self, directory: &Path) -> RunnerResult<Vec<RouteDefinition>> {
        self.load(directory).map(|report| report.routes)
    }

    /// Compile every script in `directory` and report what was skipped.
    ///
    /// Fails only when the directory itself cannot be listed.
    pub fn load(&self, directory: &Path) -> RunnerResult<LoadReport> {
        let scripts = self.scan(directory)?;
        info!(
            "Loading {} pipeline scripts from '{}'",
            scripts.len(),
            directory.display()
        );

        let mut report = LoadReport::default();
        for script in scripts {
            match self.compiler.compile(&script) {
                Ok(route) => report.routes.push(route),
                Err(e) => {
                    error!("Can't add route from '{script}': {e}");
                    report.failures.push(ScriptFailure {
                        path: script.path().to_path_buf(),
                        error: e,
                    });
                }
            }
        }

        Ok(report)
    }

    fn scan(&self, directory: &Path) -> RunnerResult<Vec<ScriptResource>> {
        let unavailable = |source| RunnerError::DirectoryUnavailable {
            path: directory.to_path_buf(),
            source,
        };

        let entries = fs::read_dir(directory).map_err(unavailable)?;

        let mut scripts = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Can't read entry in '{}': {e}", directory.display());
                    continue;
                }
            };

            let path = entry.path();
            if !self.matches(&path) {
                continue;
            }

            match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => continue,
                Ok(_) => scripts.push(ScriptResource::new(path)),
                Err(e) => warn!("Can't inspect '{}': {e}", path.display()),
            }
        }

        scripts.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(scripts)
    }

    fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(&self.suffix))
    }
}

/// Outcome of loading one directory
#[derive(Debug, Default)]
pub struct LoadReport {
    pub routes: Vec<RouteDefinition>,
    pub failures: Vec<ScriptFailure>,
}

/// A script that was skipped and why
#[derive(Debug)]
pub struct ScriptFailure {
    pub path: PathBuf,
    pub error: RunnerError,
}
