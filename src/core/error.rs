//! Unified error handling for the runner
//!
//! A single error type shared by the loader, the engine and the lifecycle
//! state machine, so modules never depend on each other for error handling.

use std::{fmt, io, path::PathBuf};

use super::status::RuntimeState;

/// Unified error types for the runner
#[derive(Debug)]
pub enum RunnerError {
    /// Context descriptor could not be read, parsed or validated
    Configuration(String),

    /// Context descriptor URI uses a scheme other than `file:` or `classpath:`
    ConfigSchemeUnsupported(String),

    /// Script directory is missing or unreadable
    DirectoryUnavailable { path: PathBuf, source: io::Error },

    /// One pipeline script failed to compile
    Compilation { script: PathBuf, reason: String },

    /// The engine refused one route definition
    Registration { route: String, reason: String },

    /// The engine's stopped-state could not be observed during drain-wait
    DrainWaitObservation(String),

    /// Engine construction, start, stop or removal failures
    Engine(String),

    /// A lifecycle operation was called from the wrong state
    InvalidTransition {
        from: RuntimeState,
        to: RuntimeState,
    },

    /// Resource not found errors
    NotFound(String),

    /// Internal system errors
    Internal(String),

    /// I/O errors
    Io(io::Error),
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            RunnerError::ConfigSchemeUnsupported(uri) => {
                write!(f, "Unsupported URI protocol: {uri}")
            }
            RunnerError::DirectoryUnavailable { path, source } => {
                write!(
                    f,
                    "Routes directory '{}' unavailable: {source}",
                    path.display()
                )
            }
            RunnerError::Compilation { script, reason } => {
                write!(f, "Can't compile '{}': {reason}", script.display())
            }
            RunnerError::Registration { route, reason } => {
                write!(f, "Can't register route '{route}': {reason}")
            }
            RunnerError::DrainWaitObservation(msg) => {
                write!(f, "Can't observe engine stopped state: {msg}")
            }
            RunnerError::Engine(msg) => write!(f, "Engine error: {msg}"),
            RunnerError::InvalidTransition { from, to } => {
                write!(f, "Invalid lifecycle transition: {from} -> {to}")
            }
            RunnerError::NotFound(msg) => write!(f, "Resource not found: {msg}"),
            RunnerError::Internal(msg) => write!(f, "Internal error: {msg}"),
            RunnerError::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for RunnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunnerError::DirectoryUnavailable { source, .. } => Some(source),
            RunnerError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for RunnerError {
    fn from(err: io::Error) -> Self {
        RunnerError::Io(err)
    }
}

/// Result type alias for runner operations
pub type RunnerResult<T> = std::result::Result<T, RunnerError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> RunnerResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> RunnerResult<T> {
        self.map_err(|e| RunnerError::Internal(format!("{context}: {e}")))
    }
}

/// Convenience macros for error creation
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::core::RunnerError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::RunnerError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! engine_error {
    ($msg:expr) => {
        $crate::core::RunnerError::Engine($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::RunnerError::Engine(format!($fmt, $($arg)*))
    };
}
