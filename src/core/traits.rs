//! Core traits for runner components
//!
//! These interfaces decouple the lifecycle state machine from the concrete
//! routing engine and from the pipeline scripting technology.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use super::error::{RunnerError, RunnerResult};
use crate::{
    config::EngineConfig,
    engine::Exchange,
    pipeline::{RouteDefinition, ScriptResource},
};

/// Turns one script resource into one route definition.
pub trait PipelineCompiler: Send + Sync {
    fn compile(&self, script: &ScriptResource) -> RunnerResult<RouteDefinition>;
}

/// Handle to a routing engine.
///
/// All methods take `&self`; implementations are expected to be internally
/// synchronized.
pub trait RoutingEngine: Send + Sync {
    /// Engine name, for log lines
    fn name(&self) -> &str;

    /// Register a route and return the identifier the engine knows it by
    fn add_route(&self, definition: RouteDefinition) -> RunnerResult<String>;

    /// Remove a registered route
    fn remove_route(&self, id: &str) -> RunnerResult<()>;

    /// Start consuming on every registered route
    fn start(&self) -> RunnerResult<()>;

    /// Request a stop; completion is observed through `is_stopped`
    fn stop(&self) -> RunnerResult<()>;

    /// Whether the engine has fully stopped
    fn is_stopped(&self) -> RunnerResult<bool>;

    /// Identifiers of all registered routes
    fn list_routes(&self) -> Vec<String>;

    /// Deliver one exchange to the route consuming `endpoint`
    fn send(&self, endpoint: &str, _exchange: Exchange) -> RunnerResult<Exchange> {
        Err(RunnerError::Engine(format!(
            "Engine '{}' can't deliver to '{endpoint}'",
            self.name()
        )))
    }
}

/// Builds a fresh engine from a resolved context descriptor.
pub trait EngineFactory: Send + Sync {
    fn create(&self, config: &EngineConfig) -> RunnerResult<Arc<dyn RoutingEngine>>;
}

/// Receiver side of the process-wide shutdown flag.
pub type ShutdownWatch = watch::Receiver<bool>;

/// Long-running task started alongside the lifecycle manager.
#[async_trait]
pub trait BackgroundService: Send {
    /// Run until finished or until `shutdown` flips to `true`
    async fn start_service(&mut self, shutdown: ShutdownWatch);

    fn name(&self) -> &'static str;
}

/// Spawn a background service onto the current tokio runtime.
pub fn spawn_service<S>(mut service: S, shutdown: ShutdownWatch) -> tokio::task::JoinHandle<()>
where
    S: BackgroundService + 'static,
{
    tokio::spawn(async move {
        log::debug!("Starting background service '{}'", service.name());
        service.start_service(shutdown).await;
        log::debug!("Background service '{}' exited", service.name());
    })
}
