//! Runtime orchestration
//!
//! The lifecycle state machine plus the two tasks that drive it: the
//! operator console and the termination signal handler.

pub mod console;
pub mod lifecycle;
pub mod shutdown;

use std::sync::Arc;

use log::error;
use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::core::spawn_service;

pub use console::{CommandConsole, ConsoleCommand};
pub use lifecycle::{EngineHandle, LifecycleManager, StartSummary};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};

/// Drive a started manager with the termination handler and `console`.
///
/// Returns once `shutdown` is raised and both tasks have exited, so any
/// lines they log are emitted before the caller tears logging down.
pub async fn run_until_shutdown<R, W>(
    manager: Arc<LifecycleManager>,
    console: CommandConsole<R, W>,
    shutdown: ShutdownSignal,
) where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let coordinator = spawn_service(
        ShutdownCoordinator::new(manager, shutdown.clone()),
        shutdown.watch(),
    );
    let console = spawn_service(console, shutdown.watch());

    shutdown.wait().await;

    for (name, handle) in [("shutdown coordinator", coordinator), ("console", console)] {
        if let Err(e) = handle.await {
            error!("Background task '{name}' failed: {e}");
        }
    }
}
