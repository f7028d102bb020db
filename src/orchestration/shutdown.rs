//! Process shutdown signalling
//!
//! [`ShutdownSignal`] is the one-shot flag the main control loop waits on.
//! [`ShutdownCoordinator`] turns SIGINT/SIGTERM into a managed stop followed
//! by that flag.

use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info};
use tokio::sync::watch;

use super::lifecycle::LifecycleManager;
use crate::core::{BackgroundService, ShutdownWatch};

/// Shared process-termination flag.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the flag. Returns `true` only for the call that raised it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                true
            }
        })
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn watch(&self) -> ShutdownWatch {
        self.tx.subscribe()
    }

    /// Resolve once the flag has been raised.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

/// Resolve once `watch` reports shutdown, or its sender is gone.
pub async fn signalled(watch: &mut ShutdownWatch) {
    let _ = watch.wait_for(|triggered| *triggered).await;
}

/// Stops the runtime when the process is asked to terminate.
pub struct ShutdownCoordinator {
    manager: Arc<LifecycleManager>,
    shutdown: ShutdownSignal,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<LifecycleManager>, shutdown: ShutdownSignal) -> Self {
        Self { manager, shutdown }
    }

    /// Run the managed stop and raise the shutdown flag.
    pub async fn handle_termination(&self) {
        info!("Shutdown hook invoked");
        if let Err(e) = self.manager.stop().await {
            error!("Can't stop routing engine: {e}");
        }
        self.shutdown.trigger();
    }
}

#[async_trait]
impl BackgroundService for ShutdownCoordinator {
    async fn start_service(&mut self, mut shutdown: ShutdownWatch) {
        tokio::select! {
            _ = termination() => self.handle_termination().await,
            _ = signalled(&mut shutdown) => {
                log::debug!("Shutdown already signalled, termination hook not needed");
            }
        }
    }

    fn name(&self) -> &'static str {
        "shutdown coordinator"
    }
}

#[cfg(unix)]
async fn termination() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            error!("Can't install SIGTERM handler: {e}");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn termination() {
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Can't listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
