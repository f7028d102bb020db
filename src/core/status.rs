use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

use super::error::{RunnerError, RunnerResult};

/// Lifecycle state of the routing runtime.
///
/// `Stopped -> Starting -> Running -> Stopping -> Stopped`, with `Starting`
/// allowed to fall back to `Stopped` when a start attempt fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RuntimeState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl RuntimeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeState::Stopped => "stopped",
            RuntimeState::Starting => "starting",
            RuntimeState::Running => "running",
            RuntimeState::Stopping => "stopping",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => RuntimeState::Starting,
            2 => RuntimeState::Running,
            3 => RuntimeState::Stopping,
            _ => RuntimeState::Stopped,
        }
    }

    /// Whether `self -> to` is an edge of the lifecycle graph.
    pub fn can_transition_to(&self, to: RuntimeState) -> bool {
        matches!(
            (self, to),
            (RuntimeState::Stopped, RuntimeState::Starting)
                | (RuntimeState::Starting, RuntimeState::Running)
                | (RuntimeState::Starting, RuntimeState::Stopped)
                | (RuntimeState::Running, RuntimeState::Stopping)
                | (RuntimeState::Stopping, RuntimeState::Stopped)
                | (RuntimeState::Stopping, RuntimeState::Running)
        )
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomically held [`RuntimeState`].
///
/// Readers never block, even while a transition is running. Writers go
/// through [`StateCell::transition`], which only succeeds when the cell
/// currently holds `from` and `from -> to` is a legal edge.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self::new(RuntimeState::Stopped)
    }
}

impl StateCell {
    pub fn new(state: RuntimeState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> RuntimeState {
        RuntimeState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn transition(&self, from: RuntimeState, to: RuntimeState) -> RunnerResult<()> {
        if !from.can_transition_to(to) {
            return Err(RunnerError::InvalidTransition { from, to });
        }

        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| {
                log::debug!("Runtime state {from} -> {to}");
            })
            .map_err(|current| RunnerError::InvalidTransition {
                from: RuntimeState::from_u8(current),
                to,
            })
    }
}
