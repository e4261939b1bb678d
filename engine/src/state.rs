//! Engine state definitions.

/// Engine operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Built, poller not started.
    Starting,
    /// Poller running.
    Running,
    /// Draining the poller.
    ShuttingDown,
    /// Poller stopped.
    Stopped,
}

impl EngineState {
    /// Check if the background poller is active.
    pub fn is_operational(&self) -> bool {
        matches!(self, EngineState::Running)
    }

    /// Check if the engine is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineState::Stopped)
    }
}
