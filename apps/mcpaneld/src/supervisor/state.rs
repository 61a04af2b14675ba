use std::sync::Arc;

use mcpanel_core::proto::ProcessState;
use tokio::process::ChildStdin;
use tokio::sync::Mutex;

/// Writers lock the pipe itself, never the supervisor state.
pub(crate) type SharedStdin = Arc<Mutex<ChildStdin>>;

/// Mutable view of the supervised child. Only the supervisor touches it.
pub(crate) struct SupervisorState {
    pub(crate) state: ProcessState,
    pub(crate) pid: Option<u32>,
    pub(crate) stdin: Option<SharedStdin>,
    pub(crate) started_at_ms: Option<u64>,
    // Bumped on every spawn so a late exit from an old child is ignored.
    pub(crate) generation: u64,
    pub(crate) stop_requested: bool,
}

impl SupervisorState {
    pub fn new() -> Self {
        Self {
            state: ProcessState::Stopped,
            pid: None,
            stdin: None,
            started_at_ms: None,
            generation: 0,
            stop_requested: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }
}
