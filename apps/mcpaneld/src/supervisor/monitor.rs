use std::process::ExitStatus;
use std::sync::Arc;

use mcpanel_core::proto::ProcessState;
use tokio::process::Child;
use tracing::{info, warn};

use super::server::Inner;

/// Wait for the child in the background and settle the supervisor state when it exits.
pub(crate) fn watch_exit(inner: Arc<Inner>, mut child: Child, generation: u64) {
    tokio::spawn(async move {
        let exit = child.wait().await;

        let next = {
            let mut guard = inner.state.lock().await;
            if guard.generation != generation {
                return;
            }
            let next = exit_state(&exit, guard.stop_requested);
            guard.state = next;
            guard.pid = None;
            guard.stdin = None;
            guard.stop_requested = false;
            next
        };

        match &exit {
            Ok(status) if next == ProcessState::Stopped => info!("server exited: {status}"),
            Ok(status) => warn!("server crashed: {status}"),
            Err(err) => warn!("lost track of server process: {err}"),
        }
        let _ = inner.status_tx.send(next);
    });
}

/// Exit code 0 means a clean stop. Any other exit counts as a crash unless we
/// asked the process to stop, in which case the signal-driven exit is expected.
pub(crate) fn exit_state(exit: &std::io::Result<ExitStatus>, stop_requested: bool) -> ProcessState {
    match exit {
        Ok(status) if status.success() => ProcessState::Stopped,
        Ok(_) if stop_requested => ProcessState::Stopped,
        _ => ProcessState::Crashed,
    }
}
