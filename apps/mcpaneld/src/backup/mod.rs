pub mod engine;
pub mod ops;
pub mod rcon;
pub mod retention;
pub mod schedule;
pub mod scheduler;

use async_trait::async_trait;
use mcpanel_core::CoreError;

use crate::supervisor::ProcessSupervisor;

pub use engine::BackupEngine;
pub use retention::RetentionPolicy;
pub use scheduler::{BackupScheduler, SchedulerOptions};

/// The slice of the supervisor that restores need: stop before replacing
/// files, start again afterwards.
#[async_trait]
pub trait ServerControl: Send + Sync {
    async fn is_running(&self) -> bool;
    /// Stop and wait for the process to exit.
    async fn stop(&self) -> Result<(), CoreError>;
    async fn start(&self) -> Result<(), CoreError>;
}

#[async_trait]
impl ServerControl for ProcessSupervisor {
    async fn is_running(&self) -> bool {
        ProcessSupervisor::is_running(self).await
    }

    async fn stop(&self) -> Result<(), CoreError> {
        self.stop_and_wait(self.stop_grace()).await
    }

    async fn start(&self) -> Result<(), CoreError> {
        ProcessSupervisor::start(self).await
    }
}
