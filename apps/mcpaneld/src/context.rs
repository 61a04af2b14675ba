use std::sync::Arc;

use mcpanel_core::CoreError;
use mcpanel_rcon::RconClient;
use mcpanel_utils::DataPaths;
use tracing::info;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::backup::{BackupEngine, BackupScheduler, SchedulerOptions};
use crate::config::DaemonConfig;
use crate::settings::{JsonFileSettings, SettingsStore};
use crate::supervisor::{LogStore, ProcessSupervisor, SysinfoProbe};

/// Everything one managed instance needs, wired together once.
pub struct AppContext {
    pub config: DaemonConfig,
    pub supervisor: ProcessSupervisor,
    pub rcon: Arc<RconClient>,
    pub engine: Arc<BackupEngine>,
    pub scheduler: BackupScheduler,
}

impl AppContext {
    pub async fn build(config: DaemonConfig, data: &DataPaths) -> Result<Self, CoreError> {
        let paths = config.instance_paths();
        info!(
            "instance {} (backups in {})",
            paths.instance_dir.display(),
            paths.backup_dir.display()
        );

        let supervisor = ProcessSupervisor::new(
            config.launch_spec(),
            LogStore::new(config.log_capacity),
            Arc::new(SysinfoProbe::new()),
            config.stop_grace(),
        );

        let rcon_config = config.resolve_rcon().await;
        if rcon_config.enabled && rcon_config.password.is_empty() {
            info!("rcon enabled without a password, treating it as disabled");
        }
        let rcon = Arc::new(RconClient::new(rcon_config));

        let engine = Arc::new(BackupEngine::new(
            paths,
            Arc::new(supervisor.clone()),
            Some(rcon.clone()),
            config.retention(),
        ));

        let settings: Arc<dyn SettingsStore> = Arc::new(JsonFileSettings::new(&data.settings_path));
        let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
        let scheduler = BackupScheduler::new(engine.clone(), settings, audit, SchedulerOptions::default()).await?;

        Ok(Self {
            config,
            supervisor,
            rcon,
            engine,
            scheduler,
        })
    }
}
