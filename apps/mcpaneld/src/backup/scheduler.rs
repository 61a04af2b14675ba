use std::sync::Arc;

use chrono::Local;
use mcpanel_core::CoreError;
use mcpanel_core::proto::{AuditEvent, AuditOutcome, BackupMode, BackupScheduleConfig, Frequency};
use mcpanel_utils::now_millis;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::BackupEngine;
use super::schedule::{config_to_cron_pattern, multiple_daily_patterns, schedule_from_env, to_job_schedule, validate_schedule_config};
use crate::audit::AuditSink;
use crate::settings::SettingsStore;

pub const SCHEDULE_SETTING_KEY: &str = "backup.schedule";
pub const AUTO_BACKUP_ACTION: &str = "backup.auto";
pub const RETENTION_ACTION: &str = "backup.retention";

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerOptions {
    /// Keep the handle of every job armed by a multi-time schedule so a later
    /// update cancels all of them. When false only the first handle is kept.
    pub track_all_jobs: bool,
}

/// Body of every scheduled tick.
struct AutoBackup {
    engine: Arc<BackupEngine>,
    audit: Arc<dyn AuditSink>,
    config: RwLock<Option<BackupScheduleConfig>>,
}

impl AutoBackup {
    async fn run(&self) {
        let Some(config) = self.config.read().await.clone() else {
            error!("automatic backup fired without a schedule");
            return;
        };
        let mode = config.mode().unwrap_or(BackupMode::World);

        self.audit(AUTO_BACKUP_ACTION, AuditOutcome::Start, json!({ "mode": mode }));
        match self.engine.create_backup(mode).await {
            Ok(info) => {
                info!("automatic {mode} backup created: {}", info.id);
                self.audit(
                    AUTO_BACKUP_ACTION,
                    AuditOutcome::Success,
                    json!({ "mode": mode, "id": info.id, "size": info.size }),
                );
            }
            Err(err) => {
                warn!("automatic {mode} backup failed: {err}");
                self.audit(
                    AUTO_BACKUP_ACTION,
                    AuditOutcome::Error,
                    json!({ "mode": mode, "error": err.to_string() }),
                );
            }
        }

        match self.engine.apply_retention().await {
            Ok(report) => self.audit(
                RETENTION_ACTION,
                AuditOutcome::Success,
                json!({ "kept": report.kept.len(), "removed": report.removed }),
            ),
            Err(err) => {
                warn!("retention after automatic backup failed: {err}");
                self.audit(RETENTION_ACTION, AuditOutcome::Error, json!({ "error": err.to_string() }));
            }
        }
    }

    fn audit(&self, action: &str, outcome: AuditOutcome, detail: serde_json::Value) {
        self.audit
            .record(AuditEvent::new(now_millis(), action, outcome).with_detail(detail));
    }
}

/// Owns the cron jobs that drive automatic backups and the current schedule.
pub struct BackupScheduler {
    job: Arc<AutoBackup>,
    settings: Arc<dyn SettingsStore>,
    jobs: JobScheduler,
    options: SchedulerOptions,
    active: Mutex<Vec<Uuid>>,
}

impl BackupScheduler {
    pub async fn new(
        engine: Arc<BackupEngine>,
        settings: Arc<dyn SettingsStore>,
        audit: Arc<dyn AuditSink>,
        options: SchedulerOptions,
    ) -> Result<Self, CoreError> {
        let jobs = JobScheduler::new()
            .await
            .map_err(|e| CoreError::Process(format!("failed to create job scheduler: {e}")))?;

        Ok(Self {
            job: Arc::new(AutoBackup {
                engine,
                audit,
                config: RwLock::new(None),
            }),
            settings,
            jobs,
            options,
            active: Mutex::new(Vec::new()),
        })
    }

    pub async fn start(&self) -> Result<(), CoreError> {
        self.jobs
            .start()
            .await
            .map_err(|e| CoreError::Process(format!("failed to start job scheduler: {e}")))?;
        info!("backup scheduler started");
        Ok(())
    }

    /// Load the initial schedule (settings store, then `env`, then the
    /// disabled default) and arm it. The loaded schedule is not written back.
    pub async fn init(&self, env: impl Fn(&str) -> Option<String>) -> Result<BackupScheduleConfig, CoreError> {
        let config = self.load_initial_config(env).await;
        let mut active = self.active.lock().await;
        self.replace_locked(&mut active, &config, &job_patterns(&config)).await?;
        Ok(config)
    }

    async fn load_initial_config(&self, env: impl Fn(&str) -> Option<String>) -> BackupScheduleConfig {
        match self.settings.get(&[SCHEDULE_SETTING_KEY]).await {
            Ok(entries) => {
                if let Some(entry) = entries.into_iter().next() {
                    match serde_json::from_value::<BackupScheduleConfig>(entry.value) {
                        Ok(config) if validate_schedule_config(&config).valid => {
                            info!("loaded backup schedule from settings");
                            return config;
                        }
                        Ok(_) => warn!("stored backup schedule is invalid, ignoring it"),
                        Err(err) => warn!("stored backup schedule is malformed: {err}"),
                    }
                }
            }
            Err(err) => warn!("failed to read backup schedule from settings: {err}"),
        }

        if let Some(config) = schedule_from_env(env) {
            let validation = validate_schedule_config(&config);
            if validation.valid {
                info!("loaded backup schedule from environment");
                return config;
            }
            warn!("backup schedule from environment is invalid: {}", validation.errors.join("; "));
        }

        BackupScheduleConfig::default()
    }

    /// Replace the schedule: arm the new jobs, cancel the tracked ones, then
    /// persist. Invalid configs and arming failures leave the current
    /// schedule untouched.
    pub async fn update_scheduler(&self, config: BackupScheduleConfig) -> Result<(), CoreError> {
        let validation = validate_schedule_config(&config);
        if !validation.valid {
            return Err(CoreError::Validation(validation.errors.join("; ")));
        }

        let mut active = self.active.lock().await;
        self.replace_locked(&mut active, &config, &job_patterns(&config)).await?;

        match serde_json::to_value(&config) {
            Ok(value) => {
                if let Err(err) = self.settings.upsert(SCHEDULE_SETTING_KEY, value).await {
                    warn!("failed to persist backup schedule: {err}");
                }
            }
            Err(err) => warn!("failed to serialize backup schedule: {err}"),
        }
        Ok(())
    }

    pub async fn execute_auto_backup(&self) {
        self.job.run().await;
    }

    pub async fn current_config(&self) -> Option<BackupScheduleConfig> {
        self.job.config.read().await.clone()
    }

    /// Number of job handles a later update can cancel.
    pub async fn active_job_count(&self) -> usize {
        self.active.lock().await.len()
    }

    async fn replace_locked(
        &self,
        active: &mut Vec<Uuid>,
        config: &BackupScheduleConfig,
        patterns: &[String],
    ) -> Result<(), CoreError> {
        let armed = self.add_jobs(patterns).await?;
        self.cancel_locked(active).await;
        *self.job.config.write().await = Some(config.clone());

        if armed.is_empty() {
            info!("automatic backups disabled");
            return Ok(());
        }
        for (idx, id) in armed.into_iter().enumerate() {
            if idx == 0 || self.options.track_all_jobs {
                active.push(id);
            } else {
                debug!("backup job {id} armed without a cancel handle");
            }
        }
        info!(
            "automatic {} backups armed: {}",
            config.mode,
            patterns.join(" | ")
        );
        Ok(())
    }

    async fn cancel_locked(&self, active: &mut Vec<Uuid>) {
        for id in active.drain(..) {
            self.remove_job(id).await;
        }
    }

    /// Add one job per pattern. If any fails, the ones already added are removed.
    async fn add_jobs(&self, patterns: &[String]) -> Result<Vec<Uuid>, CoreError> {
        let mut armed = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            match self.add_job(pattern).await {
                Ok(id) => armed.push(id),
                Err(err) => {
                    for id in armed {
                        self.remove_job(id).await;
                    }
                    return Err(err);
                }
            }
        }
        Ok(armed)
    }

    async fn add_job(&self, pattern: &str) -> Result<Uuid, CoreError> {
        let schedule = to_job_schedule(pattern)?;
        let job_body = Arc::clone(&self.job);
        let job = Job::new_async_tz(schedule.as_str(), Local, move |_uuid, _lock| {
            let job_body = Arc::clone(&job_body);
            Box::pin(async move {
                job_body.run().await;
            })
        })
        .map_err(|e| CoreError::Validation(format!("invalid backup schedule {pattern:?}: {e}")))?;

        self.jobs
            .add(job)
            .await
            .map_err(|e| CoreError::Process(format!("failed to arm backup job: {e}")))
    }

    async fn remove_job(&self, id: Uuid) {
        if let Err(err) = self.jobs.remove(&id).await {
            warn!("failed to cancel backup job {id}: {err}");
        }
    }
}

/// 5-field patterns the config fires on. Empty when automatic backups are off.
fn job_patterns(config: &BackupScheduleConfig) -> Vec<String> {
    if !config.is_active() {
        return Vec::new();
    }
    let patterns = if config.frequency() == Some(Frequency::Custom)
        && config.multiple_daily.as_ref().is_some_and(|times| !times.is_empty())
    {
        multiple_daily_patterns(config)
    } else {
        config_to_cron_pattern(config).into_iter().collect()
    };
    if patterns.is_empty() {
        warn!("backup schedule {} has no time to run at", config.frequency);
    }
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::backup::{RetentionPolicy, ServerControl};
    use crate::settings::MemorySettings;
    use async_trait::async_trait;
    use mcpanel_utils::InstancePaths;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::time::{SystemTime, UNIX_EPOCH};

    struct IdleServer;

    #[async_trait]
    impl ServerControl for IdleServer {
        async fn is_running(&self) -> bool {
            false
        }

        async fn stop(&self) -> Result<(), CoreError> {
            Ok(())
        }

        async fn start(&self) -> Result<(), CoreError> {
            Ok(())
        }
    }

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("mcpanel-scheduler-{prefix}-{nanos}"));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    fn engine(root: &Path) -> Arc<BackupEngine> {
        Arc::new(BackupEngine::new(
            InstancePaths::with_default_backups(root),
            Arc::new(IdleServer),
            None,
            RetentionPolicy::default(),
        ))
    }

    async fn scheduler_with(
        root: &Path,
        settings: Arc<MemorySettings>,
        audit: Arc<MemoryAuditSink>,
        options: SchedulerOptions,
    ) -> BackupScheduler {
        BackupScheduler::new(engine(root), settings, audit, options)
            .await
            .expect("create scheduler")
    }

    fn daily(at: &str) -> BackupScheduleConfig {
        BackupScheduleConfig {
            enabled: true,
            frequency: "daily".into(),
            mode: "world".into(),
            daily_at: Some(at.into()),
            ..BackupScheduleConfig::default()
        }
    }

    fn multi_time() -> BackupScheduleConfig {
        BackupScheduleConfig {
            enabled: true,
            frequency: "custom".into(),
            mode: "full".into(),
            multiple_daily: Some(vec!["01:00".into(), "13:00".into()]),
            ..BackupScheduleConfig::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn init_prefers_stored_schedule_over_env() {
        let root = unique_temp_dir("init-store");
        let settings = Arc::new(MemorySettings::default());
        settings
            .upsert(SCHEDULE_SETTING_KEY, serde_json::to_value(daily("04:30")).expect("to json"))
            .await
            .expect("seed settings");
        let scheduler = scheduler_with(&root, settings, Arc::default(), SchedulerOptions::default()).await;

        let env = HashMap::from([("BACKUP_FREQUENCY", "weekly")]);
        let config = scheduler
            .init(|key| env.get(key).map(|v| v.to_string()))
            .await
            .expect("init");
        assert_eq!(config.daily_at.as_deref(), Some("04:30"));
        assert_eq!(scheduler.active_job_count().await, 1);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn init_falls_back_to_env_then_default() {
        let root = unique_temp_dir("init-env");
        let settings = Arc::new(MemorySettings::default());
        settings
            .upsert(SCHEDULE_SETTING_KEY, json!({ "enabled": true, "frequency": "hourly", "mode": "world" }))
            .await
            .expect("seed invalid settings");
        let scheduler = scheduler_with(&root, settings.clone(), Arc::default(), SchedulerOptions::default()).await;

        let env = HashMap::from([("BACKUP_FREQUENCY", "weekly"), ("BACKUP_WEEKLY_ON", "3")]);
        let config = scheduler
            .init(|key| env.get(key).map(|v| v.to_string()))
            .await
            .expect("init from env");
        assert_eq!(config.frequency, "weekly");
        assert_eq!(config.weekly_on, Some(3));
        assert_eq!(scheduler.active_job_count().await, 1);

        let stored = settings.get(&[SCHEDULE_SETTING_KEY]).await.expect("get");
        assert_eq!(stored[0].value["frequency"], "hourly");

        let fresh = scheduler_with(&root, Arc::default(), Arc::default(), SchedulerOptions::default()).await;
        let config = fresh.init(|_| None).await.expect("init default");
        assert_eq!(config, BackupScheduleConfig::default());
        assert_eq!(fresh.active_job_count().await, 0);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn update_persists_and_rearms() {
        let root = unique_temp_dir("update");
        let settings = Arc::new(MemorySettings::default());
        let scheduler = scheduler_with(&root, settings.clone(), Arc::default(), SchedulerOptions::default()).await;

        scheduler.update_scheduler(daily("02:15")).await.expect("daily");
        assert_eq!(scheduler.active_job_count().await, 1);
        let stored = settings.get(&[SCHEDULE_SETTING_KEY]).await.expect("get");
        assert_eq!(stored[0].value["dailyAt"], "02:15");

        scheduler
            .update_scheduler(BackupScheduleConfig::default())
            .await
            .expect("disable");
        assert_eq!(scheduler.active_job_count().await, 0);
        assert_eq!(scheduler.current_config().await, Some(BackupScheduleConfig::default()));
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invalid_update_keeps_current_jobs() {
        let root = unique_temp_dir("invalid");
        let scheduler = scheduler_with(&root, Arc::default(), Arc::default(), SchedulerOptions::default()).await;
        scheduler.update_scheduler(daily("02:15")).await.expect("daily");

        let err = scheduler
            .update_scheduler(daily("25:00"))
            .await
            .expect_err("invalid time");
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(scheduler.active_job_count().await, 1);
        assert_eq!(
            scheduler.current_config().await.and_then(|c| c.daily_at),
            Some("02:15".to_string())
        );
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn multi_time_schedule_keeps_only_first_handle_by_default() {
        let root = unique_temp_dir("multi");
        let scheduler = scheduler_with(&root, Arc::default(), Arc::default(), SchedulerOptions::default()).await;
        scheduler.update_scheduler(multi_time()).await.expect("multi");
        assert_eq!(scheduler.active_job_count().await, 1);

        let tracked = scheduler_with(
            &root,
            Arc::default(),
            Arc::default(),
            SchedulerOptions { track_all_jobs: true },
        )
        .await;
        tracked.update_scheduler(multi_time()).await.expect("multi tracked");
        assert_eq!(tracked.active_job_count().await, 2);
        tracked
            .update_scheduler(BackupScheduleConfig::default())
            .await
            .expect("disable");
        assert_eq!(tracked.active_job_count().await, 0);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn persistence_failure_does_not_block_scheduling() {
        let root = unique_temp_dir("persist");
        let scheduler = scheduler_with(
            &root,
            Arc::new(MemorySettings::failing()),
            Arc::default(),
            SchedulerOptions::default(),
        )
        .await;
        scheduler.update_scheduler(daily("05:00")).await.expect("update");
        assert_eq!(scheduler.active_job_count().await, 1);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn auto_backup_without_schedule_does_nothing() {
        let root = unique_temp_dir("noconfig");
        let audit = Arc::new(MemoryAuditSink::default());
        let scheduler = scheduler_with(&root, Arc::default(), audit.clone(), SchedulerOptions::default()).await;
        scheduler.execute_auto_backup().await;
        assert!(audit.events().is_empty());
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn auto_backup_audits_and_always_prunes() {
        let root = unique_temp_dir("auto");
        let audit = Arc::new(MemoryAuditSink::default());
        let scheduler = scheduler_with(&root, Arc::default(), audit.clone(), SchedulerOptions::default()).await;
        scheduler.update_scheduler(daily("03:00")).await.expect("daily");

        scheduler.execute_auto_backup().await;
        assert_eq!(
            audit.outcomes(AUTO_BACKUP_ACTION),
            vec![AuditOutcome::Start, AuditOutcome::Error]
        );
        assert_eq!(audit.outcomes(RETENTION_ACTION), vec![AuditOutcome::Success]);

        std::fs::create_dir_all(root.join("world")).expect("create world");
        std::fs::write(root.join("world/level.dat"), b"level").expect("write level");
        scheduler.execute_auto_backup().await;
        assert_eq!(
            audit.outcomes(AUTO_BACKUP_ACTION),
            vec![
                AuditOutcome::Start,
                AuditOutcome::Error,
                AuditOutcome::Start,
                AuditOutcome::Success
            ]
        );
        let backups = std::fs::read_dir(root.join("backups"))
            .expect("read backups")
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tar.gz"))
            .count();
        assert_eq!(backups, 1);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_arming_keeps_previous_schedule() {
        let root = unique_temp_dir("arm-fail");
        let settings = Arc::new(MemorySettings::default());
        let scheduler = scheduler_with(
            &root,
            settings.clone(),
            Arc::default(),
            SchedulerOptions { track_all_jobs: true },
        )
        .await;
        scheduler.update_scheduler(daily("02:15")).await.expect("daily");

        let mut active = scheduler.active.lock().await;
        let patterns = vec!["0 1 * * *".to_string(), "0 25 * * *".to_string()];
        let err = scheduler
            .replace_locked(&mut active, &multi_time(), &patterns)
            .await
            .expect_err("second pattern cannot be armed");
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(active.len(), 1);
        drop(active);

        assert_eq!(
            scheduler.current_config().await.and_then(|c| c.daily_at),
            Some("02:15".to_string())
        );
        let stored = settings.get(&[SCHEDULE_SETTING_KEY]).await.expect("get");
        assert_eq!(stored[0].value["dailyAt"], "02:15");

        scheduler.update_scheduler(multi_time()).await.expect("multi");
        assert_eq!(scheduler.active_job_count().await, 2);
        let _ = std::fs::remove_dir_all(root);
    }
}
