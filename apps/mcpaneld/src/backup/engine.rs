use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use mcpanel_core::CoreError;
use mcpanel_core::proto::{BackupInfo, BackupMode, RetentionReport};
use mcpanel_rcon::RconClient;
use mcpanel_utils::{InstancePaths, now_millis};
use tokio::fs;
use tokio::sync::Mutex;
use tokio::task;
use tracing::{info, warn};

use super::ServerControl;
use super::ops::{
    clear_dir_except_blocking, copy_dir_recursive_blocking, extract_archive_blocking, write_archive_blocking,
};
use super::rcon::{pause_saves, resume_saves};
use super::retention::{RetentionPolicy, select_retained};

pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Creates, lists, prunes and restores archives of one instance directory.
/// Every mutating operation runs under a single per-instance lock.
pub struct BackupEngine {
    paths: InstancePaths,
    server: Arc<dyn ServerControl>,
    rcon: Option<Arc<RconClient>>,
    retention: RetentionPolicy,
    op_lock: Mutex<()>,
}

impl BackupEngine {
    pub fn new(
        paths: InstancePaths,
        server: Arc<dyn ServerControl>,
        rcon: Option<Arc<RconClient>>,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            paths,
            server,
            rcon,
            retention,
            op_lock: Mutex::new(()),
        }
    }

    pub async fn list_backups(&self) -> Result<Vec<BackupInfo>, CoreError> {
        self.ensure_dirs().await?;

        let mut backups = Vec::new();
        let mut rd = fs::read_dir(&self.paths.backup_dir)
            .await
            .map_err(|e| CoreError::io("listing backups", e))?;
        while let Some(entry) = rd
            .next_entry()
            .await
            .map_err(|e| CoreError::io("listing backups", e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(ARCHIVE_SUFFIX) {
                continue;
            }
            match backup_info(&entry.path()).await {
                Ok(info) => backups.push(info),
                Err(err) => warn!("skipping backup {name}: {err}"),
            }
        }

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(backups)
    }

    pub async fn create_backup(&self, mode: BackupMode) -> Result<BackupInfo, CoreError> {
        let _op = self.op_lock.lock().await;

        let source = match mode {
            BackupMode::Full => self.paths.instance_dir.clone(),
            BackupMode::World => self.paths.world_dir(),
        };
        if !fs::try_exists(&source).await.unwrap_or(false) {
            return Err(CoreError::NotFound(format!(
                "{mode} backup source directory not found: {}",
                source.display()
            )));
        }
        self.ensure_dirs().await?;

        let id = archive_name(mode, Utc::now());
        let archive_path = self.paths.backup_dir.join(&id);
        info!("creating {mode} backup {id}");

        let rcon = self.rcon.as_deref();
        let paused = pause_saves(rcon, self.server.is_running().await).await;

        let root = self.paths.instance_dir.clone();
        let exclude = self.paths.backup_dir.clone();
        let out = archive_path.clone();
        let result = task::spawn_blocking(move || write_archive_blocking(&root, &source, &exclude, &out))
            .await
            .map_err(|e| CoreError::Archive(format!("archive task failed: {e}")));

        if paused {
            resume_saves(rcon).await;
        }

        if let Err(err) = result.and_then(|inner| inner) {
            warn!("backup {id} failed: {err}");
            return Err(err);
        }

        let info = backup_info(&archive_path).await?;
        info!("backup created: {} ({} bytes)", info.id, info.size);
        Ok(info)
    }

    pub async fn delete_backup(&self, id: &str) -> Result<(), CoreError> {
        validate_backup_id(id)?;
        let _op = self.op_lock.lock().await;

        let path = self.paths.backup_dir.join(id);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("backup deleted: {id}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::NotFound(format!("backup {id} not found")))
            }
            Err(e) => Err(CoreError::io("deleting backup", e)),
        }
    }

    /// Replace the instance directory with the contents of backup `id`.
    /// The server is stopped first and always started again afterwards.
    pub async fn restore_backup(&self, id: &str) -> Result<(), CoreError> {
        validate_backup_id(id)?;
        let archive = self.paths.backup_dir.join(id);
        if !fs::try_exists(&archive).await.unwrap_or(false) {
            return Err(CoreError::NotFound(format!("backup {id} not found")));
        }

        let _op = self.op_lock.lock().await;
        info!("restoring backup {id}");

        if let Err(err) = self.server.stop().await {
            warn!("stopping server before restore failed: {err}");
        }

        let restored = self.restore_locked(&archive).await;
        if let Err(err) = &restored {
            warn!("restore of {id} failed: {err}");
        }

        let restarted = self.server.start().await;
        match (restored, restarted) {
            (Ok(()), Ok(())) => {
                info!("backup {id} restored and server restarted");
                Ok(())
            }
            (Err(err), Ok(())) => Err(err),
            (restored, Err(restart)) => Err(CoreError::RestartFailed {
                restore_error: restored.err().map(|err| err.to_string()),
                restart_error: restart.to_string(),
            }),
        }
    }

    async fn restore_locked(&self, archive: &Path) -> Result<(), CoreError> {
        self.ensure_dirs().await?;

        let instance = canonical(&self.paths.instance_dir).await?;
        let backup_dir = canonical(&self.paths.backup_dir).await?;
        let snapshot = backup_dir
            .join("snapshots")
            .join(format!("snap-{}", now_millis()));
        let archive = archive.to_path_buf();

        task::spawn_blocking(move || -> Result<(), CoreError> {
            copy_dir_recursive_blocking(&instance, &snapshot, &backup_dir)?;
            info!("safety snapshot written to {}", snapshot.display());
            clear_dir_except_blocking(&instance, &backup_dir)?;
            extract_archive_blocking(&archive, &instance)
        })
        .await
        .map_err(|e| CoreError::Archive(format!("restore task failed: {e}")))?
    }

    pub async fn apply_retention(&self) -> Result<RetentionReport, CoreError> {
        self.apply_retention_at(now_millis()).await
    }

    pub async fn apply_retention_at(&self, now_ms: u64) -> Result<RetentionReport, CoreError> {
        let _op = self.op_lock.lock().await;

        let backups = self.list_backups().await?;
        let keep = select_retained(&backups, now_ms, self.retention);

        let mut report = RetentionReport::default();
        for backup in backups {
            if keep.contains(&backup.id) {
                report.kept.push(backup.id);
                continue;
            }
            match fs::remove_file(&backup.path).await {
                Ok(()) => {
                    info!("retention removed {}", backup.id);
                    report.removed.push(backup.id);
                }
                Err(err) => warn!("retention could not remove {}: {err}", backup.id),
            }
        }
        Ok(report)
    }

    async fn ensure_dirs(&self) -> Result<(), CoreError> {
        fs::create_dir_all(self.paths.snapshots_dir())
            .await
            .map_err(|e| CoreError::io("creating backup directory", e))
    }
}

/// `backup-<mode>-<ISO-8601 with ':' and '.' replaced by '-'>.tar.gz`
pub fn archive_name(mode: BackupMode, at: DateTime<Utc>) -> String {
    let stamp = at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string().replace([':', '.'], "-");
    format!("backup-{mode}-{stamp}{ARCHIVE_SUFFIX}")
}

pub fn validate_backup_id(id: &str) -> Result<(), CoreError> {
    if id.trim().is_empty() {
        return Err(CoreError::Validation("backup id must not be empty".into()));
    }
    if !id.ends_with(ARCHIVE_SUFFIX) {
        return Err(CoreError::Validation(format!("backup id must end with {ARCHIVE_SUFFIX}: {id}")));
    }
    if id.contains(['/', '\\']) || id.starts_with('.') {
        return Err(CoreError::Validation(format!("backup id must be a plain file name: {id}")));
    }
    Ok(())
}

async fn backup_info(path: &Path) -> Result<BackupInfo, CoreError> {
    let meta = fs::metadata(path)
        .await
        .map_err(|e| CoreError::io("reading backup metadata", e))?;
    if !meta.is_file() {
        return Err(CoreError::Validation(format!("{} is not a file", path.display())));
    }
    let created_at = meta
        .modified()
        .map_err(|e| CoreError::io("reading backup mtime", e))?
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let id = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(BackupInfo {
        id,
        path: fs::canonicalize(path).await.unwrap_or_else(|_| path.to_path_buf()),
        size: meta.len(),
        created_at,
    })
}

async fn canonical(path: &Path) -> Result<PathBuf, CoreError> {
    fs::canonicalize(path)
        .await
        .map_err(|e| CoreError::io("resolving instance paths", e))
}
