use std::path::{Path, PathBuf};

/// Directory layout of one supervised server instance.
#[derive(Debug, Clone)]
pub struct InstancePaths {
    pub instance_dir: PathBuf,
    pub backup_dir: PathBuf,
}

impl InstancePaths {
    pub fn new(instance_dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            instance_dir: instance_dir.into(),
            backup_dir: backup_dir.into(),
        }
    }

    /// Backups live next to the world by default.
    pub fn with_default_backups(instance_dir: impl Into<PathBuf>) -> Self {
        let instance_dir = instance_dir.into();
        let backup_dir = instance_dir.join("backups");
        Self { instance_dir, backup_dir }
    }

    pub fn world_dir(&self) -> PathBuf {
        self.instance_dir.join("world")
    }

    pub fn server_jar(&self) -> PathBuf {
        self.instance_dir.join("server.jar")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.backup_dir.join("snapshots")
    }
}

/// Daemon-owned files (config, settings, lock).
pub struct DataPaths {
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
    pub settings_path: PathBuf,
    pub lock_path: PathBuf,
}

const APP_ID: &str = "mcpanel";

pub fn data_paths() -> DataPaths {
    if let Some(dir) = std::env::var_os("MCPANEL_DATA_DIR") {
        return mk(PathBuf::from(dir));
    }
    if let Some(base) = dirs::data_dir() {
        return mk(base.join(APP_ID));
    }
    if let Some(home) = dirs::home_dir() {
        return mk(home.join(format!(".{APP_ID}")));
    }

    // Last resort fallback
    mk(std::env::temp_dir().join(APP_ID))
}

fn mk(data_dir: PathBuf) -> DataPaths {
    DataPaths {
        config_path: data_dir.join("config.json"),
        settings_path: data_dir.join("settings.json"),
        lock_path: data_dir.join("mcpaneld.lock"),
        data_dir,
    }
}

pub fn ensure_dir(p: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(p)
}

pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
