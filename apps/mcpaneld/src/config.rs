use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mcpanel_rcon::{DEFAULT_RCON_PORT, RconConfig, load_rcon_settings};
use mcpanel_utils::InstancePaths;

use crate::backup::RetentionPolicy;
use crate::supervisor::LaunchSpec;

/// Daemon settings: defaults, then `config.json` in the data dir, then env.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub instance_dir: PathBuf,
    pub backup_dir: Option<PathBuf>,
    pub java_bin: String,
    pub max_heap: String,
    pub min_heap: String,
    /// Explicit RCON settings. When absent they come from `server.properties`.
    pub rcon: Option<RconSection>,
    pub retention_days: u32,
    pub retention_weeks: usize,
    pub log_capacity: usize,
    pub stop_grace_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RconSection {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub password: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            instance_dir: PathBuf::from("server"),
            backup_dir: None,
            java_bin: "java".to_string(),
            max_heap: "2G".to_string(),
            min_heap: "1G".to_string(),
            rcon: None,
            retention_days: 7,
            retention_weeks: 4,
            log_capacity: 2000,
            stop_grace_secs: 30,
        }
    }
}

impl Default for RconSection {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_RCON_PORT,
            password: String::new(),
        }
    }
}

impl From<RconSection> for RconConfig {
    fn from(section: RconSection) -> Self {
        RconConfig {
            enabled: section.enabled,
            host: section.host,
            port: section.port,
            password: section.password,
        }
    }
}

pub fn load_config(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<DaemonConfig, String> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str::<DaemonConfig>(&content)
            .map_err(|err| format!("Failed to parse {}: {err}", path.display()))?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => DaemonConfig::default(),
        Err(err) => return Err(format!("Failed to read {}: {err}", path.display())),
    };
    config.apply_env(env)?;
    Ok(config)
}

impl DaemonConfig {
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), String> {
        let read = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(dir) = read("INSTANCE_DIR") {
            self.instance_dir = PathBuf::from(dir);
        }
        if let Some(dir) = read("BACKUP_DIR") {
            self.backup_dir = Some(PathBuf::from(dir));
        }
        if let Some(java) = read("JAVA_BIN") {
            self.java_bin = java;
        }
        if let Some(heap) = read("MAX_HEAP") {
            self.max_heap = heap;
        }
        if let Some(heap) = read("MIN_HEAP") {
            self.min_heap = heap;
        }
        if let Some(days) = read("RETENTION_DAYS") {
            self.retention_days = parse_number("RETENTION_DAYS", &days)?;
        }
        if let Some(weeks) = read("RETENTION_WEEKS") {
            self.retention_weeks = parse_number("RETENTION_WEEKS", &weeks)?;
        }
        if let Some(lines) = read("LOG_CAPACITY") {
            self.log_capacity = parse_number("LOG_CAPACITY", &lines)?;
        }

        let rcon_keys = ["RCON_ENABLED", "RCON_HOST", "RCON_PORT", "RCON_PASSWORD"];
        if rcon_keys.iter().any(|key| read(*key).is_some()) {
            let mut rcon = self.rcon.take().unwrap_or_default();
            if let Some(enabled) = read("RCON_ENABLED") {
                rcon.enabled = parse_bool(&enabled)
                    .ok_or_else(|| format!("Invalid RCON_ENABLED value: {enabled}"))?;
            }
            if let Some(host) = read("RCON_HOST") {
                rcon.host = host;
            }
            if let Some(port) = read("RCON_PORT") {
                rcon.port = parse_number("RCON_PORT", &port)?;
            }
            if let Some(password) = read("RCON_PASSWORD") {
                rcon.password = password;
            }
            self.rcon = Some(rcon);
        }
        Ok(())
    }

    pub fn instance_paths(&self) -> InstancePaths {
        match &self.backup_dir {
            Some(dir) => InstancePaths::new(&self.instance_dir, dir),
            None => InstancePaths::with_default_backups(&self.instance_dir),
        }
    }

    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec::java(&self.java_bin, &self.max_heap, &self.min_heap, &self.instance_paths())
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            days: self.retention_days,
            weeks: self.retention_weeks,
        }
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Explicit RCON settings win; otherwise read the instance's `server.properties`.
    pub async fn resolve_rcon(&self) -> RconConfig {
        if let Some(section) = &self.rcon {
            return section.clone().into();
        }
        load_rcon_settings(&self.instance_dir).await.unwrap_or_default()
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid {key} value: {value}"))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
