use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use mcpanel_core::CoreError;
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct SettingEntry {
    pub key: String,
    pub value: Value,
}

/// Key/value store the scheduler persists its schedule into.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Entries for the keys that exist, in request order.
    async fn get(&self, keys: &[&str]) -> Result<Vec<SettingEntry>, CoreError>;
    async fn upsert(&self, key: &str, value: Value) -> Result<(), CoreError>;
}

/// Settings kept as one JSON object in the daemon data dir.
pub struct JsonFileSettings {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<BTreeMap<String, Value>, CoreError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(value) => value,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(CoreError::Persistence(format!(
                    "failed to read {}: {err}",
                    self.path.display()
                )));
            }
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|err| {
            CoreError::Persistence(format!("failed to parse {}: {err}", self.path.display()))
        })
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettings {
    async fn get(&self, keys: &[&str]) -> Result<Vec<SettingEntry>, CoreError> {
        let all = self.read_all().await?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                all.get(*key).map(|value| SettingEntry {
                    key: key.to_string(),
                    value: value.clone(),
                })
            })
            .collect())
    }

    async fn upsert(&self, key: &str, value: Value) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        all.insert(key.to_string(), value);

        let persist = |err: std::io::Error| CoreError::Persistence(format!("failed to write settings: {err}"));
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(persist)?;
        }
        let payload = serde_json::to_string_pretty(&all)
            .map_err(|err| CoreError::Persistence(format!("failed to serialize settings: {err}")))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload.as_bytes()).await.map_err(persist)?;
        if let Err(err) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(persist(err));
        }
        Ok(())
    }
}

/// In-process store. `fail_writes` makes every upsert fail.
#[cfg(test)]
#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<BTreeMap<String, Value>>,
    pub fail_writes: bool,
}

#[cfg(test)]
impl MemorySettings {
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
#[async_trait]
impl SettingsStore for MemorySettings {
    async fn get(&self, keys: &[&str]) -> Result<Vec<SettingEntry>, CoreError> {
        let values = self.values.lock().await;
        Ok(keys
            .iter()
            .filter_map(|key| {
                values.get(*key).map(|value| SettingEntry {
                    key: key.to_string(),
                    value: value.clone(),
                })
            })
            .collect())
    }

    async fn upsert(&self, key: &str, value: Value) -> Result<(), CoreError> {
        if self.fail_writes {
            return Err(CoreError::Persistence("settings store is read-only".into()));
        }
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}
