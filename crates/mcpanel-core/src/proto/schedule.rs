use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::BackupMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Frequency {
    Disabled,
    Daily,
    #[serde(rename = "every-2-days")]
    Every2Days,
    #[serde(rename = "every-3-days")]
    Every3Days,
    Weekly,
    Custom,
}

impl Frequency {
    pub const ALL: [Frequency; 6] = [
        Self::Disabled,
        Self::Daily,
        Self::Every2Days,
        Self::Every3Days,
        Self::Weekly,
        Self::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Daily => "daily",
            Self::Every2Days => "every-2-days",
            Self::Every3Days => "every-3-days",
            Self::Weekly => "weekly",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|freq| freq.as_str() == s)
            .ok_or_else(|| format!("unknown frequency: {s}"))
    }
}

/// Automatic backup schedule. `frequency` and `mode` are kept as raw strings so
/// malformed input reaches validation instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupScheduleConfig {
    pub enabled: bool,
    pub frequency: String,
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly_on: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiple_daily: Option<Vec<String>>,
}

impl Default for BackupScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: Frequency::Disabled.as_str().to_string(),
            mode: BackupMode::World.as_str().to_string(),
            cron_pattern: None,
            daily_at: None,
            weekly_on: None,
            multiple_daily: None,
        }
    }
}

impl BackupScheduleConfig {
    pub fn frequency(&self) -> Option<Frequency> {
        self.frequency.parse().ok()
    }

    pub fn mode(&self) -> Option<BackupMode> {
        self.mode.parse().ok()
    }

    /// True when the schedule should arm at least one job.
    pub fn is_active(&self) -> bool {
        self.enabled && !matches!(self.frequency(), Some(Frequency::Disabled) | None)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_round_trips_through_strings() {
        for freq in Frequency::ALL {
            assert_eq!(freq.as_str().parse::<Frequency>(), Ok(freq));
        }
        assert!("hourly".parse::<Frequency>().is_err());
    }

    #[test]
    fn config_uses_camel_case_keys() {
        let raw = r#"{"enabled":true,"frequency":"custom","mode":"full","multipleDaily":["01:00","13:00"]}"#;
        let config: BackupScheduleConfig = serde_json::from_str(raw).expect("parse config");
        assert_eq!(config.frequency(), Some(Frequency::Custom));
        assert_eq!(config.mode(), Some(BackupMode::Full));
        assert_eq!(config.multiple_daily.as_deref().map(<[String]>::len), Some(2));
        assert!(config.is_active());
    }

    #[test]
    fn default_schedule_is_disabled_world() {
        let config = BackupScheduleConfig::default();
        assert!(!config.is_active());
        assert_eq!(config.mode(), Some(BackupMode::World));
    }
}
