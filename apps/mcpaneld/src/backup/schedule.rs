use mcpanel_core::CoreError;
use mcpanel_core::proto::{BackupMode, BackupScheduleConfig, Frequency, ScheduleValidation};

pub const DEFAULT_TIME: &str = "03:00";
pub const DEFAULT_WEEKDAY: u8 = 0;

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

struct CronField {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    names_base: u32,
}

const FIELDS: [CronField; 5] = [
    CronField { name: "minute", min: 0, max: 59, names: &[], names_base: 0 },
    CronField { name: "hour", min: 0, max: 23, names: &[], names_base: 0 },
    CronField { name: "day-of-month", min: 1, max: 31, names: &[], names_base: 0 },
    CronField { name: "month", min: 1, max: 12, names: &MONTH_NAMES, names_base: 1 },
    CronField { name: "day-of-week", min: 0, max: 7, names: &WEEKDAY_NAMES, names_base: 0 },
];

/// Structural check of a schedule. Never fails; problems are collected.
pub fn validate_schedule_config(config: &BackupScheduleConfig) -> ScheduleValidation {
    let mut errors = Vec::new();

    let frequency = config.frequency();
    if frequency.is_none() {
        let allowed: Vec<&str> = Frequency::ALL.iter().map(Frequency::as_str).collect();
        errors.push(format!(
            "frequency must be one of {}, got {:?}",
            allowed.join(", "),
            config.frequency
        ));
    }
    if config.mode().is_none() {
        errors.push(format!("mode must be full or world, got {:?}", config.mode));
    }
    if let Some(at) = &config.daily_at {
        if parse_time_of_day(at).is_none() {
            errors.push(format!("dailyAt must be HH:MM (24-hour), got {at:?}"));
        }
    }
    if let Some(day) = config.weekly_on {
        if day > 6 {
            errors.push(format!("weeklyOn must be between 0 and 6, got {day}"));
        }
    }
    if let Some(times) = &config.multiple_daily {
        for time in times {
            if parse_time_of_day(time).is_none() {
                errors.push(format!("multipleDaily entries must be HH:MM (24-hour), got {time:?}"));
            }
        }
    }
    if frequency == Some(Frequency::Custom) {
        if let Some(pattern) = &config.cron_pattern {
            if let Err(err) = parse_cron(pattern) {
                errors.push(format!("cronPattern is invalid: {err}"));
            }
        }
    }

    ScheduleValidation {
        valid: errors.is_empty(),
        errors,
    }
}

/// The single 5-field cron pattern a schedule maps to. A custom schedule with
/// several times only yields its first one here.
pub fn config_to_cron_pattern(config: &BackupScheduleConfig) -> Option<String> {
    if !config.enabled {
        return None;
    }
    let daily_at = config.daily_at.as_deref().unwrap_or(DEFAULT_TIME);
    match config.frequency()? {
        Frequency::Disabled => None,
        Frequency::Daily => at_time(daily_at, "*", "*"),
        Frequency::Every2Days => at_time(daily_at, "*/2", "*"),
        Frequency::Every3Days => at_time(daily_at, "*/3", "*"),
        Frequency::Weekly => {
            let day = config.weekly_on.unwrap_or(DEFAULT_WEEKDAY).to_string();
            at_time(daily_at, "*", &day)
        }
        Frequency::Custom => {
            if let Some(pattern) = config.cron_pattern.as_deref().map(str::trim) {
                if !pattern.is_empty() {
                    return Some(pattern.to_string());
                }
            }
            let first = config.multiple_daily.as_ref()?.first()?;
            at_time(first, "*", "*")
        }
    }
}

/// Daily patterns for every entry of a custom multi-time schedule.
pub fn multiple_daily_patterns(config: &BackupScheduleConfig) -> Vec<String> {
    config
        .multiple_daily
        .iter()
        .flatten()
        .filter_map(|time| at_time(time, "*", "*"))
        .collect()
}

fn at_time(time: &str, day_of_month: &str, day_of_week: &str) -> Option<String> {
    let (hour, minute) = parse_time_of_day(time)?;
    Some(format!("{minute} {hour} {day_of_month} * {day_of_week}"))
}

/// Parse a strict `HH:MM` 24-hour time.
pub fn parse_time_of_day(value: &str) -> Option<(u32, u32)> {
    let (h, m) = value.split_once(':')?;
    if h.len() != 2 || m.len() != 2 {
        return None;
    }
    if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

/// Validate a 5-field cron expression and return its fields.
pub fn parse_cron(pattern: &str) -> Result<Vec<&str>, String> {
    let fields: Vec<&str> = pattern.split_whitespace().collect();
    if fields.len() != FIELDS.len() {
        return Err(format!("expected 5 fields, got {}", fields.len()));
    }
    for (value, field) in fields.iter().zip(FIELDS.iter()) {
        validate_field(value, field)?;
    }
    Ok(fields)
}

fn validate_field(value: &str, field: &CronField) -> Result<(), String> {
    for item in value.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (item, None),
        };
        if let Some(step) = step {
            match step.parse::<u32>() {
                Ok(n) if n > 0 => {}
                _ => return Err(format!("invalid step {step:?} in {} field", field.name)),
            }
        }
        if base == "*" {
            continue;
        }
        let (lo, hi) = match base.split_once('-') {
            Some((lo, hi)) => (lo, Some(hi)),
            None => (base, None),
        };
        let lo = field_value(lo, field)?;
        if let Some(hi) = hi {
            let hi = field_value(hi, field)?;
            if hi < lo {
                return Err(format!("range {base:?} is reversed in {} field", field.name));
            }
        }
    }
    Ok(())
}

fn field_value(token: &str, field: &CronField) -> Result<u32, String> {
    let upper = token.to_ascii_uppercase();
    if let Some(idx) = field.names.iter().position(|name| *name == upper) {
        return Ok(idx as u32 + field.names_base);
    }
    let n: u32 = token
        .parse()
        .map_err(|_| format!("invalid value {token:?} in {} field", field.name))?;
    if n < field.min || n > field.max {
        return Err(format!(
            "{n} is outside {}-{} in {} field",
            field.min, field.max, field.name
        ));
    }
    Ok(n)
}

/// Convert a 5-field pattern to the seconds-first 6-field form used by the
/// job scheduler. Weekday numbers pass through as is (0 and 7 are both Sunday).
pub fn to_job_schedule(pattern: &str) -> Result<String, CoreError> {
    let fields = parse_cron(pattern).map_err(|err| CoreError::Validation(format!("{pattern:?}: {err}")))?;
    Ok(format!(
        "0 {} {} {} {} {}",
        fields[0],
        fields[1],
        fields[2],
        fields[3].to_ascii_uppercase(),
        fields[4].to_ascii_uppercase()
    ))
}

/// Schedule described by `BACKUP_*` variables, if `BACKUP_FREQUENCY` is set.
pub fn schedule_from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<BackupScheduleConfig> {
    let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let frequency = read("BACKUP_FREQUENCY")?.to_ascii_lowercase();
    let times = read("BACKUP_TIMES").map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>()
    });

    Some(BackupScheduleConfig {
        enabled: frequency != Frequency::Disabled.as_str(),
        frequency,
        mode: read("BACKUP_MODE")
            .map(|m| m.to_ascii_lowercase())
            .unwrap_or_else(|| BackupMode::World.as_str().to_string()),
        cron_pattern: read("BACKUP_CRON"),
        daily_at: read("BACKUP_DAILY_AT"),
        weekly_on: read("BACKUP_WEEKLY_ON").and_then(|d| d.parse().ok()),
        multiple_daily: times.filter(|t| !t.is_empty()),
    })
}
