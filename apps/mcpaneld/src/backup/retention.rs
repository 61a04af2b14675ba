use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use mcpanel_core::proto::BackupInfo;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Every backup younger than this many days is kept.
    pub days: u32,
    /// Number of most recent week buckets that keep one older backup each.
    pub weeks: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { days: 7, weeks: 4 }
    }
}

/// Week bucket of a timestamp: `ceil((utc day-of-month + weekday of Jan 1) / 7)`
/// with Sunday = 0. This is not ISO week numbering; days in different months
/// can share a bucket.
pub fn week_key(ts_ms: u64) -> String {
    let at = DateTime::<Utc>::from_timestamp_millis(ts_ms as i64).unwrap_or_default();
    let year = at.year();
    let first_weekday = NaiveDate::from_ymd_opt(year, 1, 1)
        .map(|jan1| jan1.weekday().num_days_from_sunday())
        .unwrap_or(0);
    let week = (at.day() + first_weekday).div_ceil(7);
    format!("{year}-W{week}")
}

/// Ids of the backups that survive the policy at `now_ms`.
pub fn select_retained(backups: &[BackupInfo], now_ms: u64, policy: RetentionPolicy) -> HashSet<String> {
    let mut sorted: Vec<&BackupInfo> = backups.iter().collect();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let max_age_ms = u64::from(policy.days) * DAY_MS;
    let mut keep = HashSet::new();
    let mut buckets: HashMap<String, &BackupInfo> = HashMap::new();
    let mut bucket_order: Vec<String> = Vec::new();

    for backup in sorted {
        if now_ms.saturating_sub(backup.created_at) <= max_age_ms {
            keep.insert(backup.id.clone());
            continue;
        }
        let key = week_key(backup.created_at);
        if !buckets.contains_key(&key) {
            bucket_order.push(key.clone());
            buckets.insert(key, backup);
        }
    }

    // Buckets were discovered newest-first.
    for key in bucket_order.into_iter().take(policy.weeks) {
        if let Some(backup) = buckets.get(&key) {
            keep.insert(backup.id.clone());
        }
    }

    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ms(y: i32, m: u32, d: u32) -> u64 {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(12, 0, 0))
            .map(|dt| dt.and_utc().timestamp_millis() as u64)
            .expect("valid date")
    }

    fn backup(id: &str, created_at: u64) -> BackupInfo {
        BackupInfo {
            id: id.to_string(),
            path: PathBuf::from(id),
            size: 1,
            created_at,
        }
    }

    #[test]
    fn week_key_uses_day_of_month_and_jan_first_weekday() {
        // 2024-01-01 was a Monday (1).
        assert_eq!(week_key(ms(2024, 1, 1)), "2024-W1");
        assert_eq!(week_key(ms(2024, 1, 6)), "2024-W1");
        assert_eq!(week_key(ms(2024, 1, 7)), "2024-W2");
        // Same day-of-month in another month lands in the same bucket.
        assert_eq!(week_key(ms(2024, 3, 7)), "2024-W2");
        // 2023-01-01 was a Sunday (0).
        assert_eq!(week_key(ms(2023, 1, 7)), "2023-W1");
        assert_eq!(week_key(ms(2023, 1, 8)), "2023-W2");
    }

    #[test]
    fn recent_backups_are_all_kept() {
        let now = ms(2024, 5, 20);
        let backups = vec![
            backup("a", now - DAY_MS),
            backup("b", now - 2 * DAY_MS),
            backup("c", now - 7 * DAY_MS),
        ];
        let keep = select_retained(&backups, now, RetentionPolicy { days: 7, weeks: 0 });
        assert_eq!(keep.len(), 3);
    }

    #[test]
    fn only_newest_backup_per_old_bucket_survives() {
        let now = ms(2024, 5, 30);
        let lone = backup("lone", ms(2024, 5, 1));
        let newer = backup("newer", ms(2024, 5, 10));
        let older_same_bucket = backup("older", ms(2024, 5, 9));
        let backups = vec![older_same_bucket, lone, newer];
        assert_eq!(week_key(ms(2024, 5, 10)), week_key(ms(2024, 5, 9)));

        let keep = select_retained(&backups, now, RetentionPolicy { days: 7, weeks: 4 });
        assert!(keep.contains("lone"));
        assert!(keep.contains("newer"));
        assert!(!keep.contains("older"));
    }

    #[test]
    fn bucket_count_is_capped_to_most_recent_weeks() {
        let now = ms(2024, 6, 30);
        let backups = vec![
            backup("w1", ms(2024, 6, 1)),
            backup("w2", ms(2024, 6, 8)),
            backup("w3", ms(2024, 6, 15)),
        ];
        let keep = select_retained(&backups, now, RetentionPolicy { days: 7, weeks: 2 });
        assert_eq!(keep, HashSet::from(["w3".to_string(), "w2".to_string()]));
    }
}
