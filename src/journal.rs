use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{info, warn};

use crate::models::JobEvaluation;
use crate::stats::CycleStats;

const HEALTH_FILE: &str = "health.json";
pub const LOG_RETENTION_DAYS: i64 = 30;

// Longer than the longest check interval plus a cycle
const MAX_STALE_MINUTES: i64 = 90;

static LOG_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:errors-)?(\d{4}-\d{2}-\d{2})\.json$").expect("valid regex"));

/// Append-only sinks the coordinator writes to. Failures are logged, never returned.
pub trait Journal: Send + Sync {
    fn record_evaluation(&self, evaluation: &JobEvaluation);
    fn record_error(&self, context: &str, message: &str);
    fn write_snapshot(&self, stats: &CycleStats);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Utc>,
    pub context: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub updated_at: DateTime<Utc>,
    pub total_cycles: u64,
    pub total_errors: u64,
    pub last_cycle_duration_ms: Option<u64>,
}

pub struct FileJournal {
    log_dir: PathBuf,
}

impl FileJournal {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self { log_dir: log_dir.into() }
    }

    pub fn evaluation_log_path(&self, date: NaiveDate) -> PathBuf {
        self.log_dir.join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    pub fn error_log_path(&self, date: NaiveDate) -> PathBuf {
        self.log_dir.join(format!("errors-{}.json", date.format("%Y-%m-%d")))
    }

    pub fn health_path(&self) -> PathBuf {
        health_path(&self.log_dir)
    }

    fn append<T: Serialize + DeserializeOwned>(&self, path: &Path, entry: T) -> Result<()> {
        fs::create_dir_all(&self.log_dir)
            .with_context(|| format!("Failed to create log directory: {}", self.log_dir.display()))?;

        let mut entries: Vec<T> = read_json_array(path)?;
        entries.push(entry);

        let content = serde_json::to_string_pretty(&entries)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    fn try_write_snapshot(&self, stats: &CycleStats) -> Result<()> {
        let health = HealthStatus {
            status: "ok".to_string(),
            updated_at: Utc::now(),
            total_cycles: stats.total_cycles,
            total_errors: stats.total_errors,
            last_cycle_duration_ms: stats.last_cycle_duration_ms,
        };
        let path = self.health_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(&health)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

impl Journal for FileJournal {
    fn record_evaluation(&self, evaluation: &JobEvaluation) {
        let path = self.evaluation_log_path(Utc::now().date_naive());
        if let Err(e) = self.append(&path, evaluation.clone()) {
            warn!(error = %e, "Failed to log evaluation");
        }
    }

    fn record_error(&self, context: &str, message: &str) {
        let entry = ErrorLogEntry {
            timestamp: Utc::now(),
            context: context.to_string(),
            message: message.to_string(),
        };
        let path = self.error_log_path(Utc::now().date_naive());
        if let Err(e) = self.append(&path, entry) {
            warn!(error = %e, "Failed to log error");
        }
    }

    fn write_snapshot(&self, stats: &CycleStats) {
        if let Err(e) = self.try_write_snapshot(stats) {
            warn!(error = %e, "Failed to write health file");
        }
    }
}

fn read_json_array<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Corrupt log file: {}", path.display()))
}

/// `health.json` sits next to the log directory, not inside it.
pub fn health_path(log_dir: &Path) -> PathBuf {
    let parent = log_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    parent.join(HEALTH_FILE)
}

pub fn check_health(log_dir: &Path) -> bool {
    check_health_at(log_dir, Utc::now())
}

fn check_health_at(log_dir: &Path, now: DateTime<Utc>) -> bool {
    let Ok(content) = fs::read_to_string(health_path(log_dir)) else {
        return false;
    };
    let Ok(health) = serde_json::from_str::<HealthStatus>(&content) else {
        return false;
    };
    health.status == "ok" && now - health.updated_at < Duration::minutes(MAX_STALE_MINUTES)
}

/// Delete dated evaluation and error logs older than `max_age_days`.
pub fn rotate_logs(log_dir: &Path, max_age_days: i64) -> Result<usize> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let cutoff = Utc::now() - Duration::days(max_age_days);
    let mut deleted = 0;

    for entry in fs::read_dir(log_dir).with_context(|| format!("Failed to read {}", log_dir.display()))? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some(caps) = LOG_FILE_RE.captures(name) else {
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d") else {
            continue;
        };
        let Some(midnight) = date.and_hms_opt(0, 0, 0) else {
            continue;
        };

        if midnight.and_utc() < cutoff {
            fs::remove_file(entry.path())
                .with_context(|| format!("Failed to delete {}", entry.path().display()))?;
            deleted += 1;
        }
    }

    if deleted > 0 {
        info!(deleted, "Rotated old log files");
    }
    Ok(deleted)
}
