use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleStats {
    pub started_at: DateTime<Utc>,
    pub total_cycles: u64,
    pub total_emails_processed: u64,
    pub total_jobs_evaluated: u64,
    pub total_skipped: u64,
    pub total_errors: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_duration_ms: Option<u64>,
}

impl Default for CycleStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            total_cycles: 0,
            total_emails_processed: 0,
            total_jobs_evaluated: 0,
            total_skipped: 0,
            total_errors: 0,
            last_cycle_at: None,
            last_cycle_duration_ms: None,
        }
    }
}

impl CycleStats {
    pub fn record_cycle_start(&mut self) {
        self.total_cycles += 1;
        self.last_cycle_at = Some(Utc::now());
    }

    pub fn record_cycle_duration(&mut self, elapsed: Duration) {
        self.last_cycle_duration_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
    }

    pub fn record_email_processed(&mut self) {
        self.total_emails_processed += 1;
    }

    pub fn record_job_evaluated(&mut self) {
        self.total_jobs_evaluated += 1;
    }

    pub fn record_skipped(&mut self) {
        self.total_skipped += 1;
    }

    pub fn record_error(&mut self) {
        self.total_errors += 1;
    }

    pub fn summary(&self) -> String {
        let duration = match self.last_cycle_duration_ms {
            Some(ms) => format!("{:.1}s", ms as f64 / 1000.0),
            None => "n/a".to_string(),
        };
        format!(
            "cycle={} emails={} evaluated={} skipped={} errors={} duration={}",
            self.total_cycles,
            self.total_emails_processed,
            self.total_jobs_evaluated,
            self.total_skipped,
            self.total_errors,
            duration
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedError {
    pub context: String,
    pub message: String,
}

/// Per-cycle errors, flushed as one notification.
#[derive(Debug, Default)]
pub struct ErrorBuffer {
    entries: Vec<BufferedError>,
}

impl ErrorBuffer {
    pub fn push(&mut self, context: impl Into<String>, message: impl Into<String>) {
        self.entries.push(BufferedError {
            context: context.into(),
            message: message.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render and clear. `None` when nothing was buffered.
    pub fn drain_summary(&mut self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        let mut lines = vec![format!("{} error(s) in this cycle:", self.entries.len()), String::new()];
        lines.extend(
            self.entries
                .drain(..)
                .map(|e| format!("**{}**: {}", e.context, e.message)),
        );
        Some(lines.join("\n"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CyclePhase {
    #[default]
    Idle,
    Running,
    Aborting,
}

/// Everything the coordinator mutates across cycles. Single owner, passed by `&mut`.
#[derive(Debug, Default)]
pub struct RunState {
    pub stats: CycleStats,
    pub errors: ErrorBuffer,
    pub phase: CyclePhase,
}

impl RunState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
