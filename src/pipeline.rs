use anyhow::{anyhow, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ai::{is_transient, Evaluator};
use crate::digest::compose_digest;
use crate::email::{MailSink, MailSource};
use crate::journal::Journal;
use crate::models::{InboundEmail, ParsedJobPosting};
use crate::notify::{Notifier, Severity};
use crate::parser::parse_job_digest;
use crate::provider::{detect_provider, ProviderTag};
use crate::retry::{with_retry, RetryPolicy};
use crate::stats::{CyclePhase, RunState};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub recipient: String,
    pub fetch_attempts: u32,
    pub fetch_base_delay: Duration,
    pub eval_attempts: u32,
    pub eval_base_delay: Duration,
    pub send_attempts: u32,
    pub send_base_delay: Duration,
    /// Pause before every posting after the first, to stay under the model's rate limit.
    pub posting_delay: Duration,
}

impl PipelineSettings {
    pub fn new(recipient: &str) -> Self {
        Self {
            recipient: recipient.to_string(),
            fetch_attempts: 3,
            fetch_base_delay: Duration::from_secs(2),
            eval_attempts: 2,
            eval_base_delay: Duration::from_secs(2),
            send_attempts: 2,
            send_base_delay: Duration::from_secs(3),
            posting_delay: Duration::from_millis(750),
        }
    }
}

type DigestParser = fn(&InboundEmail, ProviderTag) -> Vec<ParsedJobPosting>;

pub struct Pipeline {
    source: Arc<dyn MailSource>,
    sink: Arc<dyn MailSink>,
    evaluator: Evaluator,
    notifier: Arc<dyn Notifier>,
    journal: Arc<dyn Journal>,
    settings: PipelineSettings,
    parse: DigestParser,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn MailSource>,
        sink: Arc<dyn MailSink>,
        evaluator: Evaluator,
        notifier: Arc<dyn Notifier>,
        journal: Arc<dyn Journal>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            sink,
            evaluator,
            notifier,
            journal,
            settings,
            parse: parse_job_digest,
        }
    }

    #[cfg(test)]
    fn with_parser(mut self, parse: DigestParser) -> Self {
        self.parse = parse;
        self
    }

    /// One fetch → parse → evaluate → send pass. Mailbox failure ends the
    /// cycle early; every other failure is counted, buffered and skipped.
    pub async fn run_cycle(&self, state: &mut RunState, shutdown: &CancellationToken) {
        match state.phase {
            CyclePhase::Running => {
                warn!("Previous cycle still running, skipping");
                return;
            }
            CyclePhase::Aborting => return,
            CyclePhase::Idle => {}
        }
        if shutdown.is_cancelled() {
            return;
        }

        state.phase = CyclePhase::Running;
        let started = Instant::now();
        state.stats.record_cycle_start();
        info!("Checking for new emails");

        let fetch_policy = RetryPolicy::new(self.settings.fetch_attempts, self.settings.fetch_base_delay).on_retry(
            |err: &anyhow::Error, attempt| warn!(attempt, error = %err, "IMAP fetch failed, retrying"),
        );
        let attempts = fetch_policy.max_attempts();

        let emails = match with_retry(&fetch_policy, || self.source.fetch_unread()).await {
            Ok(emails) => emails,
            Err(err) => {
                let message = format!("{:#}", err);
                error!(attempts, error = %message, "IMAP fetch failed");
                self.journal.record_error("imap-fetch", &message);
                state.stats.record_error();
                self.notifier
                    .critical(
                        "IMAP Failure",
                        &format!("Failed to fetch emails after {} attempts:\n{}", attempts, message),
                    )
                    .await;
                self.finish_cycle(state, started);
                return;
            }
        };

        if emails.is_empty() {
            info!("No new emails");
            self.finish_cycle(state, started);
            return;
        }
        info!(count = emails.len(), "Found new email(s)");

        for email in &emails {
            if shutdown.is_cancelled() {
                info!("Shutdown requested, leaving remaining emails unread");
                state.phase = CyclePhase::Aborting;
                break;
            }

            if let Err(err) = self.process_email(email, state, shutdown).await {
                let message = format!("{:#}", err);
                error!(subject = %email.subject, error = %message, "Failed to process email");
                self.journal.record_error(&format!("process-email:{}", email.subject), &message);
                state.stats.record_error();
                state.errors.push(format!("Email: {}", email.subject), message);
            }
        }

        if !state.errors.is_empty() {
            warn!(errors = state.errors.len(), "Cycle finished with errors");
        }
        if let Some(summary) = state.errors.drain_summary() {
            self.notifier.notify("Cycle Errors", &summary, Severity::Warning).await;
        }
        self.finish_cycle(state, started);
    }

    async fn process_email(&self, email: &InboundEmail, state: &mut RunState, shutdown: &CancellationToken) -> Result<()> {
        let provider = detect_provider(email);
        if provider == ProviderTag::Unknown {
            info!(subject = %email.subject, from = %email.from, "SKIP unknown provider");
            state.stats.record_skipped();
            return Ok(());
        }

        state.stats.record_email_processed();
        let jobs = parse_isolated(|| (self.parse)(email, provider), provider)?;
        info!("\"{}\" -> {} job(s) parsed", email.subject, jobs.len());

        let mut evaluations = Vec::new();
        for (i, job) in jobs.iter().enumerate() {
            if shutdown.is_cancelled() {
                info!("Shutdown requested, skipping remaining postings");
                state.phase = CyclePhase::Aborting;
                break;
            }
            if i > 0 {
                tokio::time::sleep(self.settings.posting_delay).await;
            }

            let provider_name = self.evaluator.provider_name().to_string();
            let title = job.title.clone();
            let policy = RetryPolicy::new(self.settings.eval_attempts, self.settings.eval_base_delay)
                .retry_if(is_transient)
                .on_retry(move |err: &anyhow::Error, attempt| {
                    warn!(attempt, title = %title, error = %err, "AI ({}) evaluation failed, retrying", provider_name)
                });

            match with_retry(&policy, || self.evaluator.evaluate(job, &email.message_id)).await {
                Ok(evaluation) => {
                    info!(
                        "[{}/{}] {} {}/5 {} ({})",
                        i + 1,
                        jobs.len(),
                        evaluation.category,
                        evaluation.score,
                        evaluation.title,
                        evaluation.company
                    );
                    state.stats.record_job_evaluated();
                    self.journal.record_evaluation(&evaluation);
                    evaluations.push(evaluation);
                }
                Err(err) => {
                    let message = format!("{:#}", err);
                    error!("[{}/{}] FAILED: {} ({}): {}", i + 1, jobs.len(), job.title, job.company, message);
                    self.journal.record_error(&format!("ai-eval:{}", job.title), &message);
                    state.stats.record_error();
                    state
                        .errors
                        .push(format!("AI ({}): {}", self.evaluator.provider_name(), job.title), message);
                }
            }
        }

        if evaluations.is_empty() {
            return Ok(());
        }

        let digest = compose_digest(&evaluations, email);
        let send_policy = RetryPolicy::new(self.settings.send_attempts, self.settings.send_base_delay)
            .on_retry(|err: &anyhow::Error, attempt| warn!(attempt, error = %err, "SMTP send failed, retrying"));

        let sent = with_retry(&send_policy, || {
            self.sink.send(&self.settings.recipient, &digest.subject, &digest.html)
        })
        .await;

        match sent {
            Ok(()) => info!("-> Digest email sent ({} jobs)", evaluations.len()),
            Err(err) => {
                let message = format!("{:#}", err);
                error!(subject = %email.subject, error = %message, "SMTP send failed");
                self.journal.record_error(&format!("smtp-send:{}", email.subject), &message);
                state.stats.record_error();
                state.errors.push(format!("SMTP: {}", email.subject), message);
            }
        }

        Ok(())
    }

    fn finish_cycle(&self, state: &mut RunState, started: Instant) {
        state.stats.record_cycle_duration(started.elapsed());
        info!("{}", state.stats.summary());
        self.journal.write_snapshot(&state.stats);
        if state.phase == CyclePhase::Running {
            state.phase = CyclePhase::Idle;
        }
    }
}

// A parser bug on one email must not take the cycle down
fn parse_isolated(
    parse: impl FnOnce() -> Vec<ParsedJobPosting>,
    provider: ProviderTag,
) -> Result<Vec<ParsedJobPosting>> {
    catch_unwind(AssertUnwindSafe(parse))
        .map_err(|_| anyhow!("Parser for {} panicked", provider))
}
