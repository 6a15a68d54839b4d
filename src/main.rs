mod ai;
mod config;
mod digest;
mod email;
mod journal;
mod links;
mod models;
mod notify;
mod parser;
mod pipeline;
mod provider;
mod retry;
mod stats;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ai::{load_system_prompt, Evaluator};
use config::Config;
use email::{parse_raw_email, ImapMailSource, SmtpMailSink};
use journal::{check_health, rotate_logs, FileJournal, Journal, LOG_RETENTION_DAYS};
use notify::{create_notifier, startup_message, Notifier, Severity};
use pipeline::{Pipeline, PipelineSettings};
use stats::RunState;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "jobfilter")]
#[command(about = "Score job-alert emails against a candidate profile and mail back ranked digests")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the service: one cycle now, then one per interval
    Run {
        #[command(flatten)]
        config: Config,
    },

    /// Run a single cycle and exit
    Once {
        #[command(flatten)]
        config: Config,
    },

    /// Show what the parsers extract from a raw message file (no model calls)
    Parse {
        /// Path to an .eml file
        file: PathBuf,
    },

    /// Exit 0 when the health file is fresh, 1 otherwise
    Health {
        #[arg(long, env = "LOG_DIR", default_value = "./data/logs")]
        log_dir: PathBuf,
    },
}

struct Service {
    pipeline: Pipeline,
    notifier: Arc<dyn Notifier>,
    journal: Arc<FileJournal>,
    provider: String,
    model: String,
}

fn build_service(config: &Config) -> Result<Service> {
    config.validate()?;

    let system_prompt = load_system_prompt(&config.profile_path)?;
    let evaluator = Evaluator::new(config.chat_model()?, system_prompt);
    let provider = evaluator.provider_name().to_string();
    let model = evaluator.model_name().to_string();

    let account = config.mail_account();
    let source = Arc::new(ImapMailSource::new(account.clone()));
    let sink = Arc::new(SmtpMailSink::new(&account).context("Failed to set up SMTP transport")?);
    let notifier: Arc<dyn Notifier> = Arc::from(create_notifier(config.discord_webhook_url.as_deref()));
    let journal = Arc::new(FileJournal::new(&config.log_dir));

    let pipeline = Pipeline::new(
        source,
        sink,
        evaluator,
        notifier.clone(),
        journal.clone(),
        PipelineSettings::new(&config.notify_email),
    );

    Ok(Service {
        pipeline,
        notifier,
        journal,
        provider,
        model,
    })
}

async fn run_service(config: Config) -> Result<()> {
    let Service {
        pipeline,
        notifier,
        journal,
        provider,
        model,
    } = build_service(&config)?;

    info!(
        "JobFilter AI started. AI: {} ({}). Checking every {} minutes.",
        provider, model, config.interval_minutes
    );
    notifier
        .notify(
            "JobFilter AI Started",
            &startup_message(&provider, &model, config.interval_minutes, &config.notify_email),
            Severity::Info,
        )
        .await;

    if let Err(e) = rotate_logs(&config.log_dir, LOG_RETENTION_DAYS) {
        warn!(error = %e, "Log rotation failed");
    }

    let state = RunState::default();
    journal.write_snapshot(&state.stats);

    let shutdown = CancellationToken::new();
    let mut scheduler = tokio::spawn(schedule_cycles(pipeline, state, config.interval(), shutdown.clone()));

    let signal_name = tokio::select! {
        name = shutdown_signal() => name,
        joined = &mut scheduler => {
            let message = match joined {
                Err(e) => panic_message(e),
                Ok(()) => "Scheduler stopped unexpectedly".to_string(),
            };
            report_fatal(notifier.as_ref(), journal.as_ref(), "scheduler", &message).await;
            std::process::exit(1);
        }
    };

    info!("{} received. Shutting down gracefully...", signal_name);
    shutdown.cancel();

    let exit = wait_for_scheduler(scheduler, SHUTDOWN_GRACE).await;
    match &exit {
        SchedulerExit::Finished => {}
        SchedulerExit::Panicked(message) => {
            report_fatal(notifier.as_ref(), journal.as_ref(), "scheduler", message).await;
            std::process::exit(1);
        }
        SchedulerExit::TimedOut => {
            warn!("Cycle did not finish within {}s, forcing exit", SHUTDOWN_GRACE.as_secs())
        }
    }

    notifier
        .notify(
            "JobFilter AI Stopped",
            &format!("Received {}. Graceful shutdown complete.", signal_name),
            Severity::Warning,
        )
        .await;
    info!("Shutdown complete");

    // A blocking IMAP fetch would otherwise hold the runtime open on drop
    if exit == SchedulerExit::TimedOut {
        std::process::exit(0);
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum SchedulerExit {
    Finished,
    Panicked(String),
    TimedOut,
}

async fn wait_for_scheduler(scheduler: JoinHandle<()>, grace: Duration) -> SchedulerExit {
    match tokio::time::timeout(grace, scheduler).await {
        Ok(Ok(())) => SchedulerExit::Finished,
        Ok(Err(e)) => SchedulerExit::Panicked(panic_message(e)),
        Err(_) => SchedulerExit::TimedOut,
    }
}

/// Immediate cycle, then one per tick. Cycles never overlap: the next tick is
/// only awaited once the current cycle returns.
async fn schedule_cycles(pipeline: Pipeline, mut state: RunState, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => pipeline.run_cycle(&mut state, &shutdown).await,
        }
    }
}

async fn run_once(config: Config) -> Result<()> {
    let service = build_service(&config)?;
    let mut state = RunState::default();
    service.pipeline.run_cycle(&mut state, &CancellationToken::new()).await;
    println!("{}", state.stats.summary());
    Ok(())
}

fn parse_file(path: &Path) -> Result<()> {
    let raw = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let email = parse_raw_email(&raw)?;
    let provider = provider::detect_provider(&email);

    println!("From:     {}", email.from);
    println!("Subject:  {}", email.subject);
    println!("Date:     {}", email.received_at.format("%Y-%m-%d %H:%M UTC"));
    println!("Provider: {}", provider);

    if provider == provider::ProviderTag::Unknown {
        println!("\nUnknown provider, the service would skip this email.");
        return Ok(());
    }

    let jobs = parser::parse_job_digest(&email, provider);
    println!("\n{:<4} {:<40} {:<24} {:<20}", "#", "TITLE", "COMPANY", "LOCATION");
    println!("{}", "-".repeat(90));
    for (i, job) in jobs.iter().enumerate() {
        let company = if job.has_company() { job.company.as_str() } else { "-" };
        println!(
            "{:<4} {:<40} {:<24} {:<20}",
            i + 1,
            truncate(&job.title, 38),
            truncate(company, 22),
            truncate(&job.location, 18)
        );
        if let Some(link) = job.links.first() {
            println!("     {}", link);
        }
    }
    println!("\n{} posting(s)", jobs.len());
    Ok(())
}

async fn report_fatal(notifier: &dyn Notifier, journal: &dyn Journal, context: &str, message: &str) {
    error!(context, "FATAL: {}", message);
    journal.record_error(context, message);
    notifier.critical(&format!("FATAL: {}", context), message).await;
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => "SIGINT",
        () = terminate => "SIGTERM",
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,jobfilter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run_service(config).await?,
        Commands::Once { config } => run_once(config).await?,
        Commands::Parse { file } => parse_file(&file)?,
        Commands::Health { log_dir } => {
            if check_health(&log_dir) {
                println!("healthy");
            } else {
                println!("unhealthy");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
