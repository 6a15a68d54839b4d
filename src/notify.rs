use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn color(self) -> u32 {
        match self {
            Severity::Info => 0x059669,
            Severity::Warning => 0xd97706,
            Severity::Critical => 0xdc2626,
        }
    }
}

/// Best-effort operator notifications. Implementations log and swallow
/// their own failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str, severity: Severity);

    async fn critical(&self, title: &str, body: &str) {
        self.notify(title, body, Severity::Critical).await;
    }
}

#[derive(Debug, Serialize)]
struct DiscordEmbed<'a> {
    title: &'a str,
    description: &'a str,
    color: u32,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct DiscordPayload<'a> {
    embeds: [DiscordEmbed<'a>; 1],
}

pub struct DiscordNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl DiscordNotifier {
    pub fn new(webhook_url: &str) -> Self {
        Self {
            webhook_url: webhook_url.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, title: &str, body: &str, severity: Severity) {
        let payload = DiscordPayload {
            embeds: [DiscordEmbed {
                title,
                description: body,
                color: severity.color(),
                timestamp: Utc::now().to_rfc3339(),
            }],
        };

        match self.client.post(&self.webhook_url).json(&payload).send().await {
            Ok(response) if !response.status().is_success() => {
                error!(status = %response.status(), "Discord webhook failed");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Discord webhook error"),
        }
    }
}

/// Used when no webhook is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, title: &str, _body: &str, _severity: Severity) {
        debug!(title, "Notification dropped, no webhook configured");
    }
}

pub fn create_notifier(webhook_url: Option<&str>) -> Box<dyn Notifier> {
    match webhook_url.map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => Box::new(DiscordNotifier::new(url)),
        None => Box::new(NoopNotifier),
    }
}

pub fn startup_message(provider: &str, model: &str, interval_minutes: u64, recipient: &str) -> String {
    [
        format!("Provider: {}", provider),
        format!("Model: {}", model),
        format!("Schedule: every {} minutes", interval_minutes),
        format!("Notify: {}", recipient),
    ]
    .join("\n")
}
