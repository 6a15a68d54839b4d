use anyhow::{anyhow, bail, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use crate::ai::{ChatCompletionsClient, ChatModel, ProviderKind};
use crate::email::MailAccount;

/// Service configuration. Every option can also come from the environment
/// (or a `.env` file).
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Mailbox login, also the digest sender
    #[arg(long, env = "MAIL_USER")]
    pub mail_user: String,

    #[arg(long, env = "MAIL_PASSWORD", hide_env_values = true)]
    pub mail_password: String,

    #[arg(long, env = "IMAP_HOST")]
    pub imap_host: String,

    #[arg(long, env = "SMTP_HOST")]
    pub smtp_host: String,

    /// Digest recipient
    #[arg(long, env = "NOTIFY_EMAIL")]
    pub notify_email: String,

    /// mistral or berget
    #[arg(long, env = "AI_PROVIDER", default_value = "mistral")]
    pub ai_provider: String,

    #[arg(long, env = "MISTRAL_API_KEY", hide_env_values = true)]
    pub mistral_api_key: Option<String>,

    #[arg(long, env = "MISTRAL_MODEL", default_value = "mistral-small-latest")]
    pub mistral_model: String,

    #[arg(long, env = "BERGET_API_KEY", hide_env_values = true)]
    pub berget_api_key: Option<String>,

    #[arg(long, env = "BERGET_MODEL")]
    pub berget_model: Option<String>,

    #[arg(
        long = "interval-minutes",
        env = "MAILBOX_CHECK_INTERVAL_MINUTES",
        default_value_t = 15,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub interval_minutes: u64,

    #[arg(long, env = "LOG_DIR", default_value = "./data/logs")]
    pub log_dir: PathBuf,

    /// Operator notifications are disabled when unset
    #[arg(long, env = "DISCORD_WEBHOOK_URL")]
    pub discord_webhook_url: Option<String>,

    /// Candidate profile embedded in the system prompt
    #[arg(long, env = "PROFILE_PATH")]
    pub profile_path: PathBuf,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if !self.mail_user.contains('@') {
            problems.push("MAIL_USER must be a valid email".to_string());
        }
        if self.mail_password.is_empty() {
            problems.push("MAIL_PASSWORD is required".to_string());
        }
        if self.imap_host.trim().is_empty() {
            problems.push("IMAP_HOST is required".to_string());
        }
        if self.smtp_host.trim().is_empty() {
            problems.push("SMTP_HOST is required".to_string());
        }
        if !self.notify_email.contains('@') {
            problems.push("NOTIFY_EMAIL must be a valid email".to_string());
        }
        if let Some(url) = &self.discord_webhook_url {
            if !url.trim().is_empty() && !url.starts_with("http://") && !url.starts_with("https://") {
                problems.push("DISCORD_WEBHOOK_URL must be a URL".to_string());
            }
        }
        if let Err(e) = self.model_settings() {
            problems.push(e.to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            bail!(
                "Environment validation failed:\n{}",
                problems.iter().map(|p| format!("  - {}", p)).collect::<Vec<_>>().join("\n")
            )
        }
    }

    /// Provider, API key and model id for the configured AI provider.
    pub fn model_settings(&self) -> Result<(ProviderKind, String, String)> {
        let provider = ProviderKind::resolve(&self.ai_provider)?;
        match provider {
            ProviderKind::Mistral => {
                let key = non_empty(&self.mistral_api_key)
                    .ok_or_else(|| anyhow!("MISTRAL_API_KEY is required when AI_PROVIDER=mistral"))?;
                Ok((provider, key, self.mistral_model.clone()))
            }
            ProviderKind::Berget => {
                let key = non_empty(&self.berget_api_key)
                    .ok_or_else(|| anyhow!("BERGET_API_KEY is required when AI_PROVIDER=berget"))?;
                let model = non_empty(&self.berget_model)
                    .ok_or_else(|| anyhow!("BERGET_MODEL is required when AI_PROVIDER=berget"))?;
                Ok((provider, key, model))
            }
        }
    }

    pub fn chat_model(&self) -> Result<Box<dyn ChatModel>> {
        let (provider, key, model) = self.model_settings()?;
        Ok(Box::new(ChatCompletionsClient::new(provider, &key, &model)?))
    }

    pub fn mail_account(&self) -> MailAccount {
        MailAccount {
            imap_host: self.imap_host.clone(),
            smtp_host: self.smtp_host.clone(),
            username: self.mail_user.clone(),
            password: self.mail_password.clone(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}
