use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderTag;

/// Placeholder company used when a parser cannot recover one. Never rendered.
pub const UNKNOWN_COMPANY: &str = "unknown";

#[derive(Debug, Clone)]
pub struct InboundEmail {
    pub message_id: String,
    pub from: String,
    pub subject: String,
    pub body: String,
    pub html: String, // may be empty
    pub received_at: DateTime<Utc>,
    pub links: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedJobPosting {
    pub title: String,
    pub company: String,
    pub location: String,
    pub provider: ProviderTag,
    pub details: String,
    pub links: Vec<String>,
    pub job_id: Option<u64>, // numeric id from the canonical link, when the provider has one
}

impl ParsedJobPosting {
    pub fn new(provider: ProviderTag, title: &str, company: &str, location: &str) -> Self {
        let company = company.trim();
        Self {
            title: title.trim().to_string(),
            company: if company.is_empty() {
                UNKNOWN_COMPANY.to_string()
            } else {
                company.to_string()
            },
            location: location.trim().to_string(),
            provider,
            details: String::new(),
            links: Vec::new(),
            job_id: None,
        }
    }

    /// `details` is the non-empty subset of title, company, location and extras joined by " - ".
    pub fn with_details(mut self, extra: &[&str]) -> Self {
        let company = if self.has_company() { self.company.as_str() } else { "" };
        let mut parts = vec![self.title.as_str(), company, self.location.as_str()];
        parts.extend_from_slice(extra);
        self.details = parts
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" - ");
        self
    }

    pub fn with_link(mut self, href: &str) -> Self {
        if !href.is_empty() {
            self.links.push(href.to_string());
        }
        self
    }

    pub fn has_company(&self) -> bool {
        !self.company.is_empty() && self.company != UNKNOWN_COMPANY
    }

    pub fn dedup_key(&self) -> String {
        match self.job_id {
            Some(id) => format!("id:{}", id),
            None => format!("title:{}", self.title.to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvaluation {
    pub message_id: String,
    pub score: u8, // 1..=5, validated by the evaluator
    pub category: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub provider: ProviderTag,
    pub reasoning: String,
    pub links: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl JobEvaluation {
    pub fn display_company(&self) -> Option<&str> {
        let company = self.company.trim();
        if company.is_empty() || company == UNKNOWN_COMPANY {
            None
        } else {
            Some(company)
        }
    }
}
