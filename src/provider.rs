use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::InboundEmail;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderTag {
    LinkedIn,
    Indeed,
    Webbjobb,
    Demando,
    Arbetsformedlingen,
    Glassdoor,
    Unknown,
}

// Order matters: first match wins within each pass.
const KNOWN: [ProviderTag; 6] = [
    ProviderTag::LinkedIn,
    ProviderTag::Indeed,
    ProviderTag::Demando,
    ProviderTag::Webbjobb,
    ProviderTag::Arbetsformedlingen,
    ProviderTag::Glassdoor,
];

impl ProviderTag {
    pub fn name(self) -> &'static str {
        match self {
            ProviderTag::LinkedIn => "LinkedIn",
            ProviderTag::Indeed => "Indeed",
            ProviderTag::Webbjobb => "Webbjobb",
            ProviderTag::Demando => "Demando",
            ProviderTag::Arbetsformedlingen => "Arbetsformedlingen",
            ProviderTag::Glassdoor => "Glassdoor",
            ProviderTag::Unknown => "Unknown",
        }
    }

    pub fn homepage(self) -> Option<&'static str> {
        match self {
            ProviderTag::LinkedIn => Some("https://www.linkedin.com/jobs/"),
            ProviderTag::Indeed => Some("https://se.indeed.com/"),
            ProviderTag::Webbjobb => Some("https://webbjobb.io/"),
            ProviderTag::Demando => Some("https://demando.se/"),
            ProviderTag::Arbetsformedlingen => Some("https://arbetsformedlingen.se/"),
            ProviderTag::Glassdoor => Some("https://www.glassdoor.com/"),
            ProviderTag::Unknown => None,
        }
    }

    fn sender_markers(self) -> &'static [&'static str] {
        match self {
            ProviderTag::LinkedIn => &["linkedin"],
            ProviderTag::Indeed => &["indeed"],
            ProviderTag::Webbjobb => &["webbjobb"],
            ProviderTag::Demando => &["demando"],
            ProviderTag::Arbetsformedlingen => &["arbetsformedlingen"],
            ProviderTag::Glassdoor => &["glassdoor"],
            ProviderTag::Unknown => &[],
        }
    }

    fn html_markers(self) -> &'static [&'static str] {
        match self {
            ProviderTag::LinkedIn => &["linkedin.com/comm/jobs"],
            ProviderTag::Indeed => &["indeed.com"],
            ProviderTag::Webbjobb => &["webbjobb.io"],
            ProviderTag::Demando => &["demando.io", "demando.se"],
            ProviderTag::Arbetsformedlingen => &["arbetsformedlingen.se"],
            ProviderTag::Glassdoor => &["glassdoor.com"],
            ProviderTag::Unknown => &[],
        }
    }

    // Only Webbjobb sends digests that can lack sender markers and usable HTML.
    fn body_markers(self) -> &'static [&'static str] {
        match self {
            ProviderTag::Webbjobb => &["webbjobb.io"],
            _ => &[],
        }
    }
}

impl fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn first_match(haystack: &str, markers: fn(ProviderTag) -> &'static [&'static str]) -> Option<ProviderTag> {
    if haystack.is_empty() {
        return None;
    }
    KNOWN
        .into_iter()
        .find(|tag| markers(*tag).iter().any(|m| haystack.contains(m)))
}

/// Classify an email. Sender checks always win over content sniffing.
pub fn detect_provider(email: &InboundEmail) -> ProviderTag {
    let from = email.from.to_lowercase();
    let html = email.html.to_lowercase();
    let body = email.body.to_lowercase();

    first_match(&from, ProviderTag::sender_markers)
        .or_else(|| first_match(&html, ProviderTag::html_markers))
        .or_else(|| first_match(&body, ProviderTag::body_markers))
        .unwrap_or(ProviderTag::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_email(from: &str, html: &str, body: &str) -> InboundEmail {
        InboundEmail {
            message_id: "msg-1".to_string(),
            from: from.to_string(),
            subject: String::new(),
            body: body.to_string(),
            html: html.to_string(),
            received_at: Utc::now(),
            links: Vec::new(),
        }
    }

    #[test]
    fn test_detect_by_sender() {
        assert_eq!(detect_provider(&make_email("jobs-noreply@linkedin.com", "", "")), ProviderTag::LinkedIn);
        assert_eq!(detect_provider(&make_email("donotreply@jobalert.indeed.com", "", "")), ProviderTag::Indeed);
        assert_eq!(detect_provider(&make_email("robot@mail.webbjobb.io", "", "")), ProviderTag::Webbjobb);
        assert_eq!(detect_provider(&make_email("reply@demando.io", "", "")), ProviderTag::Demando);
        assert_eq!(
            detect_provider(&make_email("noreply@arbetsformedlingen.se", "", "")),
            ProviderTag::Arbetsformedlingen
        );
        assert_eq!(detect_provider(&make_email("alerts@glassdoor.com", "", "")), ProviderTag::Glassdoor);
    }

    #[test]
    fn test_detect_sender_is_case_insensitive() {
        assert_eq!(
            detect_provider(&make_email("LinkedIn <Jobs-NoReply@LinkedIn.com>", "", "")),
            ProviderTag::LinkedIn
        );
    }

    #[test]
    fn test_detect_by_html() {
        let email = make_email("noreply@mail.com", r#"<a href="https://webbjobb.io/jobb/123">Job</a>"#, "");
        assert_eq!(detect_provider(&email), ProviderTag::Webbjobb);

        let email = make_email("noreply@mail.com", r#"<a href="https://demando.se/jobs">Job</a>"#, "");
        assert_eq!(detect_provider(&email), ProviderTag::Demando);
    }

    #[test]
    fn test_sender_takes_precedence_over_html() {
        // A Demando digest that links out to indeed.com is still Demando
        let email = make_email("reply@demando.io", r#"<a href="https://se.indeed.com/viewjob">x</a>"#, "");
        assert_eq!(detect_provider(&email), ProviderTag::Demando);
    }

    #[test]
    fn test_detect_webbjobb_from_plain_body_only() {
        let email = make_email("noreply@mail.com", "", "Se alla jobb på https://webbjobb.io");
        assert_eq!(detect_provider(&email), ProviderTag::Webbjobb);

        // Body sniffing is reserved for Webbjobb
        let email = make_email("noreply@mail.com", "", "See https://www.glassdoor.com/job");
        assert_eq!(detect_provider(&email), ProviderTag::Unknown);
    }

    #[test]
    fn test_unknown_sender() {
        assert_eq!(detect_provider(&make_email("random@company.com", "", "")), ProviderTag::Unknown);
    }

    #[test]
    fn test_display_uses_provider_name() {
        assert_eq!(ProviderTag::Arbetsformedlingen.to_string(), "Arbetsformedlingen");
        assert_eq!(ProviderTag::Unknown.homepage(), None);
    }
}
