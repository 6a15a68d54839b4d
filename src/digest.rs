use chrono::{DateTime, Utc};

use crate::models::{InboundEmail, JobEvaluation};
use crate::provider::ProviderTag;

/// Scores at or above this land in "Worth checking out".
pub const HIGHLIGHT_THRESHOLD: u8 = 3;

const LINK_STYLE: &str = "color:#1a73e8;text-decoration:none;";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub subject: String,
    pub html: String,
}

pub fn compose_digest(evaluations: &[JobEvaluation], original: &InboundEmail) -> Digest {
    compose_digest_at(evaluations, original, Utc::now())
}

pub fn compose_digest_at(evaluations: &[JobEvaluation], original: &InboundEmail, now: DateTime<Utc>) -> Digest {
    let mut sorted: Vec<&JobEvaluation> = evaluations.iter().collect();
    // Stable sort keeps parse order among equal scores
    sorted.sort_by(|a, b| b.score.cmp(&a.score));

    let (highlighted, rest): (Vec<&JobEvaluation>, Vec<&JobEvaluation>) =
        sorted.iter().partition(|e| e.score >= HIGHLIGHT_THRESHOLD);

    let provider = evaluations.first().map(|e| e.provider).unwrap_or(ProviderTag::Unknown);
    let job_count = evaluations.len();
    let date = format_date(now);

    let mut html = String::new();
    html.push_str(&format!(
        r#"<div style="font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,sans-serif;max-width:600px;margin:0 auto;color:#333;">
  <div style="padding:20px 0;border-bottom:2px solid #e5e7eb;">
    <div style="font-size:18px;font-weight:600;margin:0 0 8px;">Job Filter Results</div>
    <div style="font-size:13px;color:#6b7280;">{} job{} from {} &middot; {}</div>
    <div style="font-size:12px;color:#9ca3af;margin-top:4px;">Original: {}</div>
  </div>
"#,
        job_count,
        if job_count == 1 { "" } else { "s" },
        provider_link(provider),
        date,
        escape_html(&original.subject),
    ));

    if !highlighted.is_empty() {
        html.push_str(
            r#"  <div style="margin-top:20px;">
    <div style="font-size:12px;text-transform:uppercase;letter-spacing:0.05em;color:#374151;font-weight:600;margin-bottom:12px;">Worth checking out</div>
"#,
        );
        for ev in &highlighted {
            html.push_str(&highlighted_entry(ev));
        }
        html.push_str("  </div>\n");
    }

    if !rest.is_empty() {
        html.push_str(
            r#"  <div style="margin-top:20px;">
    <div style="font-size:12px;text-transform:uppercase;letter-spacing:0.05em;color:#9ca3af;font-weight:600;margin-bottom:12px;">Skipped</div>
    <div style="font-size:13px;color:#6b7280;">
"#,
        );
        for ev in &rest {
            html.push_str(&skipped_entry(ev));
        }
        html.push_str("    </div>\n  </div>\n");
    }

    html.push_str(&format!(
        r#"  <div style="margin-top:24px;padding-top:12px;border-top:1px solid #f3f4f6;font-size:11px;color:#9ca3af;">Processed {} &middot; Source: {}</div>
</div>
"#,
        date,
        escape_html(provider.name()),
    ));

    Digest {
        subject: subject_line(&sorted),
        html,
    }
}

fn subject_line(sorted: &[&JobEvaluation]) -> String {
    let top_score = sorted.first().map(|e| e.score).unwrap_or(0);
    match sorted {
        [only] => {
            let company = only.display_company().map(|c| format!(" at {}", c)).unwrap_or_default();
            format!("JobFilter – {}{} – {}/5", only.title, company, top_score)
        }
        _ => format!("JobFilter – {} jobs – top match {}/5", sorted.len(), top_score),
    }
}

fn highlighted_entry(ev: &JobEvaluation) -> String {
    let company_line = company_line(ev);
    let company_block = if company_line.is_empty() {
        String::new()
    } else {
        format!(
            "\n      <div style=\"font-size:13px;color:#6b7280;margin-top:2px;\">{}</div>",
            company_line
        )
    };
    format!(
        r#"    <div style="padding:12px 0;border-bottom:1px solid #f3f4f6;">
      <div><span style="font-size:14px;font-weight:700;color:{};">{}/5</span> <span style="font-size:14px;font-weight:500;margin-left:8px;">{}</span></div>{}
      <div style="font-size:13px;color:#4b5563;margin-top:4px;">{}</div>
    </div>
"#,
        score_color(ev.score),
        ev.score,
        job_link(&ev.title, &ev.links),
        company_block,
        escape_html(&ev.reasoning),
    )
}

fn skipped_entry(ev: &JobEvaluation) -> String {
    let company = ev
        .display_company()
        .map(|c| format!(r#" <span style="color:#9ca3af;">({})</span>"#, escape_html(c)))
        .unwrap_or_default();
    format!(
        r#"      <div style="padding:4px 0;"><span style="font-weight:600;">{}/5</span> – {}{} <span style="color:#9ca3af;font-style:italic;">– {}</span></div>
"#,
        ev.score,
        job_link(&ev.title, &ev.links),
        company,
        escape_html(&ev.reasoning),
    )
}

fn company_line(ev: &JobEvaluation) -> String {
    let mut parts = Vec::new();
    if let Some(company) = ev.display_company() {
        parts.push(escape_html(company));
    }
    if !ev.location.trim().is_empty() {
        parts.push(escape_html(&ev.location));
    }
    parts.join(" &middot; ")
}

fn job_link(title: &str, links: &[String]) -> String {
    match links.first() {
        Some(href) => format!(r#"<a href="{}" style="{}">{}</a>"#, escape_html(href), LINK_STYLE, escape_html(title)),
        None => escape_html(title),
    }
}

fn provider_link(provider: ProviderTag) -> String {
    match provider.homepage() {
        Some(url) => format!(r#"<a href="{}" style="{}">{}</a>"#, url, LINK_STYLE, escape_html(provider.name())),
        None => escape_html(provider.name()),
    }
}

fn score_color(score: u8) -> &'static str {
    match score {
        4.. => "#16a34a",
        3 => "#eab308",
        _ => "#9ca3af",
    }
}

fn format_date(date: DateTime<Utc>) -> String {
    date.format("%-d %B %Y %H:%M UTC").to_string()
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
