use regex::Regex;
use scraper::{ElementRef, Html};
use std::sync::LazyLock;

use super::{
    closest, collapse_whitespace, element_text, has_class, is_tag, is_usable_title, log_missing_company,
    selector, HtmlParser, SeenKeys,
};
use crate::models::ParsedJobPosting;
use crate::provider::ProviderTag;

static JOB_VIEW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"linkedin\.com/comm/jobs/view/(\d+)").expect("valid regex"));

// "Company · Location"
static COMPANY_LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^·]+)·\s*(.+)$").expect("valid regex"));

// Badges LinkedIn appends after the location
static LOCATION_NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+(Easy Apply|Actively recruiting|\d+ school alum\w*|\d+ connection\w*|Fast growing).*")
        .expect("valid regex")
});

/// Job cards: each posting has a title anchor pointing at
/// `linkedin.com/comm/jobs/view/<id>`, with "Company · Location" in a nearby `<p>`.
pub struct LinkedInParser;

impl HtmlParser for LinkedInParser {
    fn parse(&self, html: &str) -> Vec<ParsedJobPosting> {
        let document = Html::parse_document(html);
        let Some(link_selector) = selector(r#"a[href*="/jobs/view/"]"#) else {
            return Vec::new();
        };

        let mut jobs = Vec::new();
        let mut seen = SeenKeys::default();

        for element in document.select(&link_selector) {
            let href = element.value().attr("href").unwrap_or("");
            let Some(job_id) = extract_job_id(href) else {
                continue;
            };

            // Wrapper links around a whole card share the job id; only the title link counts
            if !is_title_link(element) {
                continue;
            }

            let title = collapse_whitespace(&element_text(element));
            if !is_usable_title(&title) || is_navigation_text(&title) {
                continue;
            }

            let (company, location) = job_card(element)
                .and_then(company_and_location)
                .unwrap_or_default();

            let mut posting = ParsedJobPosting::new(ProviderTag::LinkedIn, &title, &company, &location)
                .with_details(&[])
                .with_link(&canonical_job_url(job_id));
            posting.job_id = Some(job_id);

            if !seen.first_time(&posting) {
                continue;
            }
            log_missing_company(&posting);
            jobs.push(posting);
        }

        jobs
    }
}

pub fn extract_job_id(href: &str) -> Option<u64> {
    JOB_VIEW_RE
        .captures(href)
        .and_then(|cap| cap.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Tracking redirects become the direct job-view URL.
pub fn canonical_job_url(job_id: u64) -> String {
    format!("https://www.linkedin.com/jobs/view/{}/", job_id)
}

fn is_title_link(element: ElementRef) -> bool {
    if has_class(element, "font-bold") {
        return true;
    }
    match closest(element, |a| is_tag(a, &["td"])) {
        Some(td) => selector("a").map_or(true, |a| td.select(&a).count() <= 1),
        None => true,
    }
}

fn is_navigation_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower == "see all jobs" || lower == "easy apply" || lower.contains("view job") || lower.contains("linkedin")
}

fn job_card(element: ElementRef) -> Option<ElementRef> {
    closest(element, |a| a.value().attr("data-test-id") == Some("job-card")).or_else(|| {
        closest(element, |a| is_tag(a, &["table"])).and_then(|table| closest(table, |a| is_tag(a, &["td", "div"])))
    })
}

fn company_and_location(card: ElementRef) -> Option<(String, String)> {
    let paragraphs = selector("p")?;
    card.select(&paragraphs).find_map(|p| split_company_location(&element_text(p)))
}

pub fn split_company_location(text: &str) -> Option<(String, String)> {
    let text = collapse_whitespace(text);
    let cap = COMPANY_LOCATION_RE.captures(&text)?;
    let company = cap.get(1)?.as_str().trim().to_string();
    let location = LOCATION_NOISE_RE.replace(cap.get(2)?.as_str(), "").trim().to_string();
    if company.is_empty() {
        return None;
    }
    Some((company, location))
}
