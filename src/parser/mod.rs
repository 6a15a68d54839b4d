mod demando;
mod indeed;
mod linkedin;
mod webbjobb;

use scraper::{ElementRef, Selector};
use std::collections::HashSet;
use tracing::debug;

use crate::models::{InboundEmail, ParsedJobPosting, UNKNOWN_COMPANY};
use crate::provider::ProviderTag;

pub use demando::DemandoParser;
pub use indeed::IndeedParser;
pub use linkedin::LinkedInParser;
pub use webbjobb::{WebbjobbParser, parse_webbjobb_text};

/// Titles shorter than this are decorative links, not postings.
const MIN_TITLE_LEN: usize = 3;

/// One provider's structural heuristics. Implementations never fail; markup
/// they don't recognise yields an empty list so the cascade can fall through.
pub trait HtmlParser: Sync {
    fn parse(&self, html: &str) -> Vec<ParsedJobPosting>;
}

impl ProviderTag {
    pub fn html_parser(self) -> Option<&'static dyn HtmlParser> {
        match self {
            ProviderTag::LinkedIn => Some(&LinkedInParser),
            ProviderTag::Indeed => Some(&IndeedParser),
            ProviderTag::Webbjobb => Some(&WebbjobbParser),
            ProviderTag::Demando => Some(&DemandoParser),
            ProviderTag::Arbetsformedlingen | ProviderTag::Glassdoor | ProviderTag::Unknown => None,
        }
    }

    pub fn text_parser(self) -> Option<fn(&str) -> Vec<ParsedJobPosting>> {
        match self {
            ProviderTag::Webbjobb => Some(parse_webbjobb_text),
            ProviderTag::LinkedIn
            | ProviderTag::Indeed
            | ProviderTag::Demando
            | ProviderTag::Arbetsformedlingen
            | ProviderTag::Glassdoor
            | ProviderTag::Unknown => None,
        }
    }
}

/// Run the cascade: provider HTML parser, then the plain-text parser, then the
/// whole email as a single posting.
pub fn parse_job_digest(email: &InboundEmail, provider: ProviderTag) -> Vec<ParsedJobPosting> {
    debug!(%provider, from = %email.from, subject = %email.subject, "parsing digest");

    if !email.html.trim().is_empty() {
        if let Some(parser) = provider.html_parser() {
            let jobs = parser.parse(&email.html);
            debug!(count = jobs.len(), "html parse");
            if !jobs.is_empty() {
                return jobs;
            }
        }
    }

    if !email.body.trim().is_empty() {
        if let Some(parse_text) = provider.text_parser() {
            let jobs = parse_text(&email.body);
            debug!(count = jobs.len(), "text fallback");
            if !jobs.is_empty() {
                return jobs;
            }
        }
    }

    debug!("fallback -> single job");
    vec![whole_email_posting(email, provider)]
}

fn whole_email_posting(email: &InboundEmail, provider: ProviderTag) -> ParsedJobPosting {
    ParsedJobPosting {
        title: email.subject.clone(),
        company: UNKNOWN_COMPANY.to_string(),
        location: String::new(),
        provider,
        details: email.body.clone(),
        links: email.links.clone(),
        job_id: None,
    }
}

/// Per-email dedup: first card with a given key wins.
#[derive(Default)]
pub(crate) struct SeenKeys(HashSet<String>);

impl SeenKeys {
    pub(crate) fn first_time(&mut self, posting: &ParsedJobPosting) -> bool {
        self.0.insert(posting.dedup_key())
    }
}

pub(crate) fn is_usable_title(title: &str) -> bool {
    title.chars().count() >= MIN_TITLE_LEN
}

pub(crate) fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

pub(crate) fn element_text(el: ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Nearest ancestor (excluding `el`) satisfying `pred`.
pub(crate) fn closest<'a>(el: ElementRef<'a>, pred: impl Fn(ElementRef<'a>) -> bool) -> Option<ElementRef<'a>> {
    el.ancestors().filter_map(ElementRef::wrap).find(|a| pred(*a))
}

pub(crate) fn is_tag(el: ElementRef, names: &[&str]) -> bool {
    names.contains(&el.value().name())
}

pub(crate) fn has_class(el: ElementRef, class: &str) -> bool {
    el.value().classes().any(|c| c == class)
}

pub(crate) fn log_missing_company(posting: &ParsedJobPosting) {
    if !posting.has_company() {
        debug!(provider = %posting.provider, title = %posting.title, "company not recoverable, using sentinel");
    }
}
