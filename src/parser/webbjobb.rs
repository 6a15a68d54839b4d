use scraper::{ElementRef, Html};

use super::{element_text, is_usable_title, log_missing_company, selector, HtmlParser, SeenKeys};
use crate::links::extract_links;
use crate::models::ParsedJobPosting;
use crate::provider::ProviderTag;

const ARROW: char = '→';

// Arrow-marked lines that are newsletter furniture, not jobs
const BOILERPLATE_MARKERS: [&str; 3] = ["bloggen", "inställningar", "betalnings"];

/// `<div class="link">` per posting: `<strong><a>Title →</a></strong>`, then
/// "Company, <em>City</em>" and `<span class="tag">` skills. Links are
/// tracking redirects without an embedded id and are kept raw.
pub struct WebbjobbParser;

impl HtmlParser for WebbjobbParser {
    fn parse(&self, html: &str) -> Vec<ParsedJobPosting> {
        let document = Html::parse_document(html);
        let (Some(card_selector), Some(title_selector), Some(em), Some(paragraph), Some(tag_selector)) = (
            selector("div.link"),
            selector("strong a"),
            selector("em"),
            selector("p"),
            selector("span.tag-tech, span.tag"),
        ) else {
            return Vec::new();
        };

        let mut jobs = Vec::new();
        let mut seen = SeenKeys::default();

        for card in document.select(&card_selector) {
            let Some(title_link) = card.select(&title_selector).next() else {
                continue;
            };
            let title = strip_arrow(&element_text(title_link));
            if !is_usable_title(&title) {
                continue;
            }

            let href = title_link.value().attr("href").unwrap_or("");
            let location = card.select(&em).next().map(element_text).unwrap_or_default();
            let company = card
                .select(&paragraph)
                .next()
                .and_then(|p| company_after_title(p, &title))
                .unwrap_or_default();
            let tags: Vec<String> = card
                .select(&tag_selector)
                .map(element_text)
                .filter(|t| !t.is_empty())
                .collect();

            let posting = ParsedJobPosting::new(ProviderTag::Webbjobb, &title, &company, &location)
                .with_details(&[tags.join(", ").as_str()])
                .with_link(href);

            if !seen.first_time(&posting) {
                continue;
            }
            log_missing_company(&posting);
            jobs.push(posting);
        }

        jobs
    }
}

// Company is the plain text between the title and the first comma
fn company_after_title(paragraph: ElementRef, title: &str) -> Option<String> {
    let full = paragraph.text().collect::<String>();
    let after = match full.find(title) {
        Some(idx) => &full[idx + title.len()..],
        None => full.as_str(),
    };
    let cleaned = after.trim_start_matches(|c: char| c.is_whitespace() || c == ARROW);
    let (company, _) = cleaned.split_once(',')?;
    let company = company.trim();
    if company.is_empty() {
        None
    } else {
        Some(company.to_string())
    }
}

fn strip_arrow(text: &str) -> String {
    text.trim().trim_end_matches(ARROW).trim_end().to_string()
}

fn is_boilerplate(title: &str) -> bool {
    let lower = title.to_lowercase();
    BOILERPLATE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Plain-text digests: "Title →" / "Company, City" / optional "Tag Tag Tag".
pub fn parse_webbjobb_text(body: &str) -> Vec<ParsedJobPosting> {
    let lines: Vec<&str> = body.lines().map(str::trim).collect();
    let mut jobs = Vec::new();
    let mut seen = SeenKeys::default();

    for (i, line) in lines.iter().enumerate() {
        if !line.ends_with(ARROW) {
            continue;
        }

        let title = strip_arrow(line);
        if !is_usable_title(&title) || is_boilerplate(&title) {
            continue;
        }

        let (company, location) = lines
            .get(i + 1)
            .and_then(|next| next.split_once(','))
            .map(|(company, location)| (company.trim(), location.trim()))
            .unwrap_or(("", ""));

        let tags = lines
            .get(i + 2)
            .filter(|l| !l.is_empty() && !l.ends_with(ARROW) && !l.contains(','))
            .copied()
            .unwrap_or("");

        let block = lines[i..lines.len().min(i + 3)].join(" ");
        let mut posting =
            ParsedJobPosting::new(ProviderTag::Webbjobb, &title, company, location).with_details(&[tags]);
        posting.links = extract_links(&block);

        if !seen.first_time(&posting) {
            continue;
        }
        log_missing_company(&posting);
        jobs.push(posting);
    }

    jobs
}
