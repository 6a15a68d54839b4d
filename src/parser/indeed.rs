use scraper::{ElementRef, Html};

use super::{element_text, is_usable_title, log_missing_company, selector, HtmlParser, SeenKeys};
use crate::models::ParsedJobPosting;
use crate::provider::ProviderTag;

const DETAIL_FONT: &str = "font-size:14px";
const MUTED_COLOR: &str = "color:#767676";

/// Each posting sits in a `<td class="pb-24">`: title in `<h2><a>`, then
/// presentation-table rows for company, location and a muted snippet.
/// Indeed's tracking links carry no stable numeric id, so they are kept as-is.
pub struct IndeedParser;

impl HtmlParser for IndeedParser {
    fn parse(&self, html: &str) -> Vec<ParsedJobPosting> {
        let document = Html::parse_document(html);
        let (Some(card_selector), Some(title_selector), Some(link_selector)) =
            (selector("td.pb-24"), selector("h2 a"), selector("a"))
        else {
            return Vec::new();
        };

        let mut jobs = Vec::new();
        let mut seen = SeenKeys::default();

        for card in document.select(&card_selector) {
            let Some(title_link) = card.select(&title_selector).next() else {
                continue;
            };
            let title = element_text(title_link);
            if !is_usable_title(&title) {
                continue;
            }

            let href = card
                .select(&link_selector)
                .next()
                .and_then(|a| a.value().attr("href"))
                .unwrap_or("");

            let fields = card_fields(card);
            let posting = ParsedJobPosting::new(ProviderTag::Indeed, &title, &fields.company, &fields.location)
                .with_details(&[fields.description.as_str()])
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

#[derive(Default)]
struct CardFields {
    company: String,
    location: String,
    description: String,
}

// First 14px cell after the title row is the company (first cell only, the
// rating lives in a sibling), the next one the location; the muted one is a snippet.
fn card_fields(card: ElementRef) -> CardFields {
    let mut fields = CardFields::default();
    let (Some(rows), Some(cells), Some(headings)) = (
        selector(r#"table[role="presentation"] tr"#),
        selector("td"),
        selector("h2"),
    ) else {
        return fields;
    };

    for row in card.select(&rows) {
        let Some(first_cell) = row.select(&cells).next() else {
            continue;
        };
        let style = first_cell.value().attr("style").unwrap_or("").replace(' ', "");
        let text = element_text(first_cell);
        let detail = style.contains(DETAIL_FONT);
        let muted = style.contains(MUTED_COLOR);

        if fields.company.is_empty() && row.select(&headings).next().is_none() && detail && !muted {
            let len = text.chars().count();
            if len > 1 && len < 100 {
                fields.company = text;
            }
        } else if !fields.company.is_empty() && fields.location.is_empty() && detail && !muted {
            fields.location = text;
        } else if detail && muted {
            fields.description = text;
        }
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(href: &str, title: &str, company: &str, location: &str, snippet: &str) -> String {
        format!(
            r#"<tr><td class="pb-24">
                <table role="presentation"><tbody>
                  <tr><td><h2><a class="strong-text-link" href="{href}">{title}</a></h2></td></tr>
                  <tr><td style="font-size:14px;line-height:21px">{company}</td><td>4.1 ★</td></tr>
                  <tr><td style="font-size:14px">{location}</td></tr>
                  <tr><td style="font-size:14px;color:#767676">{snippet}</td></tr>
                </tbody></table>
              </td></tr>"#
        )
    }

    #[test]
    fn test_parse_indeed_cards() {
        let html = format!(
            "<table>{}{}</table>",
            card(
                "https://se.indeed.com/rc/clk/dl?jk=abc123",
                "Frontend Developer",
                "Klarna",
                "Stockholm",
                "React, TypeScript"
            ),
            card("https://se.indeed.com/rc/clk/dl?jk=def456", "Java Developer", "Ericsson", "Kista", "")
        );

        let jobs = IndeedParser.parse(&html);

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].title, "Frontend Developer");
        assert_eq!(jobs[0].company, "Klarna");
        assert_eq!(jobs[0].location, "Stockholm");
        assert_eq!(jobs[0].details, "Frontend Developer - Klarna - Stockholm - React, TypeScript");
        assert_eq!(jobs[0].links, vec!["https://se.indeed.com/rc/clk/dl?jk=abc123"]);
        assert_eq!(jobs[1].company, "Ericsson");
        assert_eq!(jobs[1].location, "Kista");
    }

    #[test]
    fn test_dedup_by_title() {
        let html = format!(
            "<table>{}{}</table>",
            card("https://se.indeed.com/a", "Frontend Developer", "Klarna", "Stockholm", ""),
            card("https://se.indeed.com/b", "frontend developer", "Klarna", "Stockholm", "")
        );
        assert_eq!(IndeedParser.parse(&html).len(), 1);
    }

    #[test]
    fn test_card_without_title_is_skipped() {
        let html = r#"<table><tr><td class="pb-24"><a href="https://se.indeed.com/x">Unsubscribe</a></td></tr></table>"#;
        assert!(IndeedParser.parse(html).is_empty());
    }

    #[test]
    fn test_unstyled_rows_leave_sentinel_company() {
        let html = r#"<table><tr><td class="pb-24">
            <table role="presentation"><tr><td><h2><a href="https://se.indeed.com/x">Data Engineer</a></h2></td></tr>
            <tr><td>Some Company</td></tr></table>
        </td></tr></table>"#;
        let jobs = IndeedParser.parse(html);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].company, "unknown");
        assert_eq!(jobs[0].location, "");
    }
}
