use scraper::{ElementRef, Html};

use super::{
    closest, collapse_whitespace, element_text, has_class, is_tag, is_usable_title, log_missing_company, selector,
    HtmlParser, SeenKeys,
};
use crate::models::ParsedJobPosting;
use crate::provider::ProviderTag;

/// Bordered blocks per posting: company in a plain `<h3>`, title in
/// `<h3 class="title"><a>`, location in the `<p>` carrying the pin icon.
pub struct DemandoParser;

impl HtmlParser for DemandoParser {
    fn parse(&self, html: &str) -> Vec<ParsedJobPosting> {
        let document = Html::parse_document(html);
        let (Some(title_selector), Some(anchor)) = (selector("h3.title"), selector("a")) else {
            return Vec::new();
        };

        let mut jobs = Vec::new();
        let mut seen = SeenKeys::default();

        for heading in document.select(&title_selector) {
            let link = heading.select(&anchor).next();
            let title = link
                .map(element_text)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| element_text(heading));
            if !is_usable_title(&title) {
                continue;
            }

            let href = link.and_then(|a| a.value().attr("href")).unwrap_or("");
            let container = closest(heading, |a| is_tag(a, &["table"]) || has_class(a, "content-item"));
            let (company, location) = container.map(company_and_location).unwrap_or_default();

            let posting = ParsedJobPosting::new(ProviderTag::Demando, &title, &company, &location)
                .with_details(&[])
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

fn company_and_location(container: ElementRef) -> (String, String) {
    let (Some(headings), Some(anchor), Some(paragraphs), Some(pin)) = (
        selector("h3"),
        selector("a"),
        selector("p"),
        selector(r#"img[src*="icon-pin"]"#),
    ) else {
        return Default::default();
    };

    let company = container
        .select(&headings)
        .find(|h3| !has_class(*h3, "title"))
        .map(|h3| {
            h3.select(&anchor)
                .next()
                .map(element_text)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| element_text(h3))
        })
        .unwrap_or_default();

    // Last pin paragraph wins
    let location = container
        .select(&paragraphs)
        .filter(|p| p.select(&pin).next().is_some())
        .last()
        .map(|p| collapse_whitespace(&p.text().collect::<String>()))
        .unwrap_or_default();

    (company, location)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(company: &str, title: &str, href: &str, location: &str) -> String {
        format!(
            r#"<table class="content-item" style="border:1px solid #dddddd"><tr><td>
                 <h3><a href="https://demando.se/company">{company}</a></h3>
                 <h3 class="title"><a href="{href}">{title}</a></h3>
                 <p><img src="https://demando.se/img/icon-pin.png" alt=""> {location}
                 </p>
               </td></tr></table>"#
        )
    }

    #[test]
    fn test_parse_demando_cards() {
        let html = format!(
            "{}{}",
            card("Tink", "Senior Backend Engineer", "https://demando.se/jobs/1", "Stockholm,\n   Sweden"),
            card("Mentimeter", "Frontend Engineer", "https://demando.se/jobs/2", "Remote")
        );

        let jobs = DemandoParser.parse(&html);

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].title, "Senior Backend Engineer");
        assert_eq!(jobs[0].company, "Tink");
        assert_eq!(jobs[0].location, "Stockholm, Sweden");
        assert_eq!(jobs[0].links, vec!["https://demando.se/jobs/1"]);
        assert_eq!(jobs[0].details, "Senior Backend Engineer - Tink - Stockholm, Sweden");
        assert_eq!(jobs[1].company, "Mentimeter");
        assert_eq!(jobs[1].location, "Remote");
    }

    #[test]
    fn test_title_without_link_and_container() {
        let html = r#"<div><h3 class="title">Platform Engineer</h3></div>"#;
        let jobs = DemandoParser.parse(html);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].title, "Platform Engineer");
        assert_eq!(jobs[0].company, "unknown");
        assert!(jobs[0].links.is_empty());
    }

    #[test]
    fn test_dedup_and_short_titles() {
        let html = format!(
            "{}{}{}",
            card("Tink", "Backend Engineer", "https://demando.se/jobs/1", "Stockholm"),
            card("Tink", "backend engineer", "https://demando.se/jobs/3", "Stockholm"),
            card("Tink", "QA", "https://demando.se/jobs/4", "Stockholm")
        );
        assert_eq!(DemandoParser.parse(&html).len(), 1);
    }
}
