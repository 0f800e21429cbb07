use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::{JobAlertParser, LINKEDIN, default_keywords};
use crate::html::{element_text, has_style};
use crate::models::RawJobRecord;

static LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").expect("static selector"));

/// LinkedIn job alert emails: a styled title link followed by a
/// `Company · Location` paragraph.
pub struct LinkedInParser {
    keywords: Vec<String>,
}

impl Default for LinkedInParser {
    fn default() -> Self {
        Self::new(default_keywords())
    }
}

impl LinkedInParser {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
        }
    }
}

impl JobAlertParser for LinkedInParser {
    fn platform(&self) -> &'static str {
        LINKEDIN
    }

    fn keywords(&self) -> &[String] {
        &self.keywords
    }

    fn parse(&self, document: &Html) -> Vec<RawJobRecord> {
        let mut jobs = Vec::new();

        for link in document
            .root_element()
            .select(&LINK)
            .filter(|a| has_style(*a, "font-size:16px") && has_style(*a, "line-height:1.25"))
        {
            let title = element_text(link);
            if title.is_empty() {
                debug!("linkedin title link without text, skipped");
                continue;
            }
            let Some(raw_url) = link.value().attr("href") else {
                debug!(title = %title, "linkedin title link without href, skipped");
                continue;
            };

            let (company, location) = find_next(link, "p")
                .map(|p| split_company_location(&element_text(p)))
                .unwrap_or_default();

            jobs.push(RawJobRecord {
                title,
                company,
                location,
                salary: None,
                summary: None,
                description: None,
                rating: None,
                raw_url: raw_url.to_string(),
                platform: LINKEDIN.to_string(),
            });
        }

        jobs
    }
}

/// `Acme · Paris, Île-de-France` → company and location. Without the middle
/// dot the whole line is the company.
fn split_company_location(text: &str) -> (String, Option<String>) {
    match text.split_once('·') {
        Some((company, location)) => {
            let location = location.trim();
            (
                company.trim().to_string(),
                (!location.is_empty()).then(|| location.to_string()),
            )
        }
        None => (text.trim().to_string(), None),
    }
}

/// First element named `name` after `start` in document order, not counting
/// `start`'s own descendants.
fn find_next<'a>(start: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    let mut current = Some(*start);
    while let Some(node) = current {
        for sibling in node.next_siblings() {
            let found = sibling
                .descendants()
                .filter_map(ElementRef::wrap)
                .find(|e| e.value().name() == name);
            if found.is_some() {
                return found;
            }
        }
        current = node.parent();
    }
    None
}
