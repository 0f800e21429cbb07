use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::{INDEED, JobAlertParser, default_keywords};
use crate::html::{element_text, has_style};
use crate::models::RawJobRecord;

const LISTING_CELL_STYLE: &str = "padding:0px 0px 32px";
const TITLE_STYLE: &str = "font-size:16px";
const SUMMARY_STYLE: &str = "color:#767676";

/// French department code after a city, `Paris (75)`, `Ajaccio (2A)`.
static LOCATION_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\d+[A-Za-z]?\)").expect("static regex"));

struct Selectors {
    td: Selector,
    a: Selector,
    link: Selector,
    h2: Selector,
    span: Selector,
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    td: Selector::parse("td").expect("static selector"),
    a: Selector::parse("a").expect("static selector"),
    link: Selector::parse("a[href]").expect("static selector"),
    h2: Selector::parse("h2").expect("static selector"),
    span: Selector::parse("span").expect("static selector"),
});

/// Indeed job alert emails. Each listing is a padded table cell holding a
/// stack of rows: title, company line, salary, summary.
pub struct IndeedParser {
    keywords: Vec<String>,
}

impl Default for IndeedParser {
    fn default() -> Self {
        Self::new(default_keywords())
    }
}

impl IndeedParser {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    fn parse_listing(&self, cell: ElementRef<'_>) -> Option<RawJobRecord> {
        let sel = &*SELECTORS;

        let Some(raw_url) = cell
            .select(&sel.link)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            debug!("indeed listing without link, skipped");
            return None;
        };

        let title_element = cell
            .select(&sel.a)
            .find(|a| has_style(*a, TITLE_STYLE))
            .or_else(|| cell.select(&sel.h2).next());
        let Some(title_element) = title_element else {
            debug!(url = raw_url, "indeed listing without title, skipped");
            return None;
        };
        let title = element_text(title_element);
        if title.is_empty() {
            debug!(url = raw_url, "indeed listing with empty title, skipped");
            return None;
        }

        let company_row = enclosing_row(title_element).and_then(next_row);
        let CompanyLine {
            company,
            rating,
            mut location,
        } = company_row
            .map(|row| company_line(row, &sel.span))
            .unwrap_or_default();

        if location.is_none() {
            location = fallback_location(cell);
        }

        let salary_row = company_row.and_then(next_row);
        let salary = salary_row
            .map(element_text)
            .filter(|text| text.contains('€') || text.contains('$'));

        let summary = salary_row
            .and_then(next_row)
            .map(element_text)
            .filter(|text| !text.is_empty())
            .or_else(|| {
                cell.select(&sel.td)
                    .find(|td| has_style(*td, SUMMARY_STYLE))
                    .map(element_text)
                    .filter(|text| !text.is_empty())
            });

        Some(RawJobRecord {
            title,
            company,
            location,
            salary,
            summary,
            description: None,
            rating,
            raw_url: raw_url.to_string(),
            platform: INDEED.to_string(),
        })
    }
}

impl JobAlertParser for IndeedParser {
    fn platform(&self) -> &'static str {
        INDEED
    }

    fn keywords(&self) -> &[String] {
        &self.keywords
    }

    fn parse(&self, document: &Html) -> Vec<RawJobRecord> {
        document
            .root_element()
            .select(&SELECTORS.td)
            .filter(|td| has_style(*td, LISTING_CELL_STYLE))
            .filter_map(|cell| self.parse_listing(cell))
            .collect()
    }
}

#[derive(Debug, Default, PartialEq)]
struct CompanyLine {
    company: String,
    rating: Option<f64>,
    location: Option<String>,
}

/// Spans read in order: company, then either a rating followed by the
/// location, or the location directly. Only the second span is ambiguous.
fn company_line(row: ElementRef<'_>, span: &Selector) -> CompanyLine {
    let texts: Vec<String> = row
        .select(span)
        .map(element_text)
        .filter(|text| !text.is_empty())
        .collect();

    let mut line = CompanyLine {
        company: texts.first().cloned().unwrap_or_default(),
        ..CompanyLine::default()
    };

    if let Some(second) = texts.get(1) {
        match parse_rating(second) {
            Some(rating) => {
                line.rating = Some(rating);
                line.location = texts.get(2).and_then(|third| clean_location(third));
            }
            None => line.location = clean_location(second),
        }
    }
    line
}

/// `4,5` and `4.5` are both ratings.
fn parse_rating(text: &str) -> Option<f64> {
    text.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|r| r.is_finite())
}

fn clean_location(text: &str) -> Option<String> {
    let cleaned = text.trim_start_matches(['-', ' ']).trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

/// First innermost cell whose text carries a location code.
fn fallback_location(cell: ElementRef<'_>) -> Option<String> {
    cell.descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "td" && is_leaf_cell(*e))
        .map(element_text)
        .find(|text| LOCATION_CODE.is_match(text))
}

fn is_leaf_cell(td: ElementRef<'_>) -> bool {
    !td.descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .any(|e| e.value().name() == "td")
}

fn enclosing_row(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "tr")
}

fn next_row(row: ElementRef<'_>) -> Option<ElementRef<'_>> {
    row.next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "tr")
}
