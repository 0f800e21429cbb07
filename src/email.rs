use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use mailparse::{MailHeaderMap, ParsedMail, parse_mail};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::canonical::sanitize_job_url;
use crate::db::Database;
use crate::html::strip_structure;
use crate::models::{IngestionSource, NewIngestedRecord, RawJobRecord, StageOutcome};
use crate::parsers::ParserRegistry;
use crate::pii::{HeaderMap, PiiPatterns};

/// One alert email, decoded down to what the pipeline reads.
#[derive(Debug, Clone)]
pub struct RawEmail {
    /// Every header, lowercased keys, first occurrence wins.
    pub headers: HeaderMap,
    pub sender: String,
    pub subject: String,
    pub date: Option<DateTime<Utc>>,
    pub html: String,
    /// Message-ID when present; used as the source event id.
    pub uid: Option<String>,
}

impl RawEmail {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let parsed = parse_mail(raw).context("Failed to parse email")?;

        let mut headers = HeaderMap::new();
        for header in &parsed.headers {
            headers
                .entry(header.get_key().trim().to_lowercase())
                .or_insert_with(|| header.get_value());
        }

        let sender = parsed.headers.get_first_value("From").unwrap_or_default();
        let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
        let date = parsed
            .headers
            .get_first_value("Date")
            .and_then(|d| mailparse::dateparse(&d).ok())
            .and_then(|ts| DateTime::from_timestamp(ts, 0));
        let uid = parsed
            .headers
            .get_first_value("Message-ID")
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        let html = get_email_body(&parsed)?;

        Ok(Self {
            headers,
            sender,
            subject,
            date,
            html,
            uid,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let mut email =
            Self::parse(&raw).with_context(|| format!("Failed to parse {}", path.display()))?;
        if email.uid.is_none() {
            // Stable fallback so re-ingesting the same file keeps its event id
            email.uid = path.file_name().map(|n| n.to_string_lossy().into_owned());
        }
        Ok(email)
    }
}

/// Prefer the HTML alternative anywhere in the MIME tree, then plain text,
/// then whatever the first leaf holds.
fn get_email_body(parsed: &ParsedMail) -> Result<String> {
    if parsed.subparts.is_empty() {
        return Ok(parsed.get_body()?);
    }

    for mimetype in ["text/html", "text/plain"] {
        if let Some(part) = find_part(parsed, mimetype) {
            return Ok(part.get_body()?);
        }
    }

    if let Some(part) = parsed.subparts.first() {
        return get_email_body(part);
    }

    Err(anyhow!("No email body found"))
}

fn find_part<'a, 'b>(parsed: &'a ParsedMail<'b>, mimetype: &str) -> Option<&'a ParsedMail<'b>> {
    if parsed.subparts.is_empty() {
        return parsed.ctype.mimetype.eq_ignore_ascii_case(mimetype).then_some(parsed);
    }
    parsed.subparts.iter().find_map(|part| find_part(part, mimetype))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub platform: &'static str,
    pub records: Vec<RawJobRecord>,
}

/// Classify, strip and parse. `None` when no parser claims the email.
pub fn extract_jobs(registry: &ParserRegistry, email: &RawEmail) -> Option<Extraction> {
    let parser = registry.classify(&email.sender, &email.subject)?;
    let document = strip_structure(&email.html);
    let records = parser.parse(document.html());
    debug!(platform = parser.platform(), records = records.len(), "parsed alert");
    Some(Extraction {
        platform: parser.platform(),
        records,
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub emails_found: usize,
    pub emails_unmatched: usize,
    pub jobs_found: usize,
    pub jobs_staged: usize,
    pub duplicates: usize,
}

impl IngestStats {
    pub fn merge(&mut self, other: IngestStats) {
        self.emails_found += other.emails_found;
        self.emails_unmatched += other.emails_unmatched;
        self.jobs_found += other.jobs_found;
        self.jobs_staged += other.jobs_staged;
        self.duplicates += other.duplicates;
    }
}

/// Extract and stage every listing of one email. With `db` absent nothing
/// is written (dry run) and the records are only counted.
pub fn ingest_email(
    registry: &ParserRegistry,
    email: &RawEmail,
    source: IngestionSource,
    db: Option<&Database>,
) -> Result<(IngestStats, Vec<NewIngestedRecord>)> {
    let mut stats = IngestStats {
        emails_found: 1,
        ..IngestStats::default()
    };

    let Some(extraction) = extract_jobs(registry, email) else {
        debug!(sender = %email.sender, subject = %email.subject, "no parser for email");
        stats.emails_unmatched = 1;
        return Ok((stats, Vec::new()));
    };

    let mut records = Vec::with_capacity(extraction.records.len());
    for raw in extraction.records {
        stats.jobs_found += 1;
        let record = NewIngestedRecord::from_raw(raw, source, email.uid.clone());
        if let Some(db) = db {
            match db.stage(&record)? {
                StageOutcome::Staged(row) => {
                    stats.jobs_staged += 1;
                    debug!(row_id = row.id, title = %row.title, "staged");
                }
                StageOutcome::Duplicate {
                    existing_id,
                    existing_status,
                } => {
                    stats.duplicates += 1;
                    debug!(existing_id, status = %existing_status, "duplicate fingerprint");
                }
            }
        }
        records.push(record);
    }

    info!(
        platform = extraction.platform,
        found = stats.jobs_found,
        staged = stats.jobs_staged,
        duplicates = stats.duplicates,
        "ingested email"
    );
    Ok((stats, records))
}

/// A shareable copy of an email: structure stripped, links de-tracked and
/// the owner's identity redacted.
#[derive(Debug, Clone)]
pub struct SanitizedEmail {
    pub html: String,
    pub headers: HeaderMap,
}

pub fn sanitize_email(email: &RawEmail, patterns: &PiiPatterns) -> SanitizedEmail {
    let mut document = strip_structure(&email.html);
    document.sanitize_links();
    patterns.redact_document(&mut document);
    SanitizedEmail {
        html: document.prettify(),
        headers: patterns.sanitize_headers(&email.headers),
    }
}

/// Parsed listings fit to publish next to a sanitized sample: links reduced
/// to their tracking-free form and identity redacted from text fields.
/// Empty when no parser claims the email.
pub fn sanitize_jobs(
    registry: &ParserRegistry,
    email: &RawEmail,
    patterns: &PiiPatterns,
) -> Vec<RawJobRecord> {
    let Some(extraction) = extract_jobs(registry, email) else {
        return Vec::new();
    };
    let redact = |value: Option<String>| value.map(|v| patterns.redact_text(&v));

    extraction
        .records
        .into_iter()
        .map(|job| RawJobRecord {
            title: patterns.redact_text(&job.title),
            company: patterns.redact_text(&job.company),
            location: redact(job.location),
            salary: redact(job.salary),
            summary: redact(job.summary),
            description: redact(job.description),
            rating: job.rating,
            raw_url: patterns.redact_text(&sanitize_job_url(&job.raw_url)),
            platform: job.platform,
        })
        .collect()
}
