use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::normalize_job_url;
use crate::fingerprint::compute_fingerprint;

/// One listing as scraped from an alert email, before any identity work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawJobRecord {
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub salary: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub rating: Option<f64>,
    pub raw_url: String,
    pub platform: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalJobUrl {
    pub job_key: String,
    pub canonical_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionSource {
    Email,
    Api,
    Webhook,
}

impl IngestionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            IngestionSource::Email => "email",
            IngestionSource::Api => "api",
            IngestionSource::Webhook => "webhook",
        }
    }
}

impl fmt::Display for IngestionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(IngestionSource::Email),
            "api" => Ok(IngestionSource::Api),
            "webhook" => Ok(IngestionSource::Webhook),
            other => Err(format!("unknown ingestion source '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    Received,
    Processed,
    /// Reserved. Staging rejects duplicates up front, so no row is written
    /// with this status today.
    Duplicate,
    Failed,
}

impl IngestionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IngestionStatus::Received => "received",
            IngestionStatus::Processed => "processed",
            IngestionStatus::Duplicate => "duplicate",
            IngestionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(IngestionStatus::Received),
            "processed" => Ok(IngestionStatus::Processed),
            "duplicate" => Ok(IngestionStatus::Duplicate),
            "failed" => Ok(IngestionStatus::Failed),
            other => Err(format!("unknown ingestion status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    #[default]
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Staging input. Identity (canonical URL and fingerprint) is fixed when the
/// value is built, so whatever gets inserted is exactly what was hashed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIngestedRecord {
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub salary: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub rating: Option<f64>,
    pub raw_url: String,
    pub platform: String,
    pub job_key: Option<String>,
    pub canonical_url: Option<String>,
    pub ingestion_source: IngestionSource,
    pub source_event_id: Option<String>,
    pub fingerprint: String,
}

impl NewIngestedRecord {
    pub fn from_raw(
        raw: RawJobRecord,
        source: IngestionSource,
        source_event_id: Option<String>,
    ) -> Self {
        let canonical = normalize_job_url(&raw.raw_url);
        let job_key = canonical.as_ref().map(|c| c.job_key.clone());
        let canonical_url = canonical.map(|c| c.canonical_url);

        let fingerprint = compute_fingerprint(
            Some(&raw.platform),
            job_key.as_deref(),
            canonical_url.as_deref(),
            Some(&raw.title),
            Some(&raw.company),
            raw.location.as_deref(),
        );

        Self {
            title: raw.title,
            company: raw.company,
            location: non_blank(raw.location),
            salary: non_blank(raw.salary),
            summary: non_blank(raw.summary),
            description: non_blank(raw.description),
            rating: raw.rating,
            raw_url: raw.raw_url,
            platform: raw.platform,
            job_key,
            canonical_url,
            ingestion_source: source,
            source_event_id: non_blank(source_event_id),
            fingerprint,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// A staged row as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedRecord {
    pub id: i64,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub salary: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub rating: Option<f64>,
    pub raw_url: String,
    pub platform: String,
    pub job_key: Option<String>,
    pub canonical_url: Option<String>,
    pub ingestion_source: IngestionSource,
    pub source_event_id: Option<String>,
    pub fingerprint: String,
    pub status: IngestionStatus,
    pub error_message: Option<String>,
    pub ingested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub job_posting_id: Option<i64>,
    pub job_opportunity_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: i64,
    pub job_opportunity_id: Option<i64>,
    pub posting_fingerprint: String,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub rating: Option<f64>,
    pub summary: Option<String>,
    pub salary: Option<String>,
    pub description: Option<String>,
    pub raw_url: String,
    pub canonical_url: Option<String>,
    pub job_key: Option<String>,
    pub platform: String,
    pub ingestion_source: IngestionSource,
    pub source_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a posting, taken from a staging row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJobPosting {
    pub posting_fingerprint: String,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub rating: Option<f64>,
    pub summary: Option<String>,
    pub salary: Option<String>,
    pub description: Option<String>,
    pub raw_url: String,
    pub canonical_url: Option<String>,
    pub job_key: Option<String>,
    pub platform: String,
    pub ingestion_source: IngestionSource,
    pub source_event_id: Option<String>,
}

impl From<&IngestedRecord> for NewJobPosting {
    fn from(row: &IngestedRecord) -> Self {
        Self {
            posting_fingerprint: row.fingerprint.clone(),
            title: row.title.clone(),
            company: row.company.clone(),
            location: row.location.clone(),
            rating: row.rating,
            summary: row.summary.clone(),
            salary: row.salary.clone(),
            description: row.description.clone(),
            raw_url: row.raw_url.clone(),
            canonical_url: row.canonical_url.clone(),
            job_key: row.job_key.clone(),
            platform: row.platform.clone(),
            ingestion_source: row.ingestion_source,
            source_event_id: row.source_event_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOpportunity {
    pub id: i64,
    pub opportunity_key: String,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub url: String,
    pub is_active: bool,
    pub priority: Priority,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJobOpportunity {
    pub opportunity_key: String,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub url: String,
}

/// Opportunity listing row with the number of postings grouped under it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunitySummary {
    pub opportunity: JobOpportunity,
    pub posting_count: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub job_posting_created: bool,
    pub job_opportunity_created: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Rows skipped because the database stayed locked. They remain RECEIVED
    /// and are picked up again once their claim lease expires.
    pub deferred: usize,
}

impl BatchSummary {
    pub fn merge(&mut self, other: BatchSummary) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.deferred += other.deferred;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Staged(IngestedRecord),
    Duplicate {
        existing_id: i64,
        existing_status: IngestionStatus,
    },
}
