//! Turns staged rows into postings grouped under opportunities.
//!
//! Idempotent (a processed row is a no-op) and safe to run from several
//! workers at once: row ownership comes from claims, and the posting and
//! opportunity tables are guarded by unique keys with re-fetch on conflict.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, info_span, warn};

use crate::config::Settings;
use crate::db::{DEFAULT_BUSY_TIMEOUT, Database, SqliteStore};
use crate::error::{StoreError, is_busy};
use crate::models::{
    BatchSummary, IngestedRecord, IngestionStatus, JobOpportunity, JobPosting, NewJobOpportunity,
    NewJobPosting, ProcessingResult,
};
use crate::opportunity::compute_opportunity_key;

/// Stored error messages are cut to this many characters.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 1000;

/// Persistence the processor needs, scoped to one transaction.
pub trait IngestionStore {
    fn load_ingested(&self, id: i64) -> Result<Option<IngestedRecord>, StoreError>;
    fn find_posting_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<JobPosting>, StoreError>;
    fn find_posting_by_job_key(
        &self,
        platform: &str,
        job_key: &str,
    ) -> Result<Option<JobPosting>, StoreError>;
    /// Must fail with `StoreError::Conflict` when the fingerprint or the
    /// (platform, job key) pair exists.
    fn insert_posting(&self, posting: &NewJobPosting) -> Result<JobPosting, StoreError>;
    fn find_opportunity_by_key(&self, key: &str) -> Result<Option<JobOpportunity>, StoreError>;
    /// Must fail with `StoreError::Conflict` when the key exists.
    fn insert_opportunity(
        &self,
        opportunity: &NewJobOpportunity,
    ) -> Result<JobOpportunity, StoreError>;
    fn link_posting(&self, posting_id: i64, opportunity_id: i64) -> Result<(), StoreError>;
    fn mark_processed(
        &self,
        row_id: i64,
        posting_id: i64,
        opportunity_id: i64,
    ) -> Result<(), StoreError>;
}

/// Anything the batch driver can hand a claimed row to.
pub trait ProcessRow {
    fn process(&self, db: &mut Database, row: &IngestedRecord) -> Result<ProcessingResult>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IngestionProcessor;

impl IngestionProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Process one row inside a single `BEGIN IMMEDIATE` transaction. On any
    /// error the transaction rolls back and the row stays RECEIVED.
    pub fn process(&self, db: &mut Database, row: &IngestedRecord) -> Result<ProcessingResult> {
        let tx = db.begin_immediate()?;
        let result = self.process_in(&SqliteStore::new(&tx), row)?;
        tx.commit()
            .with_context(|| format!("Failed to commit ingested row {}", row.id))?;
        Ok(result)
    }

    pub fn process_in<S: IngestionStore>(
        &self,
        store: &S,
        row: &IngestedRecord,
    ) -> Result<ProcessingResult, StoreError> {
        // The caller's copy may be stale; trust the stored status only
        let row = store
            .load_ingested(row.id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "ingested_job_posting",
                key: row.id.to_string(),
            })?;
        if row.status == IngestionStatus::Processed {
            debug!(row_id = row.id, "already processed");
            return Ok(ProcessingResult::default());
        }

        let (posting, job_posting_created) = self.upsert_posting(store, &row)?;
        let (opportunity, job_opportunity_created) =
            self.get_or_create_opportunity(store, &posting)?;

        if posting.job_opportunity_id != Some(opportunity.id) {
            store.link_posting(posting.id, opportunity.id)?;
        }
        store.mark_processed(row.id, posting.id, opportunity.id)?;

        Ok(ProcessingResult {
            job_posting_created,
            job_opportunity_created,
        })
    }

    /// A posting is one per fingerprint and one per (platform, job key): the
    /// same `jk` seen with a reworded title still maps to the first posting.
    fn upsert_posting<S: IngestionStore>(
        &self,
        store: &S,
        row: &IngestedRecord,
    ) -> Result<(JobPosting, bool), StoreError> {
        if let Some(existing) = find_existing_posting(store, row)? {
            return Ok((existing, false));
        }

        match store.insert_posting(&NewJobPosting::from(row)) {
            Ok(posting) => Ok((posting, true)),
            Err(err) if err.is_conflict() => {
                debug!(fingerprint = %row.fingerprint, "posting created concurrently, re-fetching");
                let existing =
                    find_existing_posting(store, row)?.ok_or_else(|| StoreError::NotFound {
                        entity: "job_posting",
                        key: row.fingerprint.clone(),
                    })?;
                Ok((existing, false))
            }
            Err(err) => Err(err),
        }
    }

    fn get_or_create_opportunity<S: IngestionStore>(
        &self,
        store: &S,
        posting: &JobPosting,
    ) -> Result<(JobOpportunity, bool), StoreError> {
        let key = compute_opportunity_key(
            &posting.title,
            &posting.company,
            posting.location.as_deref(),
        );
        if let Some(existing) = store.find_opportunity_by_key(&key)? {
            return Ok((existing, false));
        }

        let url = posting
            .canonical_url
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| posting.raw_url.clone());
        let new = NewJobOpportunity {
            opportunity_key: key,
            title: posting.title.clone(),
            company: posting.company.clone(),
            location: posting.location.clone(),
            url,
        };

        match store.insert_opportunity(&new) {
            Ok(opportunity) => Ok((opportunity, true)),
            Err(err) if err.is_conflict() => {
                debug!(key = %new.opportunity_key, "opportunity created concurrently, re-fetching");
                let existing = store
                    .find_opportunity_by_key(&new.opportunity_key)?
                    .ok_or_else(|| StoreError::NotFound {
                        entity: "job_opportunity",
                        key: new.opportunity_key.clone(),
                    })?;
                Ok((existing, false))
            }
            Err(err) => Err(err),
        }
    }
}

fn find_existing_posting<S: IngestionStore>(
    store: &S,
    row: &IngestedRecord,
) -> Result<Option<JobPosting>, StoreError> {
    if let Some(posting) = store.find_posting_by_fingerprint(&row.fingerprint)? {
        return Ok(Some(posting));
    }
    match row.job_key.as_deref() {
        Some(job_key) => store.find_posting_by_job_key(&row.platform, job_key),
        None => Ok(None),
    }
}

impl ProcessRow for IngestionProcessor {
    fn process(&self, db: &mut Database, row: &IngestedRecord) -> Result<ProcessingResult> {
        IngestionProcessor::process(self, db, row)
    }
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub batch_size: usize,
    pub lease: Duration,
    /// Wait on another worker's write lock this long before deferring a row.
    pub busy_timeout: Duration,
}

impl DriverConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            batch_size: settings.batch_size,
            lease: Duration::from_secs(settings.claim_lease_secs),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Drains RECEIVED rows page by page until a claim comes back empty.
pub struct BatchDriver<P = IngestionProcessor> {
    processor: P,
    worker_id: String,
    config: DriverConfig,
}

impl BatchDriver<IngestionProcessor> {
    pub fn new(worker_id: impl Into<String>, config: DriverConfig) -> Self {
        Self::with_processor(IngestionProcessor::new(), worker_id, config)
    }
}

impl<P: ProcessRow> BatchDriver<P> {
    pub fn with_processor(
        processor: P,
        worker_id: impl Into<String>,
        config: DriverConfig,
    ) -> Self {
        Self {
            processor,
            worker_id: worker_id.into(),
            config,
        }
    }

    /// A row that fails is marked FAILED and the batch moves on; only store
    /// errors outside row processing abort the run.
    pub fn run(&self, db: &mut Database) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();
        db.set_busy_timeout(self.config.busy_timeout)
            .context("Failed to set busy timeout")?;

        loop {
            let rows = db
                .claim_received(&self.worker_id, self.config.batch_size.max(1), self.config.lease)
                .context("Failed to claim ingested rows")?;
            if rows.is_empty() {
                break;
            }
            info!(worker = %self.worker_id, rows = rows.len(), "claimed page");

            for row in &rows {
                match self.processor.process(db, row) {
                    Ok(result) => {
                        summary.succeeded += 1;
                        debug!(
                            row_id = row.id,
                            posting_created = result.job_posting_created,
                            opportunity_created = result.job_opportunity_created,
                            "processed"
                        );
                    }
                    Err(err) if is_lock_contention(&err) => {
                        // Leave the claim to lapse; the row stays RECEIVED for a later pass
                        summary.deferred += 1;
                        warn!(
                            row_id = row.id,
                            error = %format!("{err:#}"),
                            "database locked, row deferred"
                        );
                    }
                    Err(err) => {
                        summary.failed += 1;
                        let message = truncate_message(&format!("{err:#}"));
                        warn!(row_id = row.id, error = %message, "processing failed");
                        db.mark_failed(row.id, &message)
                            .with_context(|| {
                                format!("Failed to record failure of row {}", row.id)
                            })?;
                    }
                }
            }
        }

        info!(
            worker = %self.worker_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            deferred = summary.deferred,
            "processing complete"
        );
        Ok(summary)
    }
}

/// True when any cause in the chain is SQLite reporting the database busy
/// or locked. Those rows are retried, not failed.
fn is_lock_contention(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(store) = cause.downcast_ref::<StoreError>() {
            return store.is_busy();
        }
        cause.downcast_ref::<rusqlite::Error>().is_some_and(is_busy)
    })
}

fn truncate_message(message: &str) -> String {
    message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}

/// Run `workers` drivers in parallel, one thread and one connection each,
/// against the database at `path`.
pub fn run_workers(path: &Path, workers: usize, config: &DriverConfig) -> Result<BatchSummary> {
    let workers = workers.max(1);
    let pid = std::process::id();

    let results: Vec<Result<BatchSummary>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|n| {
                let config = config.clone();
                scope.spawn(move || {
                    let worker_id = format!("{pid}-{n}");
                    let _span = info_span!("worker", id = %worker_id).entered();
                    let mut db = Database::open(path)?;
                    BatchDriver::new(worker_id, config).run(&mut db)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("worker thread panicked")))
            })
            .collect()
    });

    let mut total = BatchSummary::default();
    for result in results {
        total.merge(result?);
    }
    Ok(total)
}
