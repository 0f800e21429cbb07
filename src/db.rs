use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::StoreError;
use crate::models::{
    IngestedRecord, IngestionSource, IngestionStatus, JobOpportunity, JobPosting, NewIngestedRecord,
    NewJobOpportunity, NewJobPosting, OpportunitySummary, Priority, StageOutcome,
};
use crate::processor::IngestionStore;

const INGESTED_COLUMNS: &str = "id, title, company, location, salary, summary, description, rating,
    raw_url, platform, job_key, canonical_url, ingestion_source, source_event_id, fingerprint,
    status, error_message, ingested_at, updated_at, processed_at, job_posting_id,
    job_opportunity_id";

const POSTING_COLUMNS: &str = "id, job_opportunity_id, posting_fingerprint, title, company,
    location, rating, summary, salary, description, raw_url, canonical_url, job_key, platform,
    ingestion_source, source_event_id, created_at, updated_at";

const OPPORTUNITY_COLUMNS: &str = "id, opportunity_key, title, company, location, url, is_active,
    priority, notes, created_at, updated_at";

/// Matches the `busy_timeout` pragma set on open.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    /// Open (creating parent directories) and configure for several
    /// concurrent worker connections.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.execute_batch(
            "PRAGMA busy_timeout = 5000;
             PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;",
        )?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS job_opportunity (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                opportunity_key TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                company TEXT NOT NULL DEFAULT '',
                location TEXT,
                url TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                priority TEXT NOT NULL DEFAULT 'low' CHECK (priority IN ('high', 'medium', 'low')),
                notes TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS job_posting (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_opportunity_id INTEGER REFERENCES job_opportunity(id),
                posting_fingerprint TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                company TEXT NOT NULL DEFAULT '',
                location TEXT,
                rating REAL,
                summary TEXT,
                salary TEXT,
                description TEXT,
                raw_url TEXT NOT NULL,
                canonical_url TEXT,
                job_key TEXT,
                platform TEXT NOT NULL,
                ingestion_source TEXT NOT NULL CHECK (ingestion_source IN ('email', 'api', 'webhook')),
                source_event_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ingested_job_posting (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                company TEXT NOT NULL DEFAULT '',
                location TEXT,
                salary TEXT,
                summary TEXT,
                description TEXT,
                rating REAL,
                raw_url TEXT NOT NULL,
                platform TEXT NOT NULL,
                job_key TEXT,
                canonical_url TEXT,
                ingestion_source TEXT NOT NULL CHECK (ingestion_source IN ('email', 'api', 'webhook')),
                source_event_id TEXT,
                fingerprint TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'received' CHECK (status IN ('received', 'processed', 'duplicate', 'failed')),
                error_message TEXT,
                ingested_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                processed_at TEXT,
                job_posting_id INTEGER REFERENCES job_posting(id),
                job_opportunity_id INTEGER REFERENCES job_opportunity(id),
                claimed_by TEXT,
                claimed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_ingested_status ON ingested_job_posting(status, ingested_at, id);
            CREATE INDEX IF NOT EXISTS idx_posting_opportunity ON job_posting(job_opportunity_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_posting_platform_job_key
                ON job_posting(platform, job_key) WHERE job_key IS NOT NULL;
            "#,
        )?;
        Ok(())
    }

    /// How long a statement waits on another connection's lock before
    /// failing with SQLITE_BUSY.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<(), StoreError> {
        Ok(self.conn.busy_timeout(timeout)?)
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='ingested_job_posting'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Database not initialized. Run 'jobtrackr init' first."));
        }
        Ok(())
    }

    /// `BEGIN IMMEDIATE`: the write lock is taken up front, so two workers
    /// never both read and then fail to upgrade.
    pub fn begin_immediate(&mut self) -> Result<Transaction<'_>, StoreError> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    // --- Staging ---

    /// Insert a staged row, or report the row that already holds this
    /// fingerprint. Never raises on a duplicate.
    pub fn stage(&self, record: &NewIngestedRecord) -> Result<StageOutcome, StoreError> {
        let now = Utc::now();
        let inserted = self.conn.execute(
            "INSERT INTO ingested_job_posting (
                title, company, location, salary, summary, description, rating, raw_url,
                platform, job_key, canonical_url, ingestion_source, source_event_id,
                fingerprint, status, ingested_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)
             ON CONFLICT(fingerprint) DO NOTHING",
            params![
                record.title,
                record.company,
                record.location,
                record.salary,
                record.summary,
                record.description,
                record.rating,
                record.raw_url,
                record.platform,
                record.job_key,
                record.canonical_url,
                record.ingestion_source,
                record.source_event_id,
                record.fingerprint,
                IngestionStatus::Received,
                now,
            ],
        )?;

        if inserted == 0 {
            let (existing_id, existing_status) = self.conn.query_row(
                "SELECT id, status FROM ingested_job_posting WHERE fingerprint = ?1",
                [&record.fingerprint],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            return Ok(StageOutcome::Duplicate {
                existing_id,
                existing_status,
            });
        }

        let id = self.conn.last_insert_rowid();
        let row = self.get_ingested(id)?.ok_or_else(|| StoreError::NotFound {
            entity: "ingested_job_posting",
            key: id.to_string(),
        })?;
        Ok(StageOutcome::Staged(row))
    }

    pub fn get_ingested(&self, id: i64) -> Result<Option<IngestedRecord>, StoreError> {
        load_ingested(&self.conn, id)
    }

    pub fn find_ingested_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<IngestedRecord>, StoreError> {
        let sql = format!("SELECT {INGESTED_COLUMNS} FROM ingested_job_posting WHERE fingerprint = ?1");
        Ok(self
            .conn
            .query_row(&sql, [fingerprint], row_to_ingested)
            .optional()?)
    }

    pub fn claim_received(
        &mut self,
        worker_id: &str,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<IngestedRecord>, StoreError> {
        self.claim_received_at(worker_id, limit, lease, Utc::now())
    }

    /// Claim up to `limit` RECEIVED rows, oldest first, that no live worker
    /// holds. Rows held by another worker are skipped rather than waited on;
    /// a claim older than `lease` counts as abandoned.
    pub fn claim_received_at(
        &mut self,
        worker_id: &str,
        limit: usize,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<IngestedRecord>, StoreError> {
        let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(lease).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "UPDATE ingested_job_posting SET claimed_by = ?1, claimed_at = ?2
             WHERE id IN (
                SELECT id FROM ingested_job_posting
                WHERE status = 'received' AND (claimed_by IS NULL OR claimed_at < ?3)
                ORDER BY ingested_at, id
                LIMIT ?4
             )",
            params![worker_id, now, cutoff, limit],
        )?;

        let rows = {
            let sql = format!(
                "SELECT {INGESTED_COLUMNS} FROM ingested_job_posting
                 WHERE claimed_by = ?1 AND claimed_at = ?2 AND status = 'received'
                 ORDER BY ingested_at, id"
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(params![worker_id, now], row_to_ingested)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        tx.commit()?;
        Ok(rows)
    }

    /// Terminal failure; keeps a bounded error message for operators.
    pub fn mark_failed(&self, id: i64, message: &str) -> Result<(), StoreError> {
        let now = Utc::now();
        self.conn.execute(
            "UPDATE ingested_job_posting
             SET status = ?1, error_message = ?2, processed_at = ?3, updated_at = ?3,
                 claimed_by = NULL, claimed_at = NULL
             WHERE id = ?4",
            params![IngestionStatus::Failed, message, now, id],
        )?;
        Ok(())
    }

    pub fn status_counts(&self) -> Result<Vec<(IngestionStatus, i64)>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM ingested_job_posting GROUP BY status ORDER BY status",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // --- Postings and opportunities ---

    pub fn get_posting(&self, id: i64) -> Result<Option<JobPosting>, StoreError> {
        let sql = format!("SELECT {POSTING_COLUMNS} FROM job_posting WHERE id = ?1");
        Ok(self.conn.query_row(&sql, [id], row_to_posting).optional()?)
    }

    pub fn get_opportunity(&self, id: i64) -> Result<Option<JobOpportunity>, StoreError> {
        let sql = format!("SELECT {OPPORTUNITY_COLUMNS} FROM job_opportunity WHERE id = ?1");
        Ok(self.conn.query_row(&sql, [id], row_to_opportunity).optional()?)
    }

    pub fn postings_for_opportunity(
        &self,
        opportunity_id: i64,
    ) -> Result<Vec<JobPosting>, StoreError> {
        let sql = format!(
            "SELECT {POSTING_COLUMNS} FROM job_posting WHERE job_opportunity_id = ?1 ORDER BY created_at, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([opportunity_id], row_to_posting)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Newest first, each with the number of postings grouped under it.
    pub fn list_opportunities(&self) -> Result<Vec<OpportunitySummary>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT o.id, o.opportunity_key, o.title, o.company, o.location, o.url, o.is_active,
                    o.priority, o.notes, o.created_at, o.updated_at, COUNT(p.id) AS posting_count
             FROM job_opportunity o
             LEFT JOIN job_posting p ON p.job_opportunity_id = o.id
             GROUP BY o.id
             ORDER BY o.created_at DESC, o.id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(OpportunitySummary {
                opportunity: row_to_opportunity(row)?,
                posting_count: row.get("posting_count")?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count(&self, table: Table) -> Result<i64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Ingested,
    Postings,
    Opportunities,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::Ingested => "ingested_job_posting",
            Table::Postings => "job_posting",
            Table::Opportunities => "job_opportunity",
        }
    }
}

/// Store view over one open transaction.
pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl IngestionStore for SqliteStore<'_> {
    fn load_ingested(&self, id: i64) -> Result<Option<IngestedRecord>, StoreError> {
        load_ingested(self.conn, id)
    }

    fn find_posting_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<JobPosting>, StoreError> {
        let sql = format!("SELECT {POSTING_COLUMNS} FROM job_posting WHERE posting_fingerprint = ?1");
        Ok(self.conn.query_row(&sql, [fingerprint], row_to_posting).optional()?)
    }

    fn find_posting_by_job_key(
        &self,
        platform: &str,
        job_key: &str,
    ) -> Result<Option<JobPosting>, StoreError> {
        let sql = format!(
            "SELECT {POSTING_COLUMNS} FROM job_posting WHERE platform = ?1 AND job_key = ?2"
        );
        Ok(self
            .conn
            .query_row(&sql, [platform, job_key], row_to_posting)
            .optional()?)
    }

    fn insert_posting(&self, posting: &NewJobPosting) -> Result<JobPosting, StoreError> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO job_posting (
                posting_fingerprint, title, company, location, rating, summary, salary,
                description, raw_url, canonical_url, job_key, platform, ingestion_source,
                source_event_id, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
            params![
                posting.posting_fingerprint,
                posting.title,
                posting.company,
                posting.location,
                posting.rating,
                posting.summary,
                posting.salary,
                posting.description,
                posting.raw_url,
                posting.canonical_url,
                posting.job_key,
                posting.platform,
                posting.ingestion_source,
                posting.source_event_id,
                now,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        let sql = format!("SELECT {POSTING_COLUMNS} FROM job_posting WHERE id = ?1");
        Ok(self.conn.query_row(&sql, [id], row_to_posting)?)
    }

    fn find_opportunity_by_key(&self, key: &str) -> Result<Option<JobOpportunity>, StoreError> {
        let sql = format!("SELECT {OPPORTUNITY_COLUMNS} FROM job_opportunity WHERE opportunity_key = ?1");
        Ok(self.conn.query_row(&sql, [key], row_to_opportunity).optional()?)
    }

    fn insert_opportunity(
        &self,
        opportunity: &NewJobOpportunity,
    ) -> Result<JobOpportunity, StoreError> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO job_opportunity (opportunity_key, title, company, location, url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                opportunity.opportunity_key,
                opportunity.title,
                opportunity.company,
                opportunity.location,
                opportunity.url,
                now,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        let sql = format!("SELECT {OPPORTUNITY_COLUMNS} FROM job_opportunity WHERE id = ?1");
        Ok(self.conn.query_row(&sql, [id], row_to_opportunity)?)
    }

    fn link_posting(&self, posting_id: i64, opportunity_id: i64) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE job_posting SET job_opportunity_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![opportunity_id, Utc::now(), posting_id],
        )?;
        Ok(())
    }

    fn mark_processed(
        &self,
        row_id: i64,
        posting_id: i64,
        opportunity_id: i64,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        self.conn.execute(
            "UPDATE ingested_job_posting
             SET status = ?1, job_posting_id = ?2, job_opportunity_id = ?3, error_message = NULL,
                 processed_at = ?4, updated_at = ?4, claimed_by = NULL, claimed_at = NULL
             WHERE id = ?5",
            params![IngestionStatus::Processed, posting_id, opportunity_id, now, row_id],
        )?;
        Ok(())
    }
}

fn load_ingested(conn: &Connection, id: i64) -> Result<Option<IngestedRecord>, StoreError> {
    let sql = format!("SELECT {INGESTED_COLUMNS} FROM ingested_job_posting WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], row_to_ingested).optional()?)
}

fn row_to_ingested(row: &Row) -> rusqlite::Result<IngestedRecord> {
    Ok(IngestedRecord {
        id: row.get("id")?,
        title: row.get("title")?,
        company: row.get("company")?,
        location: row.get("location")?,
        salary: row.get("salary")?,
        summary: row.get("summary")?,
        description: row.get("description")?,
        rating: row.get("rating")?,
        raw_url: row.get("raw_url")?,
        platform: row.get("platform")?,
        job_key: row.get("job_key")?,
        canonical_url: row.get("canonical_url")?,
        ingestion_source: row.get("ingestion_source")?,
        source_event_id: row.get("source_event_id")?,
        fingerprint: row.get("fingerprint")?,
        status: row.get("status")?,
        error_message: row.get("error_message")?,
        ingested_at: row.get("ingested_at")?,
        updated_at: row.get("updated_at")?,
        processed_at: row.get("processed_at")?,
        job_posting_id: row.get("job_posting_id")?,
        job_opportunity_id: row.get("job_opportunity_id")?,
    })
}

fn row_to_posting(row: &Row) -> rusqlite::Result<JobPosting> {
    Ok(JobPosting {
        id: row.get("id")?,
        job_opportunity_id: row.get("job_opportunity_id")?,
        posting_fingerprint: row.get("posting_fingerprint")?,
        title: row.get("title")?,
        company: row.get("company")?,
        location: row.get("location")?,
        rating: row.get("rating")?,
        summary: row.get("summary")?,
        salary: row.get("salary")?,
        description: row.get("description")?,
        raw_url: row.get("raw_url")?,
        canonical_url: row.get("canonical_url")?,
        job_key: row.get("job_key")?,
        platform: row.get("platform")?,
        ingestion_source: row.get("ingestion_source")?,
        source_event_id: row.get("source_event_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_opportunity(row: &Row) -> rusqlite::Result<JobOpportunity> {
    Ok(JobOpportunity {
        id: row.get("id")?,
        opportunity_key: row.get("opportunity_key")?,
        title: row.get("title")?,
        company: row.get("company")?,
        location: row.get("location")?,
        url: row.get("url")?,
        is_active: row.get("is_active")?,
        priority: row.get("priority")?,
        notes: row.get("notes")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

// Text columns for the enums. Unknown values surface as conversion errors.

fn text_from_sql<T>(value: ValueRef<'_>) -> FromSqlResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .as_str()?
        .parse()
        .map_err(|err: String| FromSqlError::Other(err.into()))
}

impl ToSql for IngestionSource {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for IngestionSource {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        text_from_sql(value)
    }
}

impl ToSql for IngestionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for IngestionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        text_from_sql(value)
    }
}

impl ToSql for Priority {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Priority {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        text_from_sql(value)
    }
}
