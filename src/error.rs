use thiserror::Error;

/// Raised when redaction cannot be configured. Redaction fails closed: a
/// missing identity field is an error, never a silent skip.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be provided to build redaction patterns")]
    MissingIdentity(&'static str),
    #[error("invalid redaction pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A UNIQUE constraint rejected the insert; another writer got there first.
    #[error("uniqueness conflict on {constraint}")]
    Conflict { constraint: String },
    #[error("{entity} not found for {key}")]
    NotFound { entity: &'static str, key: String },
    #[error(transparent)]
    Sqlite(rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, message)
                if code.code == rusqlite::ErrorCode::ConstraintViolation
                    && code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                StoreError::Conflict {
                    constraint: message.unwrap_or_else(|| "unknown constraint".to_string()),
                }
            }
            other => StoreError::Sqlite(other),
        }
    }
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Another connection held the write lock past the busy timeout.
    pub fn is_busy(&self) -> bool {
        matches!(self, StoreError::Sqlite(err) if is_busy(err))
    }
}

pub(crate) fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}
