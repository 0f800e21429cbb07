//! Job-alert ingestion: alert emails in, deduplicated postings grouped into
//! opportunities out.

pub mod canonical;
pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod fingerprint;
pub mod html;
pub mod models;
pub mod normalize;
pub mod opportunity;
pub mod parsers;
pub mod pii;
pub mod processor;

pub use config::Settings;
pub use db::Database;
pub use error::{ConfigError, StoreError};
pub use processor::{BatchDriver, IngestionProcessor};
