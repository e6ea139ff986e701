//! Error types for the momentum engine.
//!
//! Only configuration and history-store faults surface as errors. Bad input
//! records are recovered per record and never reach this type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Unreadable or invalid configuration file
    #[error("Configuration error: {0}")]
    Config(String),

    /// History store file could not be read or written
    #[error("History store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// History store contents failed to parse
    #[error("History store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// Postgres-backed history store errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration errors
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type Result<T> = std::result::Result<T, Error>;
