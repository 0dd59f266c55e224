//! SQLite storage bootstrap, schema migrations and the store engine.
//!
//! # Responsibility
//! - Open and configure the single SQLite connection behind a stack.
//! - Apply schema migrations in deterministic order.
//! - Run the engine worker that owns the connection and serves
//!   apply/query requests from context workers.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - The connection is confined to the engine thread for its whole life.
//! - No caller reads or writes application data before migrations succeed.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub(crate) mod engine;
pub mod migrations;
mod open;
pub mod predicate;

pub use open::{open_store, open_store_in_memory};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// A fetch predicate failed to compile into a SQLite statement.
    InvalidQuery { expr: String, message: String },
    /// A persisted row could not be interpreted as a record.
    InvalidRecord(String),
    /// The engine worker is no longer running.
    EngineClosed,
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::InvalidQuery { expr, message } => {
                write!(f, "invalid query expression `{expr}`: {message}")
            }
            Self::InvalidRecord(message) => write!(f, "invalid persisted record: {message}"),
            Self::EngineClosed => write!(f, "store engine is closed"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. }
            | Self::InvalidQuery { .. }
            | Self::InvalidRecord(_)
            | Self::EngineClosed => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
