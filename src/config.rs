//! Stack configuration.

use std::path::PathBuf;
use std::time::Duration;

/// File name used inside the data directory unless overridden.
pub const DEFAULT_DB_FILE_NAME: &str = "TestDB.sqlite";

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// What a failed writer save does with the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveFailurePolicy {
    /// Resolve the receipt with the error. The failing context keeps its
    /// change set so the save can be retried.
    #[default]
    Propagate,
    /// Log the error and resolve the receipt with
    /// `SaveOutcome::LoggedFailure`. The change set is likewise retained.
    LogOnly,
}

impl SaveFailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Propagate => "propagate",
            Self::LogOnly => "log_only",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StoreLocation {
    File { data_dir: PathBuf },
    InMemory,
}

/// Configuration consumed by `PersistenceStack::open`.
#[derive(Debug, Clone)]
pub struct StackConfig {
    location: StoreLocation,
    db_file_name: String,
    save_failure_policy: SaveFailurePolicy,
    busy_timeout: Duration,
}

impl StackConfig {
    /// Store backed by a SQLite file inside `data_dir`.
    ///
    /// The directory is created on open if it does not exist.
    pub fn file(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            location: StoreLocation::File {
                data_dir: data_dir.into(),
            },
            db_file_name: DEFAULT_DB_FILE_NAME.to_string(),
            save_failure_policy: SaveFailurePolicy::default(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Private in-memory store, gone when the stack closes.
    pub fn in_memory() -> Self {
        Self {
            location: StoreLocation::InMemory,
            db_file_name: DEFAULT_DB_FILE_NAME.to_string(),
            save_failure_policy: SaveFailurePolicy::default(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_db_file_name(mut self, name: impl Into<String>) -> Self {
        self.db_file_name = name.into();
        self
    }

    pub fn with_save_failure_policy(mut self, policy: SaveFailurePolicy) -> Self {
        self.save_failure_policy = policy;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn db_file_name(&self) -> &str {
        &self.db_file_name
    }

    pub fn save_failure_policy(&self) -> SaveFailurePolicy {
        self.save_failure_policy
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    /// Full path of the store file, or `None` for in-memory stores.
    pub fn store_path(&self) -> Option<PathBuf> {
        match &self.location {
            StoreLocation::File { data_dir } => Some(data_dir.join(&self.db_file_name)),
            StoreLocation::InMemory => None,
        }
    }
}
