//! Layered unit-of-work persistence over SQLite.
//!
//! A [`PersistenceStack`] owns a fixed three-level context hierarchy:
//! a writer context holding store access, a main context layered on the
//! writer, and short-lived temporary contexts layered on main. Each
//! context is a worker thread with its own staged change set; saving a
//! child stages its changes into the parent, and data becomes durable
//! only when the writer commits its transaction. [`Repository`]
//! provides typed create/fetch/delete over entities declared through
//! the [`Entity`] trait.
//!
//! ```
//! use layerstore::{Entity, PersistenceStack, Predicate, RecordId, Repository, StackConfig};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct User {
//!     record_id: RecordId,
//!     id: i64,
//!     name: String,
//! }
//!
//! impl Entity for User {
//!     const KIND: &'static str = "user";
//!
//!     fn blank(id: RecordId) -> Self {
//!         Self {
//!             record_id: id,
//!             id: 0,
//!             name: String::new(),
//!         }
//!     }
//!
//!     fn record_id(&self) -> RecordId {
//!         self.record_id
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let stack = PersistenceStack::open(StackConfig::in_memory())?;
//! let users = Repository::<User>::try_new(&stack)?;
//!
//! let (user, receipt) = users.create(|user| {
//!     user.id = 7;
//!     user.name = format!("Test {}", user.id);
//! })?;
//! receipt.wait()?;
//!
//! let sevens = users.fetch(Some(&Predicate::new("payload ->> 'id' = 7")))?;
//! assert_eq!(sevens.len(), 1);
//! assert_eq!(sevens[0].name, "Test 7");
//! assert_eq!(sevens[0].record_id(), user.record_id());
//! stack.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod entity;
pub mod logging;
pub mod repo;
pub mod stack;
pub mod store;

pub use config::{SaveFailurePolicy, StackConfig, DEFAULT_DB_FILE_NAME};
pub use context::{ContextHandle, ContextId, ContextRole};
pub use entity::{new_record_id, Entity, KindError, RecordId};
pub use logging::{default_log_level, init_logging, logging_status};
pub use repo::repository::{RepoError, RepoResult, Repository};
pub use stack::{
    PersistenceStack, SaveOutcome, SaveReceipt, StackError, StackResult, TemporaryContext,
};
pub use store::predicate::Predicate;
pub use store::{StoreError, StoreResult};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
