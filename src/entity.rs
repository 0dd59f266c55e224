//! Entity contract for records managed by the stack.
//!
//! # Responsibility
//! - Define the trait an application type implements to become storable.
//! - Validate the stable kind tags entities register under.
//!
//! # Invariants
//! - A kind tag never changes for a given entity type once data exists.
//! - Kind tags are plain ASCII so they stay safe in SQL binds and logs.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for one persisted record.
pub type RecordId = Uuid;

/// Returns a fresh random record identifier.
pub fn new_record_id() -> RecordId {
    Uuid::new_v4()
}

/// A type the stack can persist as rows of one record kind.
///
/// Implementations declare their schema explicitly: the kind tag names
/// the record family in the store, `blank` constructs the zero state a
/// new record starts from, and `record_id` exposes the identity the
/// store keys rows by. Field layout is whatever the type's serde
/// implementation produces.
pub trait Entity: Serialize + DeserializeOwned {
    /// Stable kind tag this entity's records are stored under.
    const KIND: &'static str;

    /// Constructs the blank state a freshly created record starts from.
    fn blank(id: RecordId) -> Self;

    /// Identity of this record inside its kind.
    fn record_id(&self) -> RecordId;
}

pub type KindResult<T> = Result<T, KindError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindError {
    Empty,
    InvalidCharacter { kind: String, character: char },
}

impl Display for KindError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "kind tag must not be empty"),
            Self::InvalidCharacter { kind, character } => write!(
                f,
                "kind tag `{kind}` contains unsupported character `{character}`"
            ),
        }
    }
}

impl Error for KindError {}

/// Validates a kind tag before a repository starts using it.
pub fn validate_kind(kind: &str) -> KindResult<()> {
    if kind.is_empty() {
        return Err(KindError::Empty);
    }
    for character in kind.chars() {
        let allowed = character.is_ascii_alphanumeric()
            || character == '_'
            || character == '-'
            || character == '.';
        if !allowed {
            return Err(KindError::InvalidCharacter {
                kind: kind.to_string(),
                character,
            });
        }
    }
    Ok(())
}
