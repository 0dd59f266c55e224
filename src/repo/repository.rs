//! Generic entity repository backed by a persistence stack.
//!
//! # Responsibility
//! - Provide create/fetch/delete over one entity kind.
//! - Encode entities to record payloads and decode fetched payloads.
//!
//! # Invariants
//! - `T::KIND` is validated before a repository is handed out.
//! - Reads default to the main context, writes to the writer context.
//! - Read paths must reject invalid persisted payloads instead of
//!   masking them.

use crate::context::ContextHandle;
use crate::entity::{new_record_id, validate_kind, Entity};
use crate::stack::receipt::SaveReceipt;
use crate::stack::{PersistenceStack, StackError};
use crate::store::engine::RecordOp;
use crate::store::predicate::Predicate;
use crate::store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for entity persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    InvalidKind {
        kind: &'static str,
        message: String,
    },
    InvalidPredicate {
        expr: String,
        message: String,
    },
    Encode {
        kind: &'static str,
        message: String,
    },
    Decode {
        kind: &'static str,
        message: String,
    },
    Stack(StackError),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidKind { kind, message } => {
                write!(f, "invalid entity kind `{kind}`: {message}")
            }
            Self::InvalidPredicate { expr, message } => {
                write!(f, "invalid fetch predicate `{expr}`: {message}")
            }
            Self::Encode { kind, message } => {
                write!(f, "failed to encode `{kind}` entity: {message}")
            }
            Self::Decode { kind, message } => {
                write!(f, "invalid persisted `{kind}` payload: {message}")
            }
            Self::Stack(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Stack(err) => Some(err),
            Self::InvalidKind { .. }
            | Self::InvalidPredicate { .. }
            | Self::Encode { .. }
            | Self::Decode { .. } => None,
        }
    }
}

impl From<StackError> for RepoError {
    fn from(value: StackError) -> Self {
        Self::Stack(value)
    }
}

/// Typed create/fetch/delete over one entity kind.
///
/// Context defaults are asymmetric on purpose: reads run against the
/// main context, writes against the writer context. Every operation has
/// an `_in` variant taking an explicit context for callers working on a
/// temporary context.
#[derive(Debug)]
pub struct Repository<'stack, T: Entity> {
    stack: &'stack PersistenceStack,
    _entity: PhantomData<T>,
}

impl<'stack, T: Entity> Repository<'stack, T> {
    /// Builds a repository after validating `T::KIND`.
    pub fn try_new(stack: &'stack PersistenceStack) -> RepoResult<Self> {
        validate_kind(T::KIND).map_err(|err| RepoError::InvalidKind {
            kind: T::KIND,
            message: err.to_string(),
        })?;
        Ok(Self {
            stack,
            _entity: PhantomData,
        })
    }

    /// Stages a new entity in the writer context without saving.
    ///
    /// The entity stays pending in the context until a later save
    /// cascades it down; see [`Repository::create`] for the
    /// stage-and-save variant.
    pub fn insert(&self, update: impl FnOnce(&mut T)) -> RepoResult<T> {
        self.insert_in(self.stack.writer_context(), update)
    }

    /// `insert` targeting an explicit context.
    pub fn insert_in(
        &self,
        context: &ContextHandle,
        update: impl FnOnce(&mut T),
    ) -> RepoResult<T> {
        let mut entity = T::blank(new_record_id());
        update(&mut entity);

        let payload = serde_json::to_string(&entity).map_err(|err| RepoError::Encode {
            kind: T::KIND,
            message: err.to_string(),
        })?;
        context.stage(vec![RecordOp::Upsert {
            kind: T::KIND,
            record_id: entity.record_id(),
            payload,
        }])?;
        Ok(entity)
    }

    /// Creates a blank entity, lets `update` fill it in, stages the
    /// upsert on the writer context and triggers a save.
    ///
    /// The entity is durable once the returned receipt resolves.
    pub fn create(&self, update: impl FnOnce(&mut T)) -> RepoResult<(T, SaveReceipt)> {
        self.create_in(self.stack.writer_context(), update)
    }

    /// `create` targeting an explicit context.
    pub fn create_in(
        &self,
        context: &ContextHandle,
        update: impl FnOnce(&mut T),
    ) -> RepoResult<(T, SaveReceipt)> {
        let entity = self.insert_in(context, update)?;
        let receipt = self.stack.save(context)?;
        Ok((entity, receipt))
    }

    /// Fetches entities of this kind through the main context's staged
    /// view.
    ///
    /// `predicate` is a SQL boolean expression over the record row;
    /// entity fields live in the JSON `payload` column, for example
    /// `payload ->> 'id' = 7`. No result ordering is guaranteed.
    pub fn fetch(&self, predicate: Option<&Predicate>) -> RepoResult<Vec<T>> {
        self.fetch_in(self.stack.main_context(), predicate)
    }

    /// `fetch` targeting an explicit context.
    pub fn fetch_in(
        &self,
        context: &ContextHandle,
        predicate: Option<&Predicate>,
    ) -> RepoResult<Vec<T>> {
        let records = context
            .fetch(T::KIND, predicate.cloned())
            .map_err(map_fetch_error)?;

        let mut entities = Vec::with_capacity(records.len());
        for record in records {
            let entity =
                serde_json::from_str(&record.payload).map_err(|err| RepoError::Decode {
                    kind: T::KIND,
                    message: err.to_string(),
                })?;
            entities.push(entity);
        }
        Ok(entities)
    }

    /// Deletes every record matching `predicate` in the writer context.
    ///
    /// Fetches first, stages one delete per match, then triggers a
    /// single save. Nothing is staged if the fetch fails. Returns the
    /// match count and the save receipt.
    pub fn delete_matching(
        &self,
        predicate: Option<&Predicate>,
    ) -> RepoResult<(usize, SaveReceipt)> {
        self.delete_matching_in(self.stack.writer_context(), predicate)
    }

    /// `delete_matching` targeting an explicit context.
    pub fn delete_matching_in(
        &self,
        context: &ContextHandle,
        predicate: Option<&Predicate>,
    ) -> RepoResult<(usize, SaveReceipt)> {
        let records = context
            .fetch(T::KIND, predicate.cloned())
            .map_err(map_fetch_error)?;
        let matched = records.len();

        if matched > 0 {
            let ops = records
                .into_iter()
                .map(|record| RecordOp::Delete {
                    kind: T::KIND,
                    record_id: record.record_id,
                })
                .collect();
            context.stage(ops)?;
        }

        let receipt = self.stack.save(context)?;
        Ok((matched, receipt))
    }

    /// Stages deletes for the given entities in the writer context and
    /// triggers one save.
    pub fn delete_entities(&self, entities: &[T]) -> RepoResult<SaveReceipt> {
        self.delete_entities_in(self.stack.writer_context(), entities)
    }

    /// `delete_entities` targeting an explicit context.
    pub fn delete_entities_in(
        &self,
        context: &ContextHandle,
        entities: &[T],
    ) -> RepoResult<SaveReceipt> {
        if !entities.is_empty() {
            let ops = entities
                .iter()
                .map(|entity| RecordOp::Delete {
                    kind: T::KIND,
                    record_id: entity.record_id(),
                })
                .collect();
            context.stage(ops)?;
        }

        Ok(self.stack.save(context)?)
    }

    /// Deletes one entity in the writer context.
    pub fn delete_entity(&self, entity: &T) -> RepoResult<SaveReceipt> {
        self.delete_entities(std::slice::from_ref(entity))
    }

    /// `delete_entity` targeting an explicit context.
    pub fn delete_entity_in(&self, context: &ContextHandle, entity: &T) -> RepoResult<SaveReceipt> {
        self.delete_entities_in(context, std::slice::from_ref(entity))
    }
}

fn map_fetch_error(err: StackError) -> RepoError {
    match err {
        StackError::Store(StoreError::InvalidQuery { expr, message }) => {
            RepoError::InvalidPredicate { expr, message }
        }
        other => RepoError::Stack(other),
    }
}
