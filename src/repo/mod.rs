//! Typed repositories over stack contexts.
//!
//! # Responsibility
//! - Provide the entity-level CRUD surface on top of context workers.
//! - Keep encoding and predicate details out of calling code.
//!
//! # Invariants
//! - A repository never touches the store directly; every operation goes
//!   through a context.

pub mod repository;
