//! Unit-of-work contexts backed by worker threads.
//!
//! # Responsibility
//! - Track staged record operations per context.
//! - Run the worker threads that own each context's state.
//!
//! # Invariants
//! - Context state is confined to its worker thread; handles only pass
//!   messages.
//! - Child changes reach the store only by cascading through the parent
//!   chain.

mod change_set;
mod worker;

pub use worker::{ContextHandle, ContextId, ContextRole};

pub(crate) use worker::spawn_context;
