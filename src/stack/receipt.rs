//! Save completion receipts.

use crate::stack::{StackError, StackResult};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

/// Terminal verdict of a save cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Nothing was dirty anywhere along the chain; no store write happened.
    NoChanges,
    /// The writer committed one transaction changing `applied` rows.
    Persisted { applied: usize },
    /// The writer save failed under `SaveFailurePolicy::LogOnly`; the
    /// failure was logged and the writer keeps its change set for retry.
    LoggedFailure,
}

/// One-shot handle resolving with the outcome of an enqueued save.
///
/// Saves are asynchronous: the stack returns a receipt immediately and
/// the cascade runs on the context workers. Every save resolves its
/// receipt exactly once, with an outcome or an error. Waiting is
/// optional; a dropped receipt does not cancel the save.
#[derive(Debug)]
pub struct SaveReceipt {
    response: Receiver<StackResult<SaveOutcome>>,
}

impl SaveReceipt {
    pub(crate) fn new(response: Receiver<StackResult<SaveOutcome>>) -> Self {
        Self { response }
    }

    /// Blocks until the save resolves.
    pub fn wait(self) -> StackResult<SaveOutcome> {
        self.response
            .recv()
            .map_err(|_| StackError::ContextClosed)?
    }

    /// Blocks until the save resolves or the timeout elapses.
    ///
    /// A timeout consumes the receipt but does not stop the save; the
    /// cascade still completes on the workers.
    pub fn wait_timeout(self, timeout: Duration) -> StackResult<SaveOutcome> {
        match self.response.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(StackError::SaveTimedOut { waited: timeout }),
            Err(RecvTimeoutError::Disconnected) => Err(StackError::ContextClosed),
        }
    }
}
