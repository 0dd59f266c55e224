//! Pending change tracking for unit-of-work contexts.

use crate::entity::RecordId;
use crate::store::engine::RecordOp;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct RecordKey {
    kind: &'static str,
    record_id: RecordId,
}

fn key_of(op: &RecordOp) -> RecordKey {
    RecordKey {
        kind: op.kind(),
        record_id: op.record_id(),
    }
}

/// Ordered set of staged operations owned by one context worker.
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
    ops: BTreeMap<RecordKey, RecordOp>,
}

impl ChangeSet {
    /// Stages one operation; the latest operation per (kind, record_id)
    /// key wins.
    pub fn stage(&mut self, op: RecordOp) {
        self.ops.insert(key_of(&op), op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Takes every staged operation, leaving the set clean.
    pub fn drain(&mut self) -> Vec<RecordOp> {
        let ops = std::mem::take(&mut self.ops);
        ops.into_values().collect()
    }

    /// Copies the staged operations without clearing them.
    pub fn snapshot(&self) -> Vec<RecordOp> {
        self.ops.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Puts drained operations back after a failed hand-off.
    ///
    /// Anything staged since the drain is newer and wins over the
    /// restored operation for the same key.
    pub fn restore(&mut self, ops: Vec<RecordOp>) {
        for op in ops {
            self.ops.entry(key_of(&op)).or_insert(op);
        }
    }
}
