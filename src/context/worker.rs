//! Context worker threads and their handles.
//!
//! # Responsibility
//! - Run one worker thread per context, owning that context's change set.
//! - Serve stage/save/fetch requests as FIFO messages.
//! - Cascade saves down the parent chain and terminate them at the
//!   writer by applying through the engine.
//!
//! # Invariants
//! - A context's change set is touched only by its own worker thread.
//! - Saves on a parented context stage into the parent before the
//!   forwarded save can arrive there (per-sender FIFO ordering).
//! - Workers only ever wait on their parent or the engine, never on a
//!   child, so the wait graph is acyclic.

use super::change_set::ChangeSet;
use crate::config::SaveFailurePolicy;
use crate::stack::receipt::{SaveOutcome, SaveReceipt};
use crate::stack::{StackError, StackResult};
use crate::store::engine::{EngineHandle, RawRecord, RecordOp};
use crate::store::predicate::Predicate;
use log::{debug, error, info};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Instant;

/// Process-unique identifier for a context worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for ContextId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a context in the fixed stack hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRole {
    Writer,
    Main,
    Temporary,
}

impl ContextRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Writer => "writer",
            Self::Main => "main",
            Self::Temporary => "temporary",
        }
    }
}

impl Display for ContextRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) enum ContextMsg {
    /// Adopt staged operations into this context's change set.
    Stage { ops: Vec<RecordOp> },
    /// Save this context; parented contexts stage into their parent and
    /// forward the save, the writer applies to the store.
    Save {
        reply: Sender<StackResult<SaveOutcome>>,
    },
    /// Query records of one kind through the staged view of this context.
    Fetch {
        kind: &'static str,
        predicate: Option<Predicate>,
        reply: Sender<StackResult<Vec<RawRecord>>>,
    },
    /// Collect the pending operations of this context and its ancestors.
    PendingOps {
        reply: Sender<StackResult<Vec<RecordOp>>>,
    },
    HasChanges { reply: Sender<bool> },
    Shutdown,
}

/// Cloneable handle to one context worker.
#[derive(Debug, Clone)]
pub struct ContextHandle {
    id: ContextId,
    role: ContextRole,
    tx: Sender<ContextMsg>,
}

impl ContextHandle {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn role(&self) -> ContextRole {
        self.role
    }

    /// Reports whether this context holds staged, unsaved operations.
    pub fn has_changes(&self) -> StackResult<bool> {
        let (reply, response) = mpsc::channel();
        self.tx
            .send(ContextMsg::HasChanges { reply })
            .map_err(|_| StackError::ContextClosed)?;
        response.recv().map_err(|_| StackError::ContextClosed)
    }

    pub(crate) fn stage(&self, ops: Vec<RecordOp>) -> StackResult<()> {
        self.tx
            .send(ContextMsg::Stage { ops })
            .map_err(|_| StackError::ContextClosed)
    }

    /// Enqueues a save and returns the receipt that resolves with its
    /// terminal outcome.
    pub(crate) fn request_save(&self) -> StackResult<SaveReceipt> {
        let (reply, response) = mpsc::channel();
        self.tx
            .send(ContextMsg::Save { reply })
            .map_err(|_| StackError::ContextClosed)?;
        Ok(SaveReceipt::new(response))
    }

    pub(crate) fn fetch(
        &self,
        kind: &'static str,
        predicate: Option<Predicate>,
    ) -> StackResult<Vec<RawRecord>> {
        let (reply, response) = mpsc::channel();
        self.tx
            .send(ContextMsg::Fetch {
                kind,
                predicate,
                reply,
            })
            .map_err(|_| StackError::ContextClosed)?;
        response.recv().map_err(|_| StackError::ContextClosed)?
    }

    pub(crate) fn pending_ops(&self) -> StackResult<Vec<RecordOp>> {
        let (reply, response) = mpsc::channel();
        self.tx
            .send(ContextMsg::PendingOps { reply })
            .map_err(|_| StackError::ContextClosed)?;
        response.recv().map_err(|_| StackError::ContextClosed)?
    }

    pub(crate) fn send_shutdown(&self) {
        let _ = self.tx.send(ContextMsg::Shutdown);
    }
}

struct ContextWorker {
    id: ContextId,
    role: ContextRole,
    parent: Option<ContextHandle>,
    engine: EngineHandle,
    policy: SaveFailurePolicy,
    changes: ChangeSet,
}

/// Spawns a context worker and returns its handle plus join handle.
pub(crate) fn spawn_context(
    role: ContextRole,
    parent: Option<ContextHandle>,
    engine: EngineHandle,
    policy: SaveFailurePolicy,
) -> std::io::Result<(ContextHandle, JoinHandle<()>)> {
    let id = ContextId::next();
    let (tx, rx) = mpsc::channel();
    let handle = ContextHandle { id, role, tx };
    let worker = ContextWorker {
        id,
        role,
        parent,
        engine,
        policy,
        changes: ChangeSet::default(),
    };
    let thread = std::thread::Builder::new()
        .name(format!("layerstore-{}-{id}", role.as_str()))
        .spawn(move || worker.run(rx))?;
    Ok((handle, thread))
}

impl ContextWorker {
    fn run(mut self, rx: Receiver<ContextMsg>) {
        debug!(
            "event=context_start module=context status=ok context={} role={}",
            self.id, self.role
        );
        while let Ok(msg) = rx.recv() {
            match msg {
                ContextMsg::Stage { ops } => self.handle_stage(ops),
                ContextMsg::Save { reply } => self.handle_save(reply),
                ContextMsg::Fetch {
                    kind,
                    predicate,
                    reply,
                } => {
                    let _ = reply.send(self.handle_fetch(kind, predicate));
                }
                ContextMsg::PendingOps { reply } => {
                    let _ = reply.send(self.chain_pending_ops());
                }
                ContextMsg::HasChanges { reply } => {
                    let _ = reply.send(!self.changes.is_empty());
                }
                ContextMsg::Shutdown => break,
            }
        }
        debug!(
            "event=context_stop module=context status=ok context={} role={} discarded={}",
            self.id,
            self.role,
            self.changes.len()
        );
    }

    fn handle_stage(&mut self, ops: Vec<RecordOp>) {
        let count = ops.len();
        for op in ops {
            self.changes.stage(op);
        }
        debug!(
            "event=context_stage module=context status=ok context={} role={} ops={count} pending={}",
            self.id,
            self.role,
            self.changes.len()
        );
    }

    /// Terminal half of the save cascade.
    ///
    /// A parented context drains its change set into the parent and
    /// forwards the save, reply channel and all; the receipt therefore
    /// resolves with the writer's verdict. The writer applies its change
    /// set through the engine in one transaction.
    fn handle_save(&mut self, reply: Sender<StackResult<SaveOutcome>>) {
        let Some(parent) = self.parent.clone() else {
            self.apply_to_store(reply);
            return;
        };

        if !self.changes.is_empty() {
            let ops = self.changes.drain();
            if parent.tx.send(ContextMsg::Stage { ops: ops.clone() }).is_err() {
                self.changes.restore(ops);
                let _ = reply.send(Err(StackError::ContextClosed));
                return;
            }
        }

        if let Err(send_error) = parent.tx.send(ContextMsg::Save { reply }) {
            if let ContextMsg::Save { reply } = send_error.0 {
                let _ = reply.send(Err(StackError::ContextClosed));
            }
        }
    }

    fn apply_to_store(&mut self, reply: Sender<StackResult<SaveOutcome>>) {
        if self.changes.is_empty() {
            let _ = reply.send(Ok(SaveOutcome::NoChanges));
            return;
        }

        let started_at = Instant::now();
        let ops = self.changes.snapshot();
        let count = ops.len();
        match self.engine.apply(ops) {
            Ok(applied) => {
                self.changes.clear();
                info!(
                    "event=context_save module=context status=ok context={} role={} ops={count} applied={applied} duration_ms={}",
                    self.id,
                    self.role,
                    started_at.elapsed().as_millis()
                );
                let _ = reply.send(Ok(SaveOutcome::Persisted { applied }));
            }
            Err(err) => {
                // The change set is retained either way so the save can
                // be retried once the obstruction clears.
                error!(
                    "event=context_save module=context status=error context={} role={} ops={count} policy={} duration_ms={} error={err}",
                    self.id,
                    self.role,
                    self.policy.as_str(),
                    started_at.elapsed().as_millis()
                );
                let result = match self.policy {
                    SaveFailurePolicy::Propagate => Err(StackError::Store(err)),
                    SaveFailurePolicy::LogOnly => Ok(SaveOutcome::LoggedFailure),
                };
                let _ = reply.send(result);
            }
        }
    }

    fn handle_fetch(
        &self,
        kind: &'static str,
        predicate: Option<Predicate>,
    ) -> StackResult<Vec<RawRecord>> {
        let overlay = self.chain_pending_ops()?;
        self.engine
            .query(kind, predicate, overlay)
            .map_err(StackError::Store)
    }

    /// Pending operations of the ancestor chain, oldest context first,
    /// so replaying them reproduces this context's staged view.
    fn chain_pending_ops(&self) -> StackResult<Vec<RecordOp>> {
        let mut ops = match &self.parent {
            Some(parent) => parent.pending_ops()?,
            None => Vec::new(),
        };
        ops.extend(self.changes.snapshot());
        Ok(ops)
    }
}
