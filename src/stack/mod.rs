//! Persistence stack owning the context hierarchy.
//!
//! # Responsibility
//! - Open the store and spawn the engine, writer and main workers.
//! - Expose save entry points that dispatch on context role.
//! - Spawn temporary contexts for scoped units of work.
//!
//! # Invariants
//! - The hierarchy is fixed: temporary contexts parent to main, main
//!   parents to the writer, the writer owns store access.
//! - Child saves only stage into their parent; data is durable only
//!   after the writer's transaction commits.
//! - Shutdown drains workers child-first so queued saves finish.

use crate::config::{SaveFailurePolicy, StackConfig};
use crate::context::{spawn_context, ContextHandle, ContextRole};
use crate::store::engine::{spawn_engine, EngineHandle};
use crate::store::{open_store, open_store_in_memory, StoreError};
use log::{debug, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub mod receipt;

pub use receipt::{SaveOutcome, SaveReceipt};

pub type StackResult<T> = Result<T, StackError>;

#[derive(Debug)]
pub enum StackError {
    Store(StoreError),
    /// The target context worker is no longer running.
    ContextClosed,
    /// Directory creation or worker spawn failed.
    Io(std::io::Error),
    SaveTimedOut {
        waited: Duration,
    },
}

impl Display for StackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::ContextClosed => write!(f, "context worker is closed"),
            Self::Io(err) => write!(f, "{err}"),
            Self::SaveTimedOut { waited } => {
                write!(f, "save did not complete within {waited:?}")
            }
        }
    }
}

impl Error for StackError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::ContextClosed | Self::SaveTimedOut { .. } => None,
        }
    }
}

impl From<StoreError> for StackError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<std::io::Error> for StackError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Handle to one opened persistence stack.
///
/// The stack owns a writer context holding the store connection path, a
/// main context layered on the writer, and any number of short-lived
/// temporary contexts layered on main. All contexts run on their own
/// worker threads; the stack is cheap to share by reference.
///
/// Saves are enqueued and acknowledged through a [`SaveReceipt`]; see
/// [`PersistenceStack::save`] for the role dispatch.
#[derive(Debug)]
pub struct PersistenceStack {
    engine: EngineHandle,
    writer: ContextHandle,
    main: ContextHandle,
    policy: SaveFailurePolicy,
    engine_thread: Option<JoinHandle<()>>,
    writer_thread: Option<JoinHandle<()>>,
    main_thread: Option<JoinHandle<()>>,
}

impl PersistenceStack {
    /// Opens the store described by `config` and spawns the permanent
    /// workers.
    ///
    /// Fails if the store cannot be opened, its schema version is newer
    /// than this binary supports, or a worker thread cannot be spawned.
    pub fn open(config: StackConfig) -> StackResult<Self> {
        let started_at = Instant::now();
        let policy = config.save_failure_policy();
        info!(
            "event=stack_open module=stack status=start policy={}",
            policy.as_str()
        );

        let conn = match config.store_path() {
            Some(path) => {
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                open_store(&path, config.busy_timeout())?
            }
            None => open_store_in_memory(config.busy_timeout())?,
        };

        let (engine, engine_thread) = spawn_engine(conn)?;
        let (writer, writer_thread) =
            spawn_context(ContextRole::Writer, None, engine.clone(), policy)?;
        let (main, main_thread) = spawn_context(
            ContextRole::Main,
            Some(writer.clone()),
            engine.clone(),
            policy,
        )?;

        info!(
            "event=stack_open module=stack status=ok writer={} main={} duration_ms={}",
            writer.id(),
            main.id(),
            started_at.elapsed().as_millis()
        );

        Ok(Self {
            engine,
            writer,
            main,
            policy,
            engine_thread: Some(engine_thread),
            writer_thread: Some(writer_thread),
            main_thread: Some(main_thread),
        })
    }

    /// The long-lived context reads default to.
    pub fn main_context(&self) -> &ContextHandle {
        &self.main
    }

    /// The root context writes default to.
    pub fn writer_context(&self) -> &ContextHandle {
        &self.writer
    }

    /// Spawns a fresh context parented to main for scoped batch work.
    ///
    /// Its staged changes stay invisible to main until a save cascades
    /// them down; dropping the handle discards anything unsaved.
    pub fn temporary_context(&self) -> StackResult<TemporaryContext> {
        let (handle, thread) = spawn_context(
            ContextRole::Temporary,
            Some(self.main.clone()),
            self.engine.clone(),
            self.policy,
        )?;
        debug!(
            "event=context_spawn module=stack status=ok context={} role=temporary",
            handle.id()
        );
        Ok(TemporaryContext {
            handle,
            thread: Some(thread),
        })
    }

    /// Saves `context` according to its role.
    ///
    /// Parented contexts (main, temporary) cascade: their changes stage
    /// into the parent and the save is forwarded until the writer
    /// commits. The writer saves locally. The receipt resolves with the
    /// terminal outcome either way.
    pub fn save(&self, context: &ContextHandle) -> StackResult<SaveReceipt> {
        context.request_save()
    }

    /// Cascade save starting at the main context.
    pub fn save_main(&self) -> StackResult<SaveReceipt> {
        self.main.request_save()
    }

    /// Saves the writer context only.
    pub fn save_writer(&self) -> StackResult<SaveReceipt> {
        self.writer.request_save()
    }

    /// Flushes via `save_main`, waits for the outcome, then shuts the
    /// workers down.
    pub fn close(self) -> StackResult<SaveOutcome> {
        let outcome = self.save_main()?.wait()?;
        info!("event=stack_close module=stack status=ok");
        Ok(outcome)
    }
}

impl Drop for PersistenceStack {
    fn drop(&mut self) {
        // Child-first: joining main before signalling the writer keeps
        // forwarded saves ahead of the writer's shutdown message.
        self.main.send_shutdown();
        if let Some(thread) = self.main_thread.take() {
            let _ = thread.join();
        }
        self.writer.send_shutdown();
        if let Some(thread) = self.writer_thread.take() {
            let _ = thread.join();
        }
        self.engine.shutdown();
        if let Some(thread) = self.engine_thread.take() {
            let _ = thread.join();
        }
        debug!("event=stack_stop module=stack status=ok");
    }
}

/// Owning wrapper for a temporary context worker.
///
/// Shuts the worker down on drop; unsaved changes are discarded.
#[derive(Debug)]
pub struct TemporaryContext {
    handle: ContextHandle,
    thread: Option<JoinHandle<()>>,
}

impl TemporaryContext {
    pub fn context(&self) -> &ContextHandle {
        &self.handle
    }
}

impl Drop for TemporaryContext {
    fn drop(&mut self) {
        self.handle.send_shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
