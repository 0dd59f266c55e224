//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas required by stack behavior.
//! - Trigger schema migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - Returned connections have migrations fully applied.

use super::migrations::apply_migrations;
use super::StoreResult;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Opens a SQLite database file and applies all pending migrations.
///
/// # Side effects
/// - Performs connection bootstrap and migration checks.
/// - Emits `store_open` logging events with duration and status.
pub fn open_store(path: impl AsRef<Path>, busy_timeout: Duration) -> StoreResult<Connection> {
    open_with("file", || Connection::open(path), busy_timeout)
}

/// Opens an in-memory SQLite database and applies all pending migrations.
///
/// # Side effects
/// - Performs connection bootstrap and migration checks.
/// - Emits `store_open` logging events with duration and status.
pub fn open_store_in_memory(busy_timeout: Duration) -> StoreResult<Connection> {
    open_with("memory", Connection::open_in_memory, busy_timeout)
}

fn open_with(
    mode: &str,
    open: impl FnOnce() -> rusqlite::Result<Connection>,
    busy_timeout: Duration,
) -> StoreResult<Connection> {
    let started_at = Instant::now();
    info!("event=store_open module=store status=start mode={mode}");

    let result = open().map_err(Into::into).and_then(|mut conn| {
        bootstrap_connection(&mut conn, busy_timeout)?;
        Ok(conn)
    });

    match &result {
        Ok(_) => info!(
            "event=store_open module=store status=ok mode={mode} duration_ms={}",
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=store_open module=store status=error mode={mode} duration_ms={} error={err}",
            started_at.elapsed().as_millis()
        ),
    }

    result
}

fn bootstrap_connection(conn: &mut Connection, busy_timeout: Duration) -> StoreResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(busy_timeout)?;
    apply_migrations(conn)?;
    Ok(())
}
