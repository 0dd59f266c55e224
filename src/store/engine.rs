//! Store engine worker owning the SQLite connection.
//!
//! # Responsibility
//! - Run the single thread that owns the stack's `rusqlite::Connection`.
//! - Apply drained change sets as one SQLite transaction per request.
//! - Serve record queries, overlaying staged-but-unpersisted operations
//!   inside a savepoint that is always rolled back.
//!
//! # Invariants
//! - The connection never leaves the engine thread.
//! - An apply request either commits every operation or none.
//! - Query overlays leave no trace in the database file.

use crate::entity::RecordId;
use crate::store::predicate::Predicate;
use crate::store::{StoreError, StoreResult};
use log::{debug, error};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Instant;
use uuid::Uuid;

/// One staged record operation flowing from a context change set to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RecordOp {
    Upsert {
        kind: &'static str,
        record_id: RecordId,
        payload: String,
    },
    Delete {
        kind: &'static str,
        record_id: RecordId,
    },
}

impl RecordOp {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Upsert { kind, .. } | Self::Delete { kind, .. } => *kind,
        }
    }

    pub(crate) fn record_id(&self) -> RecordId {
        match self {
            Self::Upsert { record_id, .. } | Self::Delete { record_id, .. } => *record_id,
        }
    }
}

/// A persisted record row as the store returns it, payload still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawRecord {
    pub record_id: RecordId,
    pub payload: String,
}

enum EngineRequest {
    Apply {
        ops: Vec<RecordOp>,
        reply: Sender<StoreResult<usize>>,
    },
    Query {
        kind: &'static str,
        predicate: Option<Predicate>,
        overlay: Vec<RecordOp>,
        reply: Sender<StoreResult<Vec<RawRecord>>>,
    },
    Shutdown,
}

/// Cloneable submission side of the engine worker.
#[derive(Debug, Clone)]
pub(crate) struct EngineHandle {
    tx: Sender<EngineRequest>,
}

impl EngineHandle {
    /// Applies a drained change set as a single transaction.
    ///
    /// Returns the number of rows the transaction changed.
    pub(crate) fn apply(&self, ops: Vec<RecordOp>) -> StoreResult<usize> {
        let (reply, response) = mpsc::channel();
        self.tx
            .send(EngineRequest::Apply { ops, reply })
            .map_err(|_| StoreError::EngineClosed)?;
        response.recv().map_err(|_| StoreError::EngineClosed)?
    }

    /// Queries records of one kind, overlaying staged operations.
    pub(crate) fn query(
        &self,
        kind: &'static str,
        predicate: Option<Predicate>,
        overlay: Vec<RecordOp>,
    ) -> StoreResult<Vec<RawRecord>> {
        let (reply, response) = mpsc::channel();
        self.tx
            .send(EngineRequest::Query {
                kind,
                predicate,
                overlay,
                reply,
            })
            .map_err(|_| StoreError::EngineClosed)?;
        response.recv().map_err(|_| StoreError::EngineClosed)?
    }

    /// Asks the worker to exit once queued requests are drained.
    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(EngineRequest::Shutdown);
    }
}

/// Spawns the engine worker thread around an opened connection.
pub(crate) fn spawn_engine(conn: Connection) -> std::io::Result<(EngineHandle, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel();
    let thread = std::thread::Builder::new()
        .name("layerstore-engine".to_string())
        .spawn(move || run(conn, rx))?;
    Ok((EngineHandle { tx }, thread))
}

fn run(mut conn: Connection, rx: Receiver<EngineRequest>) {
    debug!("event=engine_start module=store status=ok");
    while let Ok(request) = rx.recv() {
        match request {
            EngineRequest::Apply { ops, reply } => {
                let started_at = Instant::now();
                let count = ops.len();
                let result = apply_ops(&mut conn, &ops);
                match &result {
                    Ok(applied) => debug!(
                        "event=store_apply module=store status=ok ops={count} applied={applied} duration_ms={}",
                        started_at.elapsed().as_millis()
                    ),
                    Err(err) => error!(
                        "event=store_apply module=store status=error ops={count} duration_ms={} error={err}",
                        started_at.elapsed().as_millis()
                    ),
                }
                let _ = reply.send(result);
            }
            EngineRequest::Query {
                kind,
                predicate,
                overlay,
                reply,
            } => {
                let started_at = Instant::now();
                let overlaid = overlay.len();
                let result = query_records(&mut conn, kind, predicate.as_ref(), &overlay);
                match &result {
                    Ok(records) => debug!(
                        "event=store_query module=store status=ok kind={kind} rows={} overlay={overlaid} duration_ms={}",
                        records.len(),
                        started_at.elapsed().as_millis()
                    ),
                    Err(err) => error!(
                        "event=store_query module=store status=error kind={kind} overlay={overlaid} duration_ms={} error={err}",
                        started_at.elapsed().as_millis()
                    ),
                }
                let _ = reply.send(result);
            }
            EngineRequest::Shutdown => break,
        }
    }
    debug!("event=engine_stop module=store status=ok");
}

fn apply_ops(conn: &mut Connection, ops: &[RecordOp]) -> StoreResult<usize> {
    let tx = conn.transaction()?;
    let mut applied = 0;
    for op in ops {
        applied += execute_op(&tx, op)?;
    }
    tx.commit()?;
    Ok(applied)
}

fn execute_op(conn: &Connection, op: &RecordOp) -> StoreResult<usize> {
    let changed = match op {
        RecordOp::Upsert {
            kind,
            record_id,
            payload,
        } => conn.execute(
            "INSERT INTO records (kind, record_id, payload)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (kind, record_id) DO UPDATE SET payload = excluded.payload;",
            params![kind, record_id.to_string(), payload],
        )?,
        RecordOp::Delete { kind, record_id } => conn.execute(
            "DELETE FROM records WHERE kind = ?1 AND record_id = ?2;",
            params![kind, record_id.to_string()],
        )?,
    };
    Ok(changed)
}

/// Runs a select over the staged view of one record kind.
///
/// Overlay operations are applied inside a savepoint so SQLite evaluates
/// the predicate against pending state, then the savepoint is rolled back.
fn query_records(
    conn: &mut Connection,
    kind: &'static str,
    predicate: Option<&Predicate>,
    overlay: &[RecordOp],
) -> StoreResult<Vec<RawRecord>> {
    if overlay.is_empty() {
        return select_records(conn, kind, predicate);
    }

    let mut sp = conn.savepoint()?;
    let mut staged = Ok(());
    for op in overlay {
        if let Err(err) = execute_op(&sp, op) {
            staged = Err(err);
            break;
        }
    }
    let result = match staged {
        Ok(()) => select_records(&sp, kind, predicate),
        Err(err) => Err(err),
    };
    sp.rollback()?;
    result
}

fn select_records(
    conn: &Connection,
    kind: &str,
    predicate: Option<&Predicate>,
) -> StoreResult<Vec<RawRecord>> {
    let mut sql = String::from("SELECT record_id, payload FROM records WHERE kind = ?");
    let mut bind_values: Vec<Value> = vec![Value::Text(kind.to_string())];
    if let Some(predicate) = predicate {
        sql.push_str(" AND (");
        sql.push_str(predicate.expr());
        sql.push(')');
        bind_values.extend(predicate.params().iter().cloned());
    }

    let mut stmt = conn.prepare(&sql).map_err(|err| match predicate {
        Some(predicate) => StoreError::InvalidQuery {
            expr: predicate.expr().to_string(),
            message: err.to_string(),
        },
        None => err.into(),
    })?;

    // Placeholder arity is only known after prepare; a mismatch is a
    // predicate fault, not a store fault.
    if let Some(predicate) = predicate {
        let expected = stmt.parameter_count().saturating_sub(1);
        if expected != predicate.params().len() {
            return Err(StoreError::InvalidQuery {
                expr: predicate.expr().to_string(),
                message: format!(
                    "expression expects {expected} bound values, {} provided",
                    predicate.params().len()
                ),
            });
        }
    }

    let mut rows = stmt.query(params_from_iter(bind_values))?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(parse_record_row(row)?);
    }
    Ok(records)
}

fn parse_record_row(row: &Row<'_>) -> StoreResult<RawRecord> {
    let id_text: String = row.get("record_id")?;
    let record_id = Uuid::parse_str(&id_text)
        .map_err(|err| StoreError::InvalidRecord(format!("record_id `{id_text}`: {err}")))?;
    Ok(RawRecord {
        record_id,
        payload: row.get("payload")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_store_in_memory;
    use std::time::Duration;

    fn engine() -> (EngineHandle, JoinHandle<()>) {
        let conn = open_store_in_memory(Duration::from_secs(5)).unwrap();
        spawn_engine(conn).unwrap()
    }

    fn upsert(id: RecordId, payload: &str) -> RecordOp {
        RecordOp::Upsert {
            kind: "note",
            record_id: id,
            payload: payload.to_string(),
        }
    }

    #[test]
    fn apply_then_query_round_trips() {
        let (handle, thread) = engine();
        let id = Uuid::new_v4();

        let applied = handle.apply(vec![upsert(id, r#"{"title":"a"}"#)]).unwrap();
        assert_eq!(applied, 1);

        let records = handle.query("note", None, Vec::new()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_id, id);

        handle.shutdown();
        thread.join().unwrap();
    }

    #[test]
    fn upsert_replaces_existing_payload() {
        let (handle, thread) = engine();
        let id = Uuid::new_v4();

        handle.apply(vec![upsert(id, r#"{"title":"a"}"#)]).unwrap();
        handle.apply(vec![upsert(id, r#"{"title":"b"}"#)]).unwrap();

        let records = handle.query("note", None, Vec::new()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, r#"{"title":"b"}"#);

        handle.shutdown();
        thread.join().unwrap();
    }

    #[test]
    fn query_overlay_is_visible_but_never_persisted() {
        let (handle, thread) = engine();
        let id = Uuid::new_v4();

        let overlay = vec![upsert(id, r#"{"title":"staged"}"#)];
        let records = handle.query("note", None, overlay).unwrap();
        assert_eq!(records.len(), 1);

        let persisted = handle.query("note", None, Vec::new()).unwrap();
        assert!(persisted.is_empty());

        handle.shutdown();
        thread.join().unwrap();
    }

    #[test]
    fn overlay_delete_hides_persisted_row() {
        let (handle, thread) = engine();
        let id = Uuid::new_v4();

        handle.apply(vec![upsert(id, r#"{"title":"a"}"#)]).unwrap();
        let overlay = vec![RecordOp::Delete {
            kind: "note",
            record_id: id,
        }];
        let records = handle.query("note", None, overlay).unwrap();
        assert!(records.is_empty());

        handle.shutdown();
        thread.join().unwrap();
    }

    #[test]
    fn malformed_predicate_reports_invalid_query() {
        let (handle, thread) = engine();

        let predicate = Predicate::new("payload ->>");
        let err = handle.query("note", Some(predicate), Vec::new()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery { .. }));

        // The worker survives a rejected statement.
        assert!(handle.query("note", None, Vec::new()).unwrap().is_empty());

        handle.shutdown();
        thread.join().unwrap();
    }

    #[test]
    fn predicate_bind_arity_mismatch_reports_invalid_query() {
        let (handle, thread) = engine();

        let missing = Predicate::new("payload ->> 'rank' = ?");
        let err = handle.query("note", Some(missing), Vec::new()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery { .. }));

        let surplus =
            Predicate::with_params("payload ->> 'rank' = 1", vec![Value::Integer(2)]);
        let err = handle.query("note", Some(surplus), Vec::new()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery { .. }));

        handle.shutdown();
        thread.join().unwrap();
    }

    #[test]
    fn predicate_params_bind_after_kind() {
        let (handle, thread) = engine();
        let id = Uuid::new_v4();

        handle
            .apply(vec![upsert(id, r#"{"rank":3}"#)])
            .unwrap();

        let predicate =
            Predicate::with_params("payload ->> 'rank' = ?", vec![Value::Integer(3)]);
        let records = handle.query("note", Some(predicate), Vec::new()).unwrap();
        assert_eq!(records.len(), 1);

        let predicate =
            Predicate::with_params("payload ->> 'rank' = ?", vec![Value::Integer(4)]);
        let records = handle.query("note", Some(predicate), Vec::new()).unwrap();
        assert!(records.is_empty());

        handle.shutdown();
        thread.join().unwrap();
    }
}
