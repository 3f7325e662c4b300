// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable mailstore: content-addressed event log with leases and
//! idempotency records (`spec.md` §4.1).

use std::path::Path;
use std::time::Duration;

use fabric_core::{
    Event, EventStatus, FabricError, IdempotencyOutcome, Result, ToolAuditEntry,
    MAX_RETRY_ATTEMPTS,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use tracing::{info, warn};

use crate::schema;

fn storage_err(err: rusqlite::Error) -> FabricError {
    FabricError::storage(err)
}

/// Busy-timeout bound for mutations other than `claim`, which derives
/// its own bound from `lease_seconds` (`spec.md` §5). Generous because
/// `ack`/`fail`/`record_tool_action` have no caller-supplied duration
/// to scale from and are expected to be rare contention losers, not a
/// normal-path wait.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether `err` is SQLite reporting that it gave up waiting on a lock
/// held by another connection (i.e. the `busy_timeout` elapsed).
fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(ffi_err, _)
            if ffi_err.code == rusqlite::ErrorCode::DatabaseBusy
    )
}

/// Durable, linearizable event log. One [`Mailstore`] wraps a single
/// SQLite connection behind a mutex: concurrency across threads inside
/// one process is mediated here, and concurrency across OS processes
/// is mediated by SQLite's own file locking under WAL mode
/// (`spec.md` §5).
pub struct Mailstore {
    conn: Mutex<Connection>,
}

impl Mailstore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(storage_err)?;
        schema::apply_pragmas(&conn).map_err(storage_err)?;
        schema::migrate(&conn).map_err(storage_err)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        schema::migrate(&conn).map_err(storage_err)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// `publish(type, origin_id, payload, target_agent?, correlation_id?) -> id`
    pub fn publish(
        &self,
        event_type: &str,
        origin_id: &str,
        payload: Value,
        target_agent: Option<&str>,
        correlation_id: Option<&str>,
        now_ts: &str,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events (ts, type, origin_id, target_agent, payload, status, attempt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                now_ts,
                event_type,
                origin_id,
                target_agent,
                payload.to_string(),
                EventStatus::Pending.as_str(),
            ],
        )
        .map_err(storage_err)?;
        let id = conn.last_insert_rowid();
        info!(event_id = id, %event_type, origin_id, "event published");
        Ok(id)
    }

    /// `claim(consumer_id, target_agent?, lease_seconds) -> Event | None`
    ///
    /// Selects the lowest-`id` event that is PENDING or
    /// CLAIMED-with-expired-lease, matching `target_agent` if supplied.
    /// Runs inside a single immediate transaction so the check and the
    /// mutation are linearizable.
    ///
    /// Bounds contention waits to `lease_seconds / 10` (`spec.md` §5):
    /// another OS process holding SQLite's write lock past that bound
    /// surfaces as "no candidate" rather than an error, since from the
    /// caller's perspective a claim that gave up on contention is
    /// indistinguishable from one that found nothing to claim.
    pub fn claim(
        &self,
        consumer_id: &str,
        target_agent: Option<&str>,
        lease_seconds: u64,
        now_ts: &str,
        now_ms: u64,
    ) -> Result<Option<Event>> {
        let mut conn = self.conn.lock();
        let busy_timeout = Duration::from_millis((lease_seconds * 1000 / 10).max(50));
        conn.busy_timeout(busy_timeout).map_err(storage_err)?;

        let tx = match conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate) {
            Ok(tx) => tx,
            Err(err) if is_busy(&err) => return Ok(None),
            Err(err) => return Err(storage_err(err)),
        };

        let candidate: Option<(i64,)> = tx
            .query_row(
                "SELECT e.id FROM events e
                 LEFT JOIN leases l ON l.event_id = e.id
                 WHERE (e.status = 'PENDING'
                        OR (e.status = 'CLAIMED' AND l.lease_expiry_ms <= ?1))
                   AND (?2 IS NULL OR e.target_agent = ?2)
                 ORDER BY e.id ASC
                 LIMIT 1",
                params![now_ms as i64, target_agent],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;

        let Some((event_id,)) = candidate else {
            tx.commit().map_err(storage_err)?;
            return Ok(None);
        };

        let expiry = now_ms + lease_seconds * 1000;
        tx.execute(
            "INSERT INTO leases (event_id, claimed_by, claim_ts, lease_expiry_ms)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(event_id) DO UPDATE SET
                claimed_by = excluded.claimed_by,
                claim_ts = excluded.claim_ts,
                lease_expiry_ms = excluded.lease_expiry_ms",
            params![event_id, consumer_id, now_ts, expiry as i64],
        )
        .map_err(storage_err)?;
        tx.execute(
            "UPDATE events SET status = ?1 WHERE id = ?2",
            params![EventStatus::Claimed.as_str(), event_id],
        )
        .map_err(storage_err)?;

        let event = tx
            .query_row(
                "SELECT id, ts, type, origin_id, target_agent, payload, justification,
                        status, error, correlation_id, attempt
                 FROM events WHERE id = ?1",
                params![event_id],
                row_to_event,
            )
            .map_err(storage_err)?;

        tx.commit().map_err(storage_err)?;
        info!(event_id, consumer_id, "event claimed");
        Ok(Some(event))
    }

    /// `ack(event_id, consumer_id, result?)`: CLAIMED → DONE only if the
    /// caller holds the current lease.
    pub fn ack(&self, event_id: i64, consumer_id: &str, result: Option<Value>) -> Result<()> {
        let mut conn = self.conn.lock();
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT).map_err(storage_err)?;
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(storage_err)?;

        if !lease_held_by(&tx, event_id, consumer_id).map_err(storage_err)? {
            tx.rollback().map_err(storage_err)?;
            return Err(FabricError::LeaseLost { event_id });
        }

        tx.execute(
            "UPDATE events SET status = ?1, result = ?2 WHERE id = ?3",
            params![
                EventStatus::Done.as_str(),
                result.map(|v| v.to_string()),
                event_id
            ],
        )
        .map_err(storage_err)?;
        tx.execute("DELETE FROM leases WHERE event_id = ?1", params![event_id])
            .map_err(storage_err)?;

        tx.commit().map_err(storage_err)?;
        info!(event_id, consumer_id, "event acked");
        Ok(())
    }

    /// `fail(event_id, consumer_id, error, retry?)`: CLAIMED → FAILED; if
    /// `retry` and budget remains, immediately requeue as PENDING.
    /// Budget: fixed 3 requeues per event (`spec.md` §9 resolution);
    /// overflow routes FAILED → DEAD.
    pub fn fail(
        &self,
        event_id: i64,
        consumer_id: &str,
        error: &str,
        retry: bool,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT).map_err(storage_err)?;
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(storage_err)?;

        if !lease_held_by(&tx, event_id, consumer_id).map_err(storage_err)? {
            tx.rollback().map_err(storage_err)?;
            return Err(FabricError::LeaseLost { event_id });
        }

        let attempt: u32 = tx
            .query_row(
                "SELECT attempt FROM events WHERE id = ?1",
                params![event_id],
                |row| row.get::<_, i64>(0),
            )
            .map_err(storage_err)? as u32;

        let (new_status, new_attempt) = if retry {
            let next = attempt + 1;
            if next > MAX_RETRY_ATTEMPTS {
                (EventStatus::Dead, attempt)
            } else {
                (EventStatus::Pending, next)
            }
        } else {
            (EventStatus::Failed, attempt)
        };

        tx.execute(
            "UPDATE events SET status = ?1, error = ?2, attempt = ?3 WHERE id = ?4",
            params![new_status.as_str(), error, new_attempt, event_id],
        )
        .map_err(storage_err)?;
        tx.execute("DELETE FROM leases WHERE event_id = ?1", params![event_id])
            .map_err(storage_err)?;

        tx.commit().map_err(storage_err)?;
        if new_status == EventStatus::Dead {
            warn!(event_id, "event exhausted retry budget, moved to DEAD");
        } else {
            info!(event_id, consumer_id, ?new_status, "event failed");
        }
        Ok(())
    }

    /// Live count of events currently `PENDING` (`spec.md` §3:
    /// `event_queue_size`). Deliberately a fresh query rather than
    /// something folded from `list_events`: a claim/ack/fail mutates an
    /// existing row in place rather than appending a new one, so a
    /// cursor that only ever reads each id once can never observe a
    /// PENDING event's later transition out of that status. Read-only,
    /// used exclusively by the projection materializer.
    pub fn count_pending(&self) -> Result<u64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM events WHERE status = ?1",
            params![EventStatus::Pending.as_str()],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as u64)
        .map_err(storage_err)
    }

    /// Read-only, ascending by `id`. Used exclusively by the projection
    /// materializer (`spec.md` §4.6).
    pub fn list_events(&self, after_id: i64, limit: u32) -> Result<Vec<Event>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, ts, type, origin_id, target_agent, payload, justification,
                        status, error, correlation_id, attempt
                 FROM events WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![after_id, limit], row_to_event)
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    /// Read-only, ascending by `id`. Used exclusively by the projection
    /// materializer.
    pub fn list_tool_audit(&self, after_id: i64, limit: u32) -> Result<Vec<ToolAuditEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, ts, agent_id, action_type, working_dir, idempotency_key,
                        allowed, reason, payload, result, correlation_id
                 FROM tool_audit WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![after_id, limit], row_to_audit)
            .map_err(storage_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
    }

    /// `record_tool_audit(entry)`.
    pub fn record_tool_audit(&self, entry: &PendingAudit) -> Result<i64> {
        let conn = self.conn.lock();
        insert_audit(&conn, entry).map_err(storage_err)
    }

    /// Whether `key` already has a registered idempotency record, i.e.
    /// some prior allowed action bears it (`record_tool_action` only
    /// registers a key when its audit entry is allowed). A plain
    /// primary-key lookup, no side effects — used by the gateway to
    /// decide rule 3 before it commits to a verdict.
    pub fn idempotency_key_exists(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let existing: Option<String> = conn
            .query_row(
                "SELECT idempotency_key FROM idempotency_keys WHERE idempotency_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        Ok(existing.is_some())
    }

    /// `register_idempotency_key(key, agent_id, action_type, event_id?, result?) -> {fresh|duplicate}`
    pub fn register_idempotency_key(
        &self,
        key: &str,
        agent_id: &str,
        action_type: &str,
        event_id: Option<i64>,
        result: Option<&Value>,
        now_ts: &str,
    ) -> Result<IdempotencyOutcome> {
        let conn = self.conn.lock();
        register_idempotency(&conn, key, agent_id, action_type, event_id, result, now_ts)
            .map_err(storage_err)
    }

    /// Register the idempotency key and write the tool-audit row in one
    /// transaction, per the gateway's contract (`spec.md` §4.3): "The
    /// audit row is written regardless of outcome in the same
    /// transaction that registers the idempotency key on success."
    pub fn record_tool_action(
        &self,
        entry: &PendingAudit,
        idempotency: Option<IdempotencyRegistration<'_>>,
    ) -> Result<i64> {
        let mut conn = self.conn.lock();
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT).map_err(storage_err)?;
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(storage_err)?;

        if let Some(reg) = &idempotency {
            if entry.allowed {
                register_idempotency(
                    &tx,
                    reg.key,
                    reg.agent_id,
                    reg.action_type,
                    reg.event_id,
                    reg.result,
                    reg.now_ts,
                )
                .map_err(storage_err)?;
            }
        }

        let audit_id = insert_audit(&tx, entry).map_err(storage_err)?;
        tx.commit().map_err(storage_err)?;
        Ok(audit_id)
    }
}

/// Parameters for `record_tool_action`'s idempotency-key registration.
pub struct IdempotencyRegistration<'a> {
    pub key: &'a str,
    pub agent_id: &'a str,
    pub action_type: &'a str,
    pub event_id: Option<i64>,
    pub result: Option<&'a Value>,
    pub now_ts: &'a str,
}

/// A not-yet-persisted tool-audit row (mirrors [`ToolAuditEntry`] minus
/// the server-assigned `id`).
pub struct PendingAudit {
    pub ts: String,
    pub agent_id: String,
    pub action_type: String,
    pub working_dir: String,
    pub idempotency_key: Option<String>,
    pub allowed: bool,
    pub reason: String,
    pub payload: Value,
    pub result: Option<Value>,
    pub correlation_id: Option<String>,
}

fn lease_held_by(conn: &Connection, event_id: i64, consumer_id: &str) -> rusqlite::Result<bool> {
    let holder: Option<String> = conn
        .query_row(
            "SELECT claimed_by FROM leases WHERE event_id = ?1",
            params![event_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(holder.as_deref() == Some(consumer_id))
}

fn register_idempotency(
    conn: &Connection,
    key: &str,
    agent_id: &str,
    action_type: &str,
    event_id: Option<i64>,
    result: Option<&Value>,
    now_ts: &str,
) -> rusqlite::Result<IdempotencyOutcome> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT idempotency_key FROM idempotency_keys WHERE idempotency_key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Ok(IdempotencyOutcome::Duplicate);
    }
    conn.execute(
        "INSERT INTO idempotency_keys
            (idempotency_key, created_ts, agent_id, action_type, event_id, result)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            key,
            now_ts,
            agent_id,
            action_type,
            event_id,
            result.map(|v| v.to_string())
        ],
    )?;
    Ok(IdempotencyOutcome::Fresh)
}

fn insert_audit(conn: &Connection, entry: &PendingAudit) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO tool_audit
            (ts, agent_id, action_type, working_dir, idempotency_key, allowed, reason,
             payload, result, correlation_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            entry.ts,
            entry.agent_id,
            entry.action_type,
            entry.working_dir,
            entry.idempotency_key,
            entry.allowed as i64,
            entry.reason,
            entry.payload.to_string(),
            entry.result.as_ref().map(|v| v.to_string()),
            entry.correlation_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let payload_text: String = row.get(5)?;
    let status_text: String = row.get(7)?;
    Ok(Event {
        id: row.get(0)?,
        ts: row.get(1)?,
        event_type: row.get(2)?,
        origin_id: row.get(3)?,
        target_agent: row.get(4)?,
        payload: serde_json::from_str(&payload_text).unwrap_or(Value::Null),
        justification: row.get(6)?,
        status: EventStatus::from_str(&status_text).unwrap_or(EventStatus::Pending),
        error: row.get(8)?,
        correlation_id: row.get(9)?,
        attempt: row.get::<_, i64>(10)? as u32,
    })
}

fn row_to_audit(row: &Row<'_>) -> rusqlite::Result<ToolAuditEntry> {
    let payload_text: String = row.get(8)?;
    let result_text: Option<String> = row.get(9)?;
    Ok(ToolAuditEntry {
        id: row.get(0)?,
        ts: row.get(1)?,
        agent_id: row.get(2)?,
        action_type: row.get(3)?,
        working_dir: row.get(4)?,
        idempotency_key: row.get(5)?,
        allowed: row.get::<_, i64>(6)? != 0,
        reason: row.get(7)?,
        payload: serde_json::from_str(&payload_text).unwrap_or(Value::Null),
        result: result_text.and_then(|s| serde_json::from_str(&s).ok()),
        correlation_id: row.get(10)?,
    })
}
