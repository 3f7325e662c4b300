// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mailstore schema and pragmas (`spec.md` §6).

use rusqlite::Connection;

pub(crate) fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

pub(crate) fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            ts              TEXT NOT NULL,
            type            TEXT NOT NULL,
            origin_id       TEXT NOT NULL,
            target_agent    TEXT,
            payload         TEXT NOT NULL,
            justification   TEXT,
            status          TEXT NOT NULL,
            error           TEXT,
            correlation_id  TEXT,
            attempt         INTEGER NOT NULL DEFAULT 0,
            result          TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_events_status_id ON events(status, id);
        CREATE INDEX IF NOT EXISTS idx_events_target_status_id
            ON events(target_agent, status, id);
        CREATE INDEX IF NOT EXISTS idx_events_correlation_id ON events(correlation_id);

        CREATE TABLE IF NOT EXISTS leases (
            event_id        INTEGER PRIMARY KEY REFERENCES events(id),
            claimed_by      TEXT NOT NULL,
            claim_ts        TEXT NOT NULL,
            lease_expiry_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS idempotency_keys (
            idempotency_key TEXT PRIMARY KEY,
            created_ts      TEXT NOT NULL,
            agent_id        TEXT NOT NULL,
            action_type     TEXT NOT NULL,
            event_id        INTEGER,
            result          TEXT
        );

        CREATE TABLE IF NOT EXISTS tool_audit (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            ts              TEXT NOT NULL,
            agent_id        TEXT NOT NULL,
            action_type     TEXT NOT NULL,
            working_dir     TEXT NOT NULL,
            idempotency_key TEXT,
            allowed         INTEGER NOT NULL,
            reason          TEXT NOT NULL,
            payload         TEXT NOT NULL,
            result          TEXT,
            correlation_id  TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_tool_audit_idempotency_key
            ON tool_audit(idempotency_key);
        "#,
    )
}
