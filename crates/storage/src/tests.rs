// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::{IdempotencyRegistration, Mailstore, PendingAudit};
use fabric_core::{EventStatus, FabricError, IdempotencyOutcome};
use serde_json::json;

fn ts() -> String {
    "2026-01-01T00:00:00Z".to_string()
}

#[test]
fn publish_assigns_monotonic_ids() {
    let store = Mailstore::open_in_memory().unwrap();
    let id1 = store.publish("JOB_CREATED", "cli", json!({}), None, None, &ts()).unwrap();
    let id2 = store.publish("JOB_CREATED", "cli", json!({}), None, None, &ts()).unwrap();
    assert!(id2 > id1);
}

#[test]
fn claim_returns_lowest_pending_id_matching_target() {
    let store = Mailstore::open_in_memory().unwrap();
    store.publish("A", "cli", json!({}), Some("other"), None, &ts()).unwrap();
    let forge_id = store.publish("B", "cli", json!({}), Some("forge"), None, &ts()).unwrap();

    let claimed = store.claim("c1", Some("forge"), 30, &ts(), 1_000).unwrap().unwrap();
    assert_eq!(claimed.id, forge_id);
    assert_eq!(claimed.status, EventStatus::Claimed);
}

#[test]
fn claim_returns_none_when_no_candidate() {
    let store = Mailstore::open_in_memory().unwrap();
    assert!(store.claim("c1", Some("forge"), 30, &ts(), 1_000).unwrap().is_none());
}

#[test]
fn ack_requires_holding_lease() {
    let store = Mailstore::open_in_memory().unwrap();
    let id = store.publish("A", "cli", json!({}), None, None, &ts()).unwrap();
    store.claim("c1", None, 30, &ts(), 1_000).unwrap();

    let err = store.ack(id, "someone-else", None).unwrap_err();
    assert!(matches!(err, FabricError::LeaseLost { event_id } if event_id == id));

    store.ack(id, "c1", Some(json!({"ok": true}))).unwrap();
}

#[test]
fn ack_transitions_to_done_and_clears_lease() {
    let store = Mailstore::open_in_memory().unwrap();
    let id = store.publish("A", "cli", json!({}), None, None, &ts()).unwrap();
    store.claim("c1", None, 30, &ts(), 1_000).unwrap();
    store.ack(id, "c1", None).unwrap();

    let events = store.list_events(0, 10).unwrap();
    assert_eq!(events[0].status, EventStatus::Done);

    // Lease released: a second claim should find nothing (event is DONE, not PENDING).
    assert!(store.claim("c2", None, 30, &ts(), 2_000).unwrap().is_none());
}

#[test]
fn fail_without_retry_leaves_event_failed() {
    let store = Mailstore::open_in_memory().unwrap();
    let id = store.publish("A", "cli", json!({}), None, None, &ts()).unwrap();
    store.claim("c1", None, 30, &ts(), 1_000).unwrap();
    store.fail(id, "c1", "boom", false).unwrap();

    let events = store.list_events(0, 10).unwrap();
    assert_eq!(events[0].status, EventStatus::Failed);
    assert_eq!(events[0].error.as_deref(), Some("boom"));
}

#[test]
fn fail_with_retry_requeues_until_budget_exhausted() {
    let store = Mailstore::open_in_memory().unwrap();
    let id = store.publish("A", "cli", json!({}), None, None, &ts()).unwrap();

    for expected_attempt in 1..=3u32 {
        store.claim("c1", None, 30, &ts(), 1_000).unwrap();
        store.fail(id, "c1", "retryable", true).unwrap();
        let events = store.list_events(0, 10).unwrap();
        assert_eq!(events[0].status, EventStatus::Pending);
        assert_eq!(events[0].attempt, expected_attempt);
    }

    // Fourth failure exhausts the budget (max 3 requeues).
    store.claim("c1", None, 30, &ts(), 1_000).unwrap();
    store.fail(id, "c1", "retryable", true).unwrap();
    let events = store.list_events(0, 10).unwrap();
    assert_eq!(events[0].status, EventStatus::Dead);
}

#[test]
fn lease_reclamation_after_expiry() {
    let store = Mailstore::open_in_memory().unwrap();
    let id = store.publish("A", "cli", json!({}), None, None, &ts()).unwrap();

    store.claim("c1", None, 1, &ts(), 1_000).unwrap();
    // Lease expires at 1_000 + 1*1000 = 2_000ms; at 2_500ms it's reclaimable.
    let reclaimed = store.claim("c2", None, 30, &ts(), 2_500).unwrap().unwrap();
    assert_eq!(reclaimed.id, id);

    let err = store.ack(id, "c1", None).unwrap_err();
    assert!(matches!(err, FabricError::LeaseLost { .. }));

    store.ack(id, "c2", None).unwrap();
}

#[test]
fn claim_does_not_evict_unexpired_lease() {
    let store = Mailstore::open_in_memory().unwrap();
    store.publish("A", "cli", json!({}), None, None, &ts()).unwrap();
    store.claim("c1", None, 30, &ts(), 1_000).unwrap();

    // Lease expires at 31_000ms; at 5_000ms it's still active.
    assert!(store.claim("c2", None, 30, &ts(), 5_000).unwrap().is_none());
}

#[test]
fn duplicate_idempotency_key_is_denied_without_side_effects() {
    let store = Mailstore::open_in_memory().unwrap();
    let outcome1 = store
        .register_idempotency_key("k1", "forge", "RUN_CMD", None, None, &ts())
        .unwrap();
    assert_eq!(outcome1, IdempotencyOutcome::Fresh);

    let outcome2 = store
        .register_idempotency_key("k1", "forge", "RUN_CMD", None, None, &ts())
        .unwrap();
    assert_eq!(outcome2, IdempotencyOutcome::Duplicate);
}

#[test]
fn record_tool_action_writes_audit_even_when_denied() {
    let store = Mailstore::open_in_memory().unwrap();
    let denied = PendingAudit {
        ts: ts(),
        agent_id: "recon".to_string(),
        action_type: "WRITE_FILE".to_string(),
        working_dir: "/workspaces/recon".to_string(),
        idempotency_key: None,
        allowed: false,
        reason: "File path escapes worktree root.".to_string(),
        payload: json!({}),
        result: None,
        correlation_id: None,
    };
    let audit_id = store.record_tool_action(&denied, None).unwrap();
    let audits = store.list_tool_audit(0, 10).unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].id, audit_id);
    assert!(!audits[0].allowed);
}

#[test]
fn record_tool_action_registers_idempotency_only_when_allowed() {
    let store = Mailstore::open_in_memory().unwrap();
    let allowed = PendingAudit {
        ts: ts(),
        agent_id: "forge".to_string(),
        action_type: "RUN_CMD".to_string(),
        working_dir: "/workspaces/forge".to_string(),
        idempotency_key: Some("k1".to_string()),
        allowed: true,
        reason: "ok".to_string(),
        payload: json!({}),
        result: None,
        correlation_id: None,
    };
    store
        .record_tool_action(
            &allowed,
            Some(IdempotencyRegistration {
                key: "k1",
                agent_id: "forge",
                action_type: "RUN_CMD",
                event_id: None,
                result: None,
                now_ts: &ts(),
            }),
        )
        .unwrap();

    let second = store
        .register_idempotency_key("k1", "forge", "RUN_CMD", None, None, &ts())
        .unwrap();
    assert_eq!(second, IdempotencyOutcome::Duplicate);
}

#[test]
fn claim_gives_up_as_none_rather_than_erroring_under_lock_contention() {
    // `spec.md` §5: claim bounds its contention wait to `lease_seconds /
    // 10` rather than blocking indefinitely; giving up on contention
    // must look like "no candidate", not a storage error.
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("mailstore.db");

    let store = Mailstore::open(&db_path).unwrap();
    store.publish("A", "cli", json!({}), None, None, &ts()).unwrap();

    let mut blocker = rusqlite::Connection::open(&db_path).unwrap();
    let blocking_tx = blocker.transaction().unwrap();
    blocking_tx.execute("UPDATE events SET error = 'held'", []).unwrap();

    // lease_seconds=1 -> busy_timeout floor of 100ms; the blocking
    // transaction above is still open and holds SQLite's write lock.
    let result = store.claim("c1", None, 1, &ts(), 1_000).unwrap();
    assert!(result.is_none());

    blocking_tx.rollback().unwrap();

    // Lock released: the same call now succeeds normally.
    let claimed = store.claim("c1", None, 30, &ts(), 1_000).unwrap();
    assert!(claimed.is_some());
}

#[test]
fn list_events_is_read_only_and_ordered() {
    let store = Mailstore::open_in_memory().unwrap();
    for i in 0..5 {
        store
            .publish("EVT", "cli", json!({"i": i}), None, None, &ts())
            .unwrap();
    }
    let events = store.list_events(2, 2).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].id, 3);
    assert_eq!(events[1].id, 4);
}

#[test]
fn count_pending_reflects_claims_and_requeues_live() {
    let store = Mailstore::open_in_memory().unwrap();
    let a = store.publish("A", "cli", json!({}), None, None, &ts()).unwrap();
    let _b = store.publish("B", "cli", json!({}), None, None, &ts()).unwrap();
    assert_eq!(store.count_pending().unwrap(), 2);

    let claimed = store.claim("c1", None, 30, &ts(), 1_000).unwrap().unwrap();
    assert_eq!(claimed.id, a);
    assert_eq!(store.count_pending().unwrap(), 1);

    store.fail(a, "c1", "boom", true).unwrap();
    assert_eq!(store.count_pending().unwrap(), 2);

    let reclaimed = store.claim("c2", None, 30, &ts(), 1_000).unwrap().unwrap();
    store.ack(reclaimed.id, "c2", None).unwrap();
    assert_eq!(store.count_pending().unwrap(), 1);
}
