// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event: a durably stored, uniquely identified message describing an
//! action or observation (`spec.md` §3).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of an [`Event`].
///
/// `PENDING` → `CLAIMED` on claim → `DONE` on ack or `FAILED` on fail.
/// `FAILED` → `PENDING` on requeue (retry budget remains) or `DEAD`
/// (budget exhausted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Pending,
    Claimed,
    Done,
    Failed,
    Dead,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "PENDING",
            EventStatus::Claimed => "CLAIMED",
            EventStatus::Done => "DONE",
            EventStatus::Failed => "FAILED",
            EventStatus::Dead => "DEAD",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(EventStatus::Pending),
            "CLAIMED" => Some(EventStatus::Claimed),
            "DONE" => Some(EventStatus::Done),
            "FAILED" => Some(EventStatus::Failed),
            "DEAD" => Some(EventStatus::Dead),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A durably stored, uniquely identified message.
///
/// `id` is assigned at publish time and never reused. Ordering across
/// the whole system is defined by `id` ascending; `ts` is informational
/// only (see `spec.md` §9, Open Question on timestamp ordering).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub ts: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub origin_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<String>,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Number of times this event has been requeued via `fail(retry=true)`.
    #[serde(default)]
    pub attempt: u32,
}

/// Maximum number of requeues before an event transitions FAILED → DEAD.
///
/// Resolves the retry-budget Open Question in `spec.md` §9: a fixed
/// budget tracked per event (not per type), via a dedicated `attempt`
/// column, with overflow routing to DEAD.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// A time-bounded claim of exclusive processing rights over an event.
///
/// At most one active (unexpired) lease exists per event at any instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub event_id: i64,
    pub claimed_by: String,
    pub claim_ts: String,
    /// Epoch milliseconds after which the lease is reclaimable by any
    /// claimer.
    pub lease_expiry_ms: u64,
}

/// Caller-supplied token guaranteeing at-most-once effect for a tool
/// action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub idempotency_key: String,
    pub created_ts: String,
    pub agent_id: String,
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Outcome of registering an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyOutcome {
    Fresh,
    Duplicate,
}

/// Append-only audit row written by the tool gateway for every
/// decision it makes, allowed or denied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolAuditEntry {
    pub id: i64,
    pub ts: String,
    pub agent_id: String,
    pub action_type: String,
    pub working_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub allowed: bool,
    pub reason: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_status_round_trips_through_str() {
        for status in [
            EventStatus::Pending,
            EventStatus::Claimed,
            EventStatus::Done,
            EventStatus::Failed,
            EventStatus::Dead,
        ] {
            assert_eq!(EventStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn event_status_unknown_str_is_none() {
        assert_eq!(EventStatus::from_str("BOGUS"), None);
    }

    #[test]
    fn event_serializes_type_field_without_rust_keyword_clash() {
        let event = Event {
            id: 1,
            ts: "2026-01-01T00:00:00Z".to_string(),
            event_type: "WORKER_STARTED".to_string(),
            origin_id: "supervisor".to_string(),
            target_agent: None,
            payload: serde_json::json!({}),
            justification: None,
            status: EventStatus::Pending,
            error: None,
            correlation_id: None,
            attempt: 0,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "WORKER_STARTED");
        assert!(value.get("event_type").is_none());
    }
}
