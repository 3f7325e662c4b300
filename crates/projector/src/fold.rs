// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure, I/O-free fold of events and tool-audit entries into the
//! projection view and inspection index (`spec.md` §4.6).
//!
//! Kept free of the mailstore so the determinism invariant (folding the
//! same prefix twice yields identical bytes) can be property-tested
//! directly against this module.

use std::collections::{BTreeMap, VecDeque};

use fabric_core::{
    CurrentEvent, Derived, Event, EventStatus, InspectionIndex, OfficeMode, ProjectionView,
    TimelineEntry, ToolAuditCounts, ToolAuditEntry, WorkerEntity, WorkerState, WorkerView,
    SCHEMA_VERSION,
};

/// Bound on the per-worker and office-wide timeline kept in the
/// inspection index. Older entries are dropped as new ones arrive —
/// the index is a rolling window, not a full replay log (that's what
/// the mailstore itself is for).
pub const TIMELINE_CAP: usize = 200;

/// Worker-control event types the derivation table in `spec.md` §4.6
/// names. Every other event type only contributes to
/// `event_type_counts`.
const WORKER_EVENT_TYPES: &[&str] = &[
    "WORKER_STARTED",
    "WORKER_RESTART_SCHEDULED",
    "WORKER_RESTARTED",
    "WORKER_EXITED",
    "WORKER_HEARTBEAT_MISSED",
    "WORKER_HEARTBEAT",
];

fn worker_agent_id(event: &Event) -> Option<String> {
    if !WORKER_EVENT_TYPES.contains(&event.event_type.as_str()) {
        return None;
    }
    event
        .payload
        .get("agent_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| Some(event.origin_id.clone()))
}

fn apply_worker_transition(entry: &mut WorkerView, event_type: &str) {
    match event_type {
        "WORKER_STARTED" => {
            entry.present = true;
            entry.state = WorkerState::Active;
        }
        "WORKER_RESTART_SCHEDULED" => {
            entry.state = WorkerState::Restarting;
        }
        "WORKER_RESTARTED" => {
            entry.present = true;
            entry.state = WorkerState::Active;
            entry.restart_count += 1;
        }
        "WORKER_EXITED" => {
            entry.present = false;
            entry.state = WorkerState::Offline;
        }
        "WORKER_HEARTBEAT_MISSED" => {
            entry.missed_heartbeat_count += 1;
            if entry.missed_heartbeat_count >= 2 {
                entry.state = WorkerState::Offline;
                entry.present = false;
            }
        }
        "WORKER_HEARTBEAT" => {
            entry.present = true;
        }
        _ => {}
    }
}

fn push_bounded(timeline: &mut VecDeque<TimelineEntry>, entry: TimelineEntry) {
    timeline.push_back(entry);
    while timeline.len() > TIMELINE_CAP {
        timeline.pop_front();
    }
}

/// In-memory accumulator the projector folds events and tool-audit
/// entries into, tick after tick. Deliberately does NOT track
/// `event_queue_size` here: a claim/ack/fail mutates an existing event
/// row in place rather than appending a new one, so a fold driven by a
/// monotonic id cursor can only ever observe a row's status as it was
/// the one time that id crossed the cursor — it can never see the row
/// transition out of PENDING later, nor back into it on a requeue.
/// `event_queue_size` is therefore supplied by the caller from a fresh
/// `Mailstore::count_pending` query (`spec.md` §3) rather than folded.
#[derive(Debug, Clone)]
pub struct FoldState {
    pub event_type_counts: BTreeMap<String, u64>,
    pub tool_audit_counts: ToolAuditCounts,
    pub workers: BTreeMap<String, WorkerView>,
    pub current_event: Option<CurrentEvent>,
    pub last_seen_event_id: i64,
    pub last_seen_tool_audit_id: i64,
    pub worker_timelines: BTreeMap<String, VecDeque<TimelineEntry>>,
    pub office_timeline: VecDeque<TimelineEntry>,
}

impl Default for FoldState {
    fn default() -> Self {
        Self {
            event_type_counts: BTreeMap::new(),
            tool_audit_counts: ToolAuditCounts::default(),
            workers: BTreeMap::new(),
            current_event: None,
            last_seen_event_id: 0,
            last_seen_tool_audit_id: 0,
            worker_timelines: BTreeMap::new(),
            office_timeline: VecDeque::new(),
        }
    }
}

impl FoldState {
    pub fn apply_event(&mut self, event: &Event) {
        *self.event_type_counts.entry(event.event_type.clone()).or_insert(0) += 1;
        self.current_event = Some(CurrentEvent {
            event_type: event.event_type.clone(),
            origin: event.origin_id.clone(),
            ts: event.ts.clone(),
        });
        self.last_seen_event_id = self.last_seen_event_id.max(event.id);

        let Some(agent_id) = worker_agent_id(event) else {
            return;
        };

        let entry = self.workers.entry(agent_id.clone()).or_default();
        apply_worker_transition(entry, &event.event_type);
        entry.last_event_type = Some(event.event_type.clone());
        entry.last_event_at = Some(event.ts.clone());
        entry.last_seen_event_id = Some(event.id);

        let timeline_entry = TimelineEntry {
            event_id: event.id,
            ts: event.ts.clone(),
            event_type: event.event_type.clone(),
            summary: None,
        };
        push_bounded(self.worker_timelines.entry(agent_id).or_default(), timeline_entry.clone());
        push_bounded(&mut self.office_timeline, timeline_entry);
    }

    pub fn apply_audit(&mut self, audit: &ToolAuditEntry) {
        if audit.allowed {
            self.tool_audit_counts.allowed += 1;
        } else {
            self.tool_audit_counts.denied += 1;
        }
        self.last_seen_tool_audit_id = self.last_seen_tool_audit_id.max(audit.id);
    }

    pub fn to_view(&self, timestamp: &str, running: bool, event_queue_size: u64) -> ProjectionView {
        ProjectionView {
            schema_version: SCHEMA_VERSION,
            timestamp: timestamp.to_string(),
            last_updated_at: timestamp.to_string(),
            running,
            event_queue_size,
            current_event: self.current_event.clone(),
            event_type_counts: self.event_type_counts.clone(),
            tool_audit_counts: self.tool_audit_counts.clone(),
            workers: self.workers.clone(),
            derived: Derived {
                office_mode: if running { OfficeMode::Running } else { OfficeMode::Paused },
                stress_level: ProjectionView::stress_level(event_queue_size),
            },
            last_seen_event_id: self.last_seen_event_id,
            last_seen_tool_audit_id: self.last_seen_tool_audit_id,
        }
    }

    pub fn to_inspection_index(&self) -> InspectionIndex {
        let mut workers = BTreeMap::new();
        for (agent_id, view) in &self.workers {
            let timeline = self
                .worker_timelines
                .get(agent_id)
                .map(|t| t.iter().cloned().collect())
                .unwrap_or_default();
            workers.insert(
                agent_id.clone(),
                WorkerEntity {
                    role: agent_id.clone(),
                    state: view.state,
                    last_seen_event_id: view.last_seen_event_id,
                    timeline,
                },
            );
        }
        InspectionIndex {
            schema_version: SCHEMA_VERSION,
            workers,
            office_timeline: self.office_timeline.iter().cloned().collect(),
            last_seen_event_id: self.last_seen_event_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(id: i64, event_type: &str, origin_id: &str, payload: serde_json::Value) -> Event {
        Event {
            id,
            ts: format!("2026-01-01T00:00:{:02}Z", id % 60),
            event_type: event_type.to_string(),
            origin_id: origin_id.to_string(),
            target_agent: None,
            payload,
            justification: None,
            status: EventStatus::Pending,
            error: None,
            correlation_id: None,
            attempt: 0,
        }
    }

    #[test]
    fn worker_started_then_restarted_bumps_restart_count() {
        let mut state = FoldState::default();
        state.apply_event(&event(1, "WORKER_STARTED", "supervisor", json!({"agent_id": "forge"})));
        state.apply_event(&event(
            2,
            "WORKER_RESTART_SCHEDULED",
            "supervisor",
            json!({"agent_id": "forge"}),
        ));
        state.apply_event(&event(3, "WORKER_RESTARTED", "supervisor", json!({"agent_id": "forge"})));

        let view = state.workers.get("forge").expect("worker entry");
        assert!(view.present);
        assert_eq!(view.state, WorkerState::Active);
        assert_eq!(view.restart_count, 1);
        assert_eq!(view.last_seen_event_id, Some(3));
    }

    #[test]
    fn two_missed_heartbeats_mark_worker_offline() {
        let mut state = FoldState::default();
        state.apply_event(&event(1, "WORKER_STARTED", "supervisor", json!({"agent_id": "forge"})));
        state.apply_event(&event(
            2,
            "WORKER_HEARTBEAT_MISSED",
            "supervisor",
            json!({"agent_id": "forge"}),
        ));
        state.apply_event(&event(
            3,
            "WORKER_HEARTBEAT_MISSED",
            "supervisor",
            json!({"agent_id": "forge"}),
        ));

        let view = state.workers.get("forge").expect("worker entry");
        assert!(!view.present);
        assert_eq!(view.state, WorkerState::Offline);
        assert_eq!(view.missed_heartbeat_count, 2);
    }

    #[test]
    fn folding_same_prefix_twice_is_byte_identical() {
        let events = vec![
            event(1, "SUPERVISOR_START", "supervisor", json!({})),
            event(2, "WORKER_STARTED", "supervisor", json!({"agent_id": "forge"})),
            event(3, "WORKER_HEARTBEAT", "forge", json!({"agent_id": "forge"})),
        ];

        let fold_once = |events: &[Event]| {
            let mut state = FoldState::default();
            for e in events {
                state.apply_event(e);
            }
            serde_json::to_vec(&state.to_view("2026-01-01T00:00:03Z", true, 0)).expect("serialize")
        };

        assert_eq!(fold_once(&events), fold_once(&events));
    }

    #[test]
    fn event_type_counts_and_current_event_track_every_row() {
        let mut state = FoldState::default();
        state.apply_event(&event(1, "SUPERVISOR_HEARTBEAT", "supervisor", json!({})));
        state.apply_event(&event(2, "SUPERVISOR_HEARTBEAT", "supervisor", json!({})));

        assert_eq!(state.event_type_counts.get("SUPERVISOR_HEARTBEAT"), Some(&2));
        assert_eq!(state.current_event.as_ref().unwrap().event_type, "SUPERVISOR_HEARTBEAT");
        assert_eq!(state.last_seen_event_id, 2);
    }
}
