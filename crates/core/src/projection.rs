// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shapes of the projection view and inspection index (`spec.md` §3, §4.6).
//!
//! All maps are `BTreeMap`, never `HashMap`: the projector's
//! determinism invariant requires byte-for-byte identical JSON across
//! folds of the same prefix, which requires stable key ordering.

use crate::worker::WorkerState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub origin: String,
    pub ts: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolAuditCounts {
    pub allowed: u64,
    pub denied: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerView {
    pub present: bool,
    pub state: WorkerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<String>,
    pub restart_count: u64,
    pub missed_heartbeat_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_event_id: Option<i64>,
}

impl Default for WorkerView {
    fn default() -> Self {
        Self {
            present: false,
            state: WorkerState::Offline,
            last_event_type: None,
            last_event_at: None,
            restart_count: 0,
            missed_heartbeat_count: 0,
            last_seen_event_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfficeMode {
    Running,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Derived {
    pub office_mode: OfficeMode,
    pub stress_level: f64,
}

/// `spec.md` §3 — the single JSON document the projector publishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionView {
    pub schema_version: u32,
    pub timestamp: String,
    pub last_updated_at: String,
    pub running: bool,
    pub event_queue_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_event: Option<CurrentEvent>,
    pub event_type_counts: BTreeMap<String, u64>,
    pub tool_audit_counts: ToolAuditCounts,
    pub workers: BTreeMap<String, WorkerView>,
    pub derived: Derived,
    pub last_seen_event_id: i64,
    pub last_seen_tool_audit_id: i64,
}

impl ProjectionView {
    /// `stress_level = min(event_queue_size / 25, 1)`.
    pub fn stress_level(event_queue_size: u64) -> f64 {
        (event_queue_size as f64 / 25.0).min(1.0)
    }
}

/// One entry in a worker's (or the office's) timeline, paginated by an
/// opaque cursor (`spec.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub event_id: i64,
    pub ts: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerEntity {
    pub role: String,
    pub state: WorkerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_event_id: Option<i64>,
    pub timeline: Vec<TimelineEntry>,
}

/// `spec.md` §3 — per-worker entity metadata plus an aggregated "office
/// timeline" across all workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionIndex {
    pub schema_version: u32,
    pub workers: BTreeMap<String, WorkerEntity>,
    pub office_timeline: Vec<TimelineEntry>,
    pub last_seen_event_id: i64,
}
