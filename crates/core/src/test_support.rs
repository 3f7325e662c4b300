// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test builders and proptest strategies shared by downstream crates'
//! property tests (`spec.md` §8).

use crate::event::EventStatus;
use proptest::prelude::*;

/// An event-type string drawn from the small alphabet the projector's
/// worker-state derivation table (`spec.md` §4.6) actually reacts to,
/// plus a generic fallback to exercise the "unknown types still
/// increment counters" rule.
pub fn arb_event_type() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("WORKER_STARTED".to_string()),
        Just("WORKER_RESTART_SCHEDULED".to_string()),
        Just("WORKER_RESTARTED".to_string()),
        Just("WORKER_EXITED".to_string()),
        Just("WORKER_HEARTBEAT_MISSED".to_string()),
        Just("WORKER_HEARTBEAT".to_string()),
        Just("GENERIC_EVENT".to_string()),
    ]
}

pub fn arb_event_status() -> impl Strategy<Value = EventStatus> {
    prop_oneof![
        Just(EventStatus::Pending),
        Just(EventStatus::Claimed),
        Just(EventStatus::Done),
        Just(EventStatus::Failed),
        Just(EventStatus::Dead),
    ]
}

pub fn arb_worker_id() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("forge".to_string()),
        Just("recon".to_string()),
        Just("command".to_string()),
    ]
}
