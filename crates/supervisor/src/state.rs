// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-worker bookkeeping the supervisor keeps in memory (`spec.md` §4.5).

use std::collections::VecDeque;

use fabric_core::SupervisedState;
use tokio::process::Child;

use crate::spawn::WorkerSpawnSpec;

pub(crate) struct WorkerRuntime {
    pub spec: WorkerSpawnSpec,
    pub child: Option<Child>,
    pub pid: Option<u32>,
    pub state: SupervisedState,
    pub last_heartbeat_ms: u64,
    pub missed_heartbeat_count: u32,
    pub restart_count: u32,
    pub disabled: bool,
    /// Timestamps (ms) of restarts within the sliding window, oldest first.
    pub restart_window: VecDeque<u64>,
}

impl WorkerRuntime {
    pub fn new(spec: WorkerSpawnSpec, child: Child, now_ms: u64) -> Self {
        let pid = child.id();
        Self {
            spec,
            child: Some(child),
            pid,
            state: SupervisedState::Starting,
            last_heartbeat_ms: now_ms,
            missed_heartbeat_count: 0,
            restart_count: 0,
            disabled: false,
            restart_window: VecDeque::new(),
        }
    }
}
