// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker and consumer identifiers.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Identifier for a supervised worker (one per agent id in `run_swarm`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for WorkerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Identifier for the claimer of an event lease. Distinct from
/// `WorkerId` because multiple consumer instances (e.g. across a
/// worker restart) may share one worker id over time while each
/// holds its own leases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerId(pub String);

impl ConsumerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConsumerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConsumerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Worker state as tracked by the projection (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Idle,
    Active,
    Restarting,
    Offline,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "IDLE",
            WorkerState::Active => "ACTIVE",
            WorkerState::Restarting => "RESTARTING",
            WorkerState::Offline => "OFFLINE",
        }
    }
}

/// Worker state as tracked by the process supervisor (`spec.md` §4.5).
///
/// Distinct from [`WorkerState`]: this is the supervisor's own
/// bookkeeping (subprocess lifecycle), while `WorkerState` is the
/// projection's read-only derivation from the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisedState {
    Starting,
    Active,
    Restarting,
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_borrows_as_str_for_map_lookups() {
        use std::collections::HashMap;
        let mut map: HashMap<WorkerId, i32> = HashMap::new();
        map.insert(WorkerId::new("forge"), 1);
        assert_eq!(map.get("forge"), Some(&1));
    }
}
