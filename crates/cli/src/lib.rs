// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! fabric-cli: the `run_swarm` and `run_projector` entry points
//! (`spec.md` §6), plus the logging bootstrap and shutdown-signal
//! wiring they share.

mod logging;
mod signal;

pub use logging::init_logging;
pub use signal::wait_for_termination;

/// Current wall-clock time as an RFC3339 string and epoch milliseconds,
/// the pair the supervisor's heartbeat-check loop and the worker loop's
/// event emissions both take as an injected clock source.
pub fn now_ts_pair() -> (String, u64) {
    let now = chrono::Utc::now();
    (now.to_rfc3339(), now.timestamp_millis().max(0) as u64)
}

pub fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}
