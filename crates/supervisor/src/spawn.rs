// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker subprocess spawning.

use std::path::PathBuf;

use tokio::process::{Child, Command};

/// What to execute for one supervised worker. `run_swarm` fills this in
/// with the current binary re-invoked under a hidden `--worker-entry`
/// flag (`spec.md` §6); tests substitute arbitrary commands.
#[derive(Debug, Clone)]
pub struct WorkerSpawnSpec {
    pub agent_id: String,
    pub program: PathBuf,
    pub args: Vec<String>,
}

pub(crate) fn spawn(spec: &WorkerSpawnSpec) -> std::io::Result<Child> {
    Command::new(&spec.program)
        .args(&spec.args)
        .kill_on_drop(false)
        .spawn()
}
