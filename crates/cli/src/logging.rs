// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSONL logging bootstrap shared by every binary in this crate,
//! mirroring the teacher daemon's `tracing-appender` +
//! `tracing-subscriber` pairing (`spec.md` §7 ambient stack).

use std::path::Path;

use fabric_core::{FabricError, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Installs a global JSONL subscriber writing to `log_path`. The
/// returned guard must be held for the lifetime of `main` — dropping
/// it flushes the non-blocking writer's buffered lines.
pub fn init_logging(log_path: &Path) -> Result<WorkerGuard> {
    let parent = log_path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        std::fs::create_dir_all(parent)
            .map_err(|err| FabricError::Fatal(format!("create log directory: {err}")))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|err| FabricError::Fatal(format!("open log file {}: {err}", log_path.display())))?;

    let (writer, guard) = tracing_appender::non_blocking(file);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_writer(writer)
        .with_env_filter(filter)
        .with_target(false)
        .init();

    Ok(guard)
}
