// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shutdown-signal wiring shared by every binary: both Ctrl-C and
//! `SIGTERM` (the signal the supervisor itself sends worker
//! subprocesses) cancel the same token.

use tokio_util::sync::CancellationToken;

/// Returns a token that cancels on the first of Ctrl-C or `SIGTERM`.
pub fn wait_for_termination() -> CancellationToken {
    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(_) => {
                    let _ = ctrl_c.await;
                    watcher.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        watcher.cancel();
    });
    cancel
}
