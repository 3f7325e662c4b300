// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The projection materializer loop (`spec.md` §4.6): tails the
//! mailstore by strictly increasing id, folds deterministically, and
//! atomically publishes the view and inspection index.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fabric_core::Result;
use fabric_storage::Mailstore;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::fold::FoldState;
use crate::writer::write_atomic;

#[derive(Debug, Clone)]
pub struct ProjectorConfig {
    pub view_path: PathBuf,
    pub index_path: PathBuf,
    pub poll_interval: Duration,
    /// Max rows read from each of `list_events`/`list_tool_audit` per
    /// tick. The cursor advances within a tick until both streams are
    /// drained, so this only bounds memory per batch, not liveness.
    pub batch_limit: u32,
}

impl ProjectorConfig {
    pub fn new(view_path: impl Into<PathBuf>, index_path: impl Into<PathBuf>) -> Self {
        Self {
            view_path: view_path.into(),
            index_path: index_path.into(),
            poll_interval: Duration::from_millis(500),
            batch_limit: 1_000,
        }
    }
}

/// Reads the mailstore read-only and publishes the projection view and
/// inspection index. Never calls `claim`, `ack`, `fail`, or `publish` —
/// doing so would be a programming error (`spec.md` §4.6).
pub struct Projector {
    mailstore: Arc<Mailstore>,
    config: ProjectorConfig,
    state: FoldState,
}

impl Projector {
    pub fn new(mailstore: Arc<Mailstore>, config: ProjectorConfig) -> Self {
        Self { mailstore, config, state: FoldState::default() }
    }

    /// Runs one fold-and-publish tick against the current mailstore
    /// contents, draining both streams fully before writing. Returns
    /// the number of events and audits folded.
    pub fn tick(&mut self, timestamp: &str, running: bool) -> Result<(usize, usize)> {
        let mut total_events = 0usize;
        loop {
            let events = self.mailstore.list_events(self.state.last_seen_event_id, self.config.batch_limit)?;
            if events.is_empty() {
                break;
            }
            total_events += events.len();
            for event in &events {
                self.state.apply_event(event);
            }
            if (events.len() as u32) < self.config.batch_limit {
                break;
            }
        }

        let mut total_audits = 0usize;
        loop {
            let audits = self
                .mailstore
                .list_tool_audit(self.state.last_seen_tool_audit_id, self.config.batch_limit)?;
            if audits.is_empty() {
                break;
            }
            total_audits += audits.len();
            for audit in &audits {
                self.state.apply_audit(audit);
            }
            if (audits.len() as u32) < self.config.batch_limit {
                break;
            }
        }

        let queue_size = self.mailstore.count_pending()?;
        write_atomic(&self.config.view_path, &self.state.to_view(timestamp, running, queue_size))?;
        write_atomic(&self.config.index_path, &self.state.to_inspection_index())?;

        Ok((total_events, total_audits))
    }

    /// Runs until `cancel` fires, polling at `poll_interval`. Writes one
    /// final tick with `running=false` before returning, per the
    /// cancellation contract every long-running loop in this fabric
    /// shares (`spec.md` §5).
    pub async fn run(
        mut self,
        cancel: CancellationToken,
        now_ts_fn: impl Fn() -> String,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let ts = now_ts_fn();
                    self.tick(&ts, false)?;
                    info!("projector stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    let ts = now_ts_fn();
                    self.tick(&ts, true)?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn config(dir: &tempfile::TempDir) -> ProjectorConfig {
        let mut config = ProjectorConfig::new(dir.path().join("view.json"), dir.path().join("index.json"));
        config.batch_limit = 10;
        config
    }

    #[test]
    fn tick_writes_view_and_index_atomically() {
        let dir = tempdir().expect("tempdir");
        let mailstore = Arc::new(Mailstore::open_in_memory().expect("open mailstore"));
        mailstore
            .publish("SUPERVISOR_START", "supervisor", json!({}), None, None, "2026-01-01T00:00:00Z")
            .expect("publish");
        mailstore
            .publish(
                "WORKER_STARTED",
                "supervisor",
                json!({"agent_id": "forge"}),
                None,
                None,
                "2026-01-01T00:00:01Z",
            )
            .expect("publish");

        let mut projector = Projector::new(Arc::clone(&mailstore), config(&dir));
        let (events, audits) = projector.tick("2026-01-01T00:00:02Z", true).expect("tick");
        assert_eq!(events, 2);
        assert_eq!(audits, 0);

        let view_bytes = std::fs::read(dir.path().join("view.json")).expect("read view");
        let view: serde_json::Value = serde_json::from_slice(&view_bytes).expect("parse view");
        assert_eq!(view["last_seen_event_id"], 2);
        assert_eq!(view["workers"]["forge"]["state"], "ACTIVE");
        assert!(!dir.path().join("view.json.tmp").exists());

        let index_bytes = std::fs::read(dir.path().join("index.json")).expect("read index");
        let index: serde_json::Value = serde_json::from_slice(&index_bytes).expect("parse index");
        assert_eq!(index["workers"]["forge"]["timeline"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn second_tick_only_advances_from_cursor() {
        let dir = tempdir().expect("tempdir");
        let mailstore = Arc::new(Mailstore::open_in_memory().expect("open mailstore"));
        mailstore
            .publish("SUPERVISOR_HEARTBEAT", "supervisor", json!({}), None, None, "2026-01-01T00:00:00Z")
            .expect("publish");

        let mut projector = Projector::new(Arc::clone(&mailstore), config(&dir));
        projector.tick("2026-01-01T00:00:01Z", true).expect("tick 1");

        mailstore
            .publish("SUPERVISOR_HEARTBEAT", "supervisor", json!({}), None, None, "2026-01-01T00:00:02Z")
            .expect("publish");
        let (events, _) = projector.tick("2026-01-01T00:00:03Z", true).expect("tick 2");
        assert_eq!(events, 1);
        assert_eq!(projector.state.event_type_counts["SUPERVISOR_HEARTBEAT"], 2);
    }

    #[test]
    fn event_queue_size_tracks_live_pending_count_not_first_sighting() {
        let dir = tempdir().expect("tempdir");
        let mailstore = Arc::new(Mailstore::open_in_memory().expect("open mailstore"));
        let id = mailstore
            .publish("TASK_ASSIGNED", "chief", json!({}), Some("forge"), None, "2026-01-01T00:00:00Z")
            .expect("publish");

        let mut projector = Projector::new(Arc::clone(&mailstore), config(&dir));
        projector.tick("2026-01-01T00:00:01Z", true).expect("tick 1");
        let view: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("view.json")).unwrap()).unwrap();
        assert_eq!(view["event_queue_size"], 1);

        // Claimed and acked entirely between ticks: list_events never
        // surfaces a second row for this id, but the live count must
        // still reflect that it left PENDING.
        let claimed = mailstore.claim("c1", Some("forge"), 30, "2026-01-01T00:00:02Z", 2_000).unwrap().unwrap();
        assert_eq!(claimed.id, id);
        mailstore.ack(id, "c1", None).unwrap();

        projector.tick("2026-01-01T00:00:03Z", true).expect("tick 2");
        let view: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("view.json")).unwrap()).unwrap();
        assert_eq!(view["event_queue_size"], 0);
    }
}
