// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The process supervisor: per-worker lifecycle, heartbeat liveness,
//! bounded-backoff restart, and graceful-then-forced shutdown
//! (`spec.md` §4.5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fabric_core::{FabricError, Result, SupervisedState};
use fabric_storage::Mailstore;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backoff::Backoff;
use crate::spawn::{spawn, WorkerSpawnSpec};
use crate::state::WorkerRuntime;

/// Tuning knobs for the heartbeat-check loop and the restart policy.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// `H` in `spec.md` §4.5: the fixed heartbeat-check cadence. A
    /// worker is considered to have missed a beat once
    /// `now - last_heartbeat_ms > 2H`.
    pub heartbeat_check_interval: Duration,
    /// Missed-heartbeat count that triggers a restart.
    pub missed_heartbeat_threshold: u32,
    pub backoff: Backoff,
    pub max_restarts_per_window: u32,
    pub restart_window: Duration,
    /// How long to wait after SIGTERM before escalating to SIGKILL.
    pub shutdown_grace: Duration,
    /// Bound on how long `start` waits for each worker's initial
    /// heartbeat before returning anyway.
    pub startup_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_check_interval: Duration::from_secs(5),
            missed_heartbeat_threshold: 2,
            backoff: Backoff::default(),
            max_restarts_per_window: 5,
            restart_window: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(10),
            startup_timeout: Duration::from_secs(5),
        }
    }
}

/// Spawns, heartbeats, restarts (bounded backoff), and drains workers
/// (`spec.md` §4.5).
pub struct Supervisor {
    mailstore: Arc<Mailstore>,
    config: SupervisorConfig,
    workers: Mutex<HashMap<String, WorkerRuntime>>,
}

impl Supervisor {
    pub fn new(mailstore: Arc<Mailstore>, config: SupervisorConfig) -> Self {
        Self { mailstore, config, workers: Mutex::new(HashMap::new()) }
    }

    /// `start(agents)`: spawn one subprocess per spec, emit
    /// `SUPERVISOR_START` and one `WORKER_STARTED` per worker. Returns
    /// only after every worker's initial heartbeat has landed, which is
    /// how `spec.md` §4.5's ordering guarantee is enforced — no claim by
    /// that worker can be ack'd before its `WORKER_STARTED` is durable.
    pub async fn start(
        &self,
        specs: Vec<WorkerSpawnSpec>,
        now_ts: &str,
        now_ms: u64,
    ) -> Result<()> {
        self.emit(
            "SUPERVISOR_START",
            json!({ "agents": specs.iter().map(|s| s.agent_id.clone()).collect::<Vec<_>>() }),
            now_ts,
        )?;

        let mut after_id = 0i64;
        for spec in specs {
            after_id = after_id.max(self.spawn_worker(spec, now_ts, now_ms)?);
        }

        self.await_initial_heartbeats(after_id, now_ms).await
    }

    fn spawn_worker(&self, spec: WorkerSpawnSpec, now_ts: &str, now_ms: u64) -> Result<i64> {
        let agent_id = spec.agent_id.clone();
        let child = spawn(&spec)
            .map_err(|err| FabricError::TransientProcess(format!("spawn {agent_id}: {err}")))?;
        let runtime = WorkerRuntime::new(spec, child, now_ms);
        self.workers.lock().insert(agent_id.clone(), runtime);

        let event_id = self.emit("WORKER_STARTED", json!({ "agent_id": agent_id }), now_ts)?;
        info!(agent_id, "worker spawned");
        Ok(event_id)
    }

    /// Polls the mailstore until every `Starting` worker has produced at
    /// least one `WORKER_HEARTBEAT`, or gives up after a bounded number
    /// of polls (a worker that never heartbeats is left `Starting` and
    /// will be caught by the next liveness check once `run` is driving
    /// the heartbeat-check loop).
    async fn await_initial_heartbeats(&self, mut after_id: i64, now_ms: u64) -> Result<()> {
        const POLL: Duration = Duration::from_millis(10);
        let deadline = tokio::time::Instant::now() + self.config.startup_timeout;
        loop {
            if self.all_workers_confirmed_started() || tokio::time::Instant::now() >= deadline {
                return Ok(());
            }
            let events = self.mailstore.list_events(after_id, 10_000)?;
            if let Some(last) = events.last() {
                after_id = last.id;
            }
            self.observe_heartbeats(&events, now_ms);
            if self.all_workers_confirmed_started() {
                return Ok(());
            }
            tokio::time::sleep(POLL).await;
        }
    }

    fn all_workers_confirmed_started(&self) -> bool {
        self.workers
            .lock()
            .values()
            .all(|w| w.state != SupervisedState::Starting || w.disabled)
    }

    /// Runs the heartbeat-check loop until `cancel` fires, then emits
    /// `SUPERVISOR_STOP` after shutting down every worker
    /// (`spec.md` §4.5, §5).
    pub async fn run(
        self: Arc<Self>,
        cancel: CancellationToken,
        now_ts_fn: impl Fn() -> (String, u64),
    ) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.heartbeat_check_interval);
        let mut after_id = 0i64;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let (ts, _ms) = now_ts_fn();
                    return self.shutdown(&ts).await;
                }
                _ = interval.tick() => {
                    let (ts, ms) = now_ts_fn();
                    let events = self.mailstore.list_events(after_id, 10_000)?;
                    if let Some(last) = events.last() {
                        after_id = last.id;
                    }
                    self.observe_heartbeats(&events, ms);
                    self.check_liveness(&self, ms, &ts)?;
                }
            }
        }
    }

    fn observe_heartbeats(&self, events: &[fabric_core::Event], now_ms: u64) {
        let mut workers = self.workers.lock();
        for event in events {
            if event.event_type != "WORKER_HEARTBEAT" {
                continue;
            }
            if let Some(w) = workers.get_mut(&event.origin_id) {
                w.last_heartbeat_ms = now_ms;
                w.missed_heartbeat_count = 0;
                if w.state == SupervisedState::Starting || w.state == SupervisedState::Restarting {
                    w.state = SupervisedState::Active;
                }
            }
        }
    }

    fn check_liveness(&self, arc_self: &Arc<Self>, now_ms: u64, now_ts: &str) -> Result<()> {
        let threshold_ms = 2 * self.config.heartbeat_check_interval.as_millis() as u64;
        let mut missed: Vec<String> = Vec::new();
        let mut to_restart: Vec<String> = Vec::new();

        {
            let mut workers = self.workers.lock();
            for (agent_id, w) in workers.iter_mut() {
                if w.disabled || w.state == SupervisedState::Stopped {
                    continue;
                }
                if now_ms.saturating_sub(w.last_heartbeat_ms) > threshold_ms {
                    w.missed_heartbeat_count += 1;
                    missed.push(agent_id.clone());
                    if w.missed_heartbeat_count >= self.config.missed_heartbeat_threshold
                        && w.state != SupervisedState::Restarting
                    {
                        w.state = SupervisedState::Restarting;
                        to_restart.push(agent_id.clone());
                    }
                }
            }
        }

        for agent_id in missed {
            self.emit("WORKER_HEARTBEAT_MISSED", json!({ "agent_id": agent_id }), now_ts)?;
        }
        for agent_id in to_restart {
            self.schedule_restart(arc_self, &agent_id, now_ms, now_ts)?;
        }
        Ok(())
    }

    fn schedule_restart(
        &self,
        arc_self: &Arc<Self>,
        agent_id: &str,
        now_ms: u64,
        now_ts: &str,
    ) -> Result<()> {
        self.emit("WORKER_RESTART_SCHEDULED", json!({ "agent_id": agent_id }), now_ts)?;

        let budget = {
            let mut workers = self.workers.lock();
            let Some(w) = workers.get_mut(agent_id) else {
                return Ok(());
            };
            while let Some(front) = w.restart_window.front() {
                if now_ms.saturating_sub(*front) > self.config.restart_window.as_millis() as u64 {
                    w.restart_window.pop_front();
                } else {
                    break;
                }
            }
            if w.restart_window.len() as u32 >= self.config.max_restarts_per_window {
                w.disabled = true;
                w.state = SupervisedState::Stopped;
                None
            } else {
                w.restart_window.push_back(now_ms);
                Some(w.restart_count)
            }
        };

        match budget {
            None => {
                warn!(agent_id, "restart budget exhausted, disabling worker");
                self.emit("WORKER_EXITED", json!({ "agent_id": agent_id }), now_ts)?;
            }
            Some(restart_count) => {
                let delay = self.config.backoff.delay_for(restart_count);
                let supervisor = Arc::clone(arc_self);
                let agent_id = agent_id.to_string();
                let now_ts = now_ts.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(err) = supervisor.restart_worker(&agent_id, &now_ts) {
                        warn!(agent_id, %err, "worker restart failed");
                    }
                });
            }
        }
        Ok(())
    }

    /// Kills the old process (if still alive) and respawns from the
    /// stored spec, emitting `WORKER_RESTARTED` with `restart_count`
    /// incremented (`spec.md` §3 projection derivation table).
    fn restart_worker(&self, agent_id: &str, now_ts: &str) -> Result<()> {
        let spec = {
            let mut workers = self.workers.lock();
            let Some(w) = workers.get_mut(agent_id) else {
                return Ok(());
            };
            if let Some(pid) = w.pid.take() {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
            w.spec.clone()
        };

        let child = spawn(&spec)
            .map_err(|err| FabricError::TransientProcess(format!("respawn {agent_id}: {err}")))?;
        let pid = child.id();

        {
            let mut workers = self.workers.lock();
            if let Some(w) = workers.get_mut(agent_id) {
                w.child = Some(child);
                w.pid = pid;
                w.restart_count += 1;
                w.missed_heartbeat_count = 0;
                w.state = SupervisedState::Active;
            }
        }

        self.emit("WORKER_RESTARTED", json!({ "agent_id": agent_id }), now_ts)?;
        info!(agent_id, "worker restarted");
        Ok(())
    }

    /// Clears a disabled worker's restart budget so the next missed
    /// heartbeat can schedule a restart again. The only way out of
    /// `disabled` per `spec.md` §4.5 ("no further restarts occur until
    /// a manual reset").
    pub fn reset(&self, agent_id: &str) {
        if let Some(w) = self.workers.lock().get_mut(agent_id) {
            w.disabled = false;
            w.restart_window.clear();
            w.missed_heartbeat_count = 0;
        }
    }

    /// Send `SIGTERM` to every tracked worker, wait up to
    /// `shutdown_grace`, then `SIGKILL` any still running, and emit
    /// `SUPERVISOR_STOP` (`spec.md` §4.5).
    pub async fn shutdown(&self, now_ts: &str) -> Result<()> {
        let pids: Vec<u32> = {
            let workers = self.workers.lock();
            workers.values().filter_map(|w| w.pid).collect()
        };
        for pid in &pids {
            let _ = kill(Pid::from_raw(*pid as i32), Signal::SIGTERM);
        }

        tokio::time::sleep(self.config.shutdown_grace).await;

        for pid in &pids {
            let _ = kill(Pid::from_raw(*pid as i32), Signal::SIGKILL);
        }

        {
            let mut workers = self.workers.lock();
            for w in workers.values_mut() {
                w.state = SupervisedState::Stopped;
                w.pid = None;
            }
        }

        self.emit("SUPERVISOR_STOP", json!({}), now_ts)?;
        info!("supervisor stopped");
        Ok(())
    }

    fn emit(&self, event_type: &str, payload: serde_json::Value, now_ts: &str) -> Result<i64> {
        self.mailstore.publish(event_type, "supervisor", payload, None, None, now_ts)
    }
}
