// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker runtime loop (`spec.md` §4.4).

use std::sync::Arc;

use chrono::DateTime;
use fabric_core::{Clock, FabricError, SystemClock};
use fabric_gateway::ToolGateway;
use fabric_storage::Mailstore;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::handler::{deterministic_seed, AgentHandler, Outcome};

pub struct WorkerLoop<C: Clock = SystemClock> {
    config: WorkerConfig,
    mailstore: Arc<Mailstore>,
    gateway: Arc<ToolGateway>,
    handler: Arc<dyn AgentHandler>,
    clock: C,
}

impl WorkerLoop<SystemClock> {
    pub fn new(
        config: WorkerConfig,
        mailstore: Arc<Mailstore>,
        gateway: Arc<ToolGateway>,
        handler: Arc<dyn AgentHandler>,
    ) -> Self {
        Self::with_clock(config, mailstore, gateway, handler, SystemClock)
    }
}

impl<C: Clock> WorkerLoop<C> {
    /// Builds a worker loop against an injected clock, so that heartbeat
    /// cadence and claim timestamps can be driven deterministically in
    /// tests rather than by wall-clock reads (`spec.md` §5).
    pub fn with_clock(
        config: WorkerConfig,
        mailstore: Arc<Mailstore>,
        gateway: Arc<ToolGateway>,
        handler: Arc<dyn AgentHandler>,
        clock: C,
    ) -> Self {
        Self { config, mailstore, gateway, handler, clock }
    }

    /// Runs until `cancel` is triggered. Responds to cancellation
    /// within one heartbeat period and, if a lease is held when
    /// cancellation arrives, fails it with `retry=true` before exiting
    /// (`spec.md` §5).
    pub async fn run(&self, cancel: CancellationToken) -> fabric_core::Result<()> {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(agent_id = %self.config.agent_id, "worker loop cancelled");
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    self.emit("WORKER_HEARTBEAT", json!({"agent_id": self.config.agent_id})).await?;
                }
                claimed = self.try_claim() => {
                    match claimed? {
                        Some(event) => {
                            self.process_claimed(event, &cancel).await?;
                        }
                        None => {
                            tokio::select! {
                                _ = cancel.cancelled() => return Ok(()),
                                _ = tokio::time::sleep(self.config.poll_interval) => {}
                            }
                        }
                    }
                }
            }
        }
    }

    fn rfc3339_now(&self) -> (String, u64) {
        let ms = self.clock.epoch_ms();
        let ts = DateTime::from_timestamp_millis(ms as i64)
            .unwrap_or_default()
            .to_rfc3339();
        (ts, ms)
    }

    async fn try_claim(&self) -> fabric_core::Result<Option<fabric_core::Event>> {
        let (ts, ms) = self.rfc3339_now();
        self.mailstore.claim(
            &self.config.consumer_id,
            Some(&self.config.agent_id),
            self.config.lease_seconds,
            &ts,
            ms,
        )
    }

    /// Processes one already-claimed event, handling cancellation
    /// mid-processing by failing with `retry=true` rather than leaving
    /// the lease to expire silently.
    async fn process_claimed(
        &self,
        event: fabric_core::Event,
        cancel: &CancellationToken,
    ) -> fabric_core::Result<()> {
        let event_id = event.id;
        let handler = Arc::clone(&self.handler);
        let gateway = Arc::clone(&self.gateway);
        let seed = deterministic_seed(&event);
        let event_for_handler = event.clone();

        let process = tokio::task::spawn_blocking(move || {
            handler.handle(&event_for_handler, &gateway, seed)
        });

        tokio::select! {
            _ = cancel.cancelled() => {
                warn!(event_id, "cancelled while processing; failing with retry");
                match self.mailstore.fail(event_id, &self.config.consumer_id, "worker cancelled", true) {
                    Ok(()) | Err(FabricError::LeaseLost { .. }) => {}
                    Err(err) => return Err(err),
                }
                Ok(())
            }
            outcome = process => {
                let outcome = outcome.map_err(|err| FabricError::TransientProcess(err.to_string()))?;
                self.finish(event_id, outcome)
            }
        }
    }

    fn finish(&self, event_id: i64, outcome: Outcome) -> fabric_core::Result<()> {
        match outcome {
            Outcome::Done(result) => {
                self.mailstore.ack(event_id, &self.config.consumer_id, result)?;
                info!(event_id, "event acked");
            }
            Outcome::Failed { error, retry } => {
                self.mailstore.fail(event_id, &self.config.consumer_id, &error, retry)?;
                error!(event_id, %error, retry, "event failed");
            }
        }
        Ok(())
    }

    async fn emit(&self, event_type: &str, payload: serde_json::Value) -> fabric_core::Result<()> {
        let (ts, _ms) = self.rfc3339_now();
        self.mailstore.publish(event_type, &self.config.agent_id, payload, None, None, &ts)?;
        Ok(())
    }
}
