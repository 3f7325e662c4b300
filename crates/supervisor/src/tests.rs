// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fabric_storage::Mailstore;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::{Supervisor, SupervisorConfig, WorkerSpawnSpec};

fn sleep_spec(agent_id: &str, seconds: &str) -> WorkerSpawnSpec {
    WorkerSpawnSpec {
        agent_id: agent_id.to_string(),
        program: PathBuf::from("sleep"),
        args: vec![seconds.to_string()],
    }
}

#[tokio::test]
async fn start_emits_supervisor_start_then_worker_started_per_agent() {
    let mailstore = Arc::new(Mailstore::open_in_memory().expect("open mailstore"));
    let config = SupervisorConfig {
        startup_timeout: Duration::from_millis(50),
        shutdown_grace: Duration::from_millis(10),
        ..SupervisorConfig::default()
    };
    let supervisor = Arc::new(Supervisor::new(Arc::clone(&mailstore), config));

    supervisor
        .start(
            vec![sleep_spec("agent-1", "5"), sleep_spec("agent-2", "5")],
            "2026-01-01T00:00:00Z",
            1_000_000,
        )
        .await
        .expect("start");

    let events = mailstore.list_events(0, 10).expect("list events");
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types[0], "SUPERVISOR_START");
    assert_eq!(types.iter().filter(|t| **t == "WORKER_STARTED").count(), 2);

    supervisor.shutdown("2026-01-01T00:00:05Z").await.expect("shutdown");
}

#[tokio::test]
async fn missed_heartbeats_trigger_restart_scheduling() {
    let mailstore = Arc::new(Mailstore::open_in_memory().expect("open mailstore"));
    let config = SupervisorConfig {
        heartbeat_check_interval: Duration::from_millis(20),
        missed_heartbeat_threshold: 2,
        startup_timeout: Duration::from_millis(20),
        shutdown_grace: Duration::from_millis(10),
        ..SupervisorConfig::default()
    };
    let supervisor = Arc::new(Supervisor::new(Arc::clone(&mailstore), config));

    supervisor
        .start(vec![sleep_spec("agent-1", "5")], "2026-01-01T00:00:00Z", 0)
        .await
        .expect("start");

    let clock_ms = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let clock_for_loop = Arc::clone(&clock_ms);
    let now_ts_fn = move || {
        let ms = clock_for_loop.fetch_add(50, std::sync::atomic::Ordering::SeqCst) + 50;
        (format!("2026-01-01T00:00:{:02}Z", (ms / 1000).min(59)), ms)
    };

    let cancel = CancellationToken::new();
    let cancel_for_timeout = cancel.clone();
    let supervisor_for_run = Arc::clone(&supervisor);
    let handle = tokio::spawn(async move { supervisor_for_run.run(cancel, now_ts_fn).await });

    tokio::time::sleep(Duration::from_millis(150)).await;
    cancel_for_timeout.cancel();
    handle.await.expect("join").expect("run");

    let events = mailstore.list_events(0, 100).expect("list events");
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert!(types.contains(&"WORKER_HEARTBEAT_MISSED"));
    assert!(types.contains(&"WORKER_RESTART_SCHEDULED"));
}

#[tokio::test]
async fn heartbeat_resets_missed_count_and_keeps_worker_active() {
    let mailstore = Arc::new(Mailstore::open_in_memory().expect("open mailstore"));
    let config = SupervisorConfig {
        heartbeat_check_interval: Duration::from_millis(20),
        startup_timeout: Duration::from_millis(5),
        shutdown_grace: Duration::from_millis(10),
        ..SupervisorConfig::default()
    };
    let supervisor = Arc::new(Supervisor::new(Arc::clone(&mailstore), config));

    supervisor
        .start(vec![sleep_spec("agent-1", "5")], "2026-01-01T00:00:00Z", 0)
        .await
        .expect("start");

    let mailstore_for_heartbeats = Arc::clone(&mailstore);
    tokio::spawn(async move {
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(15)).await;
            let _ = mailstore_for_heartbeats.publish(
                "WORKER_HEARTBEAT",
                "agent-1",
                json!({}),
                None,
                None,
                "2026-01-01T00:00:00Z",
            );
        }
    });

    let clock_ms = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let clock_for_loop = Arc::clone(&clock_ms);
    let now_ts_fn = move || {
        let ms = clock_for_loop.fetch_add(20, std::sync::atomic::Ordering::SeqCst) + 20;
        (format!("2026-01-01T00:00:{:02}Z", (ms / 1000).min(59)), ms)
    };

    let cancel = CancellationToken::new();
    let cancel_for_timeout = cancel.clone();
    let supervisor_for_run = Arc::clone(&supervisor);
    let handle = tokio::spawn(async move { supervisor_for_run.run(cancel, now_ts_fn).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel_for_timeout.cancel();
    handle.await.expect("join").expect("run");

    let events = mailstore.list_events(0, 100).expect("list events");
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert!(!types.contains(&"WORKER_RESTART_SCHEDULED"));
}
