// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `run_swarm` — boots the process supervisor over a set of agent ids
//! (`spec.md` §6). Each supervised worker is this same binary,
//! re-invoked with a hidden `--worker-entry` flag; that single-binary
//! pattern keeps the supervisor's spawn spec trivial (`program` is
//! always `current_exe()`) and avoids shipping a second executable
//! whose only job is running one `WorkerLoop`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fabric_core::{Result as FabricResult, WorkerId};
use fabric_gateway::{Allowlist, ToolGateway, WorkspaceManager};
use fabric_storage::Mailstore;
use fabric_supervisor::{Supervisor, SupervisorConfig, WorkerSpawnSpec};
use fabric_worker::{NoopHandler, WorkerConfig, WorkerLoop};
use tracing::error;

/// Supervises one worker subprocess per agent id, or — when invoked
/// with `--worker-entry` — runs as that single worker itself.
#[derive(Parser, Debug)]
#[command(name = "run_swarm", about = "Supervise a set of agent worker subprocesses over a durable event substrate")]
struct Args {
    /// Agent ids to supervise, one worker subprocess per id.
    #[arg(long, num_args = 0..)]
    agents: Vec<String>,

    /// Path to the mailstore's SQLite database.
    #[arg(long, default_value = "mailstore.db")]
    mailstore_db: PathBuf,

    /// Repository root under which `workspaces/<agent_id>` is provisioned.
    #[arg(long, default_value = ".")]
    workspaces_root: PathBuf,

    /// Exit automatically after this many seconds (omit to run until
    /// a termination signal arrives).
    #[arg(long)]
    duration_seconds: Option<u64>,

    /// Lease duration, in seconds, each worker requests on claim.
    #[arg(long, default_value_t = 30)]
    lease_seconds: u64,

    /// Supervisor heartbeat-check cadence `H`, in seconds (`spec.md` §4.5).
    #[arg(long, default_value_t = 5)]
    heartbeat_seconds: u64,

    /// Reuse an existing mailstore database rather than starting from
    /// an empty one. The mailstore is always durable once opened; this
    /// only controls whether a prior run's file is discarded first.
    #[arg(long)]
    durable: bool,

    /// Provision an isolated workspace directory per agent up front.
    #[arg(long)]
    worktrees: bool,

    /// JSONL log path (the supervisor's own log; each worker logs to
    /// `<agent_id>.log` next to it).
    #[arg(long, default_value = "run_swarm.log")]
    log_path: PathBuf,

    /// Hidden re-entry flag: when present, this process is a single
    /// worker subprocess for the named agent, not the supervisor.
    #[arg(long, hide = true)]
    worker_entry: Option<String>,

    /// Consumer id the worker-entry process claims events under.
    #[arg(long, hide = true)]
    consumer_id: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = match fabric_cli::init_logging(&args.log_path) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("failed to initialize logging: {err}");
            return ExitCode::FAILURE;
        }
    };

    let result = match &args.worker_entry {
        Some(agent_id) => run_worker(&args, agent_id).await,
        None => run_supervisor(&args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "run_swarm exited with error");
            ExitCode::FAILURE
        }
    }
}

/// Runs as the single supervised worker for `agent_id`, per `spec.md`
/// §4.4. Agent-specific business logic is out of scope for this
/// fabric (`spec.md` §1): the worker acks every claimed event through
/// [`NoopHandler`], which still exercises the full claim/gateway/ack
/// loop and heartbeat cadence.
async fn run_worker(args: &Args, agent_id: &str) -> FabricResult<()> {
    let mailstore = Arc::new(Mailstore::open(&args.mailstore_db)?);
    let workspace_manager = Arc::new(WorkspaceManager::new(args.workspaces_root.clone()));
    let worktree = workspace_manager.ensure_workspace(&WorkerId::new(agent_id)).map_err(|err| {
        fabric_core::FabricError::Fatal(format!("provision workspace for {agent_id}: {err}"))
    })?;
    let gateway = Arc::new(ToolGateway::new(
        Arc::clone(&mailstore),
        workspace_manager,
        Allowlist::default(),
    ));

    let consumer_id = args
        .consumer_id
        .clone()
        .unwrap_or_else(|| format!("{agent_id}-{}", nanoid::nanoid!(8)));

    // §4.4: the worker's heartbeat cadence must be at most half the
    // supervisor's heartbeat-check interval.
    let heartbeat_interval =
        Duration::from_millis((args.heartbeat_seconds * 1000 / 2).max(500));

    let config = WorkerConfig {
        agent_id: agent_id.to_string(),
        db_path: args.mailstore_db.clone(),
        worktree,
        consumer_id,
        log_path: args.log_path.with_file_name(format!("{agent_id}.log")),
        lease_seconds: args.lease_seconds,
        heartbeat_interval,
        poll_interval: Duration::from_millis(200),
    };

    let worker = WorkerLoop::new(config, mailstore, gateway, Arc::new(NoopHandler));
    let cancel = fabric_cli::wait_for_termination();
    worker.run(cancel).await
}

/// Runs as the supervisor: spawns one worker subprocess per agent,
/// waits for either a termination signal or `--duration-seconds`, then
/// drains the supervisor's heartbeat-check loop until shutdown
/// completes (`spec.md` §4.5).
async fn run_supervisor(args: &Args) -> FabricResult<()> {
    if !args.durable && args.mailstore_db.exists() {
        std::fs::remove_file(&args.mailstore_db).map_err(|err| {
            fabric_core::FabricError::Fatal(format!(
                "clear non-durable mailstore {}: {err}",
                args.mailstore_db.display()
            ))
        })?;
    }

    let mailstore = Arc::new(Mailstore::open(&args.mailstore_db)?);

    if args.worktrees {
        let workspace_manager = WorkspaceManager::new(args.workspaces_root.clone());
        for agent_id in &args.agents {
            workspace_manager.ensure_workspace(&WorkerId::new(agent_id)).map_err(|err| {
                fabric_core::FabricError::Fatal(format!(
                    "provision workspace for {agent_id}: {err}"
                ))
            })?;
        }
    }

    let program = std::env::current_exe()
        .map_err(|err| fabric_core::FabricError::Fatal(format!("resolve current_exe: {err}")))?;

    let specs: Vec<WorkerSpawnSpec> = args
        .agents
        .iter()
        .map(|agent_id| WorkerSpawnSpec {
            agent_id: agent_id.clone(),
            program: program.clone(),
            args: vec![
                "--worker-entry".to_string(),
                agent_id.clone(),
                "--consumer-id".to_string(),
                format!("{agent_id}-{}", nanoid::nanoid!(8)),
                "--mailstore-db".to_string(),
                args.mailstore_db.display().to_string(),
                "--workspaces-root".to_string(),
                args.workspaces_root.display().to_string(),
                "--lease-seconds".to_string(),
                args.lease_seconds.to_string(),
                "--heartbeat-seconds".to_string(),
                args.heartbeat_seconds.to_string(),
                "--log-path".to_string(),
                args.log_path.display().to_string(),
            ],
        })
        .collect();

    let supervisor_config = SupervisorConfig {
        heartbeat_check_interval: Duration::from_secs(args.heartbeat_seconds),
        ..SupervisorConfig::default()
    };
    let supervisor = Arc::new(Supervisor::new(Arc::clone(&mailstore), supervisor_config));

    let (start_ts, start_ms) = fabric_cli::now_ts_pair();
    supervisor.start(specs, &start_ts, start_ms).await?;

    let cancel = fabric_cli::wait_for_termination();
    if let Some(duration) = args.duration_seconds {
        let cancel_for_timer = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(duration)).await;
            cancel_for_timer.cancel();
        });
    }

    supervisor.run(cancel, fabric_cli::now_ts_pair).await
}
