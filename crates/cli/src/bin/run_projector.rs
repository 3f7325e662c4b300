// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `run_projector` — the projection materializer entry point
//! (`spec.md` §6): tails the mailstore read-only and atomically
//! publishes the projection view and inspection index until
//! terminated.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fabric_storage::Mailstore;
use tracing::error;

/// Runs the projection materializer loop against a durable mailstore.
#[derive(Parser, Debug)]
#[command(name = "run_projector", about = "Materialize the event/tool-audit streams into a read-only projection")]
struct Args {
    /// Path to the mailstore's SQLite database.
    #[arg(long)]
    mailstore_db: PathBuf,

    /// Path the projection view JSON document is atomically written to.
    #[arg(long)]
    view_path: PathBuf,

    /// Path the inspection index JSON document is atomically written to.
    #[arg(long, default_value = "inspection_index.json")]
    index_path: PathBuf,

    /// Poll interval between fold ticks, in milliseconds.
    #[arg(long, default_value_t = 500)]
    poll_interval_ms: u64,

    /// Max rows read per `list_events`/`list_tool_audit` call per tick.
    #[arg(long, default_value_t = 1_000)]
    batch_limit: u32,

    /// JSONL log path.
    #[arg(long, default_value = "run_projector.log")]
    log_path: PathBuf,
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

    let mailstore = match Mailstore::open(&args.mailstore_db) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(%err, "failed to open mailstore");
            return ExitCode::FAILURE;
        }
    };

    let mut config =
        fabric_projector::ProjectorConfig::new(args.view_path.clone(), args.index_path.clone());
    config.poll_interval = Duration::from_millis(args.poll_interval_ms);
    config.batch_limit = args.batch_limit;

    let projector = fabric_projector::Projector::new(mailstore, config);
    let cancel = fabric_cli::wait_for_termination();

    match projector.run(cancel, fabric_cli::now_ts).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "projector exited with error");
            ExitCode::FAILURE
        }
    }
}
