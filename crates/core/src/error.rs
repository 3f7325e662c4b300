// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared across the mailstore, gateway, worker,
//! supervisor, and projector.
//!
//! Propagation policy: `StorageError` and `Fatal` propagate to the
//! caller and end the process (a fresh process recovers cleanly from
//! the durable store). `LeaseLost`, `PolicyDenied`, and `DuplicateKey`
//! are recovered locally by the caller. `TransientProcess` is recovered
//! by the supervisor via restart. No variant is ever swallowed
//! silently.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FabricError {
    /// Durable storage I/O failure. Surfaced to the caller; the process
    /// should exit non-zero so a fresh process can recover from the
    /// durable store.
    #[error("storage error: {0}")]
    Storage(String),

    /// `ack`/`fail` attempted by a consumer that does not hold the
    /// current lease for the event.
    #[error("lease lost for event {event_id}: held by a different consumer")]
    LeaseLost { event_id: i64 },

    /// Tool gateway rejected an action.
    #[error("policy denied: {0}")]
    PolicyDenied(String),

    /// Idempotency key collision; a specialization of `PolicyDenied`.
    #[error("Duplicate idempotency_key blocked: {0}")]
    DuplicateKey(String),

    /// Subprocess failure recoverable by supervisor restart.
    #[error("transient process failure: {0}")]
    TransientProcess(String),

    /// Unrecoverable condition; the owning process should exit non-zero.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl FabricError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        FabricError::Storage(err.to_string())
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, FabricError::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, FabricError>;
