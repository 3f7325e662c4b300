// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fabric-core: shared data model, ids, clock, and error taxonomy for
//! the durable event substrate and supervised worker fabric.

pub mod clock;
pub mod error;
pub mod event;
pub mod projection;
pub mod worker;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, FakeClock, SystemClock};
pub use error::{FabricError, Result};
pub use event::{
    Event, EventStatus, IdempotencyOutcome, IdempotencyRecord, Lease, ToolAuditEntry,
    MAX_RETRY_ATTEMPTS,
};
pub use projection::{
    CurrentEvent, Derived, InspectionIndex, OfficeMode, ProjectionView, TimelineEntry,
    ToolAuditCounts, WorkerEntity, WorkerView, SCHEMA_VERSION,
};
pub use worker::{ConsumerId, SupervisedState, WorkerId, WorkerState};
