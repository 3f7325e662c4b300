// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! fabric-projector: the read-only projection materializer (`spec.md`
//! §4.6) — folds the mailstore's event and tool-audit streams into a
//! deterministic view and inspection index, published atomically.

mod fold;
mod projector;
mod writer;

pub use fold::{FoldState, TIMELINE_CAP};
pub use projector::{Projector, ProjectorConfig};
pub use writer::write_atomic;
