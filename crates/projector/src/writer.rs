// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic write-to-temp-then-rename for the view and inspection index
//! files (`spec.md` §4.6, §6).

use std::path::Path;

use fabric_core::{FabricError, Result};
use serde::Serialize;

/// Serializes `value` as canonical JSON and atomically replaces the
/// file at `path`. Canonical here means what `serde_json` already
/// gives us for `BTreeMap`-backed structs: sorted keys, no float
/// nondeterminism beyond what the value itself carries.
pub fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);
    let json = serde_json::to_vec_pretty(value)
        .map_err(|err| FabricError::Fatal(format!("serialize projection output: {err}")))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            FabricError::Storage(format!("create projection output dir: {err}"))
        })?;
    }
    std::fs::write(&tmp_path, &json)
        .map_err(|err| FabricError::Storage(format!("write {}: {err}", tmp_path.display())))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|err| FabricError::Storage(format!("rename onto {}: {err}", path.display())))?;
    Ok(())
}
