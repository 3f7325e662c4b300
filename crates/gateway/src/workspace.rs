// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-worker isolated working directories (`spec.md` §4.2).

use std::path::{Component, Path, PathBuf};

use fabric_core::WorkerId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("io error provisioning workspace: {0}")]
    Io(#[from] std::io::Error),

    /// The resolved absolute path of a requested target is not a
    /// descendant of the workspace root (`spec.md` §4.2, §8 scenario C).
    #[error("File path escapes worktree root.")]
    Escape,
}

/// Provisions `workspaces/<worker_id>` under a shared repository root
/// and refuses paths that escape that root via symlinks or `..`
/// components. Never shares mutable state between worker directories.
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create (if needed) and return the workspace directory for
    /// `worker_id`.
    pub fn ensure_workspace(&self, worker_id: &WorkerId) -> Result<PathBuf, WorkspaceError> {
        let dir = self.root.join("workspaces").join(worker_id.as_str());
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Resolve `requested` (absolute or relative to `workspace_root`)
    /// and return its canonical absolute path, refusing anything that
    /// escapes `workspace_root` — including via symlinks, since
    /// resolution canonicalizes the deepest existing ancestor before
    /// checking it is still beneath the root.
    pub fn resolve(
        &self,
        workspace_root: &Path,
        requested: &Path,
    ) -> Result<PathBuf, WorkspaceError> {
        let canonical_root = workspace_root.canonicalize()?;

        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            workspace_root.join(requested)
        };

        let resolved = canonicalize_lossy(&joined)?;

        if !resolved.starts_with(&canonical_root) {
            return Err(WorkspaceError::Escape);
        }
        Ok(resolved)
    }
}

/// Canonicalize `path`, tolerating a non-existent final component (the
/// common case of writing a new file): canonicalizes the deepest
/// existing ancestor, then lexically re-applies the remaining
/// components (rejecting any `..` among them, since a real `..` would
/// already have been resolved by canonicalizing an existing ancestor).
fn canonicalize_lossy(path: &Path) -> Result<PathBuf, std::io::Error> {
    let mut existing = path.to_path_buf();
    let mut remainder: Vec<Component<'_>> = Vec::new();

    loop {
        match existing.canonicalize() {
            Ok(canon) => {
                let mut result = canon;
                for component in remainder.into_iter().rev() {
                    match component {
                        Component::Normal(part) => result.push(part),
                        Component::ParentDir | Component::CurDir => {
                            // Any `..`/`.` left after stripping known
                            // trailing components is suspicious; treat
                            // it as part of the (non-canonical) path so
                            // the caller's ancestry check can reject it.
                            result.push(component.as_os_str());
                        }
                        _ => {}
                    }
                }
                return Ok(result);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let Some(last) = existing.components().last() else {
                    return Err(err);
                };
                remainder.push(last);
                if !existing.pop() {
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }
    }
}
