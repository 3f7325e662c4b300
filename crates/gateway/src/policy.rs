// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Policy rules adjudicated by the tool gateway (`spec.md` §4.3).

use std::path::PathBuf;

use serde_json::Value;

/// Kind of externally visible action a worker may attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    WriteFile,
    RunCommand,
    OutboundRequest,
    /// Catch-all for any kind the gateway does not recognize. The
    /// gateway is strict: unknown kinds are always denied, never
    /// silently ignored (`spec.md` §4.3).
    Unknown(String),
}

impl ActionKind {
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::WriteFile => "WRITE_FILE",
            ActionKind::RunCommand => "RUN_CMD",
            ActionKind::OutboundRequest => "HTTP_REQUEST",
            ActionKind::Unknown(kind) => kind,
        }
    }

    /// Whether this kind mutates state outside the caller's own
    /// process (file writes outside the workspace, command execution,
    /// outbound requests all count; nothing in this gateway is
    /// considered a pure read).
    pub fn is_mutating_external(&self) -> bool {
        !matches!(self, ActionKind::Unknown(_))
    }
}

/// A request to perform an externally visible action, submitted to
/// the tool gateway for adjudication.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub agent_id: String,
    pub action_kind: ActionKind,
    /// The caller's own workspace root (post [`crate::WorkspaceManager::ensure_workspace`]).
    pub workspace_root: PathBuf,
    /// Target path for file-writing actions, relative or absolute.
    pub target_path: Option<PathBuf>,
    /// Target endpoint (host or URL) for outbound-request actions.
    pub endpoint: Option<String>,
    pub idempotency_key: Option<String>,
    /// Whether the caller presents the Chief-authorization capability
    /// for this decision. Required for every mutating external action.
    pub authorized: bool,
    pub payload: Value,
    pub correlation_id: Option<String>,
    pub event_id: Option<i64>,
}

/// Decision the gateway makes before even consulting the mailstore for
/// idempotency or writing the audit row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(String),
}

/// Endpoint allowlist, enabled per `ActionKind`. An empty allowlist for
/// a kind means the kind is not allowlist-gated at all (rule 4 of
/// `spec.md` §4.3 only fires "if the allowlist is enabled for this
/// action kind").
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    enabled_for: Vec<ActionKind>,
    endpoints: Vec<String>,
}

impl Allowlist {
    pub fn new(enabled_for: Vec<ActionKind>, endpoints: Vec<String>) -> Self {
        Self { enabled_for, endpoints }
    }

    fn is_enabled_for(&self, kind: &ActionKind) -> bool {
        self.enabled_for.contains(kind)
    }

    fn permits(&self, endpoint: &str) -> bool {
        self.endpoints.iter().any(|allowed| allowed == endpoint)
    }
}

/// Evaluate rules 1, 3, and 4 of `spec.md` §4.3. Rule 2 (workspace
/// escape) and the strictness rule (unknown kinds) are folded in here
/// too; only the idempotency-key *lookup itself* is deferred to the
/// gateway, since that requires the mailstore.
pub fn evaluate_static_rules(request: &ActionRequest, allowlist: &Allowlist) -> Verdict {
    if let ActionKind::Unknown(kind) = &request.action_kind {
        return Verdict::Deny(format!("Unknown action kind: {kind}"));
    }

    if request.action_kind.is_mutating_external() && !request.authorized {
        return Verdict::Deny("Action requires Chief authorization.".to_string());
    }

    if allowlist.is_enabled_for(&request.action_kind) {
        match &request.endpoint {
            Some(endpoint) if allowlist.permits(endpoint) => {}
            Some(endpoint) => {
                return Verdict::Deny(format!("Endpoint not in allowlist: {endpoint}"));
            }
            None => {}
        }
    }

    Verdict::Allow
}
