// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The tool gateway: the mandatory policy-enforcement point for every
//! externally visible worker action (`spec.md` §4.3).

use std::sync::Arc;

use fabric_core::Result;
use fabric_storage::{IdempotencyRegistration, Mailstore, PendingAudit};
use tracing::{info, warn};

use crate::policy::{evaluate_static_rules, ActionKind, ActionRequest, Allowlist, Verdict};
use crate::workspace::WorkspaceManager;

/// `{allowed, reason, audit_id}` — the contract every gateway call
/// returns (`spec.md` §4.3).
#[derive(Debug, Clone)]
pub struct GatewayOutcome {
    pub allowed: bool,
    pub reason: String,
    pub audit_id: i64,
}

pub struct ToolGateway {
    mailstore: Arc<Mailstore>,
    workspace_manager: Arc<WorkspaceManager>,
    allowlist: Allowlist,
}

impl ToolGateway {
    pub fn new(
        mailstore: Arc<Mailstore>,
        workspace_manager: Arc<WorkspaceManager>,
        allowlist: Allowlist,
    ) -> Self {
        Self { mailstore, workspace_manager, allowlist }
    }

    /// Adjudicate one action request. Always writes exactly one audit
    /// row, allowed or denied; registers the idempotency key in the
    /// same transaction only when the action is ultimately allowed.
    pub fn evaluate(&self, request: ActionRequest, now_ts: &str) -> Result<GatewayOutcome> {
        let mut verdict = evaluate_static_rules(&request, &self.allowlist);

        // Rule 2: workspace escape. Only meaningful for actions that
        // name a target path.
        if verdict == Verdict::Allow {
            if let Some(target) = &request.target_path {
                if let Err(err) = self
                    .workspace_manager
                    .resolve(&request.workspace_root, target)
                {
                    verdict = Verdict::Deny(err.to_string());
                }
            }
        }

        // Rule 3: idempotency-key collision. Checked (but not yet
        // registered) ahead of the audit write so the denial reason is
        // accurate; actually reserving the key happens atomically with
        // the audit write below.
        let idempotency_would_duplicate = if verdict == Verdict::Allow {
            match &request.idempotency_key {
                Some(key) => self.key_already_used(key)?,
                None => false,
            }
        } else {
            false
        };
        if idempotency_would_duplicate {
            let key = request.idempotency_key.clone().unwrap_or_default();
            verdict = Verdict::Deny(format!("Duplicate idempotency_key blocked: {key}"));
        }

        let (allowed, reason) = match &verdict {
            Verdict::Allow => (true, "ok".to_string()),
            Verdict::Deny(reason) => (false, reason.clone()),
        };

        let pending = PendingAudit {
            ts: now_ts.to_string(),
            agent_id: request.agent_id.clone(),
            action_type: request.action_kind.as_str().to_string(),
            working_dir: request.workspace_root.display().to_string(),
            idempotency_key: request.idempotency_key.clone(),
            allowed,
            reason: reason.clone(),
            payload: request.payload.clone(),
            result: None,
            correlation_id: request.correlation_id.clone(),
        };

        let idempotency_registration = if allowed {
            request.idempotency_key.as_deref().map(|key| IdempotencyRegistration {
                key,
                agent_id: request.agent_id.as_str(),
                action_type: request.action_kind.as_str(),
                event_id: request.event_id,
                result: None,
                now_ts,
            })
        } else {
            None
        };

        let audit_id = self.mailstore.record_tool_action(&pending, idempotency_registration)?;

        if allowed {
            info!(audit_id, agent_id = %request.agent_id, action = request.action_kind.as_str(), "action allowed");
        } else {
            warn!(audit_id, agent_id = %request.agent_id, action = request.action_kind.as_str(), %reason, "action denied");
        }

        Ok(GatewayOutcome { allowed, reason, audit_id })
    }

    fn key_already_used(&self, key: &str) -> Result<bool> {
        self.mailstore.idempotency_key_exists(key)
    }
}
