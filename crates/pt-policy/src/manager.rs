// manager.rs - Per-plugin permission manager.
//
// `can_perform` evaluates, first failing rule wins:
//
// 1. Does the action match a forbidden-action pattern? → Deny
// 2. Is the permission missing from the manifest's granted set? → Deny
// 3. Is the permission Medium risk or above and not listed in the
//    governing policy's allow-table? → Deny
// 4. Otherwise → Allow
//
// `gate` is what the sandbox calls before an action actually happens. It
// turns rules 1 and 2 into hard denials. A rule-3 denial is a permission
// the manifest asked for but the policy does not pre-clear; that is
// exactly what consent exists for, so it becomes `NeedsConsent` unless a
// cached decision already answers it. High-risk permissions always need
// consent.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::Utc;
use pt_audit::{AuditAction, AuditEvent, AuditSink};
use pt_manifest::{GoverningPolicy, Manifest, Permission, RiskLevel};
use serde_json::json;
use uuid::Uuid;

use crate::consent::{ConsentDecision, ConsentRequest, ConsentStatus};
use crate::decision::{AccessDecision, DecisionRule, EvaluationStep, EvaluationTrace, Gate};
use crate::error::PolicyError;
use crate::matcher::ForbiddenPattern;

type ConsentKey = (Permission, String);

/// Holds one plugin's granted permissions, boundaries and consent state.
pub struct PermissionManager {
    plugin_id: String,
    policy: GoverningPolicy,
    promise: String,
    granted: BTreeSet<Permission>,
    forbidden: Vec<ForbiddenPattern>,
    /// Remembered decisions, keyed by (permission, action).
    remembered: HashMap<ConsentKey, ConsentDecision>,
    /// Grants given without `remember`: each covers exactly one use.
    single_use: HashSet<ConsentKey>,
    /// Requests handed out and not yet answered.
    pending: HashMap<Uuid, ConsentRequest>,
    request_counts: BTreeMap<Permission, usize>,
    checks: usize,
    audit: Box<dyn AuditSink>,
}

impl PermissionManager {
    pub fn new(manifest: &Manifest, audit: Box<dyn AuditSink>) -> Self {
        Self {
            plugin_id: manifest.id().to_string(),
            policy: manifest.governing_policy(),
            promise: manifest.policy.sacred_promise.clone(),
            granted: manifest.granted_permissions(),
            forbidden: manifest
                .boundaries
                .forbidden_actions
                .iter()
                .map(ForbiddenPattern::new)
                .collect(),
            remembered: HashMap::new(),
            single_use: HashSet::new(),
            pending: HashMap::new(),
            request_counts: BTreeMap::new(),
            checks: 0,
            audit,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn policy(&self) -> GoverningPolicy {
        self.policy
    }

    pub fn promise(&self) -> &str {
        &self.promise
    }

    pub fn granted(&self) -> &BTreeSet<Permission> {
        &self.granted
    }

    pub fn forbidden_patterns(&self) -> impl Iterator<Item = &str> {
        self.forbidden.iter().map(|p| p.as_str())
    }

    /// Can this action run under the manifest alone?
    pub fn can_perform(&self, action: &str, permission: Permission) -> AccessDecision {
        self.evaluate_with_trace(action, permission).decision
    }

    /// Like `can_perform`, but returns every check that was made.
    pub fn evaluate_with_trace(&self, action: &str, permission: Permission) -> EvaluationTrace {
        let mut steps = Vec::new();

        if let Some(pattern) = self.forbidden.iter().find(|p| p.matches(action)) {
            steps.push(EvaluationStep::failed(
                "forbidden_action",
                format!("failed: matched '{}'", pattern.as_str()),
            ));
            return EvaluationTrace {
                decision: AccessDecision::deny(
                    DecisionRule::Forbidden,
                    format!("Action '{action}' is explicitly forbidden by plugin boundaries"),
                ),
                steps,
            };
        }
        steps.push(EvaluationStep::passed(
            "forbidden_action",
            format!("passed: {} pattern(s) checked", self.forbidden.len()),
        ));

        if !self.granted.contains(&permission) {
            steps.push(EvaluationStep::failed(
                "permission_granted",
                format!("failed: '{permission}' not in manifest"),
            ));
            return EvaluationTrace {
                decision: AccessDecision::deny(
                    DecisionRule::NotGranted,
                    format!("Plugin lacks permission '{permission}' for action '{action}'"),
                ),
                steps,
            };
        }
        steps.push(EvaluationStep::passed("permission_granted", "passed"));

        if !self.is_aligned(permission) {
            steps.push(EvaluationStep::failed(
                "policy_alignment",
                format!(
                    "failed: {} risk, not allowed by '{}'",
                    permission.risk_level(),
                    self.policy
                ),
            ));
            return EvaluationTrace {
                decision: AccessDecision::deny(
                    DecisionRule::PolicyConflict,
                    format!(
                        "Permission '{permission}' conflicts with governing policy '{}'",
                        self.policy
                    ),
                ),
                steps,
            };
        }
        steps.push(EvaluationStep::passed(
            "policy_alignment",
            format!("passed: {} risk", permission.risk_level()),
        ));

        EvaluationTrace {
            decision: AccessDecision::permit(),
            steps,
        }
    }

    /// `can_perform` plus an audit entry for the check.
    pub fn authorize(
        &mut self,
        action: &str,
        permission: Permission,
    ) -> Result<AccessDecision, PolicyError> {
        let trace = self.evaluate_with_trace(action, permission);
        self.checks += 1;
        let mut event = AuditEvent::new(&self.plugin_id, AuditAction::PermissionCheck)
            .with_permission(permission.as_str())
            .with_target(action)
            .with_metadata(json!({
                "allowed": trace.decision.allowed,
                "reason": trace.decision.reason,
                "rule": trace.decision.rule,
                "steps": trace.steps,
            }));
        self.write_audit(&mut event)?;
        if !trace.decision.allowed {
            tracing::info!(
                plugin_id = %self.plugin_id,
                %permission,
                action,
                reason = %trace.decision.reason,
                "permission check denied"
            );
        }
        Ok(trace.decision)
    }

    /// Does this permission require an explicit user decision?
    ///
    /// High and Critical always do. Medium does unless the manifest grants
    /// it and the governing policy allows it. Low and Minimal never do.
    pub fn needs_consent(&self, permission: Permission) -> bool {
        match permission.risk_level() {
            RiskLevel::High | RiskLevel::Critical => true,
            RiskLevel::Medium => {
                !(self.granted.contains(&permission) && self.policy.allows(permission))
            }
            RiskLevel::Low | RiskLevel::Minimal => false,
        }
    }

    /// Consent state of one (permission, action) pair.
    pub fn consent_status(&self, permission: Permission, action: &str) -> ConsentStatus {
        let key = (permission, action.to_string());
        if let Some(decision) = self.remembered.get(&key) {
            if !decision.is_expired_at(Utc::now()) {
                return if decision.granted {
                    ConsentStatus::Granted
                } else {
                    ConsentStatus::Denied
                };
            }
        }
        if self.single_use.contains(&key) {
            return ConsentStatus::Granted;
        }
        if self.needs_consent(permission) {
            ConsentStatus::Required
        } else {
            ConsentStatus::NotRequired
        }
    }

    /// True unless a grant or the risk table already settles the pair.
    /// A remembered denial keeps this true until a fresh decision replaces it.
    pub fn needs_consent_for(&self, permission: Permission, action: &str) -> bool {
        matches!(
            self.consent_status(permission, action),
            ConsentStatus::Required | ConsentStatus::Denied
        )
    }

    /// Decide what the sandbox does with an attempted action. Consumes a
    /// single-use grant when one is used.
    pub fn gate(&mut self, action: &str, permission: Permission) -> Result<Gate, PolicyError> {
        let decision = self.authorize(action, permission)?;
        let consent_eligible = match decision.rule {
            DecisionRule::Forbidden | DecisionRule::NotGranted => {
                return Ok(Gate::Deny {
                    reason: decision.reason,
                })
            }
            DecisionRule::PolicyConflict => true,
            DecisionRule::Permitted => self.needs_consent(permission),
        };
        if !consent_eligible {
            return Ok(Gate::Allow);
        }

        self.purge_expired(permission, action);
        match self.consent_status(permission, action) {
            ConsentStatus::Granted => {
                self.single_use.remove(&(permission, action.to_string()));
                Ok(Gate::Allow)
            }
            ConsentStatus::Denied => Ok(Gate::Deny {
                reason: format!(
                    "User declined permission '{permission}' for action '{action}'"
                ),
            }),
            ConsentStatus::Required | ConsentStatus::NotRequired => Ok(Gate::NeedsConsent {
                reason: if decision.allowed {
                    format!("Permission '{permission}' is {} risk", permission.risk_level())
                } else {
                    decision.reason
                },
            }),
        }
    }

    /// Create a consent request. Always recorded, whatever happens next.
    pub fn request_permission(
        &mut self,
        action: &str,
        permission: Permission,
        context: BTreeMap<String, serde_json::Value>,
    ) -> Result<ConsentRequest, PolicyError> {
        let request = ConsentRequest::new(&self.plugin_id, permission, action, context);
        *self.request_counts.entry(permission).or_default() += 1;

        let mut event = AuditEvent::new(&self.plugin_id, AuditAction::ConsentRequested)
            .with_permission(permission.as_str())
            .with_target(action)
            .with_request(request.request_id)
            .with_metadata(json!({
                "risk": permission.risk_level(),
                "context": request.context,
            }));
        self.write_audit(&mut event)?;

        tracing::info!(
            plugin_id = %self.plugin_id,
            %permission,
            action,
            request_id = %request.request_id,
            "consent requested"
        );
        self.pending.insert(request.request_id, request.clone());
        Ok(request)
    }

    /// Record the user's answer to a request.
    ///
    /// A remembered decision is cached for the pair. A one-off grant covers
    /// the next use only. A fresh decision replaces whatever was cached for
    /// the pair before, including a remembered denial.
    pub fn record_consent(
        &mut self,
        request: &ConsentRequest,
        decision: ConsentDecision,
    ) -> Result<(), PolicyError> {
        if request.plugin_id != self.plugin_id {
            return Err(PolicyError::ForeignRequest {
                request_id: request.request_id,
                owner: request.plugin_id.clone(),
                plugin_id: self.plugin_id.clone(),
            });
        }
        self.pending.remove(&request.request_id);

        let mut event = AuditEvent::new(&self.plugin_id, AuditAction::ConsentDecision)
            .with_permission(request.permission.as_str())
            .with_target(&request.action)
            .with_request(request.request_id)
            .with_metadata(json!({
                "granted": decision.granted,
                "remember": decision.remember,
                "duration_minutes": decision.duration_minutes,
                "reason": decision.reason,
            }));
        self.write_audit(&mut event)?;

        let key = (request.permission, request.action.clone());
        self.single_use.remove(&key);
        self.remembered.remove(&key);
        if decision.remember {
            self.remembered.insert(key, decision);
        } else if decision.granted {
            self.single_use.insert(key);
        }
        Ok(())
    }

    /// Requests handed out and not yet answered.
    pub fn pending_requests(&self) -> impl Iterator<Item = &ConsentRequest> {
        self.pending.values()
    }

    pub fn request_counts(&self) -> &BTreeMap<Permission, usize> {
        &self.request_counts
    }

    /// Number of audited permission checks so far.
    pub fn checks_performed(&self) -> usize {
        self.checks
    }

    /// Record a sandbox-level event (execution, violation, cancellation).
    pub fn audit(&mut self, mut event: AuditEvent) -> Result<(), PolicyError> {
        self.write_audit(&mut event)
    }

    fn is_aligned(&self, permission: Permission) -> bool {
        permission.risk_level() < RiskLevel::Medium || self.policy.allows(permission)
    }

    fn purge_expired(&mut self, permission: Permission, action: &str) {
        let key = (permission, action.to_string());
        let expired = self
            .remembered
            .get(&key)
            .map_or(false, |d| d.is_expired_at(Utc::now()));
        if expired {
            tracing::debug!(plugin_id = %self.plugin_id, %permission, action, "remembered consent expired");
            self.remembered.remove(&key);
        }
    }

    fn write_audit(&mut self, event: &mut AuditEvent) -> Result<(), PolicyError> {
        self.audit.record(event).map_err(|source| PolicyError::Audit {
            plugin_id: self.plugin_id.clone(),
            source,
        })
    }
}
