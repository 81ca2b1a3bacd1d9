// decision.rs - Access decisions and their evaluation trace.

use serde::{Deserialize, Serialize};

/// Which rule of the evaluation order produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRule {
    /// The action matched a forbidden-action pattern.
    Forbidden,
    /// The permission is not in the manifest's granted set.
    NotGranted,
    /// The permission's risk needs policy alignment and the policy does not list it.
    PolicyConflict,
    /// Every check passed.
    Permitted,
}

/// Answer to "can this action run?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
    pub rule: DecisionRule,
}

impl AccessDecision {
    pub(crate) fn deny(rule: DecisionRule, reason: String) -> Self {
        Self {
            allowed: false,
            reason,
            rule,
        }
    }

    pub(crate) fn permit() -> Self {
        Self {
            allowed: true,
            reason: "Action permitted within declared boundaries".to_string(),
            rule: DecisionRule::Permitted,
        }
    }
}

/// One check performed while evaluating an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationStep {
    /// e.g. "forbidden_action", "permission_granted", "policy_alignment".
    pub check: String,
    /// e.g. "passed", "failed: matched 'send_data'".
    pub outcome: String,
    pub terminal: bool,
}

impl EvaluationStep {
    pub(crate) fn passed(check: &str, outcome: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            outcome: outcome.into(),
            terminal: false,
        }
    }

    pub(crate) fn failed(check: &str, outcome: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            outcome: outcome.into(),
            terminal: true,
        }
    }
}

/// The decision together with every check that led to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationTrace {
    pub decision: AccessDecision,
    pub steps: Vec<EvaluationStep>,
}

/// What the sandbox should do with an attempted action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    /// Proceed.
    Allow,
    /// Stop the execution with a violation.
    Deny { reason: String },
    /// Stop the execution and ask the user. `reason` says why consent is needed.
    NeedsConsent { reason: String },
}
