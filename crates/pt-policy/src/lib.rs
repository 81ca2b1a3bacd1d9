//! # pt-policy
//!
//! The permission manager: one instance per plugin, built from its
//! validated manifest.
//!
//! It answers two questions. [`PermissionManager::can_perform`] says
//! whether an action is pre-authorized by the manifest (forbidden actions,
//! granted permissions, governing-policy alignment, in that order).
//! [`PermissionManager::needs_consent`] says whether a permission requires
//! an explicit user decision. Consent requests and decisions are recorded
//! to a caller-supplied [`pt_audit::AuditSink`].

pub mod consent;
pub mod decision;
pub mod error;
pub mod manager;
pub mod matcher;
pub mod prompt;

pub use consent::{ConsentDecision, ConsentRequest, ConsentStatus};
pub use decision::{AccessDecision, DecisionRule, EvaluationStep, EvaluationTrace, Gate};
pub use error::PolicyError;
pub use manager::PermissionManager;
