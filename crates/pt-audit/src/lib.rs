//! # pt-audit
//!
//! Audit trail for plugin permission checks, consent requests and
//! executions.
//!
//! Every entry is an [`AuditEvent`]. Entries go to an [`AuditSink`]
//! supplied by the caller: [`AuditLog`] writes a JSONL file whose lines are
//! linked by SHA-256 `previous_hash` values, [`MemoryAuditSink`] keeps them
//! in memory behind a shared handle.
//!
//! ```rust,no_run
//! use pt_audit::{AuditAction, AuditEvent, AuditLog, AuditSink};
//!
//! let mut log = AuditLog::open("/tmp/focus-keeper.audit.jsonl").unwrap();
//! let mut event = AuditEvent::new("focus-keeper", AuditAction::PermissionCheck)
//!     .with_permission("filesystem.read")
//!     .with_target("read_notes");
//! log.record(&mut event).unwrap();
//! ```

pub mod error;
pub mod event;
pub mod hasher;
pub mod log;
pub mod sink;

pub use error::AuditError;
pub use event::{AuditAction, AuditEvent};
pub use log::AuditLog;
pub use sink::{AuditSink, MemoryAuditSink};
