//! Audit Trail System
//!
//! Append-only, rotating log of every state-changing action, with optional
//! best-effort mirroring to a remote collector.

pub mod entry;
pub mod logger;
pub mod mirror;
pub mod report;
pub mod verify;

pub use entry::{actions, AuditEntry};
pub use logger::AuditTrail;
pub use mirror::{MirrorStats, RemoteMirror};
pub use report::AuditReport;
pub use verify::{load_audit_log_from_file, verify_audit_log_file, VerificationResult};
