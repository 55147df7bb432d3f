//! Audit trail for depot mutations.
//!
//! Every state-changing operation records exactly one audit entry. Sinks are
//! written to inside the event-store commit, so a sink failure aborts the
//! whole transaction rather than leaving an unaudited mutation behind.

pub mod entry;
pub mod sink;

pub use entry::{AuditEntry, Severity};
pub use sink::{AuditError, AuditSink, InMemoryAuditSink};
