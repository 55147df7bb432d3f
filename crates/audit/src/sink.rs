use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use crate::entry::AuditEntry;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
    #[error("audit sink rejected entry: {0}")]
    Rejected(String),
}

/// Destination for audit entries. Implementations must be durable relative
/// to the event store they guard: `record` returning `Ok` means the entry
/// will survive the commit it is part of.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

/// In-memory sink for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        Ok(())
    }
}

impl<S: AuditSink + ?Sized> AuditSink for std::sync::Arc<S> {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        (**self).record(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Severity;
    use depot_core::UserId;

    #[test]
    fn in_memory_sink_keeps_insertion_order() {
        let sink = InMemoryAuditSink::new();
        sink.record(AuditEntry::new(UserId::new(), "a", "record", "1"))
            .unwrap();
        sink.record(
            AuditEntry::new(UserId::new(), "b", "record", "2").with_severity(Severity::Warning),
        )
        .unwrap();

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "a");
        assert_eq!(entries[1].severity, Severity::Warning);
    }
}
