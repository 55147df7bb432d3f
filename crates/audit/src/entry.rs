use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use depot_core::UserId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One immutable audit line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: Uuid,
    pub actor_id: UserId,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub description: String,
    pub severity: Severity,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor_id: UserId,
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl ToString,
    ) -> Self {
        Self {
            entry_id: Uuid::now_v7(),
            actor_id,
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
            description: String::new(),
            severity: Severity::Info,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_to_info() {
        let entry = AuditEntry::new(UserId::new(), "requisition.submit", "requisition", "r-1");
        assert_eq!(entry.severity, Severity::Info);
        assert!(entry.description.is_empty());

        let escalated = entry.with_severity(Severity::Critical);
        assert_eq!(escalated.severity, Severity::Critical);
    }
}
