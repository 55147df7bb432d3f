use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Action identifier checked at the command boundary.
///
/// Actions are modeled as opaque strings (e.g. "documents.approve").
/// A special wildcard action `"*"` can be granted by policy tables to
/// indicate "allow all" without hardcoding domain actions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(Cow<'static, str>);

impl Action {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Well-known actions used by the workflow services.
pub mod well_known {
    use super::Action;

    pub fn submit() -> Action {
        Action::new("documents.submit")
    }

    pub fn approve() -> Action {
        Action::new("documents.approve")
    }

    /// Commander-reserve approval is a distinct, higher-privilege action
    /// from primary approval.
    pub fn commander_approve() -> Action {
        Action::new("documents.commander_approve")
    }

    pub fn issue() -> Action {
        Action::new("documents.issue")
    }

    pub fn cancel() -> Action {
        Action::new("documents.cancel")
    }

    pub fn receive_stock() -> Action {
        Action::new("ledger.receive")
    }

    pub fn adjust_thresholds() -> Action {
        Action::new("ledger.adjust_thresholds")
    }

    pub fn custody_issue() -> Action {
        Action::new("custody.issue")
    }

    pub fn custody_update() -> Action {
        Action::new("custody.update")
    }
}
