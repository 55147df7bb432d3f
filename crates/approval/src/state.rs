use serde::{Deserialize, Serialize};

use depot_core::{DomainError, DomainResult};

/// Shared approval lifecycle.
///
/// ```text
/// Draft → Submitted → {Approved | Rejected}
/// Approved + reserve-sourced lines → PendingCommanderApproval
///                                  → {CommanderApproved | CommanderRejected}
/// ```
///
/// `Approved` (no reserve) and `CommanderApproved` are the terminal success
/// states from which workflows move into fulfillment. `Rejected`,
/// `CommanderRejected` and `Cancelled` are terminal failures; the service
/// releases every line's allocation on that single transition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Draft,
    Submitted,
    Approved,
    PendingCommanderApproval,
    CommanderApproved,
    Rejected,
    CommanderRejected,
    Cancelled,
}

impl ApprovalState {
    pub fn submit(self) -> DomainResult<Self> {
        match self {
            ApprovalState::Draft => Ok(ApprovalState::Submitted),
            other => Err(invalid("submit", other)),
        }
    }

    /// Primary approval. `needs_commander` is true when any line was planned
    /// against the commander's reserve.
    pub fn approve(self, needs_commander: bool) -> DomainResult<Self> {
        match self {
            ApprovalState::Submitted => {
                if needs_commander {
                    Ok(ApprovalState::PendingCommanderApproval)
                } else {
                    Ok(ApprovalState::Approved)
                }
            }
            other => Err(invalid("approve", other)),
        }
    }

    /// Second stage: re-confirms the already-reserved reserve-pool quantity.
    pub fn commander_approve(self) -> DomainResult<Self> {
        match self {
            ApprovalState::PendingCommanderApproval => Ok(ApprovalState::CommanderApproved),
            other => Err(invalid("commander_approve", other)),
        }
    }

    pub fn reject(self) -> DomainResult<Self> {
        match self {
            ApprovalState::Submitted => Ok(ApprovalState::Rejected),
            other => Err(invalid("reject", other)),
        }
    }

    pub fn commander_reject(self) -> DomainResult<Self> {
        match self {
            ApprovalState::PendingCommanderApproval => Ok(ApprovalState::CommanderRejected),
            other => Err(invalid("commander_reject", other)),
        }
    }

    /// Cancellation is permitted from any non-terminal, non-issued state.
    pub fn cancel(self) -> DomainResult<Self> {
        match self {
            ApprovalState::Draft
            | ApprovalState::Submitted
            | ApprovalState::Approved
            | ApprovalState::PendingCommanderApproval
            | ApprovalState::CommanderApproved => Ok(ApprovalState::Cancelled),
            other => Err(invalid("cancel", other)),
        }
    }

    /// Terminal failure states; allocations were released on entry.
    pub fn is_terminal_failure(self) -> bool {
        matches!(
            self,
            ApprovalState::Rejected | ApprovalState::CommanderRejected | ApprovalState::Cancelled
        )
    }

    /// States from which workflow-specific fulfillment may begin.
    pub fn is_ready_for_fulfillment(self) -> bool {
        matches!(
            self,
            ApprovalState::Approved | ApprovalState::CommanderApproved
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalState::Draft => "draft",
            ApprovalState::Submitted => "submitted",
            ApprovalState::Approved => "approved",
            ApprovalState::PendingCommanderApproval => "pending_commander_approval",
            ApprovalState::CommanderApproved => "commander_approved",
            ApprovalState::Rejected => "rejected",
            ApprovalState::CommanderRejected => "commander_rejected",
            ApprovalState::Cancelled => "cancelled",
        }
    }
}

fn invalid(action: &str, state: ApprovalState) -> DomainError {
    DomainError::invalid_transition(format!("cannot {action} from {}", state.as_str()))
}

impl core::fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_without_reserve() {
        let state = ApprovalState::Draft
            .submit()
            .unwrap()
            .approve(false)
            .unwrap();
        assert_eq!(state, ApprovalState::Approved);
        assert!(state.is_ready_for_fulfillment());
    }

    #[test]
    fn reserve_sourced_lines_detour_through_commander_stage() {
        let state = ApprovalState::Draft.submit().unwrap().approve(true).unwrap();
        assert_eq!(state, ApprovalState::PendingCommanderApproval);
        assert!(!state.is_ready_for_fulfillment());

        let granted = state.commander_approve().unwrap();
        assert_eq!(granted, ApprovalState::CommanderApproved);
        assert!(granted.is_ready_for_fulfillment());
    }

    #[test]
    fn commander_refusal_is_terminal() {
        let state = ApprovalState::PendingCommanderApproval
            .commander_reject()
            .unwrap();
        assert_eq!(state, ApprovalState::CommanderRejected);
        assert!(state.is_terminal_failure());
    }

    #[test]
    fn rejecting_a_rejected_document_is_invalid() {
        let err = ApprovalState::Rejected.reject().unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition(_)));
    }

    #[test]
    fn cancel_only_from_non_terminal_states() {
        assert!(ApprovalState::Submitted.cancel().is_ok());
        assert!(ApprovalState::CommanderApproved.cancel().is_ok());
        assert!(ApprovalState::Cancelled.cancel().is_err());
        assert!(ApprovalState::Rejected.cancel().is_err());
    }

    #[test]
    fn approve_requires_submitted() {
        assert!(ApprovalState::Draft.approve(false).is_err());
        assert!(ApprovalState::Approved.approve(false).is_err());
    }
}
