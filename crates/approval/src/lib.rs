//! `depot-approval` — the two-stage approval state machine shared by every
//! document workflow.
//!
//! Primary approval reserves stock; if any line dips into the commander's
//! reserve, a second, higher-privilege approval stage gates issuance.

pub mod line;
pub mod state;

pub use line::{
    DocumentLine, LineIssue, LineSplit, ensure_submittable, requires_commander_reserve,
};
pub use state::ApprovalState;
