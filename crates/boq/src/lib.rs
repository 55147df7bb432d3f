//! Project bill-of-quantities (BOQ) workflow (event-sourced).
//!
//! A BOQ goes through the shared approval pipeline, then a single issue
//! attempt. A shortfall spawns a remainder BOQ carrying the unfulfilled
//! quantities (and the still-unconsumed reserve authorization) which starts
//! directly in the approved stage, so issuing never repeats an approval.
//! Successive remainders form a forest rooted at original submissions.

pub mod boq;

pub use boq::{
    AddLine, Approve, Boq, BoqApproved, BoqCancelled, BoqCommand, BoqCommanderApproved,
    BoqCommanderRejected, BoqCreated, BoqEvent, BoqId, BoqIssued, BoqLineAdded,
    BoqRemainderCreated, BoqRejected, BoqStatus, BoqSubmitted, Cancel, CommanderApprove,
    CommanderReject, CreateBoq, CreateRemainder, Issue, ProjectId, Reject, RemainderLine, Submit,
};
