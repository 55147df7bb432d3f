//! Requisition workflow (event-sourced).
//!
//! A requisition draws stock from a single warehouse through the shared
//! two-stage approval pipeline, then issues against its reservations,
//! possibly across several rounds (partial fulfillment keeps the shortfall
//! allocated as backlog).

pub mod requisition;

pub use requisition::{
    AddLine, Approve, Cancel, CommanderApprove, CommanderReject, CreateRequisition, Issue, Reject,
    Requisition, RequisitionCommand, RequisitionEvent, RequisitionId, RequisitionStatus, Submit,
};
