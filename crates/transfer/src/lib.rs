//! Warehouse-to-warehouse transfer workflow (event-sourced).
//!
//! A transfer moves stock between a source and a destination warehouse:
//! the approval pipeline reserves at the source, `Ship` commits stock out,
//! `Receive` books the actually-received quantity into the destination
//! (any difference is shrinkage).

pub mod transfer;

pub use transfer::{
    AddLine, Approve, Cancel, CommanderApprove, CommanderReject, CreateTransfer, Receive, Reject,
    Ship, Submit, Transfer, TransferCommand, TransferEvent, TransferId, TransferLine,
    TransferStatus,
};
