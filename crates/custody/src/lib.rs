//! Worker custody records (event-sourced).
//!
//! A custody record tracks stock handed to an individual worker. Every unit
//! issued is eventually accounted for as returned, consumed on the job, or
//! transferred to another worker; the record closes once the outstanding
//! balance reaches zero.

pub mod custody;

pub use custody::{
    Consume, Custody, CustodyCommand, CustodyConsumed, CustodyEvent, CustodyId, CustodyOpened,
    CustodyReturned, CustodyStatus, CustodyTransferred, OpenCustody, Return, TransferOut,
};
