//! `depot-ledger` — dual-pool inventory ledger and allocation engine.
//!
//! One `InventoryRecord` per (warehouse, item), holding a general pool and a
//! commander's reserve pool. All quantity changes flow through the four
//! allocation primitives (reserve / release / commit / receive); nothing
//! else may touch the numbers. Pure domain logic, no IO.

pub mod allocation;
pub mod record;

pub use allocation::AllocationPlan;
pub use record::{
    Commit, InventoryRecord, LedgerCommand, LedgerEvent, OpenRecord, Pool, Receive, RecordOpened,
    Release, Reserve, SetThresholds, StockCommitted, StockReceived, StockReleased, StockReserved,
    ThresholdsSet, record_id,
};
