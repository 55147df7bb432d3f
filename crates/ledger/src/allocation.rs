//! Cross-pool allocation planning.
//!
//! When a document line requests quantity `q`, the general pool is used
//! first; any shortfall is tentatively taken from the commander's reserve,
//! which flags the line for the second approval stage.

use serde::{Deserialize, Serialize};

use depot_core::{DomainError, DomainResult};

use crate::record::{InventoryRecord, Pool};

/// How a requested quantity splits across the two pools.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub general: i64,
    pub reserve: i64,
}

impl AllocationPlan {
    /// Plan the split for a request of `quantity` against `record`.
    ///
    /// Fails with `InsufficientStock` when even both pools together cannot
    /// cover the request; a failed plan reserves nothing.
    pub fn for_request(record: &InventoryRecord, quantity: i64) -> DomainResult<Self> {
        if quantity <= 0 {
            return Err(DomainError::validation("requested quantity must be positive"));
        }

        let available_general = record.available(Pool::General);
        let available_reserve = record.available(Pool::CommanderReserve);

        let general = quantity.min(available_general.max(0));
        let reserve = quantity - general;

        if reserve > available_reserve {
            return Err(DomainError::insufficient_stock(
                quantity,
                available_general.max(0) + available_reserve.max(0),
            ));
        }

        Ok(Self { general, reserve })
    }

    /// The line dips into the commander's reserve and needs the second
    /// approval stage.
    pub fn from_reserve(&self) -> bool {
        self.reserve > 0
    }

    pub fn total(&self) -> i64 {
        self.general + self.reserve
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use depot_core::{Aggregate, ItemId, WarehouseId};

    use super::*;
    use crate::record::{LedgerCommand, OpenRecord, Receive, Reserve};

    fn record_with(general: i64, general_allocated: i64, reserve: i64) -> InventoryRecord {
        let mut record = InventoryRecord::empty(WarehouseId::new(), ItemId::new());
        let (warehouse_id, item_id) = (record.warehouse_id(), record.item_id());
        let mut run = |cmd: LedgerCommand| {
            for e in record.handle(&cmd).unwrap() {
                record.apply(&e);
            }
        };
        run(LedgerCommand::Open(OpenRecord {
            warehouse_id,
            item_id,
            occurred_at: Utc::now(),
        }));
        if general > 0 {
            run(LedgerCommand::Receive(Receive {
                pool: Pool::General,
                quantity: general,
                occurred_at: Utc::now(),
            }));
        }
        if reserve > 0 {
            run(LedgerCommand::Receive(Receive {
                pool: Pool::CommanderReserve,
                quantity: reserve,
                occurred_at: Utc::now(),
            }));
        }
        if general_allocated > 0 {
            run(LedgerCommand::Reserve(Reserve {
                pool: Pool::General,
                quantity: general_allocated,
                occurred_at: Utc::now(),
            }));
        }
        record
    }

    #[test]
    fn fully_covered_by_general_pool() {
        let record = record_with(100, 0, 50);
        let plan = AllocationPlan::for_request(&record, 30).unwrap();
        assert_eq!(plan, AllocationPlan { general: 30, reserve: 0 });
        assert!(!plan.from_reserve());
    }

    #[test]
    fn shortfall_spills_into_commander_reserve() {
        // generalQuantity=100, generalAllocated=90, request 20:
        // 10 from general, 10 from reserve, line flagged.
        let record = record_with(100, 90, 50);
        let plan = AllocationPlan::for_request(&record, 20).unwrap();
        assert_eq!(plan, AllocationPlan { general: 10, reserve: 10 });
        assert!(plan.from_reserve());
    }

    #[test]
    fn both_pools_exhausted_fails_whole_request() {
        let record = record_with(10, 0, 5);
        let err = AllocationPlan::for_request(&record, 16).unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                requested: 16,
                available: 15
            }
        );
    }

    #[test]
    fn zero_request_is_rejected() {
        let record = record_with(10, 0, 0);
        assert!(matches!(
            AllocationPlan::for_request(&record, 0),
            Err(DomainError::Validation(_))
        ));
    }
}
