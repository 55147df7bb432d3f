//! Application services, one per workflow.
//!
//! Services are the only writers. Each operation authorizes the actor,
//! builds a unit of work, runs the pure aggregate decisions (document plus
//! every touched ledger record), queues one audit entry, and commits
//! atomically under the bounded retry policy.

pub mod boq;
pub mod custody;
pub mod ledger;
pub mod requisition;
pub mod transfer;

pub use boq::BoqService;
pub use custody::CustodyService;
pub use ledger::{LedgerService, StockLevels};
pub use requisition::RequisitionService;
pub use transfer::TransferService;

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use serde_json::Value as JsonValue;

use depot_approval::DocumentLine;
use depot_catalog::Catalog;
use depot_core::{AggregateId, DomainError, ItemId, WarehouseId};
use depot_events::{EventBus, EventEnvelope};
use depot_ledger::InventoryRecord;

use crate::event_store::EventStore;
use crate::unit_of_work::{Loaded, UnitOfWork, WorkError};

/// Ledger records touched by one unit of work, keyed by stream id so a
/// document with several lines on the same item shares one loaded record.
pub(crate) type RecordMap = HashMap<AggregateId, Loaded<InventoryRecord>>;

pub(crate) fn record_for<'m, S, B>(
    records: &'m mut RecordMap,
    uow: &UnitOfWork<'_, S, B>,
    warehouse: WarehouseId,
    item: ItemId,
) -> Result<&'m mut Loaded<InventoryRecord>, WorkError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    let id = depot_ledger::record_id(warehouse, item);
    match records.entry(id) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let loaded = uow.load(InventoryRecord::empty(warehouse, item))?;
            Ok(entry.insert(loaded))
        }
    }
}

/// Allocation still held by a line: the approved split minus what has been
/// issued from each pool (general is drawn first).
pub(crate) fn remaining_split(line: &DocumentLine) -> (i64, i64) {
    let issued_from_general = line.issued_quantity.min(line.general_allocation);
    let remaining_general = line.general_allocation - issued_from_general;
    (remaining_general, line.unissued_reserve())
}

/// Mutations are refused while the system is in maintenance mode.
pub(crate) fn ensure_operational(catalog: &Catalog) -> Result<(), WorkError> {
    if catalog.settings().maintenance_mode() {
        return Err(WorkError::Domain(DomainError::validation(
            "system is in maintenance mode",
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use depot_core::ItemId;

    use super::*;

    #[test]
    fn remaining_split_accounts_for_general_first_issue_order() {
        let mut line = DocumentLine::new(1, ItemId::new(), 20);
        line.approve_split(12, 8);
        assert_eq!(remaining_split(&line), (12, 8));

        line.issued_quantity = 10;
        assert_eq!(remaining_split(&line), (2, 8));

        line.issued_quantity = 15;
        assert_eq!(remaining_split(&line), (0, 5));
    }
}
