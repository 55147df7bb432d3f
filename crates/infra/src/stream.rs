//! Mapping between domain aggregates and their event streams.

use depot_core::{Aggregate, AggregateId, AggregateRoot, DomainError};

/// An aggregate backed by one append-only stream in the event store.
///
/// `stream_id` must be stable for the aggregate's whole lifetime (typed ids
/// unwrap to the underlying `AggregateId`; inventory records derive theirs
/// from `(warehouse, item)`).
pub trait EventSourced: Aggregate<Error = DomainError> {
    const AGGREGATE_TYPE: &'static str;

    fn stream_id(&self) -> AggregateId;
}

impl EventSourced for depot_ledger::InventoryRecord {
    const AGGREGATE_TYPE: &'static str = "inventory_record";

    fn stream_id(&self) -> AggregateId {
        *AggregateRoot::id(self)
    }
}

impl EventSourced for depot_requisition::Requisition {
    const AGGREGATE_TYPE: &'static str = "requisition";

    fn stream_id(&self) -> AggregateId {
        self.id_typed().0
    }
}

impl EventSourced for depot_transfer::Transfer {
    const AGGREGATE_TYPE: &'static str = "transfer";

    fn stream_id(&self) -> AggregateId {
        self.id_typed().0
    }
}

impl EventSourced for depot_boq::Boq {
    const AGGREGATE_TYPE: &'static str = "boq";

    fn stream_id(&self) -> AggregateId {
        self.id_typed().0
    }
}

impl EventSourced for depot_custody::Custody {
    const AGGREGATE_TYPE: &'static str = "custody";

    fn stream_id(&self) -> AggregateId {
        self.id_typed().0
    }
}
