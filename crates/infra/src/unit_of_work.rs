//! Unit of work over the atomic multi-stream event store.
//!
//! A unit of work stages every aggregate decision of one business operation,
//! plus the audit entries describing it, and commits the lot in a single
//! event-store transaction. Nothing is visible until `commit()` succeeds;
//! a failing decision, version check or audit sink leaves every stream
//! untouched. Committed envelopes are published on the bus afterwards (the
//! store is the source of truth; publish failures surface but do not roll
//! back).

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::error;

use depot_audit::{AuditEntry, AuditSink};
use depot_core::{DomainError, ExpectedVersion};
use depot_events::{Event, EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
use crate::stream::EventSourced;

#[derive(Debug, Error)]
pub enum WorkError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("event store: {0}")]
    Store(#[from] EventStoreError),

    #[error("event payload (de)serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    /// Events are committed; publication failed and may be retried.
    #[error("publication failed after commit: {0}")]
    Publish(String),
}

impl WorkError {
    /// True for failures that a bounded optimistic retry should absorb.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            WorkError::Domain(DomainError::ConcurrencyConflict(_))
                | WorkError::Store(EventStoreError::Concurrency(_))
        )
    }
}

/// A rehydrated aggregate plus the stream version it was observed at.
///
/// The version advances as events are staged through
/// [`UnitOfWork::execute`], so several commands may target the same
/// aggregate within one transaction.
pub struct Loaded<A> {
    pub aggregate: A,
    version: u64,
}

impl<A> Loaded<A> {
    pub fn version(&self) -> u64 {
        self.version
    }
}

/// One business operation's staged writes.
pub struct UnitOfWork<'a, S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    store: &'a S,
    bus: &'a B,
    sink: &'a dyn AuditSink,
    appends: Vec<StreamAppend>,
    entries: Vec<AuditEntry>,
}

impl<'a, S, B> UnitOfWork<'a, S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: &'a S, bus: &'a B, sink: &'a dyn AuditSink) -> Self {
        Self {
            store,
            bus,
            sink,
            appends: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Load and rehydrate an aggregate from its stream.
    ///
    /// `empty` supplies the pre-creation instance (it fixes the stream id);
    /// an unknown stream yields it back unchanged at version 0.
    pub fn load<A>(&self, empty: A) -> Result<Loaded<A>, WorkError>
    where
        A: EventSourced,
        A::Event: Event + DeserializeOwned,
    {
        let stream = self.store.load_stream(empty.stream_id())?;
        let version = stream.last().map(|e| e.sequence_number).unwrap_or(0);

        let mut aggregate = empty;
        for stored in stream {
            let event: A::Event = serde_json::from_value(stored.payload)?;
            aggregate.apply(&event);
        }

        Ok(Loaded { aggregate, version })
    }

    /// Run a command against a loaded aggregate and stage the decided
    /// events. The aggregate evolves in memory so later commands in the
    /// same unit of work see the staged state; nothing is persisted yet.
    pub fn execute<A>(
        &mut self,
        loaded: &mut Loaded<A>,
        command: &A::Command,
    ) -> Result<Vec<A::Event>, WorkError>
    where
        A: EventSourced,
        A::Event: Event + Serialize,
    {
        let events = loaded.aggregate.handle(command).map_err(|err| {
            if let DomainError::InvariantViolation(msg) = &err {
                error!(aggregate_type = A::AGGREGATE_TYPE, %msg, "invariant violation");
            }
            WorkError::Domain(err)
        })?;
        if events.is_empty() {
            return Ok(events);
        }

        let aggregate_id = loaded.aggregate.stream_id();
        let mut uncommitted = Vec::with_capacity(events.len());
        for event in &events {
            uncommitted.push(UncommittedEvent::from_typed(
                aggregate_id,
                A::AGGREGATE_TYPE,
                event,
            )?);
        }

        self.appends.push(StreamAppend {
            aggregate_id,
            aggregate_type: A::AGGREGATE_TYPE.to_string(),
            expected: ExpectedVersion::Exact(loaded.version),
            events: uncommitted,
        });

        for event in &events {
            loaded.aggregate.apply(event);
        }
        loaded.version += events.len() as u64;

        Ok(events)
    }

    /// Queue an audit entry; it is recorded inside the commit, so a failing
    /// sink aborts the whole transaction.
    pub fn audit(&mut self, entry: AuditEntry) {
        self.entries.push(entry);
    }

    /// Commit all staged streams atomically, record audit entries inside
    /// the transaction, then publish the committed envelopes.
    pub fn commit(self) -> Result<Vec<StoredEvent>, WorkError> {
        let UnitOfWork {
            store,
            bus,
            sink,
            appends,
            mut entries,
        } = self;

        if appends.is_empty() && entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut record_entries = || {
            for entry in entries.drain(..) {
                sink.record(entry).map_err(|e| e.to_string())?;
            }
            Ok(())
        };
        let committed = store.append_transaction(appends, &mut record_entries)?;

        for stored in &committed {
            bus.publish(stored.to_envelope())
                .map_err(|err| WorkError::Publish(format!("{err:?}")))?;
        }

        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::Value as JsonValue;

    use depot_audit::InMemoryAuditSink;
    use depot_core::{ItemId, WarehouseId};
    use depot_events::InMemoryEventBus;
    use depot_ledger::{InventoryRecord, LedgerCommand, OpenRecord, Pool, Receive};

    use super::*;
    use crate::event_store::InMemoryEventStore;

    #[test]
    fn staged_state_is_visible_within_the_unit_of_work() {
        let store = InMemoryEventStore::new();
        let bus: InMemoryEventBus<EventEnvelope<JsonValue>> = InMemoryEventBus::new();
        let sink = InMemoryAuditSink::new();

        let warehouse = WarehouseId::new();
        let item = ItemId::new();

        let mut uow = UnitOfWork::new(&store, &bus, &sink);
        let mut record = uow.load(InventoryRecord::empty(warehouse, item)).unwrap();
        uow.execute(
            &mut record,
            &LedgerCommand::Open(OpenRecord {
                warehouse_id: warehouse,
                item_id: item,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        uow.execute(
            &mut record,
            &LedgerCommand::Receive(Receive {
                pool: Pool::General,
                quantity: 10,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        assert_eq!(record.aggregate.quantity(Pool::General), 10);
        assert_eq!(record.version(), 2);

        let committed = uow.commit().unwrap();
        assert_eq!(committed.len(), 2);
        assert_eq!(committed[1].sequence_number, 2);
    }

    #[test]
    fn audit_failure_aborts_the_whole_transaction() {
        struct FailingSink;
        impl AuditSink for FailingSink {
            fn record(&self, _entry: AuditEntry) -> Result<(), depot_audit::AuditError> {
                Err(depot_audit::AuditError::Unavailable("down".to_string()))
            }
        }

        let store = InMemoryEventStore::new();
        let bus: InMemoryEventBus<EventEnvelope<JsonValue>> = InMemoryEventBus::new();
        let sink = FailingSink;

        let warehouse = WarehouseId::new();
        let item = ItemId::new();

        let mut uow = UnitOfWork::new(&store, &bus, &sink);
        let mut record = uow.load(InventoryRecord::empty(warehouse, item)).unwrap();
        let stream_id = record.aggregate.stream_id();
        uow.execute(
            &mut record,
            &LedgerCommand::Open(OpenRecord {
                warehouse_id: warehouse,
                item_id: item,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        uow.audit(AuditEntry::new(
            depot_core::UserId::new(),
            "ledger.open",
            "inventory_record",
            stream_id,
        ));

        let err = uow.commit().unwrap_err();
        assert!(matches!(err, WorkError::Store(EventStoreError::Aborted(_))));
        assert!(store.load_stream(stream_id).unwrap().is_empty());
    }

    #[test]
    fn committed_events_are_published_in_order() {
        let store = InMemoryEventStore::new();
        let bus: InMemoryEventBus<EventEnvelope<JsonValue>> = InMemoryEventBus::new();
        let sink = InMemoryAuditSink::new();
        let subscription = depot_events::EventBus::subscribe(&bus);

        let warehouse = WarehouseId::new();
        let item = ItemId::new();

        let mut uow = UnitOfWork::new(&store, &bus, &sink);
        let mut record = uow.load(InventoryRecord::empty(warehouse, item)).unwrap();
        uow.execute(
            &mut record,
            &LedgerCommand::Open(OpenRecord {
                warehouse_id: warehouse,
                item_id: item,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        uow.commit().unwrap();

        let envelope = subscription.try_recv().unwrap();
        assert_eq!(envelope.aggregate_type(), "inventory_record");
        assert_eq!(envelope.sequence_number(), 1);
    }
}
