//! Stock-side operations: receipts, thresholds, level queries.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use depot_audit::{AuditEntry, AuditSink};
use depot_auth::{Actor, Policy, actions::well_known as act, authorize};
use depot_catalog::Catalog;
use depot_core::{ItemId, WarehouseId};
use depot_events::{EventBus, EventEnvelope};
use depot_ledger::{
    InventoryRecord, LedgerCommand, OpenRecord, Pool, Receive, SetThresholds, record_id,
};

use crate::event_store::EventStore;
use crate::retry::RetryPolicy;
use crate::services::ensure_operational;
use crate::unit_of_work::{UnitOfWork, WorkError};

/// Read-model snapshot of one record's pools.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevels {
    pub general_quantity: i64,
    pub reserve_quantity: i64,
    pub general_allocated: i64,
    pub reserve_allocated: i64,
}

impl StockLevels {
    pub fn available_general(&self) -> i64 {
        self.general_quantity - self.general_allocated
    }

    pub fn available_reserve(&self) -> i64 {
        self.reserve_quantity - self.reserve_allocated
    }
}

pub struct LedgerService<S, B> {
    store: Arc<S>,
    bus: Arc<B>,
    sink: Arc<dyn AuditSink>,
    policy: Arc<dyn Policy>,
    catalog: Arc<Catalog>,
    retry: RetryPolicy,
}

impl<S, B> LedgerService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        store: Arc<S>,
        bus: Arc<B>,
        sink: Arc<dyn AuditSink>,
        policy: Arc<dyn Policy>,
        catalog: Arc<Catalog>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            bus,
            sink,
            policy,
            catalog,
            retry,
        }
    }

    /// Open the (warehouse, item) record if it does not exist yet.
    /// Idempotent; opening an already-open record commits nothing.
    pub fn ensure_record(
        &self,
        actor: &Actor,
        warehouse_id: WarehouseId,
        item_id: ItemId,
    ) -> Result<(), WorkError> {
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = UnitOfWork::new(&self.store, &self.bus, self.sink.as_ref());
            let mut record = uow.load(InventoryRecord::empty(warehouse_id, item_id))?;
            let opened = !uow
                .execute(
                    &mut record,
                    &LedgerCommand::Open(OpenRecord {
                        warehouse_id,
                        item_id,
                        occurred_at: Utc::now(),
                    }),
                )?
                .is_empty();
            if opened {
                uow.audit(AuditEntry::new(
                    actor.user_id,
                    "ledger.open",
                    "inventory_record",
                    record_id(warehouse_id, item_id),
                ));
            }
            uow.commit()?;
            Ok(())
        })
    }

    /// Rehydrate the current record state (read-only).
    pub fn record(
        &self,
        warehouse_id: WarehouseId,
        item_id: ItemId,
    ) -> Result<InventoryRecord, WorkError> {
        let uow = UnitOfWork::new(&self.store, &self.bus, self.sink.as_ref());
        Ok(uow.load(InventoryRecord::empty(warehouse_id, item_id))?.aggregate)
    }

    pub fn stock_levels(
        &self,
        warehouse_id: WarehouseId,
        item_id: ItemId,
    ) -> Result<StockLevels, WorkError> {
        let record = self.record(warehouse_id, item_id)?;
        Ok(StockLevels {
            general_quantity: record.quantity(Pool::General),
            reserve_quantity: record.quantity(Pool::CommanderReserve),
            general_allocated: record.allocated(Pool::General),
            reserve_allocated: record.allocated(Pool::CommanderReserve),
        })
    }

    /// Book inbound stock. The commander's reserve is skimmed per the
    /// item's reserve percentage (catalog default when the item carries
    /// none); the rest lands in the general pool.
    pub fn receive_stock(
        &self,
        actor: &Actor,
        warehouse_id: WarehouseId,
        item_id: ItemId,
        quantity: i64,
    ) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::receive_stock())?;
        ensure_operational(&self.catalog)?;
        let item = self.catalog.item(item_id)?;

        let pct = if item.reserve_percentage > 0 {
            item.reserve_percentage
        } else {
            self.catalog.settings().default_reserve_percentage()
        };
        let reserve_quantity = quantity * i64::from(pct) / 100;
        let general_quantity = quantity - reserve_quantity;

        self.retry.run(|| {
            let mut uow = UnitOfWork::new(&self.store, &self.bus, self.sink.as_ref());
            let mut record = uow.load(InventoryRecord::empty(warehouse_id, item_id))?;
            let now = Utc::now();
            uow.execute(
                &mut record,
                &LedgerCommand::Open(OpenRecord {
                    warehouse_id,
                    item_id,
                    occurred_at: now,
                }),
            )?;
            if general_quantity > 0 {
                uow.execute(
                    &mut record,
                    &LedgerCommand::Receive(Receive {
                        pool: Pool::General,
                        quantity: general_quantity,
                        occurred_at: now,
                    }),
                )?;
            }
            if reserve_quantity > 0 {
                uow.execute(
                    &mut record,
                    &LedgerCommand::Receive(Receive {
                        pool: Pool::CommanderReserve,
                        quantity: reserve_quantity,
                        occurred_at: now,
                    }),
                )?;
            }
            uow.audit(
                AuditEntry::new(
                    actor.user_id,
                    "ledger.receive",
                    "inventory_record",
                    record_id(warehouse_id, item_id),
                )
                .with_description(format!(
                    "received {quantity} ({general_quantity} general, {reserve_quantity} reserve)"
                )),
            );
            uow.commit()?;
            info!(%warehouse_id, %item_id, quantity, "stock received");
            Ok(())
        })
    }

    pub fn set_thresholds(
        &self,
        actor: &Actor,
        warehouse_id: WarehouseId,
        item_id: ItemId,
        minimum_reserve_required: i64,
        reorder_point: i64,
    ) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::adjust_thresholds())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = UnitOfWork::new(&self.store, &self.bus, self.sink.as_ref());
            let mut record = uow.load(InventoryRecord::empty(warehouse_id, item_id))?;
            let now = Utc::now();
            uow.execute(
                &mut record,
                &LedgerCommand::Open(OpenRecord {
                    warehouse_id,
                    item_id,
                    occurred_at: now,
                }),
            )?;
            uow.execute(
                &mut record,
                &LedgerCommand::SetThresholds(SetThresholds {
                    minimum_reserve_required,
                    reorder_point,
                    occurred_at: now,
                }),
            )?;
            if record.aggregate.is_below_reorder_point() {
                warn!(%warehouse_id, %item_id, reorder_point, "general stock at or below reorder point");
            }
            uow.audit(AuditEntry::new(
                actor.user_id,
                "ledger.set_thresholds",
                "inventory_record",
                record_id(warehouse_id, item_id),
            ));
            uow.commit()?;
            Ok(())
        })
    }
}
