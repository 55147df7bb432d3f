//! Worker custody orchestration.
//!
//! Issuing to a worker moves stock out of the ledger (reserve then commit
//! in one transaction) and opens a custody record in its place. Returns
//! put the units back into the general pool; consumption and onward
//! transfers never touch the ledger again.
//!
//! Per-worker limits are enforced here rather than in the aggregate:
//! the outstanding balance spans every custody record a worker holds for
//! an item, which no single record can see. Two concurrent issues for
//! the same pair touch disjoint streams, so the store's version checks
//! alone cannot order them; a per-pair lock held from the limit check
//! through the commit does.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::info;

use depot_audit::{AuditEntry, AuditSink};
use depot_auth::{Actor, Policy, actions::well_known as act, authorize};
use depot_catalog::Catalog;
use depot_core::{AggregateId, DomainError, ItemId, WarehouseId, WorkerId};
use depot_custody::{
    Consume, Custody, CustodyCommand, CustodyId, OpenCustody, Return, TransferOut,
};
use depot_events::{EventBus, EventEnvelope};
use depot_ledger::{Commit, LedgerCommand, OpenRecord, Pool, Receive, Reserve};

use crate::event_store::EventStore;
use crate::retry::RetryPolicy;
use crate::services::ensure_operational;
use crate::unit_of_work::{UnitOfWork, WorkError};

pub struct CustodyService<S, B> {
    store: Arc<S>,
    bus: Arc<B>,
    sink: Arc<dyn AuditSink>,
    policy: Arc<dyn Policy>,
    catalog: Arc<Catalog>,
    retry: RetryPolicy,
    limits: RwLock<HashMap<(WorkerId, ItemId), i64>>,
    index: RwLock<HashMap<(WorkerId, ItemId), Vec<CustodyId>>>,
    pair_locks: Mutex<HashMap<(WorkerId, ItemId), Arc<Mutex<()>>>>,
}

impl<S, B> CustodyService<S, B>
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
            limits: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            pair_locks: Mutex::new(HashMap::new()),
        }
    }

    fn uow(&self) -> UnitOfWork<'_, Arc<S>, Arc<B>> {
        UnitOfWork::new(&self.store, &self.bus, self.sink.as_ref())
    }

    pub fn get(&self, id: CustodyId) -> Result<Custody, WorkError> {
        Ok(self.uow().load(Custody::empty(id))?.aggregate)
    }

    /// Override the custody limit for one worker/item pair. `None` falls
    /// back to the system-wide default.
    pub fn set_limit(&self, worker_id: WorkerId, item_id: ItemId, limit: Option<i64>) {
        let mut limits = self
            .limits
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match limit {
            Some(limit) => {
                limits.insert((worker_id, item_id), limit);
            }
            None => {
                limits.remove(&(worker_id, item_id));
            }
        }
    }

    fn limit_for(&self, worker_id: WorkerId, item_id: ItemId) -> Option<i64> {
        let limits = self.limits.read().unwrap_or_else(PoisonError::into_inner);
        limits
            .get(&(worker_id, item_id))
            .copied()
            .or_else(|| self.catalog.settings().default_custody_limit())
    }

    /// Units the worker currently holds of an item, summed across every
    /// custody record ever opened for the pair.
    pub fn outstanding_for(
        &self,
        worker_id: WorkerId,
        item_id: ItemId,
    ) -> Result<i64, WorkError> {
        let ids = {
            let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
            index
                .get(&(worker_id, item_id))
                .cloned()
                .unwrap_or_default()
        };
        let uow = self.uow();
        let mut total = 0;
        for id in ids {
            total += uow.load(Custody::empty(id))?.aggregate.outstanding();
        }
        Ok(total)
    }

    fn check_limit(
        &self,
        worker_id: WorkerId,
        item_id: ItemId,
        requested: i64,
    ) -> Result<(), WorkError> {
        if let Some(limit) = self.limit_for(worker_id, item_id) {
            let outstanding = self.outstanding_for(worker_id, item_id)?;
            if outstanding + requested > limit {
                return Err(WorkError::Domain(DomainError::CustodyLimitExceeded {
                    limit,
                    outstanding,
                    requested,
                }));
            }
        }
        Ok(())
    }

    /// The lock serializing limit checks against commits for one
    /// worker/item pair.
    fn pair_lock(&self, worker_id: WorkerId, item_id: ItemId) -> Arc<Mutex<()>> {
        let mut locks = self
            .pair_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry((worker_id, item_id)).or_default())
    }

    fn remember(&self, worker_id: WorkerId, item_id: ItemId, custody_id: CustodyId) {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        index
            .entry((worker_id, item_id))
            .or_default()
            .push(custody_id);
    }

    /// Issue stock into a worker's custody. Stock leaves the general pool
    /// in the same transaction that opens the custody record.
    pub fn issue_custody(
        &self,
        actor: &Actor,
        warehouse_id: WarehouseId,
        worker_id: WorkerId,
        item_id: ItemId,
        quantity: i64,
        purpose: &str,
    ) -> Result<CustodyId, WorkError> {
        authorize(self.policy.as_ref(), actor, &act::custody_issue())?;
        ensure_operational(&self.catalog)?;
        self.catalog.warehouse(warehouse_id)?;
        self.catalog.item(item_id)?;

        let id = CustodyId::new(AggregateId::new());
        self.retry.run(|| {
            let pair = self.pair_lock(worker_id, item_id);
            let _serial = pair.lock().unwrap_or_else(PoisonError::into_inner);
            self.check_limit(worker_id, item_id, quantity)?;

            let mut uow = self.uow();
            let mut record = uow.load(depot_ledger::InventoryRecord::empty(
                warehouse_id,
                item_id,
            ))?;
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
                &LedgerCommand::Reserve(Reserve {
                    pool: Pool::General,
                    quantity,
                    occurred_at: now,
                }),
            )?;
            uow.execute(
                &mut record,
                &LedgerCommand::Commit(Commit {
                    pool: Pool::General,
                    quantity,
                    occurred_at: now,
                }),
            )?;

            let mut custody = uow.load(Custody::empty(id))?;
            uow.execute(
                &mut custody,
                &CustodyCommand::Open(OpenCustody {
                    custody_id: id,
                    worker_id,
                    item_id,
                    warehouse_id,
                    purpose: purpose.to_string(),
                    quantity,
                    issued_by: actor.user_id,
                    occurred_at: now,
                }),
            )?;
            uow.audit(
                AuditEntry::new(actor.user_id, "custody.issue", "custody", id)
                    .with_description(purpose),
            );
            uow.commit()?;
            self.remember(worker_id, item_id, id);
            info!(custody_id = %id, %worker_id, %item_id, quantity, "custody issued");
            Ok(id)
        })
    }

    /// Record a return. The units go back into the warehouse's general
    /// pool.
    pub fn return_custody(
        &self,
        actor: &Actor,
        id: CustodyId,
        quantity: i64,
    ) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::custody_update())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut custody = uow.load(Custody::empty(id))?;
            let warehouse_id = custody
                .aggregate
                .warehouse_id()
                .ok_or(DomainError::NotFound)?;
            let item_id = custody.aggregate.item_id().ok_or(DomainError::NotFound)?;

            let now = Utc::now();
            uow.execute(
                &mut custody,
                &CustodyCommand::Return(Return {
                    quantity,
                    recorded_by: actor.user_id,
                    occurred_at: now,
                }),
            )?;

            let mut record = uow.load(depot_ledger::InventoryRecord::empty(
                warehouse_id,
                item_id,
            ))?;
            uow.execute(
                &mut record,
                &LedgerCommand::Receive(Receive {
                    pool: Pool::General,
                    quantity,
                    occurred_at: now,
                }),
            )?;

            uow.audit(AuditEntry::new(
                actor.user_id,
                "custody.return",
                "custody",
                id,
            ));
            uow.commit()?;
            Ok(())
        })
    }

    /// Record consumption. No stock comes back.
    pub fn consume_custody(
        &self,
        actor: &Actor,
        id: CustodyId,
        quantity: i64,
    ) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::custody_update())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut custody = uow.load(Custody::empty(id))?;
            uow.execute(
                &mut custody,
                &CustodyCommand::Consume(Consume {
                    quantity,
                    recorded_by: actor.user_id,
                    occurred_at: Utc::now(),
                }),
            )?;
            uow.audit(AuditEntry::new(
                actor.user_id,
                "custody.consume",
                "custody",
                id,
            ));
            uow.commit()?;
            Ok(())
        })
    }

    /// Hand units on to another worker. The source record is debited and
    /// a fresh record opens for the receiver in the same transaction; the
    /// ledger never sees the move.
    pub fn transfer_custody(
        &self,
        actor: &Actor,
        id: CustodyId,
        quantity: i64,
        to_worker: WorkerId,
    ) -> Result<CustodyId, WorkError> {
        authorize(self.policy.as_ref(), actor, &act::custody_update())?;
        ensure_operational(&self.catalog)?;

        let to_custody_id = CustodyId::new(AggregateId::new());
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut custody = uow.load(Custody::empty(id))?;
            let warehouse_id = custody
                .aggregate
                .warehouse_id()
                .ok_or(DomainError::NotFound)?;
            let item_id = custody.aggregate.item_id().ok_or(DomainError::NotFound)?;
            let purpose = custody.aggregate.purpose().to_string();

            let pair = self.pair_lock(to_worker, item_id);
            let _serial = pair.lock().unwrap_or_else(PoisonError::into_inner);
            self.check_limit(to_worker, item_id, quantity)?;

            let now = Utc::now();
            uow.execute(
                &mut custody,
                &CustodyCommand::TransferOut(TransferOut {
                    quantity,
                    to_worker,
                    to_custody_id,
                    recorded_by: actor.user_id,
                    occurred_at: now,
                }),
            )?;

            let mut receiving = uow.load(Custody::empty(to_custody_id))?;
            uow.execute(
                &mut receiving,
                &CustodyCommand::Open(OpenCustody {
                    custody_id: to_custody_id,
                    worker_id: to_worker,
                    item_id,
                    warehouse_id,
                    purpose,
                    quantity,
                    issued_by: actor.user_id,
                    occurred_at: now,
                }),
            )?;

            uow.audit(AuditEntry::new(
                actor.user_id,
                "custody.transfer",
                "custody",
                id,
            ));
            uow.commit()?;
            self.remember(to_worker, item_id, to_custody_id);
            Ok(to_custody_id)
        })
    }
}
