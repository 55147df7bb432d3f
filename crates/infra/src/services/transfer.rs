//! Transfer workflow orchestration.
//!
//! Approval reserves at the source warehouse; `ship` commits stock out of
//! the source records; `receive` books the actually-arrived quantities into
//! the destination records. Opposing transfers may touch the same records
//! in opposite order; conflicts resolve through the optimistic retry, not
//! through lock ordering.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use depot_approval::{LineIssue, LineSplit};
use depot_audit::{AuditEntry, AuditSink};
use depot_auth::{Actor, Policy, actions::well_known as act, authorize};
use depot_catalog::Catalog;
use depot_core::{AggregateId, DomainError, ItemId, WarehouseId};
use depot_events::{EventBus, EventEnvelope};
use depot_ledger::{
    AllocationPlan, Commit, LedgerCommand, OpenRecord, Pool, Receive as LedgerReceive, Release,
    Reserve,
};
use depot_transfer::{
    AddLine, Approve, Cancel, CommanderApprove, CommanderReject, CreateTransfer, Receive, Reject,
    Ship, Submit, Transfer, TransferCommand, TransferEvent, TransferId,
};

use crate::event_store::EventStore;
use crate::retry::RetryPolicy;
use crate::services::{RecordMap, ensure_operational, record_for, remaining_split};
use crate::unit_of_work::{UnitOfWork, WorkError};

pub struct TransferService<S, B> {
    store: Arc<S>,
    bus: Arc<B>,
    sink: Arc<dyn AuditSink>,
    policy: Arc<dyn Policy>,
    catalog: Arc<Catalog>,
    retry: RetryPolicy,
}

impl<S, B> TransferService<S, B>
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

    fn uow(&self) -> UnitOfWork<'_, Arc<S>, Arc<B>> {
        UnitOfWork::new(&self.store, &self.bus, self.sink.as_ref())
    }

    pub fn get(&self, id: TransferId) -> Result<Transfer, WorkError> {
        Ok(self.uow().load(Transfer::empty(id))?.aggregate)
    }

    pub fn create(
        &self,
        actor: &Actor,
        number: &str,
        source_warehouse: WarehouseId,
        destination_warehouse: WarehouseId,
    ) -> Result<TransferId, WorkError> {
        authorize(self.policy.as_ref(), actor, &act::submit())?;
        ensure_operational(&self.catalog)?;
        self.catalog.warehouse(source_warehouse)?;
        self.catalog.warehouse(destination_warehouse)?;

        let id = TransferId::new(AggregateId::new());
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut transfer = uow.load(Transfer::empty(id))?;
            uow.execute(
                &mut transfer,
                &TransferCommand::Create(CreateTransfer {
                    transfer_id: id,
                    number: number.to_string(),
                    source_warehouse,
                    destination_warehouse,
                    requester: actor.user_id,
                    occurred_at: Utc::now(),
                }),
            )?;
            uow.audit(AuditEntry::new(actor.user_id, "transfer.create", "transfer", id));
            uow.commit()?;
            Ok(id)
        })
    }

    pub fn add_line(
        &self,
        actor: &Actor,
        id: TransferId,
        item_id: ItemId,
        quantity: i64,
    ) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::submit())?;
        ensure_operational(&self.catalog)?;
        self.catalog.item(item_id)?;

        self.retry.run(|| {
            let mut uow = self.uow();
            let mut transfer = uow.load(Transfer::empty(id))?;
            uow.execute(
                &mut transfer,
                &TransferCommand::AddLine(AddLine {
                    item_id,
                    quantity,
                    occurred_at: Utc::now(),
                }),
            )?;
            uow.audit(AuditEntry::new(actor.user_id, "transfer.add_line", "transfer", id));
            uow.commit()?;
            Ok(())
        })
    }

    pub fn submit(&self, actor: &Actor, id: TransferId) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::submit())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut transfer = uow.load(Transfer::empty(id))?;
            uow.execute(
                &mut transfer,
                &TransferCommand::Submit(Submit {
                    occurred_at: Utc::now(),
                }),
            )?;
            uow.audit(AuditEntry::new(actor.user_id, "transfer.submit", "transfer", id));
            uow.commit()?;
            Ok(())
        })
    }

    /// Primary approval: plan and reserve every line at the source.
    pub fn approve(&self, actor: &Actor, id: TransferId) -> Result<Vec<LineSplit>, WorkError> {
        authorize(self.policy.as_ref(), actor, &act::approve())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut transfer = uow.load(Transfer::empty(id))?;
            let source = transfer
                .aggregate
                .source_warehouse()
                .ok_or(DomainError::NotFound)?;
            let lines = transfer.aggregate.lines().to_vec();

            let mut records = RecordMap::new();
            let mut splits = Vec::with_capacity(lines.len());
            let now = Utc::now();
            for line in &lines {
                let record = record_for(&mut records, &uow, source, line.line.item_id)?;
                let plan =
                    AllocationPlan::for_request(&record.aggregate, line.line.requested_quantity)?;
                if plan.general > 0 {
                    uow.execute(
                        record,
                        &LedgerCommand::Reserve(Reserve {
                            pool: Pool::General,
                            quantity: plan.general,
                            occurred_at: now,
                        }),
                    )?;
                }
                if plan.reserve > 0 {
                    uow.execute(
                        record,
                        &LedgerCommand::Reserve(Reserve {
                            pool: Pool::CommanderReserve,
                            quantity: plan.reserve,
                            occurred_at: now,
                        }),
                    )?;
                }
                splits.push(LineSplit {
                    line_no: line.line.line_no,
                    general: plan.general,
                    reserve: plan.reserve,
                });
            }

            uow.execute(
                &mut transfer,
                &TransferCommand::Approve(Approve {
                    approver: actor.user_id,
                    splits: splits.clone(),
                    occurred_at: now,
                }),
            )?;
            uow.audit(AuditEntry::new(actor.user_id, "transfer.approve", "transfer", id));
            uow.commit()?;
            Ok(splits)
        })
    }

    pub fn commander_approve(&self, actor: &Actor, id: TransferId) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::commander_approve())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut transfer = uow.load(Transfer::empty(id))?;
            uow.execute(
                &mut transfer,
                &TransferCommand::CommanderApprove(CommanderApprove {
                    approver: actor.user_id,
                    occurred_at: Utc::now(),
                }),
            )?;
            uow.audit(AuditEntry::new(
                actor.user_id,
                "transfer.commander_approve",
                "transfer",
                id,
            ));
            uow.commit()?;
            Ok(())
        })
    }

    pub fn reject(&self, actor: &Actor, id: TransferId, reason: &str) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::approve())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut transfer = uow.load(Transfer::empty(id))?;
            uow.execute(
                &mut transfer,
                &TransferCommand::Reject(Reject {
                    approver: actor.user_id,
                    reason: reason.to_string(),
                    occurred_at: Utc::now(),
                }),
            )?;
            uow.audit(
                AuditEntry::new(actor.user_id, "transfer.reject", "transfer", id)
                    .with_description(reason),
            );
            uow.commit()?;
            Ok(())
        })
    }

    pub fn commander_reject(
        &self,
        actor: &Actor,
        id: TransferId,
        reason: &str,
    ) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::commander_approve())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut transfer = uow.load(Transfer::empty(id))?;
            let source = transfer
                .aggregate
                .source_warehouse()
                .ok_or(DomainError::NotFound)?;
            let lines = transfer.aggregate.lines().to_vec();

            uow.execute(
                &mut transfer,
                &TransferCommand::CommanderReject(CommanderReject {
                    approver: actor.user_id,
                    reason: reason.to_string(),
                    occurred_at: Utc::now(),
                }),
            )?;
            self.release_source(&mut uow, source, &lines)?;
            uow.audit(
                AuditEntry::new(actor.user_id, "transfer.commander_reject", "transfer", id)
                    .with_description(reason),
            );
            uow.commit()?;
            Ok(())
        })
    }

    pub fn cancel(&self, actor: &Actor, id: TransferId) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::cancel())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut transfer = uow.load(Transfer::empty(id))?;
            let source = transfer
                .aggregate
                .source_warehouse()
                .ok_or(DomainError::NotFound)?;
            let lines = transfer.aggregate.lines().to_vec();

            uow.execute(
                &mut transfer,
                &TransferCommand::Cancel(Cancel {
                    occurred_at: Utc::now(),
                }),
            )?;
            self.release_source(&mut uow, source, &lines)?;
            uow.audit(AuditEntry::new(actor.user_id, "transfer.cancel", "transfer", id));
            uow.commit()?;
            Ok(())
        })
    }

    /// Commit the shipped quantities out of the source records.
    pub fn ship(
        &self,
        actor: &Actor,
        id: TransferId,
        shipments: &[LineIssue],
    ) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::issue())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut transfer = uow.load(Transfer::empty(id))?;
            let source = transfer
                .aggregate
                .source_warehouse()
                .ok_or(DomainError::NotFound)?;
            let lines = transfer.aggregate.lines().to_vec();

            uow.execute(
                &mut transfer,
                &TransferCommand::Ship(Ship {
                    shipments: shipments.to_vec(),
                    occurred_at: Utc::now(),
                }),
            )?;

            let mut records = RecordMap::new();
            let now = Utc::now();
            for shipment in shipments {
                if shipment.quantity == 0 {
                    continue;
                }
                let line = lines
                    .iter()
                    .find(|l| l.line.line_no == shipment.line_no)
                    .ok_or_else(|| {
                        DomainError::validation(format!("no line {}", shipment.line_no))
                    })?;
                let (from_general, from_reserve) = line.line.issue_split(shipment.quantity);
                let record = record_for(&mut records, &uow, source, line.line.item_id)?;
                if from_general > 0 {
                    uow.execute(
                        record,
                        &LedgerCommand::Commit(Commit {
                            pool: Pool::General,
                            quantity: from_general,
                            occurred_at: now,
                        }),
                    )?;
                }
                if from_reserve > 0 {
                    uow.execute(
                        record,
                        &LedgerCommand::Commit(Commit {
                            pool: Pool::CommanderReserve,
                            quantity: from_reserve,
                            occurred_at: now,
                        }),
                    )?;
                }
            }

            for record in records.values() {
                if record.aggregate.is_below_reorder_point() {
                    warn!(
                        warehouse_id = %record.aggregate.warehouse_id(),
                        item_id = %record.aggregate.item_id(),
                        "general stock at or below reorder point"
                    );
                }
            }

            uow.audit(AuditEntry::new(actor.user_id, "transfer.ship", "transfer", id));
            uow.commit()?;
            info!(%id, "transfer in transit");
            Ok(())
        })
    }

    /// Book the received quantities into the destination records. Any
    /// shipped-minus-received delta is shrinkage: logged, carried on the
    /// event, absorbed nowhere else.
    pub fn receive(
        &self,
        actor: &Actor,
        id: TransferId,
        receipts: &[LineIssue],
    ) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::receive_stock())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut transfer = uow.load(Transfer::empty(id))?;
            let destination = transfer
                .aggregate
                .destination_warehouse()
                .ok_or(DomainError::NotFound)?;
            let lines = transfer.aggregate.lines().to_vec();

            let events = uow.execute(
                &mut transfer,
                &TransferCommand::Receive(Receive {
                    receipts: receipts.to_vec(),
                    occurred_at: Utc::now(),
                }),
            )?;

            let mut records = RecordMap::new();
            let now = Utc::now();
            for receipt in receipts {
                if receipt.quantity == 0 {
                    continue;
                }
                let line = lines
                    .iter()
                    .find(|l| l.line.line_no == receipt.line_no)
                    .ok_or_else(|| {
                        DomainError::validation(format!("no line {}", receipt.line_no))
                    })?;
                let record = record_for(&mut records, &uow, destination, line.line.item_id)?;
                uow.execute(
                    record,
                    &LedgerCommand::Open(OpenRecord {
                        warehouse_id: destination,
                        item_id: line.line.item_id,
                        occurred_at: now,
                    }),
                )?;
                uow.execute(
                    record,
                    &LedgerCommand::Receive(LedgerReceive {
                        pool: Pool::General,
                        quantity: receipt.quantity,
                        occurred_at: now,
                    }),
                )?;
            }

            for event in &events {
                if let TransferEvent::Received(received) = event {
                    for loss in &received.shrinkage {
                        warn!(%id, line_no = loss.line_no, quantity = loss.quantity, "transfer shrinkage");
                    }
                }
            }

            uow.audit(AuditEntry::new(actor.user_id, "transfer.receive", "transfer", id));
            uow.commit()?;
            Ok(())
        })
    }

    fn release_source(
        &self,
        uow: &mut UnitOfWork<'_, Arc<S>, Arc<B>>,
        source: WarehouseId,
        lines: &[depot_transfer::TransferLine],
    ) -> Result<(), WorkError> {
        let mut records = RecordMap::new();
        let now = Utc::now();
        for line in lines {
            let (general, reserve) = remaining_split(&line.line);
            if general == 0 && reserve == 0 {
                continue;
            }
            let record = record_for(&mut records, uow, source, line.line.item_id)?;
            if general > 0 {
                uow.execute(
                    record,
                    &LedgerCommand::Release(Release {
                        pool: Pool::General,
                        quantity: general,
                        occurred_at: now,
                    }),
                )?;
            }
            if reserve > 0 {
                uow.execute(
                    record,
                    &LedgerCommand::Release(Release {
                        pool: Pool::CommanderReserve,
                        quantity: reserve,
                        occurred_at: now,
                    }),
                )?;
            }
        }
        Ok(())
    }
}
