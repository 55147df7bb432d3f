//! Requisition workflow orchestration.
//!
//! Approval is where stock is earmarked: the service plans every line's
//! cross-pool split against the live records and stages the document
//! transition together with all reservations in one transaction, so a
//! multi-line approval is all-or-nothing.

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
use depot_ledger::{AllocationPlan, Commit, LedgerCommand, Pool, Release, Reserve};
use depot_requisition::{
    AddLine, Approve, Cancel, CommanderApprove, CommanderReject, CreateRequisition, Issue, Reject,
    Requisition, RequisitionCommand, RequisitionId, Submit,
};

use crate::event_store::EventStore;
use crate::retry::RetryPolicy;
use crate::services::{RecordMap, ensure_operational, record_for, remaining_split};
use crate::unit_of_work::{UnitOfWork, WorkError};

pub struct RequisitionService<S, B> {
    store: Arc<S>,
    bus: Arc<B>,
    sink: Arc<dyn AuditSink>,
    policy: Arc<dyn Policy>,
    catalog: Arc<Catalog>,
    retry: RetryPolicy,
}

impl<S, B> RequisitionService<S, B>
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

    pub fn get(&self, id: RequisitionId) -> Result<Requisition, WorkError> {
        Ok(self.uow().load(Requisition::empty(id))?.aggregate)
    }

    pub fn create(
        &self,
        actor: &Actor,
        number: &str,
        warehouse_id: WarehouseId,
    ) -> Result<RequisitionId, WorkError> {
        authorize(self.policy.as_ref(), actor, &act::submit())?;
        ensure_operational(&self.catalog)?;
        self.catalog.warehouse(warehouse_id)?;

        let id = RequisitionId::new(AggregateId::new());
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut req = uow.load(Requisition::empty(id))?;
            uow.execute(
                &mut req,
                &RequisitionCommand::Create(CreateRequisition {
                    requisition_id: id,
                    number: number.to_string(),
                    warehouse_id,
                    requester: actor.user_id,
                    occurred_at: Utc::now(),
                }),
            )?;
            uow.audit(AuditEntry::new(actor.user_id, "requisition.create", "requisition", id));
            uow.commit()?;
            Ok(id)
        })
    }

    pub fn add_line(
        &self,
        actor: &Actor,
        id: RequisitionId,
        item_id: ItemId,
        quantity: i64,
    ) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::submit())?;
        ensure_operational(&self.catalog)?;
        self.catalog.item(item_id)?;

        self.retry.run(|| {
            let mut uow = self.uow();
            let mut req = uow.load(Requisition::empty(id))?;
            uow.execute(
                &mut req,
                &RequisitionCommand::AddLine(AddLine {
                    item_id,
                    quantity,
                    occurred_at: Utc::now(),
                }),
            )?;
            uow.audit(AuditEntry::new(actor.user_id, "requisition.add_line", "requisition", id));
            uow.commit()?;
            Ok(())
        })
    }

    pub fn submit(&self, actor: &Actor, id: RequisitionId) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::submit())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut req = uow.load(Requisition::empty(id))?;
            uow.execute(
                &mut req,
                &RequisitionCommand::Submit(Submit {
                    occurred_at: Utc::now(),
                }),
            )?;
            uow.audit(AuditEntry::new(actor.user_id, "requisition.submit", "requisition", id));
            uow.commit()?;
            Ok(())
        })
    }

    /// Primary approval. Plans every line's split against the live records
    /// and reserves both pools; a single uncoverable line fails the whole
    /// approval with nothing reserved.
    pub fn approve(&self, actor: &Actor, id: RequisitionId) -> Result<Vec<LineSplit>, WorkError> {
        authorize(self.policy.as_ref(), actor, &act::approve())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut req = uow.load(Requisition::empty(id))?;
            let warehouse_id = req
                .aggregate
                .warehouse_id()
                .ok_or(DomainError::NotFound)?;
            let lines = req.aggregate.lines().to_vec();

            let mut records = RecordMap::new();
            let mut splits = Vec::with_capacity(lines.len());
            let now = Utc::now();
            for line in &lines {
                let record = record_for(&mut records, &uow, warehouse_id, line.item_id)?;
                let plan = AllocationPlan::for_request(&record.aggregate, line.requested_quantity)?;
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
                    line_no: line.line_no,
                    general: plan.general,
                    reserve: plan.reserve,
                });
            }

            uow.execute(
                &mut req,
                &RequisitionCommand::Approve(Approve {
                    approver: actor.user_id,
                    splits: splits.clone(),
                    occurred_at: now,
                }),
            )?;
            uow.audit(AuditEntry::new(actor.user_id, "requisition.approve", "requisition", id));
            uow.commit()?;

            if splits.iter().any(|s| s.reserve > 0) {
                info!(%id, "requisition held at commander approval gate");
            }
            Ok(splits)
        })
    }

    /// Second stage: re-confirms the reserve-pool quantities that primary
    /// approval already earmarked. No new reservation.
    pub fn commander_approve(&self, actor: &Actor, id: RequisitionId) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::commander_approve())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut req = uow.load(Requisition::empty(id))?;
            uow.execute(
                &mut req,
                &RequisitionCommand::CommanderApprove(CommanderApprove {
                    approver: actor.user_id,
                    occurred_at: Utc::now(),
                }),
            )?;
            uow.audit(AuditEntry::new(
                actor.user_id,
                "requisition.commander_approve",
                "requisition",
                id,
            ));
            uow.commit()?;
            Ok(())
        })
    }

    /// Primary rejection (from Submitted; nothing is reserved yet).
    pub fn reject(&self, actor: &Actor, id: RequisitionId, reason: &str) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::approve())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut req = uow.load(Requisition::empty(id))?;
            uow.execute(
                &mut req,
                &RequisitionCommand::Reject(Reject {
                    approver: actor.user_id,
                    reason: reason.to_string(),
                    occurred_at: Utc::now(),
                }),
            )?;
            uow.audit(
                AuditEntry::new(actor.user_id, "requisition.reject", "requisition", id)
                    .with_description(reason),
            );
            uow.commit()?;
            Ok(())
        })
    }

    /// Commander refusal; primary approval had reserved both pools, so the
    /// allocations are released on this single transition.
    pub fn commander_reject(
        &self,
        actor: &Actor,
        id: RequisitionId,
        reason: &str,
    ) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::commander_approve())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut req = uow.load(Requisition::empty(id))?;
            let warehouse_id = req
                .aggregate
                .warehouse_id()
                .ok_or(DomainError::NotFound)?;
            let lines = req.aggregate.lines().to_vec();

            uow.execute(
                &mut req,
                &RequisitionCommand::CommanderReject(CommanderReject {
                    approver: actor.user_id,
                    reason: reason.to_string(),
                    occurred_at: Utc::now(),
                }),
            )?;
            release_lines(&mut uow, warehouse_id, &lines)?;
            uow.audit(
                AuditEntry::new(actor.user_id, "requisition.commander_reject", "requisition", id)
                    .with_description(reason),
            );
            uow.commit()?;
            Ok(())
        })
    }

    pub fn cancel(&self, actor: &Actor, id: RequisitionId) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::cancel())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut req = uow.load(Requisition::empty(id))?;
            let warehouse_id = req
                .aggregate
                .warehouse_id()
                .ok_or(DomainError::NotFound)?;
            let lines = req.aggregate.lines().to_vec();

            uow.execute(
                &mut req,
                &RequisitionCommand::Cancel(Cancel {
                    occurred_at: Utc::now(),
                }),
            )?;
            release_lines(&mut uow, warehouse_id, &lines)?;
            uow.audit(AuditEntry::new(actor.user_id, "requisition.cancel", "requisition", id));
            uow.commit()?;
            Ok(())
        })
    }

    /// Issue stock against the approved lines. `requests` carries per-line
    /// quantities; the approval holds the allocations, so anything up to the
    /// remaining approved quantity is committable. May run repeatedly until
    /// the requisition completes.
    pub fn issue(
        &self,
        actor: &Actor,
        id: RequisitionId,
        requests: &[LineIssue],
    ) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::issue())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut req = uow.load(Requisition::empty(id))?;
            let warehouse_id = req
                .aggregate
                .warehouse_id()
                .ok_or(DomainError::NotFound)?;
            let lines = req.aggregate.lines().to_vec();

            uow.execute(
                &mut req,
                &RequisitionCommand::Issue(Issue {
                    issues: requests.to_vec(),
                    occurred_at: Utc::now(),
                }),
            )?;

            let mut records = RecordMap::new();
            let now = Utc::now();
            for issue in requests {
                if issue.quantity == 0 {
                    continue;
                }
                let line = lines
                    .iter()
                    .find(|l| l.line_no == issue.line_no)
                    .ok_or_else(|| DomainError::validation(format!("no line {}", issue.line_no)))?;
                let (from_general, from_reserve) = line.issue_split(issue.quantity);
                let record = record_for(&mut records, &uow, warehouse_id, line.item_id)?;
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

            uow.audit(AuditEntry::new(actor.user_id, "requisition.issue", "requisition", id));
            uow.commit()?;
            Ok(())
        })
    }
}

/// Release whatever allocation the lines still hold (clamped by the
/// records; lines never approved hold nothing and release nothing).
fn release_lines<S, B>(
    uow: &mut UnitOfWork<'_, S, B>,
    warehouse_id: WarehouseId,
    lines: &[depot_approval::DocumentLine],
) -> Result<(), WorkError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    let mut records = RecordMap::new();
    let now = Utc::now();
    for line in lines {
        let (general, reserve) = remaining_split(line);
        if general == 0 && reserve == 0 {
            continue;
        }
        let record = record_for(&mut records, uow, warehouse_id, line.item_id)?;
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
