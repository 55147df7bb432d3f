//! BOQ workflow orchestration.
//!
//! Same approval plumbing as requisitions, plus the single issue attempt:
//! the service commits what was actually issued, and when a shortfall
//! remains it creates the remainder BOQ in the same transaction, so the
//! original's `Issued` event and the remainder's birth are atomic.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use depot_approval::{LineIssue, LineSplit};
use depot_audit::{AuditEntry, AuditSink};
use depot_auth::{Actor, Policy, actions::well_known as act, authorize};
use depot_boq::{
    AddLine, Approve, Boq, BoqCommand, BoqEvent, BoqId, Cancel, CommanderApprove, CommanderReject,
    CreateBoq, CreateRemainder, Issue, ProjectId, Reject, Submit,
};
use depot_catalog::Catalog;
use depot_core::{AggregateId, DomainError, ItemId, WarehouseId};
use depot_events::{EventBus, EventEnvelope};
use depot_ledger::{AllocationPlan, Commit, LedgerCommand, Pool, Release, Reserve};

use crate::event_store::EventStore;
use crate::retry::RetryPolicy;
use crate::services::{RecordMap, ensure_operational, record_for, remaining_split};
use crate::unit_of_work::{UnitOfWork, WorkError};

pub struct BoqService<S, B> {
    store: Arc<S>,
    bus: Arc<B>,
    sink: Arc<dyn AuditSink>,
    policy: Arc<dyn Policy>,
    catalog: Arc<Catalog>,
    retry: RetryPolicy,
}

impl<S, B> BoqService<S, B>
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

    pub fn get(&self, id: BoqId) -> Result<Boq, WorkError> {
        Ok(self.uow().load(Boq::empty(id))?.aggregate)
    }

    pub fn create(
        &self,
        actor: &Actor,
        number: &str,
        project_id: ProjectId,
        warehouse_id: WarehouseId,
    ) -> Result<BoqId, WorkError> {
        authorize(self.policy.as_ref(), actor, &act::submit())?;
        ensure_operational(&self.catalog)?;
        self.catalog.warehouse(warehouse_id)?;

        let id = BoqId::new(AggregateId::new());
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut boq = uow.load(Boq::empty(id))?;
            uow.execute(
                &mut boq,
                &BoqCommand::Create(CreateBoq {
                    boq_id: id,
                    number: number.to_string(),
                    project_id,
                    warehouse_id,
                    requester: actor.user_id,
                    occurred_at: Utc::now(),
                }),
            )?;
            uow.audit(AuditEntry::new(actor.user_id, "boq.create", "boq", id));
            uow.commit()?;
            Ok(id)
        })
    }

    pub fn add_line(
        &self,
        actor: &Actor,
        id: BoqId,
        item_id: ItemId,
        quantity: i64,
    ) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::submit())?;
        ensure_operational(&self.catalog)?;
        self.catalog.item(item_id)?;

        self.retry.run(|| {
            let mut uow = self.uow();
            let mut boq = uow.load(Boq::empty(id))?;
            uow.execute(
                &mut boq,
                &BoqCommand::AddLine(AddLine {
                    item_id,
                    quantity,
                    occurred_at: Utc::now(),
                }),
            )?;
            uow.audit(AuditEntry::new(actor.user_id, "boq.add_line", "boq", id));
            uow.commit()?;
            Ok(())
        })
    }

    pub fn submit(&self, actor: &Actor, id: BoqId) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::submit())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut boq = uow.load(Boq::empty(id))?;
            uow.execute(
                &mut boq,
                &BoqCommand::Submit(Submit {
                    occurred_at: Utc::now(),
                }),
            )?;
            uow.audit(AuditEntry::new(actor.user_id, "boq.submit", "boq", id));
            uow.commit()?;
            Ok(())
        })
    }

    pub fn approve(&self, actor: &Actor, id: BoqId) -> Result<Vec<LineSplit>, WorkError> {
        authorize(self.policy.as_ref(), actor, &act::approve())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut boq = uow.load(Boq::empty(id))?;
            let warehouse_id = boq
                .aggregate
                .warehouse_id()
                .ok_or(DomainError::NotFound)?;
            let lines = boq.aggregate.lines().to_vec();

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
                &mut boq,
                &BoqCommand::Approve(Approve {
                    approver: actor.user_id,
                    splits: splits.clone(),
                    occurred_at: now,
                }),
            )?;
            uow.audit(AuditEntry::new(actor.user_id, "boq.approve", "boq", id));
            uow.commit()?;
            Ok(splits)
        })
    }

    pub fn commander_approve(&self, actor: &Actor, id: BoqId) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::commander_approve())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut boq = uow.load(Boq::empty(id))?;
            uow.execute(
                &mut boq,
                &BoqCommand::CommanderApprove(CommanderApprove {
                    approver: actor.user_id,
                    occurred_at: Utc::now(),
                }),
            )?;
            uow.audit(AuditEntry::new(actor.user_id, "boq.commander_approve", "boq", id));
            uow.commit()?;
            Ok(())
        })
    }

    pub fn reject(&self, actor: &Actor, id: BoqId, reason: &str) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::approve())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut boq = uow.load(Boq::empty(id))?;
            uow.execute(
                &mut boq,
                &BoqCommand::Reject(Reject {
                    approver: actor.user_id,
                    reason: reason.to_string(),
                    occurred_at: Utc::now(),
                }),
            )?;
            uow.audit(
                AuditEntry::new(actor.user_id, "boq.reject", "boq", id).with_description(reason),
            );
            uow.commit()?;
            Ok(())
        })
    }

    pub fn commander_reject(&self, actor: &Actor, id: BoqId, reason: &str) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::commander_approve())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut boq = uow.load(Boq::empty(id))?;
            let warehouse_id = boq
                .aggregate
                .warehouse_id()
                .ok_or(DomainError::NotFound)?;
            let lines = boq.aggregate.lines().to_vec();

            uow.execute(
                &mut boq,
                &BoqCommand::CommanderReject(CommanderReject {
                    approver: actor.user_id,
                    reason: reason.to_string(),
                    occurred_at: Utc::now(),
                }),
            )?;
            release_held(&mut uow, warehouse_id, &lines)?;
            uow.audit(
                AuditEntry::new(actor.user_id, "boq.commander_reject", "boq", id)
                    .with_description(reason),
            );
            uow.commit()?;
            Ok(())
        })
    }

    pub fn cancel(&self, actor: &Actor, id: BoqId) -> Result<(), WorkError> {
        authorize(self.policy.as_ref(), actor, &act::cancel())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut boq = uow.load(Boq::empty(id))?;
            let warehouse_id = boq
                .aggregate
                .warehouse_id()
                .ok_or(DomainError::NotFound)?;
            let lines = boq.aggregate.lines().to_vec();

            uow.execute(
                &mut boq,
                &BoqCommand::Cancel(Cancel {
                    occurred_at: Utc::now(),
                }),
            )?;
            release_held(&mut uow, warehouse_id, &lines)?;
            uow.audit(AuditEntry::new(actor.user_id, "boq.cancel", "boq", id));
            uow.commit()?;
            Ok(())
        })
    }

    /// The single issue attempt. Commits the issued quantities; when a
    /// shortfall remains, creates the remainder BOQ (pre-approved, carrying
    /// the still-live allocations) in the same transaction and returns its
    /// id.
    pub fn issue(
        &self,
        actor: &Actor,
        id: BoqId,
        issues: &[LineIssue],
    ) -> Result<Option<BoqId>, WorkError> {
        authorize(self.policy.as_ref(), actor, &act::issue())?;
        ensure_operational(&self.catalog)?;
        self.retry.run(|| {
            let mut uow = self.uow();
            let mut boq = uow.load(Boq::empty(id))?;
            let warehouse_id = boq
                .aggregate
                .warehouse_id()
                .ok_or(DomainError::NotFound)?;
            let project_id = boq.aggregate.project_id().ok_or(DomainError::NotFound)?;
            let number = boq.aggregate.number().to_string();
            let lines = boq.aggregate.lines().to_vec();

            let issued_for = |line_no: u32| {
                issues
                    .iter()
                    .find(|i| i.line_no == line_no)
                    .map(|i| i.quantity)
                    .unwrap_or(0)
            };
            let fully_issued = lines
                .iter()
                .all(|l| issued_for(l.line_no) == l.approved_quantity);
            let remainder_id = if fully_issued {
                None
            } else {
                Some(BoqId::new(AggregateId::new()))
            };

            let events = uow.execute(
                &mut boq,
                &BoqCommand::Issue(Issue {
                    issues: issues.to_vec(),
                    remainder_boq_id: remainder_id,
                    occurred_at: Utc::now(),
                }),
            )?;

            let mut records = RecordMap::new();
            let now = Utc::now();
            for issue in issues {
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

            // A partial issue spawns the remainder document atomically with
            // the original's Issued event. The remainder's allocations are
            // already live on the records; nothing new is reserved.
            if let Some(remainder_id) = remainder_id {
                let remainder_lines = events
                    .iter()
                    .find_map(|e| match e {
                        BoqEvent::Issued(issued) => Some(issued.remainder.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                let mut remainder = uow.load(Boq::empty(remainder_id))?;
                uow.execute(
                    &mut remainder,
                    &BoqCommand::CreateRemainder(CreateRemainder {
                        boq_id: remainder_id,
                        original_boq_id: id,
                        number: format!("{number}-R"),
                        project_id,
                        warehouse_id,
                        requester: actor.user_id,
                        lines: remainder_lines,
                        occurred_at: now,
                    }),
                )?;
                uow.audit(AuditEntry::new(
                    actor.user_id,
                    "boq.create_remainder",
                    "boq",
                    remainder_id,
                ));
                info!(%id, remainder = %remainder_id, "partial issue spawned remainder boq");
            }

            uow.audit(AuditEntry::new(actor.user_id, "boq.issue", "boq", id));
            uow.commit()?;
            Ok(remainder_id)
        })
    }
}

fn release_held<S, B>(
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
