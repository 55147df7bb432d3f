//! Cross-service scenarios wired through the in-memory store and bus.

use std::sync::{Arc, Barrier};
use std::thread;

use serde_json::Value as JsonValue;

use depot_approval::LineIssue;
use depot_audit::InMemoryAuditSink;
use depot_auth::{Actor, Policy, Role, default_policy};
use depot_boq::{BoqStatus, ProjectId};
use depot_catalog::{Catalog, Item, UnitOfMeasure, Warehouse};
use depot_core::{DomainError, ItemId, UserId, WarehouseId, WorkerId};
use depot_custody::CustodyStatus;
use depot_events::{EventEnvelope, InMemoryEventBus};
use depot_requisition::RequisitionStatus;
use depot_transfer::TransferStatus;

use crate::event_store::InMemoryEventStore;
use crate::retry::RetryPolicy;
use crate::services::{
    BoqService, CustodyService, LedgerService, RequisitionService, TransferService,
};
use crate::unit_of_work::WorkError;

type Store = InMemoryEventStore;
type Bus = InMemoryEventBus<EventEnvelope<JsonValue>>;

struct Depot {
    catalog: Arc<Catalog>,
    sink: Arc<InMemoryAuditSink>,
    ledger: LedgerService<Store, Bus>,
    requisitions: RequisitionService<Store, Bus>,
    transfers: TransferService<Store, Bus>,
    boqs: BoqService<Store, Bus>,
    custody: CustodyService<Store, Bus>,
}

impl Depot {
    fn new() -> Self {
        depot_observability::init();
        let store = Arc::new(InMemoryEventStore::new());
        let bus = Arc::new(Bus::new());
        let sink = Arc::new(InMemoryAuditSink::new());
        let audit: Arc<dyn depot_audit::AuditSink> = sink.clone();
        let policy: Arc<dyn Policy> = Arc::new(default_policy());
        let catalog = Arc::new(Catalog::new());
        // Generous bound so contending threads lose on stock, not on retries.
        let retry = RetryPolicy {
            max_attempts: 10,
            base_delay: std::time::Duration::from_millis(1),
        };

        Self {
            catalog: catalog.clone(),
            sink,
            ledger: LedgerService::new(
                store.clone(),
                bus.clone(),
                audit.clone(),
                policy.clone(),
                catalog.clone(),
                retry,
            ),
            requisitions: RequisitionService::new(
                store.clone(),
                bus.clone(),
                audit.clone(),
                policy.clone(),
                catalog.clone(),
                retry,
            ),
            transfers: TransferService::new(
                store.clone(),
                bus.clone(),
                audit.clone(),
                policy.clone(),
                catalog.clone(),
                retry,
            ),
            boqs: BoqService::new(
                store.clone(),
                bus.clone(),
                audit.clone(),
                policy.clone(),
                catalog.clone(),
                retry,
            ),
            custody: CustodyService::new(store, bus, audit, policy, catalog, retry),
        }
    }

    /// Register a warehouse/item pair and drop the default reserve skim so
    /// everything received lands in the general pool.
    fn general_only_site(&self) -> (WarehouseId, ItemId) {
        self.catalog
            .update_settings(|s| s.set_default_reserve_percentage(0));
        self.site()
    }

    fn site(&self) -> (WarehouseId, ItemId) {
        let warehouse_id = WarehouseId::new();
        let item_id = ItemId::new();
        self.catalog
            .register_warehouse(Warehouse::central(warehouse_id, "central depot"));
        self.catalog
            .register_item(Item::new(item_id, "sandbags", UnitOfMeasure::Piece));
        (warehouse_id, item_id)
    }
}

fn storekeeper() -> Actor {
    Actor::new(UserId::new(), Role::new("storekeeper"))
}

fn officer() -> Actor {
    Actor::new(UserId::new(), Role::new("officer"))
}

fn commander() -> Actor {
    Actor::new(UserId::new(), Role::new("commander"))
}

#[test]
fn concurrent_approvals_never_oversell_the_general_pool() {
    let depot = Arc::new(Depot::new());
    let (warehouse_id, item_id) = depot.general_only_site();
    depot
        .ledger
        .receive_stock(&storekeeper(), warehouse_id, item_id, 10)
        .unwrap();

    let mut handles = Vec::new();
    for n in 0..5 {
        let depot = depot.clone();
        handles.push(thread::spawn(move || {
            let requester = officer();
            let id = depot
                .requisitions
                .create(&requester, &format!("REQ-{n}"), warehouse_id)
                .unwrap();
            depot
                .requisitions
                .add_line(&requester, id, item_id, 4)
                .unwrap();
            depot.requisitions.submit(&requester, id).unwrap();
            depot.requisitions.approve(&officer(), id).is_ok()
        }));
    }
    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count() as i64;

    // 10 on hand, 4 per requisition: exactly two approvals can land.
    assert_eq!(successes, 2);
    let levels = depot.ledger.stock_levels(warehouse_id, item_id).unwrap();
    assert_eq!(levels.general_allocated, 4 * successes);
    assert!(levels.available_general() >= 0);
}

#[test]
fn shortfall_crosses_into_the_commander_reserve() {
    let depot = Depot::new();
    let (warehouse_id, item_id) = depot.site();
    // Default 20% skim: 125 received lands as 100 general / 25 reserve.
    depot
        .ledger
        .receive_stock(&storekeeper(), warehouse_id, item_id, 125)
        .unwrap();

    let requester = officer();
    let first = depot
        .requisitions
        .create(&requester, "REQ-A", warehouse_id)
        .unwrap();
    depot
        .requisitions
        .add_line(&requester, first, item_id, 90)
        .unwrap();
    depot.requisitions.submit(&requester, first).unwrap();
    let splits = depot.requisitions.approve(&officer(), first).unwrap();
    assert_eq!((splits[0].general, splits[0].reserve), (90, 0));
    assert_eq!(
        depot.requisitions.get(first).unwrap().status(),
        RequisitionStatus::Approved
    );

    // Only 10 general left; the other 10 must come out of the reserve and
    // the document has to pass the commander gate before issue.
    let second = depot
        .requisitions
        .create(&requester, "REQ-B", warehouse_id)
        .unwrap();
    depot
        .requisitions
        .add_line(&requester, second, item_id, 20)
        .unwrap();
    depot.requisitions.submit(&requester, second).unwrap();
    let splits = depot.requisitions.approve(&officer(), second).unwrap();
    assert_eq!((splits[0].general, splits[0].reserve), (10, 10));
    assert_eq!(
        depot.requisitions.get(second).unwrap().status(),
        RequisitionStatus::PendingCommanderApproval
    );

    depot
        .requisitions
        .commander_approve(&commander(), second)
        .unwrap();
    let line_no = depot.requisitions.get(second).unwrap().lines()[0].line_no;
    depot
        .requisitions
        .issue(
            &storekeeper(),
            second,
            &[LineIssue {
                line_no,
                quantity: 20,
            }],
        )
        .unwrap();

    assert_eq!(
        depot.requisitions.get(second).unwrap().status(),
        RequisitionStatus::Completed
    );
    let levels = depot.ledger.stock_levels(warehouse_id, item_id).unwrap();
    assert_eq!(levels.general_quantity, 90);
    assert_eq!(levels.reserve_quantity, 15);
    assert_eq!(levels.available_general(), 0);
    assert_eq!(levels.available_reserve(), 15);
    assert!(
        depot
            .sink
            .entries()
            .iter()
            .any(|e| e.action == "requisition.issue")
    );
}

#[test]
fn partial_boq_issue_spawns_a_pre_approved_remainder() {
    let depot = Depot::new();
    let (warehouse_id, item_id) = depot.general_only_site();
    depot
        .ledger
        .receive_stock(&storekeeper(), warehouse_id, item_id, 50)
        .unwrap();

    let requester = officer();
    let id = depot
        .boqs
        .create(&requester, "BOQ-7", ProjectId::new(), warehouse_id)
        .unwrap();
    depot.boqs.add_line(&requester, id, item_id, 10).unwrap();
    depot.boqs.add_line(&requester, id, item_id, 5).unwrap();
    depot.boqs.submit(&requester, id).unwrap();
    depot.boqs.approve(&officer(), id).unwrap();

    let lines = depot.boqs.get(id).unwrap().lines().to_vec();
    let issues = vec![
        LineIssue {
            line_no: lines[0].line_no,
            quantity: 6,
        },
        LineIssue {
            line_no: lines[1].line_no,
            quantity: 5,
        },
    ];
    let remainder_id = depot
        .boqs
        .issue(&storekeeper(), id, &issues)
        .unwrap()
        .unwrap();

    let original = depot.boqs.get(id).unwrap();
    assert_eq!(original.status(), BoqStatus::PartiallyIssued);

    let remainder = depot.boqs.get(remainder_id).unwrap();
    assert!(remainder.is_remaining());
    assert_eq!(remainder.original_boq_id(), Some(id));
    assert_eq!(remainder.status(), BoqStatus::Approved);
    assert_eq!(remainder.lines().len(), 1);
    assert_eq!(remainder.lines()[0].requested_quantity, 4);

    // 11 issued out of the 15 allocated; the shortfall stays allocated for
    // the remainder document.
    let levels = depot.ledger.stock_levels(warehouse_id, item_id).unwrap();
    assert_eq!(levels.general_quantity, 39);
    assert_eq!(levels.general_allocated, 4);
}

#[test]
fn custody_lifecycle_balances_against_the_ledger() {
    let depot = Depot::new();
    let (warehouse_id, item_id) = depot.general_only_site();
    depot
        .ledger
        .receive_stock(&storekeeper(), warehouse_id, item_id, 50)
        .unwrap();

    let keeper = officer();
    let worker_id = WorkerId::new();
    let custody_id = depot
        .custody
        .issue_custody(&keeper, warehouse_id, worker_id, item_id, 20, "wire run")
        .unwrap();
    assert_eq!(
        depot
            .ledger
            .stock_levels(warehouse_id, item_id)
            .unwrap()
            .general_quantity,
        30
    );

    depot.custody.consume_custody(&keeper, custody_id, 5).unwrap();
    depot.custody.return_custody(&keeper, custody_id, 10).unwrap();

    let record = depot.custody.get(custody_id).unwrap();
    assert_eq!(record.outstanding(), 5);
    assert_eq!(record.status(), CustodyStatus::Active);
    assert!(record.invariants_hold());

    // Only the returned units flow back into the general pool.
    let levels = depot.ledger.stock_levels(warehouse_id, item_id).unwrap();
    assert_eq!(levels.general_quantity, 40);
    assert_eq!(
        depot.custody.outstanding_for(worker_id, item_id).unwrap(),
        5
    );
}

#[test]
fn custody_limit_spans_every_record_the_worker_holds() {
    let depot = Depot::new();
    let (warehouse_id, item_id) = depot.general_only_site();
    depot
        .ledger
        .receive_stock(&storekeeper(), warehouse_id, item_id, 50)
        .unwrap();

    let keeper = officer();
    let worker_id = WorkerId::new();
    depot.custody.set_limit(worker_id, item_id, Some(10));
    depot
        .custody
        .issue_custody(&keeper, warehouse_id, worker_id, item_id, 8, "patrol kit")
        .unwrap();

    let err = depot
        .custody
        .issue_custody(&keeper, warehouse_id, worker_id, item_id, 5, "patrol kit")
        .unwrap_err();
    assert!(matches!(
        err,
        WorkError::Domain(DomainError::CustodyLimitExceeded {
            limit: 10,
            outstanding: 8,
            requested: 5,
        })
    ));
}

#[test]
fn concurrent_custody_issues_cannot_jointly_breach_the_limit() {
    let depot = Arc::new(Depot::new());
    let (first_site, item_id) = depot.general_only_site();
    let second_site = WarehouseId::new();
    depot
        .catalog
        .register_warehouse(Warehouse::central(second_site, "forward depot"));
    for warehouse_id in [first_site, second_site] {
        depot
            .ledger
            .receive_stock(&storekeeper(), warehouse_id, item_id, 50)
            .unwrap();
    }

    // Issues against different warehouses touch disjoint streams, so only
    // the service-level limit can keep the pair honest.
    let worker_id = WorkerId::new();
    depot.custody.set_limit(worker_id, item_id, Some(10));

    let start = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for warehouse_id in [first_site, second_site] {
        let depot = depot.clone();
        let start = start.clone();
        handles.push(thread::spawn(move || {
            start.wait();
            depot
                .custody
                .issue_custody(&officer(), warehouse_id, worker_id, item_id, 8, "wire run")
                .is_ok()
        }));
    }
    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(successes, 1);
    assert_eq!(
        depot.custody.outstanding_for(worker_id, item_id).unwrap(),
        8
    );
}

#[test]
fn commander_rejection_releases_once_and_only_once() {
    let depot = Depot::new();
    let (warehouse_id, item_id) = depot.site();
    // 20% skim: 20 general / 5 reserve.
    depot
        .ledger
        .receive_stock(&storekeeper(), warehouse_id, item_id, 25)
        .unwrap();

    let requester = officer();
    let id = depot
        .requisitions
        .create(&requester, "REQ-C", warehouse_id)
        .unwrap();
    depot
        .requisitions
        .add_line(&requester, id, item_id, 24)
        .unwrap();
    depot.requisitions.submit(&requester, id).unwrap();
    let splits = depot.requisitions.approve(&officer(), id).unwrap();
    assert_eq!((splits[0].general, splits[0].reserve), (20, 4));

    depot
        .requisitions
        .commander_reject(&commander(), id, "reserve stays put")
        .unwrap();
    let levels = depot.ledger.stock_levels(warehouse_id, item_id).unwrap();
    assert_eq!(levels.available_general(), 20);
    assert_eq!(levels.available_reserve(), 5);

    // A second rejection must fail before it reaches the ledger.
    let err = depot
        .requisitions
        .commander_reject(&commander(), id, "again")
        .unwrap_err();
    assert!(matches!(
        err,
        WorkError::Domain(DomainError::InvalidStateTransition(_))
    ));
    let levels = depot.ledger.stock_levels(warehouse_id, item_id).unwrap();
    assert_eq!(levels.general_allocated, 0);
    assert_eq!(levels.reserve_allocated, 0);
}

#[test]
fn transfer_moves_stock_and_records_shrinkage() {
    let depot = Depot::new();
    let (source, item_id) = depot.general_only_site();
    let destination = WarehouseId::new();
    depot
        .catalog
        .register_warehouse(Warehouse::central(destination, "forward depot"));
    depot
        .ledger
        .receive_stock(&storekeeper(), source, item_id, 40)
        .unwrap();

    let requester = officer();
    let id = depot
        .transfers
        .create(&requester, "TRN-1", source, destination)
        .unwrap();
    depot
        .transfers
        .add_line(&requester, id, item_id, 20)
        .unwrap();
    depot.transfers.submit(&requester, id).unwrap();
    depot.transfers.approve(&officer(), id).unwrap();

    let line_no = depot.transfers.get(id).unwrap().lines()[0].line.line_no;
    depot
        .transfers
        .ship(
            &storekeeper(),
            id,
            &[LineIssue {
                line_no,
                quantity: 20,
            }],
        )
        .unwrap();
    assert_eq!(
        depot.transfers.get(id).unwrap().status(),
        TransferStatus::InTransit
    );

    // Two units lost on the road.
    depot
        .transfers
        .receive(
            &storekeeper(),
            id,
            &[LineIssue {
                line_no,
                quantity: 18,
            }],
        )
        .unwrap();

    let transfer = depot.transfers.get(id).unwrap();
    assert_eq!(transfer.status(), TransferStatus::Received);
    assert_eq!(transfer.lines()[0].shrinkage(), 2);

    let at_source = depot.ledger.stock_levels(source, item_id).unwrap();
    assert_eq!(at_source.general_quantity, 20);
    assert_eq!(at_source.general_allocated, 0);
    let at_destination = depot.ledger.stock_levels(destination, item_id).unwrap();
    assert_eq!(at_destination.general_quantity, 18);
}

#[test]
fn maintenance_mode_blocks_mutations_but_not_reads() {
    let depot = Depot::new();
    let (warehouse_id, item_id) = depot.general_only_site();
    depot
        .ledger
        .receive_stock(&storekeeper(), warehouse_id, item_id, 10)
        .unwrap();

    depot.catalog.update_settings(|s| s.set_maintenance_mode(true));

    let err = depot
        .ledger
        .receive_stock(&storekeeper(), warehouse_id, item_id, 5)
        .unwrap_err();
    assert!(matches!(err, WorkError::Domain(DomainError::Validation(_))));
    assert!(
        depot
            .requisitions
            .create(&officer(), "REQ-D", warehouse_id)
            .is_err()
    );

    let levels = depot.ledger.stock_levels(warehouse_id, item_id).unwrap();
    assert_eq!(levels.general_quantity, 10);
}
