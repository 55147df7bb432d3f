use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use depot_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, ItemId, UserId, WarehouseId, WorkerId,
};
use depot_events::Event;

/// Custody record identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustodyId(pub AggregateId);

impl CustodyId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CustodyId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustodyStatus {
    /// Outstanding balance is positive.
    Active,
    /// Closed by a final return.
    Returned,
    /// Closed by consumption or an outbound transfer.
    Closed,
}

/// Aggregate root: a single worker/item custody record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Custody {
    id: CustodyId,
    worker_id: Option<WorkerId>,
    item_id: Option<ItemId>,
    warehouse_id: Option<WarehouseId>,
    purpose: String,
    quantity: i64,
    returned_quantity: i64,
    consumed_quantity: i64,
    transferred_quantity: i64,
    status: CustodyStatus,
    version: u64,
    created: bool,
}

impl Custody {
    pub fn empty(id: CustodyId) -> Self {
        Self {
            id,
            worker_id: None,
            item_id: None,
            warehouse_id: None,
            purpose: String::new(),
            quantity: 0,
            returned_quantity: 0,
            consumed_quantity: 0,
            transferred_quantity: 0,
            status: CustodyStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CustodyId {
        self.id
    }

    pub fn status(&self) -> CustodyStatus {
        self.status
    }

    pub fn worker_id(&self) -> Option<WorkerId> {
        self.worker_id
    }

    pub fn item_id(&self) -> Option<ItemId> {
        self.item_id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn returned_quantity(&self) -> i64 {
        self.returned_quantity
    }

    pub fn consumed_quantity(&self) -> i64 {
        self.consumed_quantity
    }

    pub fn transferred_quantity(&self) -> i64 {
        self.transferred_quantity
    }

    /// Units the worker still holds.
    pub fn outstanding(&self) -> i64 {
        self.quantity - self.returned_quantity - self.consumed_quantity - self.transferred_quantity
    }

    /// Balance equation over the record's lifetime.
    pub fn invariants_hold(&self) -> bool {
        self.returned_quantity >= 0
            && self.consumed_quantity >= 0
            && self.transferred_quantity >= 0
            && self.outstanding() >= 0
            && (self.status == CustodyStatus::Active) == (self.outstanding() > 0)
    }

    fn ensure_active(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.status != CustodyStatus::Active {
            return Err(DomainError::invalid_transition(
                "custody record is already closed",
            ));
        }
        Ok(())
    }

    fn ensure_within_outstanding(&self, quantity: i64) -> Result<(), DomainError> {
        if quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        let outstanding = self.outstanding();
        if quantity > outstanding {
            return Err(DomainError::validation(format!(
                "quantity {quantity} exceeds outstanding balance {outstanding}"
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for Custody {
    type Id = CustodyId;

    fn id(&self) -> &CustodyId {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: open a custody record at issue time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCustody {
    pub custody_id: CustodyId,
    pub worker_id: WorkerId,
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub purpose: String,
    pub quantity: i64,
    pub issued_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: the worker hands units back to the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Return {
    pub quantity: i64,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: units used up on the job, never coming back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consume {
    pub quantity: i64,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: units handed on to another worker. The receiving side is a
/// fresh custody record opened by the service in the same transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOut {
    pub quantity: i64,
    pub to_worker: WorkerId,
    pub to_custody_id: CustodyId,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustodyCommand {
    Open(OpenCustody),
    Return(Return),
    Consume(Consume),
    TransferOut(TransferOut),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyOpened {
    pub custody_id: CustodyId,
    pub worker_id: WorkerId,
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub purpose: String,
    pub quantity: i64,
    pub issued_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyReturned {
    pub quantity: i64,
    pub recorded_by: UserId,
    pub closes_record: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyConsumed {
    pub quantity: i64,
    pub recorded_by: UserId,
    pub closes_record: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyTransferred {
    pub quantity: i64,
    pub to_worker: WorkerId,
    pub to_custody_id: CustodyId,
    pub recorded_by: UserId,
    pub closes_record: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustodyEvent {
    Opened(CustodyOpened),
    Returned(CustodyReturned),
    Consumed(CustodyConsumed),
    Transferred(CustodyTransferred),
}

impl Event for CustodyEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CustodyEvent::Opened(_) => "custody.opened",
            CustodyEvent::Returned(_) => "custody.returned",
            CustodyEvent::Consumed(_) => "custody.consumed",
            CustodyEvent::Transferred(_) => "custody.transferred",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CustodyEvent::Opened(e) => e.occurred_at,
            CustodyEvent::Returned(e) => e.occurred_at,
            CustodyEvent::Consumed(e) => e.occurred_at,
            CustodyEvent::Transferred(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Custody {
    type Command = CustodyCommand;
    type Event = CustodyEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CustodyEvent::Opened(e) => {
                self.id = e.custody_id;
                self.worker_id = Some(e.worker_id);
                self.item_id = Some(e.item_id);
                self.warehouse_id = Some(e.warehouse_id);
                self.purpose = e.purpose.clone();
                self.quantity = e.quantity;
                self.status = CustodyStatus::Active;
                self.created = true;
            }
            CustodyEvent::Returned(e) => {
                self.returned_quantity += e.quantity;
                if e.closes_record {
                    self.status = CustodyStatus::Returned;
                }
            }
            CustodyEvent::Consumed(e) => {
                self.consumed_quantity += e.quantity;
                if e.closes_record {
                    self.status = CustodyStatus::Closed;
                }
            }
            CustodyEvent::Transferred(e) => {
                self.transferred_quantity += e.quantity;
                if e.closes_record {
                    self.status = CustodyStatus::Closed;
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CustodyCommand::Open(cmd) => {
                if self.created {
                    return Err(DomainError::conflict("custody record already exists"));
                }
                if cmd.quantity <= 0 {
                    return Err(DomainError::validation("quantity must be positive"));
                }
                if cmd.purpose.trim().is_empty() {
                    return Err(DomainError::validation("purpose cannot be empty"));
                }
                Ok(vec![CustodyEvent::Opened(CustodyOpened {
                    custody_id: cmd.custody_id,
                    worker_id: cmd.worker_id,
                    item_id: cmd.item_id,
                    warehouse_id: cmd.warehouse_id,
                    purpose: cmd.purpose.clone(),
                    quantity: cmd.quantity,
                    issued_by: cmd.issued_by,
                    occurred_at: cmd.occurred_at,
                })])
            }
            CustodyCommand::Return(cmd) => {
                self.ensure_active()?;
                self.ensure_within_outstanding(cmd.quantity)?;
                Ok(vec![CustodyEvent::Returned(CustodyReturned {
                    quantity: cmd.quantity,
                    recorded_by: cmd.recorded_by,
                    closes_record: cmd.quantity == self.outstanding(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            CustodyCommand::Consume(cmd) => {
                self.ensure_active()?;
                self.ensure_within_outstanding(cmd.quantity)?;
                Ok(vec![CustodyEvent::Consumed(CustodyConsumed {
                    quantity: cmd.quantity,
                    recorded_by: cmd.recorded_by,
                    closes_record: cmd.quantity == self.outstanding(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            CustodyCommand::TransferOut(cmd) => {
                self.ensure_active()?;
                self.ensure_within_outstanding(cmd.quantity)?;
                if Some(cmd.to_worker) == self.worker_id {
                    return Err(DomainError::validation(
                        "cannot transfer custody to the same worker",
                    ));
                }
                Ok(vec![CustodyEvent::Transferred(CustodyTransferred {
                    quantity: cmd.quantity,
                    to_worker: cmd.to_worker,
                    to_custody_id: cmd.to_custody_id,
                    recorded_by: cmd.recorded_by,
                    closes_record: cmd.quantity == self.outstanding(),
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(custody: &mut Custody, cmd: CustodyCommand) -> Vec<CustodyEvent> {
        let events = custody.handle(&cmd).unwrap();
        for e in &events {
            custody.apply(e);
        }
        events
    }

    fn opened(quantity: i64) -> Custody {
        let id = CustodyId::new(AggregateId::new());
        let mut custody = Custody::empty(id);
        drive(
            &mut custody,
            CustodyCommand::Open(OpenCustody {
                custody_id: id,
                worker_id: WorkerId::new(),
                item_id: ItemId::new(),
                warehouse_id: WarehouseId::new(),
                purpose: "trench repair".into(),
                quantity,
                issued_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
        );
        custody
    }

    #[test]
    fn balance_equation_holds_across_mixed_dispositions() {
        let mut custody = opened(20);
        drive(
            &mut custody,
            CustodyCommand::Consume(Consume {
                quantity: 5,
                recorded_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
        );
        drive(
            &mut custody,
            CustodyCommand::Return(Return {
                quantity: 10,
                recorded_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
        );

        assert_eq!(custody.outstanding(), 5);
        assert_eq!(custody.status(), CustodyStatus::Active);
        assert!(custody.invariants_hold());
    }

    #[test]
    fn final_return_closes_as_returned() {
        let mut custody = opened(8);
        drive(
            &mut custody,
            CustodyCommand::Return(Return {
                quantity: 8,
                recorded_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
        );
        assert_eq!(custody.outstanding(), 0);
        assert_eq!(custody.status(), CustodyStatus::Returned);
        assert!(custody.invariants_hold());
    }

    #[test]
    fn final_consumption_closes_as_closed() {
        let mut custody = opened(3);
        drive(
            &mut custody,
            CustodyCommand::Consume(Consume {
                quantity: 3,
                recorded_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
        );
        assert_eq!(custody.status(), CustodyStatus::Closed);
    }

    #[test]
    fn disposition_cannot_exceed_outstanding() {
        let mut custody = opened(10);
        drive(
            &mut custody,
            CustodyCommand::Consume(Consume {
                quantity: 6,
                recorded_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
        );

        let err = custody
            .handle(&CustodyCommand::Return(Return {
                quantity: 5,
                recorded_by: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn closed_record_rejects_further_dispositions() {
        let mut custody = opened(4);
        drive(
            &mut custody,
            CustodyCommand::Return(Return {
                quantity: 4,
                recorded_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
        );

        let err = custody
            .handle(&CustodyCommand::Consume(Consume {
                quantity: 1,
                recorded_by: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition(_)));
    }

    #[test]
    fn transfer_out_names_the_receiving_record() {
        let mut custody = opened(10);
        let to_worker = WorkerId::new();
        let to_custody = CustodyId::new(AggregateId::new());
        let events = drive(
            &mut custody,
            CustodyCommand::TransferOut(TransferOut {
                quantity: 10,
                to_worker,
                to_custody_id: to_custody,
                recorded_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
        );

        assert_eq!(custody.status(), CustodyStatus::Closed);
        match &events[0] {
            CustodyEvent::Transferred(e) => {
                assert_eq!(e.to_worker, to_worker);
                assert_eq!(e.to_custody_id, to_custody);
                assert!(e.closes_record);
            }
            other => panic!("expected Transferred, got {other:?}"),
        }
    }
}
