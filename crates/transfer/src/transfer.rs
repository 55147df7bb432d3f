use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use depot_approval::{ApprovalState, DocumentLine, LineIssue, LineSplit, ensure_submittable};
use depot_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, ItemId, UserId, WarehouseId,
};
use depot_events::Event;

/// Transfer identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub AggregateId);

impl TransferId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TransferId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Transfer status. `Pending` is this workflow's name for the submitted
/// stage; fulfillment adds `InTransit` and `Received`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Draft,
    Pending,
    Approved,
    PendingCommanderApproval,
    CommanderApproved,
    Rejected,
    CommanderRejected,
    Cancelled,
    InTransit,
    Received,
}

impl TransferStatus {
    pub fn approval(self) -> Option<ApprovalState> {
        match self {
            TransferStatus::Draft => Some(ApprovalState::Draft),
            TransferStatus::Pending => Some(ApprovalState::Submitted),
            TransferStatus::Approved => Some(ApprovalState::Approved),
            TransferStatus::PendingCommanderApproval => {
                Some(ApprovalState::PendingCommanderApproval)
            }
            TransferStatus::CommanderApproved => Some(ApprovalState::CommanderApproved),
            TransferStatus::Rejected => Some(ApprovalState::Rejected),
            TransferStatus::CommanderRejected => Some(ApprovalState::CommanderRejected),
            TransferStatus::Cancelled => Some(ApprovalState::Cancelled),
            TransferStatus::InTransit | TransferStatus::Received => None,
        }
    }
}

/// A transfer line: the shared document line (whose issued quantity is the
/// shipped quantity) plus the quantity actually received at the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub line: DocumentLine,
    pub received_quantity: i64,
}

impl TransferLine {
    fn new(line_no: u32, item_id: ItemId, requested: i64) -> Self {
        Self {
            line: DocumentLine::new(line_no, item_id, requested),
            received_quantity: 0,
        }
    }

    pub fn shipped_quantity(&self) -> i64 {
        self.line.issued_quantity
    }

    /// Shipped but not received: lost or damaged in transit.
    pub fn shrinkage(&self) -> i64 {
        self.shipped_quantity() - self.received_quantity
    }
}

/// Aggregate root: Transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    id: TransferId,
    number: String,
    source_warehouse: Option<WarehouseId>,
    destination_warehouse: Option<WarehouseId>,
    requester: Option<UserId>,
    approver: Option<UserId>,
    lines: Vec<TransferLine>,
    status: TransferStatus,
    version: u64,
    created: bool,
}

impl Transfer {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: TransferId) -> Self {
        Self {
            id,
            number: String::new(),
            source_warehouse: None,
            destination_warehouse: None,
            requester: None,
            approver: None,
            lines: Vec::new(),
            status: TransferStatus::Draft,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TransferId {
        self.id
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn source_warehouse(&self) -> Option<WarehouseId> {
        self.source_warehouse
    }

    pub fn destination_warehouse(&self) -> Option<WarehouseId> {
        self.destination_warehouse
    }

    pub fn lines(&self) -> &[TransferLine] {
        &self.lines
    }

    pub fn requires_commander_reserve(&self) -> bool {
        self.lines.iter().any(|l| l.line.is_from_commander_reserve)
    }

    fn document_lines(&self) -> Vec<DocumentLine> {
        self.lines.iter().map(|l| l.line.clone()).collect()
    }
}

impl AggregateRoot for Transfer {
    type Id = TransferId;

    fn id(&self) -> &TransferId {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransfer {
    pub transfer_id: TransferId,
    pub number: String,
    pub source_warehouse: WarehouseId,
    pub destination_warehouse: WarehouseId,
    pub requester: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine (Draft only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub item_id: ItemId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Submit (Draft → Pending).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submit {
    pub occurred_at: DateTime<Utc>,
}

/// Command: primary approval with the source-side allocation splits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approve {
    pub approver: UserId,
    pub splits: Vec<LineSplit>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: commander-reserve approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommanderApprove {
    pub approver: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Reject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reject {
    pub approver: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: refuse the commander-reserve stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommanderReject {
    pub approver: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Cancel (before InTransit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {
    pub occurred_at: DateTime<Utc>,
}

/// Command: Ship. Commits the listed quantities out of the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ship {
    pub shipments: Vec<LineIssue>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Receive. Books the quantities that actually arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receive {
    pub receipts: Vec<LineIssue>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCommand {
    Create(CreateTransfer),
    AddLine(AddLine),
    Submit(Submit),
    Approve(Approve),
    CommanderApprove(CommanderApprove),
    Reject(Reject),
    CommanderReject(CommanderReject),
    Cancel(Cancel),
    Ship(Ship),
    Receive(Receive),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCreated {
    pub transfer_id: TransferId,
    pub number: String,
    pub source_warehouse: WarehouseId,
    pub destination_warehouse: WarehouseId,
    pub requester: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLineAdded {
    pub line_no: u32,
    pub item_id: ItemId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSubmitted {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferApproved {
    pub approver: UserId,
    pub splits: Vec<LineSplit>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCommanderApproved {
    pub approver: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRejected {
    pub approver: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCommanderRejected {
    pub approver: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCancelled {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferShipped {
    pub shipments: Vec<LineIssue>,
    pub occurred_at: DateTime<Utc>,
}

/// `shrinkage` lists per-line shipped-minus-received deltas (zero omitted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceived {
    pub receipts: Vec<LineIssue>,
    pub shrinkage: Vec<LineIssue>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEvent {
    Created(TransferCreated),
    LineAdded(TransferLineAdded),
    Submitted(TransferSubmitted),
    Approved(TransferApproved),
    CommanderApproved(TransferCommanderApproved),
    Rejected(TransferRejected),
    CommanderRejected(TransferCommanderRejected),
    Cancelled(TransferCancelled),
    Shipped(TransferShipped),
    Received(TransferReceived),
}

impl Event for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::Created(_) => "transfer.created",
            TransferEvent::LineAdded(_) => "transfer.line_added",
            TransferEvent::Submitted(_) => "transfer.submitted",
            TransferEvent::Approved(_) => "transfer.approved",
            TransferEvent::CommanderApproved(_) => "transfer.commander_approved",
            TransferEvent::Rejected(_) => "transfer.rejected",
            TransferEvent::CommanderRejected(_) => "transfer.commander_rejected",
            TransferEvent::Cancelled(_) => "transfer.cancelled",
            TransferEvent::Shipped(_) => "transfer.shipped",
            TransferEvent::Received(_) => "transfer.received",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferEvent::Created(e) => e.occurred_at,
            TransferEvent::LineAdded(e) => e.occurred_at,
            TransferEvent::Submitted(e) => e.occurred_at,
            TransferEvent::Approved(e) => e.occurred_at,
            TransferEvent::CommanderApproved(e) => e.occurred_at,
            TransferEvent::Rejected(e) => e.occurred_at,
            TransferEvent::CommanderRejected(e) => e.occurred_at,
            TransferEvent::Cancelled(e) => e.occurred_at,
            TransferEvent::Shipped(e) => e.occurred_at,
            TransferEvent::Received(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Transfer {
    type Command = TransferCommand;
    type Event = TransferEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransferEvent::Created(e) => {
                self.id = e.transfer_id;
                self.number = e.number.clone();
                self.source_warehouse = Some(e.source_warehouse);
                self.destination_warehouse = Some(e.destination_warehouse);
                self.requester = Some(e.requester);
                self.status = TransferStatus::Draft;
                self.lines.clear();
                self.created = true;
            }
            TransferEvent::LineAdded(e) => {
                self.lines
                    .push(TransferLine::new(e.line_no, e.item_id, e.quantity));
            }
            TransferEvent::Submitted(_) => {
                self.status = TransferStatus::Pending;
            }
            TransferEvent::Approved(e) => {
                self.approver = Some(e.approver);
                for split in &e.splits {
                    if let Some(l) = self
                        .lines
                        .iter_mut()
                        .find(|l| l.line.line_no == split.line_no)
                    {
                        l.line.approve_split(split.general, split.reserve);
                    }
                }
                self.status = if self.requires_commander_reserve() {
                    TransferStatus::PendingCommanderApproval
                } else {
                    TransferStatus::Approved
                };
            }
            TransferEvent::CommanderApproved(_) => {
                self.status = TransferStatus::CommanderApproved;
            }
            TransferEvent::Rejected(_) => {
                self.status = TransferStatus::Rejected;
            }
            TransferEvent::CommanderRejected(_) => {
                self.status = TransferStatus::CommanderRejected;
            }
            TransferEvent::Cancelled(_) => {
                self.status = TransferStatus::Cancelled;
            }
            TransferEvent::Shipped(e) => {
                for shipment in &e.shipments {
                    if let Some(l) = self
                        .lines
                        .iter_mut()
                        .find(|l| l.line.line_no == shipment.line_no)
                    {
                        l.line.issued_quantity += shipment.quantity;
                    }
                }
                self.status = TransferStatus::InTransit;
            }
            TransferEvent::Received(e) => {
                for receipt in &e.receipts {
                    if let Some(l) = self
                        .lines
                        .iter_mut()
                        .find(|l| l.line.line_no == receipt.line_no)
                    {
                        l.received_quantity += receipt.quantity;
                    }
                }
                self.status = TransferStatus::Received;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransferCommand::Create(cmd) => self.handle_create(cmd),
            TransferCommand::AddLine(cmd) => self.handle_add_line(cmd),
            TransferCommand::Submit(cmd) => self.handle_submit(cmd),
            TransferCommand::Approve(cmd) => self.handle_approve(cmd),
            TransferCommand::CommanderApprove(cmd) => self.handle_commander_approve(cmd),
            TransferCommand::Reject(cmd) => self.handle_reject(cmd),
            TransferCommand::CommanderReject(cmd) => self.handle_commander_reject(cmd),
            TransferCommand::Cancel(cmd) => self.handle_cancel(cmd),
            TransferCommand::Ship(cmd) => self.handle_ship(cmd),
            TransferCommand::Receive(cmd) => self.handle_receive(cmd),
        }
    }
}

impl Transfer {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn approval_state(&self) -> Result<ApprovalState, DomainError> {
        self.status.approval().ok_or_else(|| {
            DomainError::invalid_transition(format!(
                "transfer is already in fulfillment ({:?})",
                self.status
            ))
        })
    }

    fn handle_create(&self, cmd: &CreateTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("transfer already exists"));
        }
        if cmd.source_warehouse == cmd.destination_warehouse {
            return Err(DomainError::validation(
                "source and destination warehouses must differ",
            ));
        }
        if cmd.number.trim().is_empty() {
            return Err(DomainError::validation("transfer number cannot be empty"));
        }

        Ok(vec![TransferEvent::Created(TransferCreated {
            transfer_id: cmd.transfer_id,
            number: cmd.number.clone(),
            source_warehouse: cmd.source_warehouse,
            destination_warehouse: cmd.destination_warehouse,
            requester: cmd.requester,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_created()?;
        if self.status != TransferStatus::Draft {
            return Err(DomainError::invalid_transition(
                "lines can only be added to a draft transfer",
            ));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        let next_line_no = (self.lines.len() as u32) + 1;
        Ok(vec![TransferEvent::LineAdded(TransferLineAdded {
            line_no: next_line_no,
            item_id: cmd.item_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &Submit) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_created()?;
        self.approval_state()?.submit()?;
        ensure_submittable(&self.document_lines())?;

        Ok(vec![TransferEvent::Submitted(TransferSubmitted {
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &Approve) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_created()?;
        let needs_commander = cmd.splits.iter().any(|s| s.reserve > 0);
        self.approval_state()?.approve(needs_commander)?;

        for l in &self.lines {
            let split = cmd
                .splits
                .iter()
                .find(|s| s.line_no == l.line.line_no)
                .ok_or_else(|| {
                    DomainError::validation(format!("missing split for line {}", l.line.line_no))
                })?;
            if split.general < 0 || split.reserve < 0 {
                return Err(DomainError::validation("split quantities cannot be negative"));
            }
            if split.total() != l.line.requested_quantity {
                return Err(DomainError::validation(format!(
                    "split for line {} does not cover the requested quantity",
                    l.line.line_no
                )));
            }
        }

        Ok(vec![TransferEvent::Approved(TransferApproved {
            approver: cmd.approver,
            splits: cmd.splits.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_commander_approve(
        &self,
        cmd: &CommanderApprove,
    ) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_created()?;
        self.approval_state()?.commander_approve()?;

        Ok(vec![TransferEvent::CommanderApproved(
            TransferCommanderApproved {
                approver: cmd.approver,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_reject(&self, cmd: &Reject) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_created()?;
        self.approval_state()?.reject()?;

        Ok(vec![TransferEvent::Rejected(TransferRejected {
            approver: cmd.approver,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_commander_reject(
        &self,
        cmd: &CommanderReject,
    ) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_created()?;
        self.approval_state()?.commander_reject()?;

        Ok(vec![TransferEvent::CommanderRejected(
            TransferCommanderRejected {
                approver: cmd.approver,
                reason: cmd.reason.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_cancel(&self, cmd: &Cancel) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_created()?;
        // Ship is the point of no return; approval_state() is None from
        // InTransit on, so cancel is rejected there.
        self.approval_state()?.cancel()?;

        Ok(vec![TransferEvent::Cancelled(TransferCancelled {
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_ship(&self, cmd: &Ship) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_created()?;

        match self.status {
            TransferStatus::Approved | TransferStatus::CommanderApproved => {}
            TransferStatus::PendingCommanderApproval => {
                return Err(DomainError::authorization_required(
                    "commander approval pending for reserve-sourced lines",
                ));
            }
            other => {
                return Err(DomainError::invalid_transition(format!(
                    "cannot ship from {other:?}"
                )));
            }
        }

        if cmd.shipments.is_empty() {
            return Err(DomainError::validation("ship requires at least one line"));
        }
        for shipment in &cmd.shipments {
            let l = self
                .lines
                .iter()
                .find(|l| l.line.line_no == shipment.line_no)
                .ok_or_else(|| {
                    DomainError::validation(format!("unknown line {}", shipment.line_no))
                })?;
            if shipment.quantity <= 0 {
                return Err(DomainError::validation("shipped quantity must be positive"));
            }
            if shipment.quantity > l.line.approved_quantity {
                return Err(DomainError::validation(format!(
                    "line {} would ship more than approved",
                    shipment.line_no
                )));
            }
        }

        Ok(vec![TransferEvent::Shipped(TransferShipped {
            shipments: cmd.shipments.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &Receive) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_created()?;
        if self.status != TransferStatus::InTransit {
            return Err(DomainError::invalid_transition(format!(
                "cannot receive from {:?}",
                self.status
            )));
        }

        let mut shrinkage = Vec::new();
        for l in &self.lines {
            let shipped = l.shipped_quantity();
            if shipped == 0 {
                continue;
            }
            let received = cmd
                .receipts
                .iter()
                .find(|r| r.line_no == l.line.line_no)
                .map(|r| r.quantity)
                .unwrap_or(0);
            if received < 0 || received > shipped {
                return Err(DomainError::validation(format!(
                    "line {} receipt must be between 0 and the shipped quantity",
                    l.line.line_no
                )));
            }
            if shipped - received > 0 {
                shrinkage.push(LineIssue {
                    line_no: l.line.line_no,
                    quantity: shipped - received,
                });
            }
        }

        Ok(vec![TransferEvent::Received(TransferReceived {
            receipts: cmd.receipts.clone(),
            shrinkage,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(t: &mut Transfer, cmd: TransferCommand) -> Vec<TransferEvent> {
        let events = t.handle(&cmd).unwrap();
        for e in &events {
            t.apply(e);
        }
        events
    }

    fn approved_transfer(quantity: i64) -> Transfer {
        let id = TransferId::new(AggregateId::new());
        let mut t = Transfer::empty(id);
        drive(
            &mut t,
            TransferCommand::Create(CreateTransfer {
                transfer_id: id,
                number: "TRF-001".into(),
                source_warehouse: WarehouseId::new(),
                destination_warehouse: WarehouseId::new(),
                requester: UserId::new(),
                occurred_at: Utc::now(),
            }),
        );
        drive(
            &mut t,
            TransferCommand::AddLine(AddLine {
                item_id: ItemId::new(),
                quantity,
                occurred_at: Utc::now(),
            }),
        );
        drive(
            &mut t,
            TransferCommand::Submit(Submit {
                occurred_at: Utc::now(),
            }),
        );
        drive(
            &mut t,
            TransferCommand::Approve(Approve {
                approver: UserId::new(),
                splits: vec![LineSplit {
                    line_no: 1,
                    general: quantity,
                    reserve: 0,
                }],
                occurred_at: Utc::now(),
            }),
        );
        t
    }

    #[test]
    fn same_warehouse_transfer_is_rejected() {
        let id = TransferId::new(AggregateId::new());
        let warehouse = WarehouseId::new();
        let t = Transfer::empty(id);
        let err = t
            .handle(&TransferCommand::Create(CreateTransfer {
                transfer_id: id,
                number: "TRF-002".into(),
                source_warehouse: warehouse,
                destination_warehouse: warehouse,
                requester: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn ship_then_receive_records_shrinkage() {
        let mut t = approved_transfer(10);
        drive(
            &mut t,
            TransferCommand::Ship(Ship {
                shipments: vec![LineIssue {
                    line_no: 1,
                    quantity: 10,
                }],
                occurred_at: Utc::now(),
            }),
        );
        assert_eq!(t.status(), TransferStatus::InTransit);

        let events = drive(
            &mut t,
            TransferCommand::Receive(Receive {
                receipts: vec![LineIssue {
                    line_no: 1,
                    quantity: 8,
                }],
                occurred_at: Utc::now(),
            }),
        );
        assert_eq!(t.status(), TransferStatus::Received);
        match &events[0] {
            TransferEvent::Received(e) => {
                assert_eq!(e.shrinkage.len(), 1);
                assert_eq!(e.shrinkage[0].quantity, 2);
            }
            other => panic!("expected Received, got {other:?}"),
        }
        assert_eq!(t.lines()[0].shrinkage(), 2);
    }

    #[test]
    fn cannot_receive_more_than_shipped() {
        let mut t = approved_transfer(10);
        drive(
            &mut t,
            TransferCommand::Ship(Ship {
                shipments: vec![LineIssue {
                    line_no: 1,
                    quantity: 10,
                }],
                occurred_at: Utc::now(),
            }),
        );

        let err = t
            .handle(&TransferCommand::Receive(Receive {
                receipts: vec![LineIssue {
                    line_no: 1,
                    quantity: 11,
                }],
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn cancel_is_blocked_once_in_transit() {
        let mut t = approved_transfer(5);
        assert!(
            t.handle(&TransferCommand::Cancel(Cancel {
                occurred_at: Utc::now(),
            }))
            .is_ok()
        );

        drive(
            &mut t,
            TransferCommand::Ship(Ship {
                shipments: vec![LineIssue {
                    line_no: 1,
                    quantity: 5,
                }],
                occurred_at: Utc::now(),
            }),
        );
        let err = t
            .handle(&TransferCommand::Cancel(Cancel {
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition(_)));
    }

    #[test]
    fn reserve_sourced_transfer_waits_for_commander() {
        let id = TransferId::new(AggregateId::new());
        let mut t = Transfer::empty(id);
        drive(
            &mut t,
            TransferCommand::Create(CreateTransfer {
                transfer_id: id,
                number: "TRF-003".into(),
                source_warehouse: WarehouseId::new(),
                destination_warehouse: WarehouseId::new(),
                requester: UserId::new(),
                occurred_at: Utc::now(),
            }),
        );
        drive(
            &mut t,
            TransferCommand::AddLine(AddLine {
                item_id: ItemId::new(),
                quantity: 20,
                occurred_at: Utc::now(),
            }),
        );
        drive(
            &mut t,
            TransferCommand::Submit(Submit {
                occurred_at: Utc::now(),
            }),
        );
        drive(
            &mut t,
            TransferCommand::Approve(Approve {
                approver: UserId::new(),
                splits: vec![LineSplit {
                    line_no: 1,
                    general: 15,
                    reserve: 5,
                }],
                occurred_at: Utc::now(),
            }),
        );
        assert_eq!(t.status(), TransferStatus::PendingCommanderApproval);

        let err = t
            .handle(&TransferCommand::Ship(Ship {
                shipments: vec![LineIssue {
                    line_no: 1,
                    quantity: 20,
                }],
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::AuthorizationRequired(_)));
    }
}
