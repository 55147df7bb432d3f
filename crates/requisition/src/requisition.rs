use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use depot_approval::{ApprovalState, DocumentLine, LineIssue, LineSplit, ensure_submittable};
use depot_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, ItemId, UserId, WarehouseId,
};
use depot_events::Event;

/// Requisition identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequisitionId(pub AggregateId);

impl RequisitionId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for RequisitionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Requisition status: the shared approval lifecycle plus fulfillment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequisitionStatus {
    Draft,
    Submitted,
    Approved,
    PendingCommanderApproval,
    CommanderApproved,
    Rejected,
    CommanderRejected,
    Cancelled,
    PartiallyFulfilled,
    Completed,
}

impl RequisitionStatus {
    /// The approval-phase view of this status, if still in that phase.
    pub fn approval(self) -> Option<ApprovalState> {
        match self {
            RequisitionStatus::Draft => Some(ApprovalState::Draft),
            RequisitionStatus::Submitted => Some(ApprovalState::Submitted),
            RequisitionStatus::Approved => Some(ApprovalState::Approved),
            RequisitionStatus::PendingCommanderApproval => {
                Some(ApprovalState::PendingCommanderApproval)
            }
            RequisitionStatus::CommanderApproved => Some(ApprovalState::CommanderApproved),
            RequisitionStatus::Rejected => Some(ApprovalState::Rejected),
            RequisitionStatus::CommanderRejected => Some(ApprovalState::CommanderRejected),
            RequisitionStatus::Cancelled => Some(ApprovalState::Cancelled),
            RequisitionStatus::PartiallyFulfilled | RequisitionStatus::Completed => None,
        }
    }

    fn from_approval(state: ApprovalState) -> Self {
        match state {
            ApprovalState::Draft => RequisitionStatus::Draft,
            ApprovalState::Submitted => RequisitionStatus::Submitted,
            ApprovalState::Approved => RequisitionStatus::Approved,
            ApprovalState::PendingCommanderApproval => RequisitionStatus::PendingCommanderApproval,
            ApprovalState::CommanderApproved => RequisitionStatus::CommanderApproved,
            ApprovalState::Rejected => RequisitionStatus::Rejected,
            ApprovalState::CommanderRejected => RequisitionStatus::CommanderRejected,
            ApprovalState::Cancelled => RequisitionStatus::Cancelled,
        }
    }
}

/// Aggregate root: Requisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requisition {
    id: RequisitionId,
    number: String,
    warehouse_id: Option<WarehouseId>,
    requester: Option<UserId>,
    approver: Option<UserId>,
    commander_approver: Option<UserId>,
    lines: Vec<DocumentLine>,
    status: RequisitionStatus,
    version: u64,
    created: bool,
}

impl Requisition {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: RequisitionId) -> Self {
        Self {
            id,
            number: String::new(),
            warehouse_id: None,
            requester: None,
            approver: None,
            commander_approver: None,
            lines: Vec::new(),
            status: RequisitionStatus::Draft,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> RequisitionId {
        self.id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn status(&self) -> RequisitionStatus {
        self.status
    }

    pub fn lines(&self) -> &[DocumentLine] {
        &self.lines
    }

    pub fn requires_commander_reserve(&self) -> bool {
        depot_approval::requires_commander_reserve(&self.lines)
    }
}

impl AggregateRoot for Requisition {
    type Id = RequisitionId;

    fn id(&self) -> &RequisitionId {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateRequisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequisition {
    pub requisition_id: RequisitionId,
    pub number: String,
    pub warehouse_id: WarehouseId,
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

/// Command: Submit for approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submit {
    pub occurred_at: DateTime<Utc>,
}

/// Command: primary approval, carrying the allocation splits the service
/// planned (and reserved) for every line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approve {
    pub approver: UserId,
    pub splits: Vec<LineSplit>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: commander-reserve approval (second stage, no new reservation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommanderApprove {
    pub approver: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: reject a submitted requisition.
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

/// Command: cancel before issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {
    pub occurred_at: DateTime<Utc>,
}

/// Command: issue stock against the approved lines. Quantities may fall
/// short of the approved amounts when on-hand stock dropped since approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub issues: Vec<LineIssue>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequisitionCommand {
    Create(CreateRequisition),
    AddLine(AddLine),
    Submit(Submit),
    Approve(Approve),
    CommanderApprove(CommanderApprove),
    Reject(Reject),
    CommanderReject(CommanderReject),
    Cancel(Cancel),
    Issue(Issue),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequisitionCreated {
    pub requisition_id: RequisitionId,
    pub number: String,
    pub warehouse_id: WarehouseId,
    pub requester: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub line_no: u32,
    pub item_id: ItemId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequisitionSubmitted {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequisitionApproved {
    pub approver: UserId,
    pub splits: Vec<LineSplit>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommanderApprovalGranted {
    pub approver: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequisitionRejected {
    pub approver: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommanderApprovalRefused {
    pub approver: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequisitionCancelled {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockIssued {
    pub issues: Vec<LineIssue>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequisitionEvent {
    Created(RequisitionCreated),
    LineAdded(LineAdded),
    Submitted(RequisitionSubmitted),
    Approved(RequisitionApproved),
    CommanderApprovalGranted(CommanderApprovalGranted),
    Rejected(RequisitionRejected),
    CommanderApprovalRefused(CommanderApprovalRefused),
    Cancelled(RequisitionCancelled),
    StockIssued(StockIssued),
}

impl Event for RequisitionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RequisitionEvent::Created(_) => "requisition.created",
            RequisitionEvent::LineAdded(_) => "requisition.line_added",
            RequisitionEvent::Submitted(_) => "requisition.submitted",
            RequisitionEvent::Approved(_) => "requisition.approved",
            RequisitionEvent::CommanderApprovalGranted(_) => "requisition.commander_approved",
            RequisitionEvent::Rejected(_) => "requisition.rejected",
            RequisitionEvent::CommanderApprovalRefused(_) => "requisition.commander_rejected",
            RequisitionEvent::Cancelled(_) => "requisition.cancelled",
            RequisitionEvent::StockIssued(_) => "requisition.stock_issued",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RequisitionEvent::Created(e) => e.occurred_at,
            RequisitionEvent::LineAdded(e) => e.occurred_at,
            RequisitionEvent::Submitted(e) => e.occurred_at,
            RequisitionEvent::Approved(e) => e.occurred_at,
            RequisitionEvent::CommanderApprovalGranted(e) => e.occurred_at,
            RequisitionEvent::Rejected(e) => e.occurred_at,
            RequisitionEvent::CommanderApprovalRefused(e) => e.occurred_at,
            RequisitionEvent::Cancelled(e) => e.occurred_at,
            RequisitionEvent::StockIssued(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Requisition {
    type Command = RequisitionCommand;
    type Event = RequisitionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RequisitionEvent::Created(e) => {
                self.id = e.requisition_id;
                self.number = e.number.clone();
                self.warehouse_id = Some(e.warehouse_id);
                self.requester = Some(e.requester);
                self.status = RequisitionStatus::Draft;
                self.lines.clear();
                self.created = true;
            }
            RequisitionEvent::LineAdded(e) => {
                self.lines
                    .push(DocumentLine::new(e.line_no, e.item_id, e.quantity));
            }
            RequisitionEvent::Submitted(_) => {
                self.status = RequisitionStatus::Submitted;
            }
            RequisitionEvent::Approved(e) => {
                self.approver = Some(e.approver);
                for split in &e.splits {
                    if let Some(line) =
                        self.lines.iter_mut().find(|l| l.line_no == split.line_no)
                    {
                        line.approve_split(split.general, split.reserve);
                    }
                }
                self.status = if self.requires_commander_reserve() {
                    RequisitionStatus::PendingCommanderApproval
                } else {
                    RequisitionStatus::Approved
                };
            }
            RequisitionEvent::CommanderApprovalGranted(e) => {
                self.commander_approver = Some(e.approver);
                self.status = RequisitionStatus::CommanderApproved;
            }
            RequisitionEvent::Rejected(_) => {
                self.status = RequisitionStatus::Rejected;
            }
            RequisitionEvent::CommanderApprovalRefused(_) => {
                self.status = RequisitionStatus::CommanderRejected;
            }
            RequisitionEvent::Cancelled(_) => {
                self.status = RequisitionStatus::Cancelled;
            }
            RequisitionEvent::StockIssued(e) => {
                for issue in &e.issues {
                    if let Some(line) =
                        self.lines.iter_mut().find(|l| l.line_no == issue.line_no)
                    {
                        line.issued_quantity += issue.quantity;
                    }
                }
                self.status = if self.lines.iter().all(|l| l.is_fulfilled()) {
                    RequisitionStatus::Completed
                } else {
                    RequisitionStatus::PartiallyFulfilled
                };
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RequisitionCommand::Create(cmd) => self.handle_create(cmd),
            RequisitionCommand::AddLine(cmd) => self.handle_add_line(cmd),
            RequisitionCommand::Submit(cmd) => self.handle_submit(cmd),
            RequisitionCommand::Approve(cmd) => self.handle_approve(cmd),
            RequisitionCommand::CommanderApprove(cmd) => self.handle_commander_approve(cmd),
            RequisitionCommand::Reject(cmd) => self.handle_reject(cmd),
            RequisitionCommand::CommanderReject(cmd) => self.handle_commander_reject(cmd),
            RequisitionCommand::Cancel(cmd) => self.handle_cancel(cmd),
            RequisitionCommand::Issue(cmd) => self.handle_issue(cmd),
        }
    }
}

impl Requisition {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn approval_state(&self) -> Result<ApprovalState, DomainError> {
        self.status.approval().ok_or_else(|| {
            DomainError::invalid_transition(format!(
                "requisition is already in fulfillment ({:?})",
                self.status
            ))
        })
    }

    fn handle_create(&self, cmd: &CreateRequisition) -> Result<Vec<RequisitionEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("requisition already exists"));
        }
        if cmd.number.trim().is_empty() {
            return Err(DomainError::validation("requisition number cannot be empty"));
        }
        Ok(vec![RequisitionEvent::Created(RequisitionCreated {
            requisition_id: cmd.requisition_id,
            number: cmd.number.clone(),
            warehouse_id: cmd.warehouse_id,
            requester: cmd.requester,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<RequisitionEvent>, DomainError> {
        self.ensure_created()?;
        if self.status != RequisitionStatus::Draft {
            return Err(DomainError::invalid_transition(
                "lines can only be added to a draft requisition",
            ));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        let next_line_no = (self.lines.len() as u32) + 1;
        Ok(vec![RequisitionEvent::LineAdded(LineAdded {
            line_no: next_line_no,
            item_id: cmd.item_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &Submit) -> Result<Vec<RequisitionEvent>, DomainError> {
        self.ensure_created()?;
        self.approval_state()?.submit()?;
        ensure_submittable(&self.lines)?;

        Ok(vec![RequisitionEvent::Submitted(RequisitionSubmitted {
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &Approve) -> Result<Vec<RequisitionEvent>, DomainError> {
        self.ensure_created()?;
        let needs_commander = cmd.splits.iter().any(|s| s.reserve > 0);
        self.approval_state()?.approve(needs_commander)?;

        // Every line must carry a split covering its full request.
        for line in &self.lines {
            let split = cmd
                .splits
                .iter()
                .find(|s| s.line_no == line.line_no)
                .ok_or_else(|| {
                    DomainError::validation(format!("missing split for line {}", line.line_no))
                })?;
            if split.general < 0 || split.reserve < 0 {
                return Err(DomainError::validation("split quantities cannot be negative"));
            }
            if split.general + split.reserve != line.requested_quantity {
                return Err(DomainError::validation(format!(
                    "split for line {} does not cover the requested quantity",
                    line.line_no
                )));
            }
        }

        Ok(vec![RequisitionEvent::Approved(RequisitionApproved {
            approver: cmd.approver,
            splits: cmd.splits.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_commander_approve(
        &self,
        cmd: &CommanderApprove,
    ) -> Result<Vec<RequisitionEvent>, DomainError> {
        self.ensure_created()?;
        self.approval_state()?.commander_approve()?;

        Ok(vec![RequisitionEvent::CommanderApprovalGranted(
            CommanderApprovalGranted {
                approver: cmd.approver,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_reject(&self, cmd: &Reject) -> Result<Vec<RequisitionEvent>, DomainError> {
        self.ensure_created()?;
        self.approval_state()?.reject()?;

        Ok(vec![RequisitionEvent::Rejected(RequisitionRejected {
            approver: cmd.approver,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_commander_reject(
        &self,
        cmd: &CommanderReject,
    ) -> Result<Vec<RequisitionEvent>, DomainError> {
        self.ensure_created()?;
        self.approval_state()?.commander_reject()?;

        Ok(vec![RequisitionEvent::CommanderApprovalRefused(
            CommanderApprovalRefused {
                approver: cmd.approver,
                reason: cmd.reason.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_cancel(&self, cmd: &Cancel) -> Result<Vec<RequisitionEvent>, DomainError> {
        self.ensure_created()?;
        self.approval_state()?.cancel()?;

        Ok(vec![RequisitionEvent::Cancelled(RequisitionCancelled {
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_issue(&self, cmd: &Issue) -> Result<Vec<RequisitionEvent>, DomainError> {
        self.ensure_created()?;

        match self.status {
            RequisitionStatus::Approved
            | RequisitionStatus::CommanderApproved
            | RequisitionStatus::PartiallyFulfilled => {}
            RequisitionStatus::PendingCommanderApproval => {
                return Err(DomainError::authorization_required(
                    "commander approval pending for reserve-sourced lines",
                ));
            }
            other => {
                return Err(DomainError::invalid_transition(format!(
                    "cannot issue from {other:?}"
                )));
            }
        }

        if cmd.issues.is_empty() {
            return Err(DomainError::validation("issue requires at least one line"));
        }

        for issue in &cmd.issues {
            let line = self
                .lines
                .iter()
                .find(|l| l.line_no == issue.line_no)
                .ok_or_else(|| {
                    DomainError::validation(format!("unknown line {}", issue.line_no))
                })?;
            if issue.quantity <= 0 {
                return Err(DomainError::validation("issued quantity must be positive"));
            }
            if issue.quantity > line.remaining() {
                return Err(DomainError::validation(format!(
                    "line {} would exceed its approved quantity",
                    issue.line_no
                )));
            }
        }

        Ok(vec![RequisitionEvent::StockIssued(StockIssued {
            issues: cmd.issues.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
