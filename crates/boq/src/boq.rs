use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use depot_approval::{ApprovalState, DocumentLine, LineIssue, LineSplit, ensure_submittable};
use depot_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, ItemId, UserId, WarehouseId,
};
use depot_events::Event;

/// BOQ identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoqId(pub AggregateId);

impl BoqId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for BoqId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Identifier of the project a BOQ belongs to (owned by the external
/// project subsystem; opaque here).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub Uuid);

impl ProjectId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

/// BOQ status. Each document gets exactly one issue attempt:
/// `PartiallyIssued` and `FullyIssued` are both terminal, the backlog of a
/// partial issue lives on in the spawned remainder BOQ.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoqStatus {
    Draft,
    Submitted,
    Approved,
    PendingCommanderApproval,
    CommanderApproved,
    Rejected,
    CommanderRejected,
    Cancelled,
    PartiallyIssued,
    FullyIssued,
}

impl BoqStatus {
    pub fn approval(self) -> Option<ApprovalState> {
        match self {
            BoqStatus::Draft => Some(ApprovalState::Draft),
            BoqStatus::Submitted => Some(ApprovalState::Submitted),
            BoqStatus::Approved => Some(ApprovalState::Approved),
            BoqStatus::PendingCommanderApproval => Some(ApprovalState::PendingCommanderApproval),
            BoqStatus::CommanderApproved => Some(ApprovalState::CommanderApproved),
            BoqStatus::Rejected => Some(ApprovalState::Rejected),
            BoqStatus::CommanderRejected => Some(ApprovalState::CommanderRejected),
            BoqStatus::Cancelled => Some(ApprovalState::Cancelled),
            BoqStatus::PartiallyIssued | BoqStatus::FullyIssued => None,
        }
    }
}

/// One short-fallen line carried into a remainder BOQ.
///
/// The carry split preserves the allocation that is still live on the
/// ledger record: `general_carry + reserve_carry` equals the unissued
/// quantity, and `reserve_carry` is the already-granted commander-reserve
/// authorization for the unissued portion; it is never re-requested.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemainderLine {
    pub item_id: ItemId,
    pub general_carry: i64,
    pub reserve_carry: i64,
}

impl RemainderLine {
    pub fn requested(&self) -> i64 {
        self.general_carry + self.reserve_carry
    }
}

/// Aggregate root: Boq.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boq {
    id: BoqId,
    number: String,
    project_id: Option<ProjectId>,
    warehouse_id: Option<WarehouseId>,
    requester: Option<UserId>,
    approver: Option<UserId>,
    lines: Vec<DocumentLine>,
    status: BoqStatus,
    original_boq_id: Option<BoqId>,
    is_remaining: bool,
    remainder_boq_id: Option<BoqId>,
    version: u64,
    created: bool,
}

impl Boq {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: BoqId) -> Self {
        Self {
            id,
            number: String::new(),
            project_id: None,
            warehouse_id: None,
            requester: None,
            approver: None,
            lines: Vec::new(),
            status: BoqStatus::Draft,
            original_boq_id: None,
            is_remaining: false,
            remainder_boq_id: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> BoqId {
        self.id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn status(&self) -> BoqStatus {
        self.status
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn project_id(&self) -> Option<ProjectId> {
        self.project_id
    }

    pub fn lines(&self) -> &[DocumentLine] {
        &self.lines
    }

    /// Parent document in the remainder chain, if this is a remainder BOQ.
    pub fn original_boq_id(&self) -> Option<BoqId> {
        self.original_boq_id
    }

    pub fn is_remaining(&self) -> bool {
        self.is_remaining
    }

    /// Remainder spawned by this document's issue attempt, if any.
    pub fn remainder_boq_id(&self) -> Option<BoqId> {
        self.remainder_boq_id
    }

    pub fn requires_commander_reserve(&self) -> bool {
        depot_approval::requires_commander_reserve(&self.lines)
    }
}

impl AggregateRoot for Boq {
    type Id = BoqId;

    fn id(&self) -> &BoqId {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateBoq (an original submission).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBoq {
    pub boq_id: BoqId,
    pub number: String,
    pub project_id: ProjectId,
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

/// Command: Submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submit {
    pub occurred_at: DateTime<Utc>,
}

/// Command: primary approval with planned splits.
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

/// Command: Cancel (before the issue attempt).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {
    pub occurred_at: DateTime<Utc>,
}

/// Command: the single issue attempt. `issues` carries what can actually be
/// committed per line (computed against the live records); a line with no
/// issuable stock is omitted. `remainder_boq_id` names the document the
/// service will spawn for the shortfall, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub issues: Vec<LineIssue>,
    pub remainder_boq_id: Option<BoqId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: create a remainder BOQ carrying a shortfall forward. Starts
/// directly in the approved stage; the carried authorization already
/// covered the full original quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRemainder {
    pub boq_id: BoqId,
    pub original_boq_id: BoqId,
    pub number: String,
    pub project_id: ProjectId,
    pub warehouse_id: WarehouseId,
    pub requester: UserId,
    pub lines: Vec<RemainderLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoqCommand {
    Create(CreateBoq),
    CreateRemainder(CreateRemainder),
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
pub struct BoqCreated {
    pub boq_id: BoqId,
    pub number: String,
    pub project_id: ProjectId,
    pub warehouse_id: WarehouseId,
    pub requester: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoqRemainderCreated {
    pub boq_id: BoqId,
    pub original_boq_id: BoqId,
    pub number: String,
    pub project_id: ProjectId,
    pub warehouse_id: WarehouseId,
    pub requester: UserId,
    pub lines: Vec<RemainderLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoqLineAdded {
    pub line_no: u32,
    pub item_id: ItemId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoqSubmitted {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoqApproved {
    pub approver: UserId,
    pub splits: Vec<LineSplit>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoqCommanderApproved {
    pub approver: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoqRejected {
    pub approver: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoqCommanderRejected {
    pub approver: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoqCancelled {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoqIssued {
    pub issues: Vec<LineIssue>,
    pub remainder: Vec<RemainderLine>,
    pub remainder_boq_id: Option<BoqId>,
    pub fully_issued: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoqEvent {
    Created(BoqCreated),
    RemainderCreated(BoqRemainderCreated),
    LineAdded(BoqLineAdded),
    Submitted(BoqSubmitted),
    Approved(BoqApproved),
    CommanderApproved(BoqCommanderApproved),
    Rejected(BoqRejected),
    CommanderRejected(BoqCommanderRejected),
    Cancelled(BoqCancelled),
    Issued(BoqIssued),
}

impl Event for BoqEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BoqEvent::Created(_) => "boq.created",
            BoqEvent::RemainderCreated(_) => "boq.remainder_created",
            BoqEvent::LineAdded(_) => "boq.line_added",
            BoqEvent::Submitted(_) => "boq.submitted",
            BoqEvent::Approved(_) => "boq.approved",
            BoqEvent::CommanderApproved(_) => "boq.commander_approved",
            BoqEvent::Rejected(_) => "boq.rejected",
            BoqEvent::CommanderRejected(_) => "boq.commander_rejected",
            BoqEvent::Cancelled(_) => "boq.cancelled",
            BoqEvent::Issued(_) => "boq.issued",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BoqEvent::Created(e) => e.occurred_at,
            BoqEvent::RemainderCreated(e) => e.occurred_at,
            BoqEvent::LineAdded(e) => e.occurred_at,
            BoqEvent::Submitted(e) => e.occurred_at,
            BoqEvent::Approved(e) => e.occurred_at,
            BoqEvent::CommanderApproved(e) => e.occurred_at,
            BoqEvent::Rejected(e) => e.occurred_at,
            BoqEvent::CommanderRejected(e) => e.occurred_at,
            BoqEvent::Cancelled(e) => e.occurred_at,
            BoqEvent::Issued(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Boq {
    type Command = BoqCommand;
    type Event = BoqEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BoqEvent::Created(e) => {
                self.id = e.boq_id;
                self.number = e.number.clone();
                self.project_id = Some(e.project_id);
                self.warehouse_id = Some(e.warehouse_id);
                self.requester = Some(e.requester);
                self.status = BoqStatus::Draft;
                self.lines.clear();
                self.created = true;
            }
            BoqEvent::RemainderCreated(e) => {
                self.id = e.boq_id;
                self.number = e.number.clone();
                self.project_id = Some(e.project_id);
                self.warehouse_id = Some(e.warehouse_id);
                self.requester = Some(e.requester);
                self.original_boq_id = Some(e.original_boq_id);
                self.is_remaining = true;
                self.lines.clear();
                let mut any_reserve = false;
                for (idx, r) in e.lines.iter().enumerate() {
                    let mut line = DocumentLine::new((idx as u32) + 1, r.item_id, r.requested());
                    line.approve_split(r.general_carry, r.reserve_carry);
                    any_reserve |= r.reserve_carry > 0;
                    self.lines.push(line);
                }
                // Authorization was granted on the original; the remainder
                // re-enters fulfillment directly.
                self.status = if any_reserve {
                    BoqStatus::CommanderApproved
                } else {
                    BoqStatus::Approved
                };
                self.created = true;
            }
            BoqEvent::LineAdded(e) => {
                self.lines
                    .push(DocumentLine::new(e.line_no, e.item_id, e.quantity));
            }
            BoqEvent::Submitted(_) => {
                self.status = BoqStatus::Submitted;
            }
            BoqEvent::Approved(e) => {
                self.approver = Some(e.approver);
                for split in &e.splits {
                    if let Some(line) =
                        self.lines.iter_mut().find(|l| l.line_no == split.line_no)
                    {
                        line.approve_split(split.general, split.reserve);
                    }
                }
                self.status = if self.requires_commander_reserve() {
                    BoqStatus::PendingCommanderApproval
                } else {
                    BoqStatus::Approved
                };
            }
            BoqEvent::CommanderApproved(_) => {
                self.status = BoqStatus::CommanderApproved;
            }
            BoqEvent::Rejected(_) => {
                self.status = BoqStatus::Rejected;
            }
            BoqEvent::CommanderRejected(_) => {
                self.status = BoqStatus::CommanderRejected;
            }
            BoqEvent::Cancelled(_) => {
                self.status = BoqStatus::Cancelled;
            }
            BoqEvent::Issued(e) => {
                for issue in &e.issues {
                    if let Some(line) =
                        self.lines.iter_mut().find(|l| l.line_no == issue.line_no)
                    {
                        line.issued_quantity += issue.quantity;
                    }
                }
                self.remainder_boq_id = e.remainder_boq_id;
                self.status = if e.fully_issued {
                    BoqStatus::FullyIssued
                } else {
                    BoqStatus::PartiallyIssued
                };
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BoqCommand::Create(cmd) => self.handle_create(cmd),
            BoqCommand::CreateRemainder(cmd) => self.handle_create_remainder(cmd),
            BoqCommand::AddLine(cmd) => self.handle_add_line(cmd),
            BoqCommand::Submit(cmd) => self.handle_submit(cmd),
            BoqCommand::Approve(cmd) => self.handle_approve(cmd),
            BoqCommand::CommanderApprove(cmd) => self.handle_commander_approve(cmd),
            BoqCommand::Reject(cmd) => self.handle_reject(cmd),
            BoqCommand::CommanderReject(cmd) => self.handle_commander_reject(cmd),
            BoqCommand::Cancel(cmd) => self.handle_cancel(cmd),
            BoqCommand::Issue(cmd) => self.handle_issue(cmd),
        }
    }
}

impl Boq {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn approval_state(&self) -> Result<ApprovalState, DomainError> {
        self.status.approval().ok_or_else(|| {
            DomainError::invalid_transition(format!("BOQ is already issued ({:?})", self.status))
        })
    }

    fn handle_create(&self, cmd: &CreateBoq) -> Result<Vec<BoqEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("BOQ already exists"));
        }
        if cmd.number.trim().is_empty() {
            return Err(DomainError::validation("BOQ number cannot be empty"));
        }
        Ok(vec![BoqEvent::Created(BoqCreated {
            boq_id: cmd.boq_id,
            number: cmd.number.clone(),
            project_id: cmd.project_id,
            warehouse_id: cmd.warehouse_id,
            requester: cmd.requester,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_create_remainder(
        &self,
        cmd: &CreateRemainder,
    ) -> Result<Vec<BoqEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("BOQ already exists"));
        }
        if cmd.boq_id == cmd.original_boq_id {
            return Err(DomainError::invariant(
                "a remainder BOQ cannot reference itself",
            ));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "a remainder BOQ needs at least one line",
            ));
        }
        for r in &cmd.lines {
            if r.general_carry < 0 || r.reserve_carry < 0 || r.requested() == 0 {
                return Err(DomainError::validation(
                    "remainder lines must carry a positive quantity",
                ));
            }
        }

        Ok(vec![BoqEvent::RemainderCreated(BoqRemainderCreated {
            boq_id: cmd.boq_id,
            original_boq_id: cmd.original_boq_id,
            number: cmd.number.clone(),
            project_id: cmd.project_id,
            warehouse_id: cmd.warehouse_id,
            requester: cmd.requester,
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<BoqEvent>, DomainError> {
        self.ensure_created()?;
        if self.status != BoqStatus::Draft {
            return Err(DomainError::invalid_transition(
                "lines can only be added to a draft BOQ",
            ));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        let next_line_no = (self.lines.len() as u32) + 1;
        Ok(vec![BoqEvent::LineAdded(BoqLineAdded {
            line_no: next_line_no,
            item_id: cmd.item_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &Submit) -> Result<Vec<BoqEvent>, DomainError> {
        self.ensure_created()?;
        self.approval_state()?.submit()?;
        ensure_submittable(&self.lines)?;

        Ok(vec![BoqEvent::Submitted(BoqSubmitted {
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &Approve) -> Result<Vec<BoqEvent>, DomainError> {
        self.ensure_created()?;
        let needs_commander = cmd.splits.iter().any(|s| s.reserve > 0);
        self.approval_state()?.approve(needs_commander)?;

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
            if split.total() != line.requested_quantity {
                return Err(DomainError::validation(format!(
                    "split for line {} does not cover the requested quantity",
                    line.line_no
                )));
            }
        }

        Ok(vec![BoqEvent::Approved(BoqApproved {
            approver: cmd.approver,
            splits: cmd.splits.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_commander_approve(
        &self,
        cmd: &CommanderApprove,
    ) -> Result<Vec<BoqEvent>, DomainError> {
        self.ensure_created()?;
        self.approval_state()?.commander_approve()?;

        Ok(vec![BoqEvent::CommanderApproved(BoqCommanderApproved {
            approver: cmd.approver,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &Reject) -> Result<Vec<BoqEvent>, DomainError> {
        self.ensure_created()?;
        self.approval_state()?.reject()?;

        Ok(vec![BoqEvent::Rejected(BoqRejected {
            approver: cmd.approver,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_commander_reject(
        &self,
        cmd: &CommanderReject,
    ) -> Result<Vec<BoqEvent>, DomainError> {
        self.ensure_created()?;
        self.approval_state()?.commander_reject()?;

        Ok(vec![BoqEvent::CommanderRejected(BoqCommanderRejected {
            approver: cmd.approver,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &Cancel) -> Result<Vec<BoqEvent>, DomainError> {
        self.ensure_created()?;
        self.approval_state()?.cancel()?;

        Ok(vec![BoqEvent::Cancelled(BoqCancelled {
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_issue(&self, cmd: &Issue) -> Result<Vec<BoqEvent>, DomainError> {
        self.ensure_created()?;

        match self.status {
            BoqStatus::Approved | BoqStatus::CommanderApproved => {}
            BoqStatus::PendingCommanderApproval => {
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

        // Validate the issue set and compute the remainder in one pass.
        let mut remainder = Vec::new();
        let mut fully_issued = true;
        for line in &self.lines {
            let issued = cmd
                .issues
                .iter()
                .find(|i| i.line_no == line.line_no)
                .map(|i| i.quantity)
                .unwrap_or(0);
            if issued < 0 || issued > line.approved_quantity {
                return Err(DomainError::validation(format!(
                    "line {} issue must be between 0 and the approved quantity",
                    line.line_no
                )));
            }

            let shortfall = line.approved_quantity - issued;
            if shortfall > 0 {
                fully_issued = false;
                // The unissued portions of both pool allocations stay live
                // on the ledger record and are carried, not re-requested.
                let (from_general, from_reserve) = line.issue_split(issued);
                remainder.push(RemainderLine {
                    item_id: line.item_id,
                    general_carry: line.general_allocation - from_general,
                    reserve_carry: line.commander_reserve_quantity - from_reserve,
                });
            }
        }

        if !fully_issued && cmd.remainder_boq_id.is_none() {
            return Err(DomainError::invariant(
                "partial issue requires a remainder BOQ id",
            ));
        }

        Ok(vec![BoqEvent::Issued(BoqIssued {
            issues: cmd.issues.clone(),
            remainder,
            remainder_boq_id: if fully_issued {
                None
            } else {
                cmd.remainder_boq_id
            },
            fully_issued,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(boq: &mut Boq, cmd: BoqCommand) -> Vec<BoqEvent> {
        let events = boq.handle(&cmd).unwrap();
        for e in &events {
            boq.apply(e);
        }
        events
    }

    fn approved_boq(quantities: &[i64]) -> Boq {
        let id = BoqId::new(AggregateId::new());
        let mut boq = Boq::empty(id);
        drive(
            &mut boq,
            BoqCommand::Create(CreateBoq {
                boq_id: id,
                number: "BOQ-001".into(),
                project_id: ProjectId::new(),
                warehouse_id: WarehouseId::new(),
                requester: UserId::new(),
                occurred_at: Utc::now(),
            }),
        );
        for &q in quantities {
            drive(
                &mut boq,
                BoqCommand::AddLine(AddLine {
                    item_id: ItemId::new(),
                    quantity: q,
                    occurred_at: Utc::now(),
                }),
            );
        }
        drive(
            &mut boq,
            BoqCommand::Submit(Submit {
                occurred_at: Utc::now(),
            }),
        );
        let splits = quantities
            .iter()
            .enumerate()
            .map(|(i, &q)| LineSplit {
                line_no: (i as u32) + 1,
                general: q,
                reserve: 0,
            })
            .collect();
        drive(
            &mut boq,
            BoqCommand::Approve(Approve {
                approver: UserId::new(),
                splits,
                occurred_at: Utc::now(),
            }),
        );
        boq
    }

    #[test]
    fn full_issue_spawns_no_remainder() {
        let mut boq = approved_boq(&[10]);
        let events = drive(
            &mut boq,
            BoqCommand::Issue(Issue {
                issues: vec![LineIssue {
                    line_no: 1,
                    quantity: 10,
                }],
                remainder_boq_id: None,
                occurred_at: Utc::now(),
            }),
        );
        assert_eq!(boq.status(), BoqStatus::FullyIssued);
        match &events[0] {
            BoqEvent::Issued(e) => {
                assert!(e.fully_issued);
                assert!(e.remainder.is_empty());
                assert!(e.remainder_boq_id.is_none());
            }
            other => panic!("expected Issued, got {other:?}"),
        }
    }

    #[test]
    fn partial_issue_computes_remainder_lines_omitting_full_ones() {
        // Requested [10, 5], issuable [6, 5] → remainder [4], zero lines omitted.
        let mut boq = approved_boq(&[10, 5]);
        let remainder_id = BoqId::new(AggregateId::new());
        let events = drive(
            &mut boq,
            BoqCommand::Issue(Issue {
                issues: vec![
                    LineIssue {
                        line_no: 1,
                        quantity: 6,
                    },
                    LineIssue {
                        line_no: 2,
                        quantity: 5,
                    },
                ],
                remainder_boq_id: Some(remainder_id),
                occurred_at: Utc::now(),
            }),
        );
        assert_eq!(boq.status(), BoqStatus::PartiallyIssued);
        match &events[0] {
            BoqEvent::Issued(e) => {
                assert!(!e.fully_issued);
                assert_eq!(e.remainder.len(), 1);
                assert_eq!(e.remainder[0].requested(), 4);
                assert_eq!(e.remainder_boq_id, Some(remainder_id));
            }
            other => panic!("expected Issued, got {other:?}"),
        }
    }

    #[test]
    fn remainder_carries_unissued_reserve_authorization() {
        let id = BoqId::new(AggregateId::new());
        let mut boq = Boq::empty(id);
        drive(
            &mut boq,
            BoqCommand::Create(CreateBoq {
                boq_id: id,
                number: "BOQ-002".into(),
                project_id: ProjectId::new(),
                warehouse_id: WarehouseId::new(),
                requester: UserId::new(),
                occurred_at: Utc::now(),
            }),
        );
        drive(
            &mut boq,
            BoqCommand::AddLine(AddLine {
                item_id: ItemId::new(),
                quantity: 20,
                occurred_at: Utc::now(),
            }),
        );
        drive(
            &mut boq,
            BoqCommand::Submit(Submit {
                occurred_at: Utc::now(),
            }),
        );
        drive(
            &mut boq,
            BoqCommand::Approve(Approve {
                approver: UserId::new(),
                splits: vec![LineSplit {
                    line_no: 1,
                    general: 12,
                    reserve: 8,
                }],
                occurred_at: Utc::now(),
            }),
        );
        drive(
            &mut boq,
            BoqCommand::CommanderApprove(CommanderApprove {
                approver: UserId::new(),
                occurred_at: Utc::now(),
            }),
        );

        // Issue 15: 12 from general, 3 from reserve; 5 of reserve carry on.
        let remainder_id = BoqId::new(AggregateId::new());
        let events = drive(
            &mut boq,
            BoqCommand::Issue(Issue {
                issues: vec![LineIssue {
                    line_no: 1,
                    quantity: 15,
                }],
                remainder_boq_id: Some(remainder_id),
                occurred_at: Utc::now(),
            }),
        );
        match &events[0] {
            BoqEvent::Issued(e) => {
                assert_eq!(e.remainder[0].general_carry, 0);
                assert_eq!(e.remainder[0].reserve_carry, 5);
            }
            other => panic!("expected Issued, got {other:?}"),
        }
    }

    #[test]
    fn remainder_boq_starts_approved_and_links_to_parent() {
        let parent = BoqId::new(AggregateId::new());
        let id = BoqId::new(AggregateId::new());
        let mut boq = Boq::empty(id);
        drive(
            &mut boq,
            BoqCommand::CreateRemainder(CreateRemainder {
                boq_id: id,
                original_boq_id: parent,
                number: "BOQ-001-R1".into(),
                project_id: ProjectId::new(),
                warehouse_id: WarehouseId::new(),
                requester: UserId::new(),
                lines: vec![RemainderLine {
                    item_id: ItemId::new(),
                    general_carry: 4,
                    reserve_carry: 0,
                }],
                occurred_at: Utc::now(),
            }),
        );

        assert_eq!(boq.status(), BoqStatus::Approved);
        assert!(boq.is_remaining());
        assert_eq!(boq.original_boq_id(), Some(parent));
        assert_eq!(boq.lines()[0].approved_quantity, 4);
    }

    #[test]
    fn remainder_with_reserve_carry_starts_commander_approved() {
        let parent = BoqId::new(AggregateId::new());
        let id = BoqId::new(AggregateId::new());
        let mut boq = Boq::empty(id);
        drive(
            &mut boq,
            BoqCommand::CreateRemainder(CreateRemainder {
                boq_id: id,
                original_boq_id: parent,
                number: "BOQ-002-R1".into(),
                project_id: ProjectId::new(),
                warehouse_id: WarehouseId::new(),
                requester: UserId::new(),
                lines: vec![RemainderLine {
                    item_id: ItemId::new(),
                    general_carry: 0,
                    reserve_carry: 5,
                }],
                occurred_at: Utc::now(),
            }),
        );

        assert_eq!(boq.status(), BoqStatus::CommanderApproved);
    }

    #[test]
    fn remainder_cannot_reference_itself() {
        let id = BoqId::new(AggregateId::new());
        let boq = Boq::empty(id);
        let err = boq
            .handle(&BoqCommand::CreateRemainder(CreateRemainder {
                boq_id: id,
                original_boq_id: id,
                number: "BOQ-X".into(),
                project_id: ProjectId::new(),
                warehouse_id: WarehouseId::new(),
                requester: UserId::new(),
                lines: vec![RemainderLine {
                    item_id: ItemId::new(),
                    general_carry: 1,
                    reserve_carry: 0,
                }],
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn issued_boq_cannot_be_issued_again() {
        let mut boq = approved_boq(&[10]);
        drive(
            &mut boq,
            BoqCommand::Issue(Issue {
                issues: vec![LineIssue {
                    line_no: 1,
                    quantity: 10,
                }],
                remainder_boq_id: None,
                occurred_at: Utc::now(),
            }),
        );

        let err = boq
            .handle(&BoqCommand::Issue(Issue {
                issues: vec![LineIssue {
                    line_no: 1,
                    quantity: 1,
                }],
                remainder_boq_id: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition(_)));
    }
}
