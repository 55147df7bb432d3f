use serde::{Deserialize, Serialize};

use depot_core::{DomainError, DomainResult, ItemId};

/// One item line of a requisition, transfer or BOQ.
///
/// The allocation split is recorded at approval time: `general_allocation`
/// plus `commander_reserve_quantity` equals `approved_quantity`. A line with
/// a non-zero reserve portion carries `is_from_commander_reserve` and holds
/// the whole document at the commander approval gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLine {
    pub line_no: u32,
    pub item_id: ItemId,
    pub requested_quantity: i64,
    pub approved_quantity: i64,
    pub issued_quantity: i64,
    pub general_allocation: i64,
    pub commander_reserve_quantity: i64,
    pub is_from_commander_reserve: bool,
}

impl DocumentLine {
    pub fn new(line_no: u32, item_id: ItemId, requested_quantity: i64) -> Self {
        Self {
            line_no,
            item_id,
            requested_quantity,
            approved_quantity: 0,
            issued_quantity: 0,
            general_allocation: 0,
            commander_reserve_quantity: 0,
            is_from_commander_reserve: false,
        }
    }

    /// Record the approval split. Approved quantity defaults to the full
    /// request; a capped approval may grant less.
    pub fn approve_split(&mut self, general: i64, reserve: i64) {
        self.approved_quantity = general + reserve;
        self.general_allocation = general;
        self.commander_reserve_quantity = reserve;
        self.is_from_commander_reserve = reserve > 0;
    }

    /// Quantity still owed after the issues so far.
    pub fn remaining(&self) -> i64 {
        self.approved_quantity - self.issued_quantity
    }

    pub fn is_fulfilled(&self) -> bool {
        self.approved_quantity > 0 && self.issued_quantity == self.approved_quantity
    }

    /// Split an issue quantity across the pools: the general allocation is
    /// drawn down first, the reserve portion covers the rest.
    ///
    /// Assumes cumulative issues never exceed the approved quantity (the
    /// aggregate guards that before calling).
    pub fn issue_split(&self, quantity: i64) -> (i64, i64) {
        let general_left = (self.general_allocation - self.issued_quantity).max(0);
        let from_general = quantity.min(general_left);
        (from_general, quantity - from_general)
    }

    /// Reserve authorization still unconsumed by issues (carried forward to
    /// remainder documents, never re-requested).
    pub fn unissued_reserve(&self) -> i64 {
        let issued_from_reserve = (self.issued_quantity - self.general_allocation).max(0);
        (self.commander_reserve_quantity - issued_from_reserve).max(0)
    }
}

/// Per-line allocation split decided at approval time by the services
/// (general first, shortfall from the commander's reserve).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSplit {
    pub line_no: u32,
    pub general: i64,
    pub reserve: i64,
}

impl LineSplit {
    pub fn total(&self) -> i64 {
        self.general + self.reserve
    }
}

/// Per-line quantity moved by one fulfillment round (issue, ship, receive).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineIssue {
    pub line_no: u32,
    pub quantity: i64,
}

/// True when any line draws on the commander's reserve.
pub fn requires_commander_reserve(lines: &[DocumentLine]) -> bool {
    lines.iter().any(|l| l.is_from_commander_reserve)
}

/// Submit guard: at least one line with a positive requested quantity.
pub fn ensure_submittable(lines: &[DocumentLine]) -> DomainResult<()> {
    if lines.iter().any(|l| l.requested_quantity > 0) {
        Ok(())
    } else {
        Err(DomainError::validation(
            "document needs at least one line with a positive quantity",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(requested: i64) -> DocumentLine {
        DocumentLine::new(1, ItemId::new(), requested)
    }

    #[test]
    fn approval_split_flags_reserve_lines() {
        let mut l = line(20);
        l.approve_split(10, 10);
        assert_eq!(l.approved_quantity, 20);
        assert!(l.is_from_commander_reserve);
        assert!(requires_commander_reserve(&[l]));
    }

    #[test]
    fn general_only_lines_do_not_trigger_commander_stage() {
        let mut l = line(5);
        l.approve_split(5, 0);
        assert!(!requires_commander_reserve(std::slice::from_ref(&l)));
    }

    #[test]
    fn issue_split_draws_general_first() {
        let mut l = line(20);
        l.approve_split(12, 8);

        assert_eq!(l.issue_split(10), (10, 0));

        l.issued_quantity = 10;
        assert_eq!(l.issue_split(6), (2, 4));

        l.issued_quantity = 16;
        assert_eq!(l.unissued_reserve(), 4);
    }

    #[test]
    fn empty_documents_cannot_be_submitted() {
        assert!(ensure_submittable(&[]).is_err());
        assert!(ensure_submittable(&[line(0)]).is_err());
        assert!(ensure_submittable(&[line(0), line(3)]).is_ok());
    }
}
