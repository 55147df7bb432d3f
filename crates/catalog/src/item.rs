use serde::{Deserialize, Serialize};

use depot_core::{Entity, ItemId};

/// Unit a stock quantity is counted in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitOfMeasure {
    Piece,
    Kilogram,
    Liter,
    Meter,
    Box,
    /// Free-form unit for items none of the fixed variants cover.
    Other(String),
}

/// Catalog item referenced by ledger records, document lines and custody.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub unit: UnitOfMeasure,
    pub reorder_point: i64,
    pub minimum_stock: i64,
    /// Target fraction of stock held in the commander's reserve, in percent.
    pub reserve_percentage: u8,
    pub is_critical: bool,
}

impl Item {
    pub fn new(id: ItemId, name: impl Into<String>, unit: UnitOfMeasure) -> Self {
        Self {
            id,
            name: name.into(),
            unit,
            reorder_point: 0,
            minimum_stock: 0,
            reserve_percentage: 0,
            is_critical: false,
        }
    }

    pub fn with_thresholds(mut self, reorder_point: i64, minimum_stock: i64) -> Self {
        self.reorder_point = reorder_point;
        self.minimum_stock = minimum_stock;
        self
    }

    pub fn with_reserve_percentage(mut self, pct: u8) -> Self {
        self.reserve_percentage = pct;
        self
    }

    pub fn critical(mut self) -> Self {
        self.is_critical = true;
        self
    }
}

impl Entity for Item {
    type Id = ItemId;

    fn id(&self) -> &ItemId {
        &self.id
    }
}
