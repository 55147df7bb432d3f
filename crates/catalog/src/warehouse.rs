use serde::{Deserialize, Serialize};
use uuid::Uuid;

use depot_core::{Entity, WarehouseId};

/// Warehouse classification.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseKind {
    Central,
    Factory,
}

/// A physical warehouse holding dual-pool stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub name: String,
    pub kind: WarehouseKind,
    /// Owning factory for factory warehouses. Reassignable: tying a
    /// warehouse to a factory forever is an operational decision, not an
    /// invariant.
    pub owning_factory: Option<Uuid>,
}

impl Warehouse {
    pub fn central(id: WarehouseId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: WarehouseKind::Central,
            owning_factory: None,
        }
    }

    pub fn factory(id: WarehouseId, name: impl Into<String>, factory: Uuid) -> Self {
        Self {
            id,
            name: name.into(),
            kind: WarehouseKind::Factory,
            owning_factory: Some(factory),
        }
    }

    pub fn set_owning_factory(&mut self, factory: Option<Uuid>) {
        self.owning_factory = factory;
    }
}

impl Entity for Warehouse {
    type Id = WarehouseId;

    fn id(&self) -> &WarehouseId {
        &self.id
    }
}
