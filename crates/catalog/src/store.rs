//! In-memory catalog store (reference-data lookups for the services).

use std::collections::HashMap;
use std::sync::RwLock;

use depot_core::{DomainError, DomainResult, ItemId, WarehouseId};

use crate::{Item, SystemSettings, Warehouse};

/// Read-mostly catalog of items and warehouses plus the live settings.
///
/// The workflow core only ever reads items/warehouses; registration happens
/// at the edges (catalog management is an external collaborator).
#[derive(Debug, Default)]
pub struct Catalog {
    items: RwLock<HashMap<ItemId, Item>>,
    warehouses: RwLock<HashMap<WarehouseId, Warehouse>>,
    settings: RwLock<SystemSettings>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_item(&self, item: Item) {
        if let Ok(mut items) = self.items.write() {
            items.insert(item.id, item);
        }
    }

    pub fn register_warehouse(&self, warehouse: Warehouse) {
        if let Ok(mut warehouses) = self.warehouses.write() {
            warehouses.insert(warehouse.id, warehouse);
        }
    }

    pub fn item(&self, id: ItemId) -> DomainResult<Item> {
        self.items
            .read()
            .map_err(|_| DomainError::invariant("catalog lock poisoned"))?
            .get(&id)
            .cloned()
            .ok_or(DomainError::NotFound)
    }

    pub fn warehouse(&self, id: WarehouseId) -> DomainResult<Warehouse> {
        self.warehouses
            .read()
            .map_err(|_| DomainError::invariant("catalog lock poisoned"))?
            .get(&id)
            .cloned()
            .ok_or(DomainError::NotFound)
    }

    pub fn settings(&self) -> SystemSettings {
        self.settings
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn update_settings(&self, f: impl FnOnce(&mut SystemSettings)) {
        if let Ok(mut settings) = self.settings.write() {
            f(&mut settings);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UnitOfMeasure;

    #[test]
    fn unknown_item_is_not_found() {
        let catalog = Catalog::new();
        assert_eq!(catalog.item(ItemId::new()), Err(DomainError::NotFound));
    }

    #[test]
    fn registered_item_round_trips() {
        let catalog = Catalog::new();
        let id = ItemId::new();
        catalog.register_item(Item::new(id, "7.62mm link", UnitOfMeasure::Box));

        let item = catalog.item(id).unwrap();
        assert_eq!(item.name, "7.62mm link");
    }

    #[test]
    fn settings_updates_are_visible() {
        let catalog = Catalog::new();
        catalog.update_settings(|s| s.set_default_custody_limit(Some(10)));
        assert_eq!(catalog.settings().default_custody_limit(), Some(10));
    }
}
