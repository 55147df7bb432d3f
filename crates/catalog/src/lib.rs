//! `depot-catalog` — reference data consumed by the workflow core.
//!
//! Items and warehouses are created by catalog management and referenced,
//! never mutated, by the workflow engine. System settings carry the
//! runtime-tunable knobs.

pub mod item;
pub mod settings;
pub mod store;
pub mod warehouse;

pub use item::{Item, UnitOfMeasure};
pub use settings::SystemSettings;
pub use store::Catalog;
pub use warehouse::{Warehouse, WarehouseKind};
