//! `depot-events` — event abstractions shared by every domain crate.
//!
//! Events are the only record of a completed mutation; the audit trail and
//! all downstream consumers hang off them.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
