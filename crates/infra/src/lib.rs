//! `depot-infra` — infrastructure composition for the depot workspace.
//!
//! This crate wires the pure domain crates to a persistence and delivery
//! substrate: an append-only event store with atomic multi-stream commits,
//! a unit of work that stages aggregate decisions and audit entries, bounded
//! optimistic retry, and one application service per workflow.
//!
//! No IO beyond the injected store/bus/sink; everything is swappable through
//! the trait boundaries.

pub mod event_store;
pub mod retry;
pub mod services;
pub mod stream;
pub mod unit_of_work;

pub use event_store::{
    EventStore, EventStoreError, InMemoryEventStore, StoredEvent, StreamAppend, UncommittedEvent,
};
pub use retry::RetryPolicy;
pub use stream::EventSourced;
pub use unit_of_work::{Loaded, UnitOfWork, WorkError};

#[cfg(test)]
mod integration_tests;
