//! Append-only event store boundary.
//!
//! Streams are keyed by `AggregateId`. A commit may span several streams;
//! `append_transaction` makes the whole set atomic, including the audit
//! pre-commit hook. Storage backends stay behind the `EventStore` trait.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
