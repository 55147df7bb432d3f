use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use depot_core::{AggregateId, ExpectedVersion};
use depot_events::Event;
use std::sync::Arc;

/// An event ready to be appended to a stream, not yet assigned a sequence
/// number.
///
/// Built from a typed domain event via [`UncommittedEvent::from_typed`],
/// which serializes the payload to JSON and extracts the event metadata
/// (`event_type`, schema version, business timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl UncommittedEvent {
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: &str,
        event: &E,
    ) -> Result<Self, serde_json::Error>
    where
        E: Event + Serialize,
    {
        Ok(Self {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload: serde_json::to_value(event)?,
        })
    }
}

/// An event persisted in an append-only stream.
///
/// Sequence numbers are assigned during append, are stream-scoped, start at
/// 1 and never change. The stream version equals the last sequence number,
/// which is what `ExpectedVersion::Exact` is checked against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert into an envelope for publication on the bus.
    pub fn to_envelope(&self) -> depot_events::EventEnvelope<JsonValue> {
        depot_events::EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// One stream's contribution to a multi-stream transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAppend {
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub expected: ExpectedVersion,
    pub events: Vec<UncommittedEvent>,
}

/// Event store operation error (infrastructure, not domain).
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// The pre-commit hook (audit recording) failed; nothing was written.
    #[error("transaction aborted by pre-commit hook: {0}")]
    Aborted(String),
}

/// Append-only event store with atomic multi-stream commits.
///
/// `append_transaction` must be all-or-nothing across every named stream:
/// version-check each stream, run the `pre_commit` hook, and commit only if
/// everything succeeded. Any failure leaves every stream untouched.
/// Within a stream, sequence numbers are assigned monotonically starting at
/// `current_version + 1`.
///
/// `load_stream` returns the ordered history (empty for an unknown stream)
/// and must never observe a partially-committed transaction.
pub trait EventStore: Send + Sync {
    fn append_transaction(
        &self,
        appends: Vec<StreamAppend>,
        pre_commit: &mut dyn FnMut() -> Result<(), String>,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Single-stream convenience append with no pre-commit work.
    fn append(&self, append: StreamAppend) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.append_transaction(vec![append], &mut || Ok(()))
    }
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append_transaction(
        &self,
        appends: Vec<StreamAppend>,
        pre_commit: &mut dyn FnMut() -> Result<(), String>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append_transaction(appends, pre_commit)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(aggregate_id)
    }
}
