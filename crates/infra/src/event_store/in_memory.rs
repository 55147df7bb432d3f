use std::collections::HashMap;
use std::sync::RwLock;

use depot_core::AggregateId;

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend};

/// In-memory append-only event store.
///
/// Single write lock per transaction, so multi-stream commits are
/// serializable; readers only take the read lock and never see a
/// half-committed transaction. Intended for tests and single-process
/// deployments, not optimized for throughput.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<AggregateId, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }
}

impl EventStore for InMemoryEventStore {
    fn append_transaction(
        &self,
        appends: Vec<StreamAppend>,
        pre_commit: &mut dyn FnMut() -> Result<(), String>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        // Validation pass: nothing is written until every append checks out.
        // `next_versions` tracks versions as they would evolve, so a
        // transaction may touch the same stream more than once.
        let mut next_versions: HashMap<AggregateId, u64> = HashMap::new();
        for (idx, append) in appends.iter().enumerate() {
            for e in &append.events {
                if e.aggregate_id != append.aggregate_id {
                    return Err(EventStoreError::InvalidAppend(format!(
                        "append {idx} contains an event for a different aggregate"
                    )));
                }
                if e.aggregate_type != append.aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "append {idx} mixes aggregate types"
                    )));
                }
            }

            if let Some(existing) = streams.get(&append.aggregate_id).and_then(|s| s.first()) {
                if existing.aggregate_type != append.aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        existing.aggregate_type, append.aggregate_type
                    )));
                }
            }

            let current = match next_versions.get(&append.aggregate_id) {
                Some(v) => *v,
                None => streams
                    .get(&append.aggregate_id)
                    .map(|s| Self::current_version(s))
                    .unwrap_or(0),
            };
            if !append.expected.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {}: expected {:?}, found {current}",
                    append.aggregate_id, append.expected
                )));
            }
            next_versions.insert(
                append.aggregate_id,
                current + append.events.len() as u64,
            );
        }

        // Audit (or any other pre-commit work) happens inside the lock; a
        // failure here aborts the transaction with every stream untouched.
        pre_commit().map_err(EventStoreError::Aborted)?;

        // Commit pass: assign sequence numbers and append.
        let mut committed = Vec::new();
        for append in appends {
            let stream = streams.entry(append.aggregate_id).or_default();
            let mut next = Self::current_version(stream) + 1;
            for e in append.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use depot_core::ExpectedVersion;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::event_store::UncommittedEvent;

    fn uncommitted(aggregate_id: AggregateId, event_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: "test".to_string(),
            event_type: event_type.to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: json!({}),
        }
    }

    fn append(
        aggregate_id: AggregateId,
        expected: ExpectedVersion,
        count: usize,
    ) -> StreamAppend {
        StreamAppend {
            aggregate_id,
            aggregate_type: "test".to_string(),
            expected,
            events: (0..count).map(|i| uncommitted(aggregate_id, if i % 2 == 0 { "a" } else { "b" })).collect(),
        }
    }

    #[test]
    fn sequence_numbers_are_monotonic_per_stream() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store.append(append(id, ExpectedVersion::Exact(0), 2)).unwrap();
        store.append(append(id, ExpectedVersion::Exact(2), 1)).unwrap();

        let stream = store.load_stream(id).unwrap();
        let seqs: Vec<u64> = stream.iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn stale_expected_version_is_a_concurrency_error() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store.append(append(id, ExpectedVersion::Exact(0), 1)).unwrap();
        let err = store
            .append(append(id, ExpectedVersion::Exact(0), 1))
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
    }

    #[test]
    fn failed_pre_commit_leaves_every_stream_untouched() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();

        let err = store
            .append_transaction(
                vec![
                    append(a, ExpectedVersion::Exact(0), 1),
                    append(b, ExpectedVersion::Exact(0), 1),
                ],
                &mut || Err("sink down".to_string()),
            )
            .unwrap_err();

        assert!(matches!(err, EventStoreError::Aborted(_)));
        assert!(store.load_stream(a).unwrap().is_empty());
        assert!(store.load_stream(b).unwrap().is_empty());
    }

    #[test]
    fn version_mismatch_on_any_stream_fails_the_whole_transaction() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        store.append(append(b, ExpectedVersion::Exact(0), 1)).unwrap();

        let err = store
            .append_transaction(
                vec![
                    append(a, ExpectedVersion::Exact(0), 1),
                    append(b, ExpectedVersion::Exact(0), 1),
                ],
                &mut || Ok(()),
            )
            .unwrap_err();

        assert!(matches!(err, EventStoreError::Concurrency(_)));
        assert!(store.load_stream(a).unwrap().is_empty());
        assert_eq!(store.load_stream(b).unwrap().len(), 1);
    }

    #[test]
    fn a_transaction_may_touch_the_same_stream_twice() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store
            .append_transaction(
                vec![
                    append(id, ExpectedVersion::Exact(0), 2),
                    append(id, ExpectedVersion::Exact(2), 1),
                ],
                &mut || Ok(()),
            )
            .unwrap();

        assert_eq!(store.load_stream(id).unwrap().len(), 3);
    }
}
