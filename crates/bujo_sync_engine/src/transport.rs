//! Transport layer abstraction for sync operations.

use async_trait::async_trait;
use bujo_sync_protocol::{parse_timestamp, updated_at_key, EntityKind, WireRecord};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use crate::error::{SyncError, SyncResult};

/// A sync transport talks to the remote backend.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-memory mock for testing).
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Calls the merge function for `kind` with one wire record.
    ///
    /// Merges are idempotent: sending the same record twice leaves the
    /// remote unchanged.
    async fn merge(&self, kind: EntityKind, record: WireRecord) -> SyncResult<()>;

    /// Fetches up to `limit` rows of `kind` with `revision > since`, in
    /// ascending revision order.
    async fn fetch_changes(
        &self,
        kind: EntityKind,
        since: i64,
        limit: usize,
    ) -> SyncResult<Vec<WireRecord>>;
}

/// A failure the mock transport can be told to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// A connection-level error.
    Transport {
        /// Whether the error is retryable.
        retryable: bool,
    },
    /// An HTTP error status.
    Status(u16),
    /// The device is offline.
    NotConnected,
}

impl MockFailure {
    fn to_error(&self, what: &str) -> SyncError {
        match self {
            MockFailure::Transport { retryable: true } => {
                SyncError::transport_retryable(format!("injected {what} failure"))
            }
            MockFailure::Transport { retryable: false } => {
                SyncError::transport_fatal(format!("injected {what} failure"))
            }
            MockFailure::Status(status) => {
                SyncError::from_status(*status, format!("injected {what} failure"))
            }
            MockFailure::NotConnected => SyncError::NotConnected,
        }
    }
}

/// One recorded merge call.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeCall {
    /// Kind merged.
    pub kind: EntityKind,
    /// Record sent.
    pub record: WireRecord,
}

/// One recorded fetch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchCall {
    /// Kind fetched.
    pub kind: EntityKind,
    /// Revision the fetch started after.
    pub since: i64,
    /// Page size requested.
    pub limit: usize,
}

#[derive(Debug, Default)]
struct MockState {
    tables: HashMap<EntityKind, BTreeMap<String, WireRecord>>,
    revision: i64,
    merges: Vec<MergeCall>,
    fetches: Vec<FetchCall>,
    merge_failures: VecDeque<MockFailure>,
    fetch_failures: VecDeque<MockFailure>,
    merge_failure_kinds: HashMap<EntityKind, MockFailure>,
    latency: Option<Duration>,
}

/// An in-memory remote backend.
///
/// Merges follow the remote's rules: per-field last-write-wins on the
/// `<field>_updated_at` companions, a fresh global revision on every
/// accepted merge, and a foreign-key check for association rows.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next merge calls, one queued failure per call.
    pub fn fail_next_merges(&self, failure: MockFailure, count: usize) {
        let mut state = self.state.lock();
        state
            .merge_failures
            .extend(std::iter::repeat(failure).take(count));
    }

    /// Fails every merge of `kind` until cleared.
    pub fn fail_merges_of(&self, kind: EntityKind, failure: Option<MockFailure>) {
        let mut state = self.state.lock();
        match failure {
            Some(failure) => {
                state.merge_failure_kinds.insert(kind, failure);
            }
            None => {
                state.merge_failure_kinds.remove(&kind);
            }
        }
    }

    /// Fails the next fetch calls, one queued failure per call.
    pub fn fail_next_fetches(&self, failure: MockFailure, count: usize) {
        let mut state = self.state.lock();
        state
            .fetch_failures
            .extend(std::iter::repeat(failure).take(count));
    }

    /// Adds latency to every call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Merges a record as another device would, bypassing failure
    /// injection and the call log.
    pub fn merge_from_other_device(&self, kind: EntityKind, record: WireRecord) -> SyncResult<()> {
        self.state.lock().apply_merge(kind, record)
    }

    /// Stores a raw row verbatim, without any merge rules. Used to simulate
    /// rows written by other clients, including ones this client cannot
    /// decode.
    ///
    /// A row without a `revision` gets the next one; an explicit revision
    /// is kept and moves the counter forward.
    pub fn insert_raw(&self, kind: EntityKind, mut record: WireRecord) -> i64 {
        let mut state = self.state.lock();
        let revision = match record.get("revision").and_then(Value::as_i64) {
            Some(revision) => {
                state.revision = state.revision.max(revision);
                revision
            }
            None => {
                state.revision += 1;
                state.revision
            }
        };
        record.insert("revision".into(), json!(revision));
        let id = record
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("raw-{revision}"));
        state.tables.entry(kind).or_default().insert(id, record);
        revision
    }

    /// The stored row for `id`, if any.
    pub fn row(&self, kind: EntityKind, id: &str) -> Option<WireRecord> {
        self.state
            .lock()
            .tables
            .get(&kind)
            .and_then(|table| table.get(id))
            .cloned()
    }

    /// Number of stored rows of `kind`.
    pub fn row_count(&self, kind: EntityKind) -> usize {
        self.state.lock().tables.get(&kind).map_or(0, BTreeMap::len)
    }

    /// Highest revision handed out so far.
    pub fn current_revision(&self) -> i64 {
        self.state.lock().revision
    }

    /// Every merge call received, in order.
    pub fn merge_calls(&self) -> Vec<MergeCall> {
        self.state.lock().merges.clone()
    }

    /// Every fetch call received, in order.
    pub fn fetch_calls(&self) -> Vec<FetchCall> {
        self.state.lock().fetches.clone()
    }

    /// Clears the call logs.
    pub fn clear_calls(&self) {
        let mut state = self.state.lock();
        state.merges.clear();
        state.fetches.clear();
    }

    fn latency(&self) -> Option<Duration> {
        self.state.lock().latency
    }
}

impl MockState {
    fn apply_merge(&mut self, kind: EntityKind, incoming: WireRecord) -> SyncResult<()> {
        let id = incoming
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SyncError::from_status(400, "record without id"))?;

        if let (Some(parent_kind), Some(parent_field)) = (kind.parent_kind(), kind.parent_field()) {
            let parent_id = incoming.get(parent_field).and_then(Value::as_str);
            let parent_exists = parent_id.is_some_and(|parent_id| {
                self.tables
                    .get(&parent_kind)
                    .is_some_and(|table| table.contains_key(parent_id))
            });
            if !parent_exists {
                return Err(SyncError::from_status(
                    409,
                    format!("{parent_field} violates foreign key constraint"),
                ));
            }
        }

        self.revision += 1;
        let revision = self.revision;
        let table = self.tables.entry(kind).or_default();
        let mut merged = match table.remove(&id) {
            None => incoming,
            Some(mut existing) => {
                for field in kind.mutable_fields() {
                    let stamp_key = updated_at_key(field);
                    if strictly_newer(&incoming, &existing, &stamp_key) {
                        for key in [field.to_string(), stamp_key] {
                            if let Some(value) = incoming.get(&key) {
                                existing.insert(key, value.clone());
                            }
                        }
                    }
                }
                existing
            }
        };
        merged.insert("revision".into(), json!(revision));
        table.insert(id, merged);
        Ok(())
    }
}

fn stamp(record: &WireRecord, key: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    record
        .get(key)
        .and_then(Value::as_str)
        .and_then(|raw| parse_timestamp(raw).ok())
}

fn strictly_newer(incoming: &WireRecord, existing: &WireRecord, key: &str) -> bool {
    match (stamp(incoming, key), stamp(existing, key)) {
        (Some(new), Some(old)) => new > old,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn merge(&self, kind: EntityKind, record: WireRecord) -> SyncResult<()> {
        if let Some(latency) = self.latency() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        state.merges.push(MergeCall {
            kind,
            record: record.clone(),
        });
        if let Some(failure) = state.merge_failures.pop_front() {
            return Err(failure.to_error("merge"));
        }
        if let Some(failure) = state.merge_failure_kinds.get(&kind) {
            return Err(failure.to_error("merge"));
        }
        state.apply_merge(kind, record)
    }

    async fn fetch_changes(
        &self,
        kind: EntityKind,
        since: i64,
        limit: usize,
    ) -> SyncResult<Vec<WireRecord>> {
        if let Some(latency) = self.latency() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        state.fetches.push(FetchCall { kind, since, limit });
        if let Some(failure) = state.fetch_failures.pop_front() {
            return Err(failure.to_error("fetch"));
        }

        let revision_of = |record: &WireRecord| record.get("revision").and_then(Value::as_i64);
        let mut rows: Vec<WireRecord> = state
            .tables
            .get(&kind)
            .map(|table| {
                table
                    .values()
                    .filter(|record| revision_of(record).is_some_and(|rev| rev > since))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(|record| revision_of(record).unwrap_or(i64::MAX));
        rows.truncate(limit);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: Value) -> WireRecord {
        value.as_object().cloned().unwrap()
    }

    fn collection(title: &str, stamp: &str) -> WireRecord {
        record(json!({
            "id": "c1",
            "title": title,
            "title_updated_at": stamp,
            "content": "",
            "content_updated_at": "2024-01-01T00:00:00.000Z",
            "created_at": "2024-01-01T00:00:00.000Z",
            "deleted_at": null,
            "deleted_at_updated_at": "2024-01-01T00:00:00.000Z",
        }))
    }

    #[tokio::test]
    async fn merge_is_field_level_last_write_wins() {
        let remote = MockTransport::new();
        remote
            .merge(EntityKind::Collection, collection("newer", "2024-03-01T00:00:00.000Z"))
            .await
            .unwrap();
        remote
            .merge(EntityKind::Collection, collection("older", "2024-02-01T00:00:00.000Z"))
            .await
            .unwrap();

        let row = remote.row(EntityKind::Collection, "c1").unwrap();
        assert_eq!(row["title"], json!("newer"));
        assert_eq!(row["revision"], json!(2));
    }

    #[tokio::test]
    async fn equal_stamps_keep_the_stored_value() {
        let remote = MockTransport::new();
        let at = "2024-03-01T00:00:00.000Z";
        remote
            .merge(EntityKind::Collection, collection("first", at))
            .await
            .unwrap();
        remote
            .merge(EntityKind::Collection, collection("second", at))
            .await
            .unwrap();

        let row = remote.row(EntityKind::Collection, "c1").unwrap();
        assert_eq!(row["title"], json!("first"));
    }

    #[tokio::test]
    async fn association_requires_parent() {
        let remote = MockTransport::new();
        let assignment = record(json!({"id": "a1", "task_id": "t1"}));

        let err = remote
            .merge(EntityKind::TaskAssignment, assignment)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Server { status: 409, .. }));
        assert_eq!(remote.row_count(EntityKind::TaskAssignment), 0);
    }

    #[tokio::test]
    async fn fetch_pages_by_revision() {
        let remote = MockTransport::new();
        for i in 0..5 {
            remote.insert_raw(EntityKind::Spread, record(json!({"id": format!("s{i}")})));
        }

        let page = remote.fetch_changes(EntityKind::Spread, 1, 2).await.unwrap();
        let revisions: Vec<_> = page.iter().map(|r| r["revision"].as_i64().unwrap()).collect();
        assert_eq!(revisions, vec![2, 3]);
        assert_eq!(
            remote.fetch_calls(),
            vec![FetchCall {
                kind: EntityKind::Spread,
                since: 1,
                limit: 2
            }]
        );
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let remote = MockTransport::new();
        remote.fail_next_merges(MockFailure::Status(503), 1);

        let first = remote
            .merge(EntityKind::Collection, collection("a", "2024-03-01T00:00:00.000Z"))
            .await;
        assert!(first.unwrap_err().is_retryable());

        remote
            .merge(EntityKind::Collection, collection("a", "2024-03-01T00:00:00.000Z"))
            .await
            .unwrap();
        assert_eq!(remote.merge_calls().len(), 2);
    }
}
