//! Push phase: drains the outbox to the remote merge functions.

use bujo_sync_protocol::{serialize, FieldSelection, SerializeContext};
use uuid::Uuid;

use super::{phase_order, SyncEngine};
use crate::error::SyncResult;
use crate::events::{EventLevel, SyncEventKind};
use crate::store::LocalStore;
use crate::transport::SyncTransport;

/// Counts from one push phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PushReport {
    pub(crate) pushed: usize,
    pub(crate) dropped: usize,
}

impl<S, T> SyncEngine<S, T>
where
    S: LocalStore + 'static,
    T: SyncTransport + 'static,
{
    /// Pushes every pending mutation, standalone kinds first and by
    /// sequence within a kind.
    ///
    /// The first remote failure bumps that entry's retry counter and ends
    /// the phase. Entries whose payload cannot be decoded are dropped.
    pub(crate) async fn push_pending(&self, user_id: Uuid) -> SyncResult<PushReport> {
        let store = &self.inner.store;
        let mut report = PushReport::default();

        let purged = store.purge_corrupt()?;
        if purged > 0 {
            report.dropped += purged;
            self.update_stats(|stats| stats.mutations_dropped += purged as u64);
            self.record_event(
                EventLevel::Warning,
                SyncEventKind::MutationDropped,
                format!("dropped {purged} unreadable outbox entries"),
            );
        }

        let entries = store.drain()?;
        if entries.is_empty() {
            return Ok(report);
        }
        tracing::debug!(pending = entries.len(), "pushing mutations");

        for kind in phase_order() {
            self.check_cancelled()?;

            for entry in entries.iter().filter(|entry| entry.entity_type == kind) {
                let payload = match entry.decode_payload() {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::warn!(
                            seq = entry.seq,
                            %kind,
                            entity_id = %entry.entity_id,
                            error = %err,
                            "dropping undecodable mutation"
                        );
                        store.remove(entry.seq)?;
                        report.dropped += 1;
                        self.update_stats(|stats| stats.mutations_dropped += 1);
                        self.record_event(
                            EventLevel::Warning,
                            SyncEventKind::MutationDropped,
                            format!("dropped {kind} {}: {err}", entry.entity_id),
                        );
                        continue;
                    }
                };

                // A reset may have wiped the outbox since it was drained.
                self.check_cancelled()?;
                let context = SerializeContext {
                    user_id,
                    device_id: self.inner.config.device_id,
                    timestamp: entry.enqueued_at,
                };
                let selection = FieldSelection::for_mutation(entry.operation, &entry.changed_fields);
                let record = serialize(&payload, &context, selection);

                let merged = self.inner.transport.merge(kind, record).await;
                self.check_cancelled()?;
                if let Err(err) = merged {
                    tracing::warn!(
                        seq = entry.seq,
                        %kind,
                        entity_id = %entry.entity_id,
                        retry_count = entry.retry_count + 1,
                        error = %err,
                        "push failed"
                    );
                    store.record_failure(entry.seq)?;
                    return Err(err);
                }

                store.remove(entry.seq)?;
                report.pushed += 1;
                self.update_stats(|stats| stats.mutations_pushed += 1);
                tracing::debug!(
                    seq = entry.seq,
                    %kind,
                    entity_id = %entry.entity_id,
                    operation = %entry.operation,
                    "pushed mutation"
                );
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::environment::{StaticAuth, SyncEnvironment};
    use crate::store::{LocalWriter, MemoryStore, MutationStore};
    use crate::transport::{MockFailure, MockTransport};
    use bujo_sync_protocol::{
        AssignmentRecord, AssignmentStatus, EntityKind, LocalEntity, MutationOperation,
        NewMutation, Period, Task, TaskStatus,
    };
    use chrono::{NaiveDate, Utc};
    use std::sync::Arc;

    fn engine() -> SyncEngine<MemoryStore, MockTransport> {
        let auth = Arc::new(StaticAuth::signed_in(Uuid::new_v4(), "token"));
        SyncEngine::new(
            SyncConfig::new(Uuid::new_v4()),
            Arc::new(MemoryStore::new()),
            Arc::new(MockTransport::new()),
            SyncEnvironment::new(auth),
        )
    }

    fn task() -> LocalEntity {
        LocalEntity::Task(Task {
            id: Uuid::new_v4(),
            title: "call bank".into(),
            status: TaskStatus::Open,
            period: Some(Period::Day),
            date: NaiveDate::from_ymd_opt(2024, 6, 3),
            assignments: vec![],
            created_at: Utc::now() - chrono::Duration::days(1),
            deleted_at: None,
        })
    }

    fn assignment(task: &LocalEntity) -> AssignmentRecord {
        AssignmentRecord {
            id: Uuid::new_v4(),
            parent_id: task.id(),
            period: Period::Day,
            date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            status: AssignmentStatus::Open,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn parent_then_association_empties_outbox() {
        let engine = engine();
        let task = task();
        let store = engine.store();
        store
            .write_entity(&task, MutationOperation::Create, &[])
            .unwrap();
        store
            .write_assignment(EntityKind::Task, &assignment(&task), MutationOperation::Create)
            .unwrap();

        let report = engine.push_pending(Uuid::new_v4()).await.unwrap();

        assert_eq!(report.pushed, 2);
        let kinds: Vec<_> = engine
            .transport()
            .merge_calls()
            .into_iter()
            .map(|call| call.kind)
            .collect();
        assert_eq!(kinds, vec![EntityKind::Task, EntityKind::TaskAssignment]);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn failure_stops_phase_and_counts_retry() {
        let engine = engine();
        let store = engine.store();
        store
            .write_entity(&task(), MutationOperation::Create, &[])
            .unwrap();
        store
            .write_entity(&task(), MutationOperation::Create, &[])
            .unwrap();
        engine
            .transport()
            .fail_next_merges(MockFailure::Transport { retryable: true }, 1);

        assert!(engine.push_pending(Uuid::new_v4()).await.is_err());

        let pending = store.drain().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].retry_count, 1);
        assert_eq!(pending[1].retry_count, 0);
        assert_eq!(engine.transport().merge_calls().len(), 1);
    }

    #[tokio::test]
    async fn undecodable_payload_is_dropped() {
        let engine = engine();
        let store = engine.store();
        let task = task();
        let mut broken = NewMutation::new(
            MutationOperation::Create,
            &task.clone().into(),
            Vec::new(),
        )
        .unwrap();
        broken.payload = vec![0xff, 0x00];
        store.enqueue(broken).unwrap();
        store
            .write_entity(&task, MutationOperation::Create, &[])
            .unwrap();

        let report = engine.push_pending(Uuid::new_v4()).await.unwrap();

        assert_eq!(report, PushReport { pushed: 1, dropped: 1 });
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(engine.stats().mutations_dropped, 1);
    }

    #[tokio::test]
    async fn update_stamps_only_changed_fields() {
        let engine = engine();
        let store = engine.store();
        let task = task();
        store.seed(task.clone());
        store
            .write_entity(&task, MutationOperation::Update, &["title"])
            .unwrap();

        engine.push_pending(Uuid::new_v4()).await.unwrap();

        let calls = engine.transport().merge_calls();
        let record = &calls[0].record;
        assert_ne!(record["title_updated_at"], record["created_at"]);
        assert_eq!(record["status_updated_at"], record["created_at"]);
    }
}
