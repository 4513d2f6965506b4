//! Pull phase: pages remote changes into the local store.

use bujo_sync_protocol::{
    resolve, DecodedRow, EntityKind, LocalEntity, RemoteRow, Resolution, WireRecord,
};
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

use super::{phase_order, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::events::{EventLevel, SyncEventKind};
use crate::store::{EntityChange, LocalStore};
use crate::transport::SyncTransport;

/// Counts from one pull phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PullReport {
    pub(crate) pulled: usize,
    pub(crate) skipped: usize,
    pub(crate) decode_failures: usize,
}

/// Local state as seen by rows later in the same page.
///
/// `None` marks an entity deleted earlier in the page.
#[derive(Default)]
struct PageOverlay {
    entries: HashMap<(EntityKind, Uuid), Option<LocalEntity>>,
    order: Vec<(EntityKind, Uuid)>,
}

impl PageOverlay {
    fn get<S: LocalStore>(
        &self,
        store: &S,
        key: (EntityKind, Uuid),
    ) -> SyncResult<Option<LocalEntity>> {
        match self.entries.get(&key) {
            Some(entity) => Ok(entity.clone()),
            None => store.get(key.0, key.1),
        }
    }

    fn set(&mut self, key: (EntityKind, Uuid), entity: Option<LocalEntity>) {
        if self.entries.insert(key, entity).is_none() {
            self.order.push(key);
        }
    }

    fn into_changes(mut self) -> Vec<EntityChange> {
        self.order
            .into_iter()
            .filter_map(|key| match self.entries.remove(&key)? {
                Some(entity) => Some(EntityChange::Upsert(entity)),
                None => Some(EntityChange::Delete {
                    kind: key.0,
                    id: key.1,
                }),
            })
            .collect()
    }
}

/// Decodes every row of a page. The first bad row fails the page.
fn decode_page(
    kind: EntityKind,
    records: Vec<WireRecord>,
) -> SyncResult<Vec<(i64, DecodedRow)>> {
    records
        .into_iter()
        .map(|record| -> SyncResult<(i64, DecodedRow)> {
            let row = RemoteRow::from_record(kind, record)?;
            let decoded = DecodedRow::decode(kind, &row)?;
            Ok((row.revision, decoded))
        })
        .collect()
}

impl<S, T> SyncEngine<S, T>
where
    S: LocalStore + 'static,
    T: SyncTransport + 'static,
{
    /// Pulls every kind in push order.
    ///
    /// A decode failure abandons the current page of that kind only; the
    /// cursor stays put and the remaining kinds still pull.
    pub(crate) async fn pull_changes(&self) -> SyncResult<PullReport> {
        let mut report = PullReport::default();
        for kind in phase_order() {
            self.check_cancelled()?;
            match self.pull_kind(kind, &mut report).await {
                Ok(()) => {}
                Err(SyncError::Decode(err)) => {
                    tracing::warn!(
                        %kind,
                        row_id = ?err.row_id,
                        revision = ?err.revision,
                        field = %err.field,
                        fields = ?err.fields,
                        "pull page abandoned: {}",
                        err.reason
                    );
                    report.decode_failures += 1;
                    self.update_stats(|stats| stats.decode_failures += 1);
                    self.record_event(
                        EventLevel::Warning,
                        SyncEventKind::DecodeFailed,
                        err.to_string(),
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    async fn pull_kind(&self, kind: EntityKind, report: &mut PullReport) -> SyncResult<()> {
        let store: &S = &self.inner.store;
        let page_size = self.inner.config.pull_page_size;

        loop {
            let mut cursor = store.cursor(kind)?;
            let records = self
                .inner
                .transport
                .fetch_changes(kind, cursor.last_revision, page_size)
                .await?;
            if records.is_empty() {
                return Ok(());
            }
            let full = records.len() >= page_size;
            let fetched = records.len();

            let rows = decode_page(kind, records)?;
            let max_revision = rows.iter().map(|(revision, _)| *revision).max();

            let mut overlay = PageOverlay::default();
            let mut skipped = 0;
            for (revision, row) in rows {
                let target = row.target();
                let existing = overlay.get(store, target)?;
                match resolve(row, existing.as_ref()) {
                    Resolution::Upsert(entity) => {
                        overlay.set((entity.kind(), entity.id()), Some(entity))
                    }
                    Resolution::Delete { kind, id } => overlay.set((kind, id), None),
                    Resolution::Ignore => {}
                    Resolution::MissingParent {
                        kind,
                        id,
                        parent_kind,
                        parent_id,
                    } => {
                        tracing::warn!(
                            %kind,
                            %id,
                            %parent_kind,
                            %parent_id,
                            revision,
                            "skipping row with missing parent"
                        );
                        skipped += 1;
                        self.record_event(
                            EventLevel::Warning,
                            SyncEventKind::RowSkipped,
                            format!("{kind} {id}: parent {parent_kind} {parent_id} not found"),
                        );
                    }
                }
            }

            let advanced =
                max_revision.is_some_and(|revision| cursor.advance(revision, Utc::now()));
            // A reset during the fetch must not resurrect the old cursor.
            self.check_cancelled()?;
            store.apply_pulled(&overlay.into_changes(), &cursor)?;

            report.pulled += fetched - skipped;
            report.skipped += skipped;
            self.update_stats(|stats| {
                stats.rows_pulled += (fetched - skipped) as u64;
                stats.rows_skipped += skipped as u64;
            });
            tracing::debug!(
                %kind,
                rows = fetched,
                skipped,
                cursor = cursor.last_revision,
                "applied pull page"
            );

            if !full {
                return Ok(());
            }
            if !advanced {
                tracing::warn!(
                    %kind,
                    cursor = cursor.last_revision,
                    "full page did not advance cursor"
                );
                return Ok(());
            }
            self.check_cancelled()?;
        }
    }
}
