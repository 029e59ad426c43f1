// Reconciliation: merge a harvested batch into the persisted collection.
// A probable duplicate (exact title + location, same start day) gets
// every mutable field overwritten in place; anything else inserts. All
// writes for one batch commit as a single unit.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info};
use uuid::Uuid;

use nightjar_common::Event;
use nightjar_store::{PgEventStore, StoredEvent};

/// Staged persistence seam for reconciliation. `find_matching` sees only
/// committed state; `stage_*` buffer writes until `commit` applies them
/// atomically.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn find_matching(
        &self,
        title: &str,
        location: &str,
        day: NaiveDate,
    ) -> Result<Option<StoredEvent>>;

    /// Buffer an insert; returns the identity the row will get.
    fn stage_insert(&self, values: Event) -> Uuid;

    /// Buffer an overwrite of every mutable field of an existing row.
    fn stage_update(&self, id: Uuid, values: Event);

    /// Apply all buffered writes as one unit. A failure drops the batch
    /// and leaves committed state untouched.
    async fn commit(&self) -> Result<u64>;
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn find_matching(
        &self,
        title: &str,
        location: &str,
        day: NaiveDate,
    ) -> Result<Option<StoredEvent>> {
        Ok(PgEventStore::find_matching(self, title, location, day).await?)
    }

    fn stage_insert(&self, values: Event) -> Uuid {
        PgEventStore::stage_insert(self, values)
    }

    fn stage_update(&self, id: Uuid, values: Event) {
        PgEventStore::stage_update(self, id, values)
    }

    async fn commit(&self) -> Result<u64> {
        Ok(PgEventStore::commit(self).await?)
    }
}

/// Stats from one reconciliation batch.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub total: u32,
    pub updated: u32,
}

impl ReconcileStats {
    pub fn created(&self) -> u32 {
        self.total - self.updated
    }
}

impl std::fmt::Display for ReconcileStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Reconciled {} events: {} created, {} updated",
            self.total,
            self.created(),
            self.updated
        )
    }
}

pub struct Reconciler<'a> {
    store: &'a dyn EventStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn EventStore) -> Self {
        Self { store }
    }

    /// Merge one harvested batch into the store.
    ///
    /// The matching rule is deliberately the loose exact-equality
    /// heuristic: it misses retitled duplicates and that is accepted
    /// behavior, not a bug to fix here.
    pub async fn upsert(&self, events: Vec<Event>) -> Result<ReconcileStats> {
        let mut stats = ReconcileStats::default();
        // Fingerprint → staged row identity, so duplicate fingerprints
        // within one batch collapse onto a single row.
        let mut staged: HashMap<(String, String, NaiveDate), Uuid> = HashMap::new();

        for event in events {
            stats.total += 1;
            let key = (
                event.title.clone(),
                event.location.clone(),
                event.start_day(),
            );

            if let Some(&id) = staged.get(&key) {
                debug!(title = %event.title, "duplicate fingerprint within batch, overwriting staged values");
                self.store.stage_update(id, event);
                stats.updated += 1;
                continue;
            }

            match self.store.find_matching(&key.0, &key.1, key.2).await? {
                Some(existing) => {
                    debug!(title = %event.title, id = %existing.id, "matched an existing event, updating");
                    self.store.stage_update(existing.id, event);
                    staged.insert(key, existing.id);
                    stats.updated += 1;
                }
                None => {
                    let id = self.store.stage_insert(event);
                    staged.insert(key, id);
                }
            }
        }

        self.store
            .commit()
            .await
            .context("reconciliation commit failed")?;

        info!(
            total = stats.total,
            created = stats.created(),
            updated = stats.updated,
            "Reconciliation complete"
        );
        Ok(stats)
    }
}
