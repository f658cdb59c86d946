//! In-memory store, useful for testing and ephemeral runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use warden_core::{
    CurationAction, CycleLogSink, CycleResult, EntryFilter, MemoryEntry, MemoryStore, StoreError,
    SweepOrder, SweepUpdate,
};

/// A store that keeps entries in a map and cycle results in a Vec.
/// Nothing survives the process.
pub struct InMemoryStore {
    entries: Arc<RwLock<HashMap<String, MemoryEntry>>>,
    cycles: Arc<RwLock<Vec<CycleResult>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            cycles: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Seed the store in one call.
    pub async fn insert_all(&self, entries: impl IntoIterator<Item = MemoryEntry>) {
        let mut map = self.entries.write().await;
        for entry in entries {
            map.insert(entry.id.clone(), entry);
        }
    }

    /// Number of stored entries, tombstones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Cycle results recorded so far, oldest first.
    pub async fn cycles(&self) -> Vec<CycleResult> {
        self.cycles.read().await.clone()
    }

    fn ordered_matches<'a>(
        entries: impl Iterator<Item = &'a MemoryEntry>,
        filter: &EntryFilter,
        order: SweepOrder,
        limit: usize,
    ) -> Vec<&'a MemoryEntry> {
        let mut matched: Vec<&MemoryEntry> = entries.filter(|e| filter.matches(e)).collect();
        matched.sort_by(|a, b| order.compare(a, b));
        matched.truncate(limit);
        matched
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>, StoreError> {
        Ok(self.entries.read().await.get(id).cloned())
    }

    async fn upsert(&self, entry: MemoryEntry) -> Result<(), StoreError> {
        self.entries.write().await.insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn select(
        &self,
        filter: &EntryFilter,
        order: SweepOrder,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, StoreError> {
        let entries = self.entries.read().await;
        Ok(Self::ordered_matches(entries.values(), filter, order, limit)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn count(&self, filter: &EntryFilter) -> Result<usize, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.values().filter(|e| filter.matches(e)).count())
    }

    async fn sweep(
        &self,
        filter: &EntryFilter,
        order: SweepOrder,
        limit: usize,
        update: SweepUpdate,
    ) -> Result<usize, StoreError> {
        let mut entries = self.entries.write().await;
        let ids: Vec<String> = Self::ordered_matches(entries.values(), filter, order, limit)
            .into_iter()
            .map(|e| e.id.clone())
            .collect();

        for id in &ids {
            if update == SweepUpdate::Purge {
                entries.remove(id);
            } else if let Some(entry) = entries.get_mut(id) {
                update.apply(entry);
            }
        }
        Ok(ids.len())
    }

    async fn record_score(
        &self,
        id: &str,
        score: f64,
        action: CurationAction,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(id) {
            Some(entry) => {
                entry.mvs_score = Some(score);
                entry.curation_action = Some(action);
                entry.scored_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl CycleLogSink for InMemoryStore {
    async fn record_cycle(&self, result: &CycleResult) -> Result<(), StoreError> {
        self.cycles.write().await.push(result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use warden_core::{EntryKind, Tier};

    fn entry(id: &str, tier: Tier, accessed_hours_ago: i64, now: DateTime<Utc>) -> MemoryEntry {
        MemoryEntry::new(id, EntryKind::Entry, tier, now - Duration::days(30))
            .with_last_accessed(now - Duration::hours(accessed_hours_ago))
    }

    #[tokio::test]
    async fn upsert_and_get() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.upsert(entry("a", Tier::Hot, 1, now)).await.unwrap();

        let got = store.get("a").await.unwrap().unwrap();
        assert_eq!(got.tier, Tier::Hot);
        assert!(store.get("missing").await.unwrap().is_none());

        store.upsert(entry("a", Tier::Warm, 1, now)).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap().tier, Tier::Warm);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn sweep_takes_least_recently_accessed_first() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .insert_all([
                entry("fresh", Tier::Hot, 1, now),
                entry("stale", Tier::Hot, 50, now),
                entry("older", Tier::Hot, 20, now),
                entry("warm", Tier::Warm, 90, now),
            ])
            .await;

        let filter = EntryFilter::new().tier(Tier::Hot);
        let moved = store
            .sweep(
                &filter,
                SweepOrder::LeastRecentlyAccessed,
                2,
                SweepUpdate::SetTier(Tier::Warm),
            )
            .await
            .unwrap();
        assert_eq!(moved, 2);

        assert_eq!(store.get("stale").await.unwrap().unwrap().tier, Tier::Warm);
        assert_eq!(store.get("older").await.unwrap().unwrap().tier, Tier::Warm);
        assert_eq!(store.get("fresh").await.unwrap().unwrap().tier, Tier::Hot);
        assert_eq!(store.count(&filter).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn tombstone_then_purge() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.insert_all([entry("x", Tier::Cold, 1, now)]).await;

        let tombstoned = store
            .sweep(
                &EntryFilter::new(),
                SweepOrder::OldestFirst,
                10,
                SweepUpdate::Tombstone {
                    at: now - Duration::days(31),
                },
            )
            .await
            .unwrap();
        assert_eq!(tombstoned, 1);
        assert_eq!(store.count(&EntryFilter::new()).await.unwrap(), 0);
        assert!(store.get("x").await.unwrap().unwrap().is_tombstoned());

        let purged = store
            .sweep(
                &EntryFilter::new().tombstoned_before(now - Duration::days(30)),
                SweepOrder::OldestFirst,
                10,
                SweepUpdate::Purge,
            )
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn select_respects_limit_and_order() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .insert_all((0..5).map(|i| entry(&format!("e{i}"), Tier::Warm, i * 10, now)))
            .await;

        let picked = store
            .select(&EntryFilter::new(), SweepOrder::LeastRecentlyAccessed, 3)
            .await
            .unwrap();
        let ids: Vec<&str> = picked.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e4", "e3", "e2"]);
    }

    #[tokio::test]
    async fn record_score_reports_unknown_ids() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.insert_all([entry("s", Tier::Hot, 1, now)]).await;

        assert!(store.record_score("s", 4.25, CurationAction::Improve, now).await.unwrap());
        assert!(!store.record_score("nope", 1.0, CurationAction::Prune, now).await.unwrap());

        let scored = store.get("s").await.unwrap().unwrap();
        assert_eq!(scored.mvs_score, Some(4.25));
        assert_eq!(scored.curation_action, Some(CurationAction::Improve));
        assert_eq!(scored.scored_at, Some(now));
    }

    #[tokio::test]
    async fn cycle_log_appends() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .record_cycle(&CycleResult::from_outcomes(1, now, now, vec![]))
            .await
            .unwrap();
        store
            .record_cycle(&CycleResult::from_outcomes(2, now, now, vec![]))
            .await
            .unwrap();
        let cycles = store.cycles().await;
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[1].cycle, 2);
    }
}
