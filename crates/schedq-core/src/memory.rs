//! In-memory store, for embedded single-process queues and for tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{EntryId, NewEntry, QueueEntry, QueueError, QueueStore};

#[derive(Default)]
struct Inner {
    next_id: EntryId,
    entries: BTreeMap<EntryId, QueueEntry>,
}

/// [`QueueStore`] backed by a mutex-guarded map. Claiming holds the lock for
/// the whole select-and-flip, which gives the atomicity the contract asks
/// for without any further coordination.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn create(&self, entry: NewEntry) -> Result<QueueEntry, QueueError> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;

        let now = Utc::now();
        let entry = QueueEntry {
            id: inner.next_id,
            queue: entry.queue,
            payload: entry.payload,
            status: entry.status,
            priority: entry.priority,
            date_scheduled: entry.date_scheduled,
            num_schedules: entry.num_schedules,
            description: None,
            created_at: now,
            updated_at: now,
        };
        inner.entries.insert(entry.id, entry.clone());

        Ok(entry)
    }

    async fn get(&self, id: EntryId) -> Result<Option<QueueEntry>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner.entries.get(&id).cloned())
    }

    async fn save(&self, entry: &QueueEntry) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        if !inner.entries.contains_key(&entry.id) {
            return Err(QueueError::NotFound(entry.id));
        }

        let mut entry = entry.clone();
        entry.updated_at = Utc::now();
        inner.entries.insert(entry.id, entry);

        Ok(())
    }

    async fn delete(&self, id: EntryId) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.entries.remove(&id).is_some())
    }

    async fn claim_next(
        &self,
        queue: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, QueueError> {
        let mut inner = self.inner.lock().await;

        let claimed = inner
            .entries
            .values()
            .filter(|e| e.queue == queue && e.is_eligible(now))
            .min_by_key(|e| (e.priority, e.id))
            .map(|e| e.id);

        let Some(id) = claimed else {
            return Ok(None);
        };
        let Some(entry) = inner.entries.get_mut(&id) else {
            return Ok(None);
        };
        entry.status = crate::EntryStatus::Progress;
        entry.updated_at = Utc::now();

        Ok(Some(entry.clone()))
    }

    async fn entries_for_queue(&self, queue: &str) -> Result<Vec<QueueEntry>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .values()
            .filter(|e| e.queue == queue)
            .cloned()
            .collect())
    }

    async fn eligible_counts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<String, i64>, QueueError> {
        let inner = self.inner.lock().await;

        let mut counts = BTreeMap::new();
        for entry in inner.entries.values().filter(|e| e.is_eligible(now)) {
            *counts.entry(entry.queue.clone()).or_insert(0) += 1;
        }

        Ok(counts)
    }

    async fn count_eligible(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        below: Option<EntryId>,
    ) -> Result<i64, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .values()
            .filter(|e| e.queue == queue && e.is_eligible(now))
            .filter(|e| below.map_or(true, |limit| e.id < limit))
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntryStatus;
    use chrono::Duration;
    use serde_json::json;

    fn new_entry(queue: &str, priority: i32) -> NewEntry {
        NewEntry {
            queue: queue.to_string(),
            payload: json!({}),
            status: EntryStatus::Waiting,
            priority,
            date_scheduled: None,
            num_schedules: 0,
        }
    }

    #[tokio::test]
    async fn create_assigns_increasing_ids() {
        let store = MemoryStore::new();
        let a = store.create(new_entry("q", 0)).await.unwrap();
        let b = store.create(new_entry("q", 0)).await.unwrap();
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn save_requires_existing_entry() {
        let store = MemoryStore::new();
        let mut entry = store.create(new_entry("q", 0)).await.unwrap();
        store.delete(entry.id).await.unwrap();

        entry.description = Some("late write".to_string());
        assert!(matches!(
            store.save(&entry).await,
            Err(QueueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn claim_respects_the_passed_clock() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let mut entry = new_entry("q", 0);
        entry.date_scheduled = Some(now + Duration::minutes(5));
        store.create(entry).await.unwrap();

        assert!(store.claim_next("q", now).await.unwrap().is_none());
        assert!(store
            .claim_next("q", now + Duration::minutes(5))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn concurrent_claims_never_hand_out_the_same_entry() {
        let store = MemoryStore::new();
        for _ in 0..20 {
            store.create(new_entry("q", 0)).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                while let Some(entry) = store.claim_next("q", Utc::now()).await.unwrap() {
                    ids.push(entry.id);
                }
                ids
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }

        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 20, "every entry claimed exactly once");
    }
}
