use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{EntryId, NewEntry, QueueEntry, QueueError};

/// Persistence contract for queue entries.
///
/// Eligibility ("waiting, and scheduled time unset or passed") is always
/// evaluated against the `now` the engine hands in, so implementations stay
/// deterministic under test.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persists a new entry, assigning its id and timestamps.
    async fn create(&self, entry: NewEntry) -> Result<QueueEntry, QueueError>;

    async fn get(&self, id: EntryId) -> Result<Option<QueueEntry>, QueueError>;

    /// Writes back the mutable fields of an existing entry. Fails with
    /// [`QueueError::NotFound`] when the row no longer exists.
    async fn save(&self, entry: &QueueEntry) -> Result<(), QueueError>;

    /// Removes the entry; returns whether a row was deleted.
    async fn delete(&self, id: EntryId) -> Result<bool, QueueError>;

    /// Atomically claims the best eligible entry of `queue`: among waiting
    /// entries whose scheduled time is unset or `<= now`, the one with the
    /// lowest `(priority, id)` is flipped to progress and returned.
    ///
    /// Select-and-flip must be a single atomic step with respect to other
    /// concurrent `claim_next` calls: two callers must never both receive
    /// the same entry id. This is the one operation implementations must
    /// synchronize; everything else is single-row or read-only.
    async fn claim_next(
        &self,
        queue: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, QueueError>;

    /// All entries of `queue`, any status, ordered by id ascending.
    async fn entries_for_queue(&self, queue: &str) -> Result<Vec<QueueEntry>, QueueError>;

    /// Eligible-entry count per queue, for every queue with at least one
    /// eligible entry. The map iterates in queue-name order.
    async fn eligible_counts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<String, i64>, QueueError>;

    /// Number of eligible entries of `queue`, optionally restricted to ids
    /// strictly below `below`.
    async fn count_eligible(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        below: Option<EntryId>,
    ) -> Result<i64, QueueError>;
}
