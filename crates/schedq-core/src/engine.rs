use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    EntryId, EntryStatus, JobDescriptor, JobStatus, NewEntry, Placement, QueueEntry, QueueError,
    QueueStore,
};

/// Orchestrates the entry lifecycle against a [`QueueStore`].
///
/// The engine is a passive library: it never spawns tasks or blocks beyond
/// the store's own I/O. Workers drive it by polling [`QueueEngine::pop`].
pub struct QueueEngine {
    store: Arc<dyn QueueStore>,
}

impl QueueEngine {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Queues `job`, optionally gated until `scheduled_at`. The entry starts
    /// waiting with a zero schedule count and a payload snapshot of the
    /// descriptor; the assigned id is written back onto `job`.
    pub async fn push(
        &self,
        job: &mut JobDescriptor,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<QueueEntry, QueueError> {
        if job.queue.trim().is_empty() {
            return Err(QueueError::Validation(
                "job has no queue set".to_string(),
            ));
        }

        let entry = self
            .store
            .create(NewEntry {
                queue: job.queue.clone(),
                payload: job.to_payload()?,
                status: EntryStatus::Waiting,
                priority: job.priority,
                date_scheduled: scheduled_at,
                num_schedules: 0,
            })
            .await?;

        job.job_id = Some(entry.id);
        tracing::debug!(id = entry.id, queue = %entry.queue, "job pushed");

        Ok(entry)
    }

    /// Claims the best eligible entry of `queue` and marks it in progress.
    /// An empty queue yields `Ok(None)`, not an error.
    pub async fn pop(&self, queue: &str) -> Result<Option<QueueEntry>, QueueError> {
        let claimed = self.store.claim_next(queue, Utc::now()).await?;
        if let Some(entry) = &claimed {
            tracing::debug!(id = entry.id, queue = %entry.queue, "job claimed");
        }
        Ok(claimed)
    }

    /// Eligible-entry count per queue, for every queue that currently has
    /// work to hand out, keyed and ordered by queue name.
    pub async fn queue_status(&self) -> Result<BTreeMap<String, i64>, QueueError> {
        self.store.eligible_counts(Utc::now()).await
    }

    /// Every entry of `queue` regardless of status, ordered by id, with
    /// purely positional slot numbers: entry `i` of `n` gets slot `i`,
    /// slots `n`. A reporting view, simpler than the dequeue order.
    pub async fn queue_job_statuses(&self, queue: &str) -> Result<Vec<JobStatus>, QueueError> {
        let entries = self.store.entries_for_queue(queue).await?;
        let slots = entries.len() as i64;

        Ok(entries
            .into_iter()
            .zip(1..)
            .map(|(entry, slot)| JobStatus {
                entry,
                placement: Placement { slot, slots },
            })
            .collect())
    }

    /// Point-in-time view of one entry: its slot among the eligible waiting
    /// entries of its own queue (ids below it) and the total eligible count.
    /// Absent entries yield `Ok(None)`; a finished job is an expected
    /// outcome for a polling caller, not an error.
    pub async fn queue_job_status(&self, id: EntryId) -> Result<Option<JobStatus>, QueueError> {
        let Some(entry) = self.store.get(id).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let slots = self.store.count_eligible(&entry.queue, now, None).await?;
        let slot = 1 + self.store.count_eligible(&entry.queue, now, Some(id)).await?;

        Ok(Some(JobStatus {
            entry,
            placement: Placement { slot, slots },
        }))
    }

    /// Sets the entry's description, and its status when one is given. Only
    /// the error status may be reported this way; this is not a general
    /// status setter.
    pub async fn update_status(
        &self,
        id: EntryId,
        description: &str,
        status: Option<EntryStatus>,
    ) -> Result<(), QueueError> {
        if let Some(status) = status {
            if status != EntryStatus::Error {
                return Err(QueueError::Validation(
                    "only the error status can be reported".to_string(),
                ));
            }
        }

        let mut entry = self
            .store
            .get(id)
            .await?
            .ok_or(QueueError::NotFound(id))?;

        entry.description = Some(description.to_string());
        if let Some(status) = status {
            entry.status = status;
        }

        self.store.save(&entry).await
    }

    /// Puts the job back into the waiting state, gated until `scheduled_at`,
    /// provided its schedule policy still allows it. A spent policy fails
    /// with [`QueueError::ScheduleLimitExceeded`] and mutates nothing.
    pub async fn reschedule_job(
        &self,
        job: &JobDescriptor,
        scheduled_at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let id = assigned_id(job)?;
        let mut entry = self
            .store
            .get(id)
            .await?
            .ok_or(QueueError::NotFound(id))?;

        if !job.max_schedules.allows(entry.num_schedules) {
            return Err(QueueError::ScheduleLimitExceeded(id));
        }

        entry.status = EntryStatus::Waiting;
        entry.date_scheduled = Some(scheduled_at);
        entry.num_schedules += 1;

        self.store.save(&entry).await?;
        tracing::debug!(id, %scheduled_at, schedules = entry.num_schedules, "job rescheduled");

        Ok(())
    }

    /// Terminal success: removes the entry. Finishing an already-finished
    /// or unknown job is an error, not a silent no-op.
    pub async fn finish_job(&self, job: &JobDescriptor) -> Result<(), QueueError> {
        let id = assigned_id(job)?;
        if !self.store.delete(id).await? {
            return Err(QueueError::NotFound(id));
        }

        tracing::debug!(id, queue = %job.queue, "job finished");
        Ok(())
    }
}

fn assigned_id(job: &JobDescriptor) -> Result<EntryId, QueueError> {
    job.job_id
        .ok_or_else(|| QueueError::Validation("job has no queue id assigned".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MaxSchedules, MemoryStore};
    use chrono::Duration;
    use serde_json::json;

    fn engine() -> QueueEngine {
        QueueEngine::new(Arc::new(MemoryStore::new()))
    }

    fn job(queue: &str) -> JobDescriptor {
        JobDescriptor::new(queue, "noop", json!({}))
    }

    #[tokio::test]
    async fn push_requires_a_queue_name() {
        let engine = engine();
        let mut nameless = job("");
        assert!(matches!(
            engine.push(&mut nameless, None).await,
            Err(QueueError::Validation(_))
        ));
        assert_eq!(nameless.job_id, None);
    }

    #[tokio::test]
    async fn push_writes_the_assigned_id_back() {
        let engine = engine();
        let mut job = job("mail");
        let entry = engine.push(&mut job, None).await.unwrap();

        assert_eq!(job.job_id, Some(entry.id));
        assert_eq!(entry.status, EntryStatus::Waiting);
        assert_eq!(entry.num_schedules, 0);
        assert_eq!(entry.date_scheduled, None);
    }

    #[tokio::test]
    async fn push_snapshots_the_descriptor() {
        let engine = engine();
        let mut job = JobDescriptor::new("mail", "send-mail", json!({"to": "a@b.c"}));
        engine.push(&mut job, None).await.unwrap();

        // Mutating the producer's descriptor must not leak into the queue.
        job.state = json!({"to": "tampered"});

        let entry = engine.pop("mail").await.unwrap().unwrap();
        let restored = JobDescriptor::from_entry(&entry).unwrap();
        assert_eq!(restored.state, json!({"to": "a@b.c"}));
    }

    #[tokio::test]
    async fn pop_serves_priority_then_insertion_order() {
        let engine = engine();

        let mut a = job("q");
        a.priority = 5;
        let mut b = job("q");
        b.priority = 1;
        let mut c = job("q");
        c.priority = 5;

        engine.push(&mut a, None).await.unwrap();
        engine.push(&mut b, None).await.unwrap();
        engine.push(&mut c, None).await.unwrap();

        let first = engine.pop("q").await.unwrap().unwrap();
        let second = engine.pop("q").await.unwrap().unwrap();
        let third = engine.pop("q").await.unwrap().unwrap();

        assert_eq!(first.id, b.job_id.unwrap());
        assert_eq!(second.id, a.job_id.unwrap());
        assert_eq!(third.id, c.job_id.unwrap());
        assert!(engine.pop("q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pop_never_returns_future_scheduled_entries() {
        let engine = engine();

        let mut later = job("q");
        engine
            .push(&mut later, Some(Utc::now() + Duration::hours(1)))
            .await
            .unwrap();
        assert!(engine.pop("q").await.unwrap().is_none());

        let mut due = job("q");
        engine
            .push(&mut due, Some(Utc::now() - Duration::seconds(1)))
            .await
            .unwrap();
        let popped = engine.pop("q").await.unwrap().unwrap();
        assert_eq!(popped.id, due.job_id.unwrap());
    }

    #[tokio::test]
    async fn pop_marks_the_entry_in_progress_and_skips_it_afterwards() {
        let engine = engine();
        let mut job = job("q");
        engine.push(&mut job, None).await.unwrap();

        let popped = engine.pop("q").await.unwrap().unwrap();
        assert_eq!(popped.status, EntryStatus::Progress);

        // The claimed entry is no longer waiting, so the queue is empty.
        assert!(engine.pop("q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pop_on_an_unknown_queue_is_empty_not_an_error() {
        let engine = engine();
        assert!(engine.pop("nothing-here").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn two_simultaneous_pops_claim_a_single_entry_once() {
        let engine = Arc::new(engine());
        let mut only = job("q");
        engine.push(&mut only, None).await.unwrap();

        let (left, right) = tokio::join!(engine.pop("q"), engine.pop("q"));
        let left = left.unwrap();
        let right = right.unwrap();

        assert!(
            left.is_some() ^ right.is_some(),
            "exactly one caller wins the claim: {left:?} / {right:?}"
        );
    }

    #[tokio::test]
    async fn concurrent_workers_drain_without_duplicates() {
        let engine = Arc::new(engine());
        for _ in 0..30 {
            engine.push(&mut job("q"), None).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..6 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                while let Some(entry) = engine.pop("q").await.unwrap() {
                    ids.push(entry.id);
                }
                ids
            }));
        }

        let mut claimed = Vec::new();
        for handle in handles {
            claimed.extend(handle.await.unwrap());
        }

        let total = claimed.len();
        claimed.sort_unstable();
        claimed.dedup();
        assert_eq!(claimed.len(), total, "no entry claimed twice");
        assert_eq!(total, 30);
    }

    #[tokio::test]
    async fn queue_status_lists_only_queues_with_eligible_work() {
        let engine = engine();

        engine.push(&mut job("beta"), None).await.unwrap();
        engine.push(&mut job("beta"), None).await.unwrap();
        engine.push(&mut job("alpha"), None).await.unwrap();

        // Future-scheduled and in-progress entries do not count.
        engine
            .push(&mut job("gamma"), Some(Utc::now() + Duration::hours(1)))
            .await
            .unwrap();
        engine.push(&mut job("delta"), None).await.unwrap();
        engine.pop("delta").await.unwrap().unwrap();

        let status = engine.queue_status().await.unwrap();
        let listed: Vec<_> = status.iter().map(|(q, n)| (q.as_str(), *n)).collect();
        assert_eq!(listed, vec![("alpha", 1), ("beta", 2)]);
    }

    #[tokio::test]
    async fn queue_job_statuses_number_slots_by_insertion() {
        let engine = engine();

        let mut urgent = job("q");
        urgent.priority = -10;
        engine.push(&mut job("q"), None).await.unwrap();
        engine.push(&mut urgent, None).await.unwrap();
        engine
            .push(&mut job("q"), Some(Utc::now() + Duration::hours(1)))
            .await
            .unwrap();
        engine.push(&mut job("other"), None).await.unwrap();

        let statuses = engine.queue_job_statuses("q").await.unwrap();
        assert_eq!(statuses.len(), 3);
        for (i, status) in statuses.iter().enumerate() {
            // Positional by id, blind to priority and eligibility.
            assert_eq!(status.placement.slot, i as i64 + 1);
            assert_eq!(status.placement.slots, 3);
        }
        assert!(statuses.windows(2).all(|w| w[0].entry.id < w[1].entry.id));
    }

    #[tokio::test]
    async fn queue_job_status_ranks_among_eligible_entries() {
        let engine = engine();

        let mut first = job("q");
        let mut second = job("q");
        let mut third = job("q");
        engine.push(&mut first, None).await.unwrap();
        engine.push(&mut second, None).await.unwrap();
        engine.push(&mut third, None).await.unwrap();

        // An ineligible entry ahead of `third` must not widen its slot.
        engine
            .reschedule_job(&first, Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        let status = engine
            .queue_job_status(third.job_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.placement.slots, 2);
        assert_eq!(status.placement.slot, 2);

        let status = engine
            .queue_job_status(second.job_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.placement.slot, 1);
    }

    #[tokio::test]
    async fn queue_job_status_of_unknown_id_is_absent() {
        let engine = engine();
        assert!(engine.queue_job_status(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_status_reports_errors_and_annotates_progress() {
        let engine = engine();
        let mut job = job("q");
        engine.push(&mut job, None).await.unwrap();
        let id = job.job_id.unwrap();

        engine
            .update_status(id, "oops", Some(EntryStatus::Error))
            .await
            .unwrap();
        let status = engine.queue_job_status(id).await.unwrap().unwrap();
        assert_eq!(status.entry.status, EntryStatus::Error);
        assert_eq!(status.entry.description.as_deref(), Some("oops"));

        // Description-only update leaves the error status in place.
        engine.update_status(id, "retrying", None).await.unwrap();
        let status = engine.queue_job_status(id).await.unwrap().unwrap();
        assert_eq!(status.entry.status, EntryStatus::Error);
        assert_eq!(status.entry.description.as_deref(), Some("retrying"));
    }

    #[tokio::test]
    async fn update_status_rejects_non_error_statuses() {
        let engine = engine();
        let mut job = job("q");
        engine.push(&mut job, None).await.unwrap();
        let id = job.job_id.unwrap();

        for status in [EntryStatus::Waiting, EntryStatus::Progress] {
            assert!(matches!(
                engine.update_status(id, "nope", Some(status)).await,
                Err(QueueError::Validation(_))
            ));
        }

        let unchanged = engine.queue_job_status(id).await.unwrap().unwrap();
        assert_eq!(unchanged.entry.status, EntryStatus::Waiting);
        assert_eq!(unchanged.entry.description, None);
    }

    #[tokio::test]
    async fn update_status_of_unknown_id_is_not_found() {
        let engine = engine();
        assert!(matches!(
            engine.update_status(7, "gone", None).await,
            Err(QueueError::NotFound(7))
        ));
    }

    #[tokio::test]
    async fn reschedule_stops_at_the_policy_limit() {
        let engine = engine();
        let mut job = job("q");
        job.max_schedules = MaxSchedules::Limited(2);
        engine.push(&mut job, None).await.unwrap();
        let id = job.job_id.unwrap();

        let later = Utc::now() + Duration::minutes(1);
        engine.reschedule_job(&job, later).await.unwrap();
        engine.reschedule_job(&job, later).await.unwrap();

        assert!(matches!(
            engine.reschedule_job(&job, later).await,
            Err(QueueError::ScheduleLimitExceeded(i)) if i == id
        ));

        // The failed attempt left the entry untouched.
        let status = engine.queue_job_status(id).await.unwrap().unwrap();
        assert_eq!(status.entry.num_schedules, 2);
    }

    #[tokio::test]
    async fn unlimited_policy_reschedules_forever() {
        let engine = engine();
        let mut job = job("q");
        job.max_schedules = MaxSchedules::Unlimited;
        engine.push(&mut job, None).await.unwrap();

        let later = Utc::now() + Duration::minutes(1);
        for _ in 0..10 {
            engine.reschedule_job(&job, later).await.unwrap();
        }

        let status = engine
            .queue_job_status(job.job_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.entry.num_schedules, 10);
    }

    #[tokio::test]
    async fn reschedule_returns_a_claimed_job_to_the_queue() {
        let engine = engine();
        let mut job = job("q");
        engine.push(&mut job, None).await.unwrap();

        let entry = engine.pop("q").await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Progress);

        engine
            .reschedule_job(&job, Utc::now() - Duration::seconds(1))
            .await
            .unwrap();

        let again = engine.pop("q").await.unwrap().unwrap();
        assert_eq!(again.id, entry.id);
        assert_eq!(again.status, EntryStatus::Progress);
        assert_eq!(again.num_schedules, 1);
    }

    #[tokio::test]
    async fn finish_removes_the_entry() {
        let engine = engine();
        let mut job = job("q");
        engine.push(&mut job, None).await.unwrap();
        let id = job.job_id.unwrap();

        engine.finish_job(&job).await.unwrap();
        assert!(engine.queue_job_status(id).await.unwrap().is_none());

        // Finishing twice is an error, not a silent no-op.
        assert!(matches!(
            engine.finish_job(&job).await,
            Err(QueueError::NotFound(i)) if i == id
        ));
    }

    #[tokio::test]
    async fn unqueued_descriptors_are_rejected() {
        let engine = engine();
        let never_pushed = job("q");

        assert!(matches!(
            engine.finish_job(&never_pushed).await,
            Err(QueueError::Validation(_))
        ));
        assert!(matches!(
            engine.reschedule_job(&never_pushed, Utc::now()).await,
            Err(QueueError::Validation(_))
        ));
    }
}
