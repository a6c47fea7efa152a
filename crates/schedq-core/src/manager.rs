use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    EntryId, EntryStatus, JobDescriptor, JobStatus, QueueEngine, QueueEntry, QueueError,
    QueueStore,
};

/// Cloneable handle to a queue, delegating to [`QueueEngine`].
///
/// Producers, workers and the HTTP layer all talk to a `QueueManager`; the
/// engine behind it stays a plain implementation detail.
#[derive(Clone)]
pub struct QueueManager {
    engine: Arc<QueueEngine>,
}

impl QueueManager {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            engine: Arc::new(QueueEngine::new(store)),
        }
    }

    pub async fn push(
        &self,
        job: &mut JobDescriptor,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<QueueEntry, QueueError> {
        self.engine.push(job, scheduled_at).await
    }

    pub async fn pop(&self, queue: &str) -> Result<Option<QueueEntry>, QueueError> {
        self.engine.pop(queue).await
    }

    pub async fn queue_status(&self) -> Result<BTreeMap<String, i64>, QueueError> {
        self.engine.queue_status().await
    }

    pub async fn queue_job_statuses(&self, queue: &str) -> Result<Vec<JobStatus>, QueueError> {
        self.engine.queue_job_statuses(queue).await
    }

    pub async fn queue_job_status(&self, id: EntryId) -> Result<Option<JobStatus>, QueueError> {
        self.engine.queue_job_status(id).await
    }

    pub async fn update_status(
        &self,
        id: EntryId,
        description: &str,
        status: Option<EntryStatus>,
    ) -> Result<(), QueueError> {
        self.engine.update_status(id, description, status).await
    }

    pub async fn reschedule_job(
        &self,
        job: &JobDescriptor,
        scheduled_at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.engine.reschedule_job(job, scheduled_at).await
    }

    pub async fn finish_job(&self, job: &JobDescriptor) -> Result<(), QueueError> {
        self.engine.finish_job(job).await
    }
}
