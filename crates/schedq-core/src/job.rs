use serde::{Deserialize, Serialize};

use crate::{EntryId, QueueEntry, QueueError};

/// How often a job may be put back into the waiting state after its first
/// push. Kept as a tagged variant so "unlimited" cannot be confused with a
/// numeric limit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MaxSchedules {
    Unlimited,
    Limited(i32),
}

impl MaxSchedules {
    /// Whether a job that has already been rescheduled `num_schedules` times
    /// may be rescheduled once more.
    pub fn allows(&self, num_schedules: i32) -> bool {
        match self {
            MaxSchedules::Unlimited => true,
            MaxSchedules::Limited(max) => num_schedules < *max,
        }
    }
}

/// Description of a unit of work handed to [`crate::QueueManager::push`].
///
/// `kind` names the job type and `state` carries its serialized business
/// state; both are opaque to the queue. Push snapshots the descriptor into
/// the entry payload, so mutating a descriptor after pushing it never
/// affects the queued copy.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct JobDescriptor {
    pub queue: String,
    #[schema(example = "send-mail")]
    pub kind: String,
    #[serde(default)]
    pub state: serde_json::Value,

    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_max_schedules")]
    pub max_schedules: MaxSchedules,

    /// Assigned by push; required by reschedule and finish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<EntryId>,
}

fn default_priority() -> i32 {
    0
}

fn default_max_schedules() -> MaxSchedules {
    MaxSchedules::Limited(5)
}

impl JobDescriptor {
    pub fn new(queue: impl Into<String>, kind: impl Into<String>, state: serde_json::Value) -> Self {
        Self {
            queue: queue.into(),
            kind: kind.into(),
            state,
            priority: default_priority(),
            max_schedules: default_max_schedules(),
            job_id: None,
        }
    }

    /// Value snapshot of the descriptor for storage in an entry payload.
    /// The assigned id is stripped; it lives on the entry itself.
    pub fn to_payload(&self) -> Result<serde_json::Value, QueueError> {
        let mut snapshot = self.clone();
        snapshot.job_id = None;
        serde_json::to_value(&snapshot).map_err(|e| QueueError::Payload(e.to_string()))
    }

    /// Reconstructs the descriptor stored in `entry`, with the entry's id
    /// assigned. The result is a fresh value, never a live reference to
    /// whatever the producer pushed.
    pub fn from_entry(entry: &QueueEntry) -> Result<Self, QueueError> {
        let mut job: JobDescriptor = serde_json::from_value(entry.payload.clone())
            .map_err(|e| QueueError::Payload(e.to_string()))?;
        job.job_id = Some(entry.id);
        Ok(job)
    }
}
