use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned entry identifier. Ids increase with insertion order, which
/// is what makes the id tie-break below a FIFO rule.
pub type EntryId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Waiting,
    Progress,
    Error,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Waiting => "waiting",
            EntryStatus::Progress => "progress",
            EntryStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted record tracking one job's passage through a queue.
///
/// An entry exists for exactly the span between push and finish; finishing
/// deletes the row, there is no retained "done" status.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct QueueEntry {
    #[schema(example = 42)]
    pub id: EntryId,
    pub queue: String,
    /// Snapshot of the job descriptor taken at push time. Opaque to the
    /// engine; decode explicitly with [`crate::JobDescriptor::from_entry`].
    pub payload: serde_json::Value,

    pub status: EntryStatus,

    /// Lower value is served first.
    pub priority: i32,
    /// Entry is eligible for dequeue only when unset or in the past.
    pub date_scheduled: Option<DateTime<Utc>>,
    /// Times the entry has been rescheduled since push.
    pub num_schedules: i32,

    /// Free-text progress or error note, independent of `status`.
    pub description: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Whether the entry can be claimed by `pop` at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == EntryStatus::Waiting
            && self.date_scheduled.map_or(true, |at| at <= now)
    }
}

/// Fields the engine supplies when creating an entry; the store assigns the
/// id and timestamps.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub queue: String,
    pub payload: serde_json::Value,
    pub status: EntryStatus,
    pub priority: i32,
    pub date_scheduled: Option<DateTime<Utc>>,
    pub num_schedules: i32,
}

/// Query-time queue position of an entry. Never persisted; recomputed on
/// each read and stale the moment a concurrent writer moves the queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
pub struct Placement {
    /// 1-based rank of the entry.
    pub slot: i64,
    /// Total number of entries counted alongside `slot`.
    pub slots: i64,
}

/// Read-side view of an entry together with its queue position.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct JobStatus {
    pub entry: QueueEntry,
    pub placement: Placement,
}
