use thiserror::Error;

use crate::EntryId;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The operation was refused before touching the store.
    #[error("invalid job: {0}")]
    Validation(String),

    #[error("no queue entry with id {0}")]
    NotFound(EntryId),

    /// Reschedule was refused because the job's schedule policy is spent.
    /// The entry is left untouched.
    #[error("job {0} has no schedules left")]
    ScheduleLimitExceeded(EntryId),

    /// An entry payload that no longer decodes to a job descriptor.
    #[error("malformed job payload: {0}")]
    Payload(String),

    #[error("store error: {0}")]
    Store(String),
}
