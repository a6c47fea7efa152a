//! Persistent job queue engine.
//!
//! Producers push named jobs with a priority and an optional not-before
//! time; workers pop the oldest eligible highest-priority entry per queue,
//! process it, and close the loop by finishing it, reporting an error, or
//! rescheduling it within the job's schedule policy.
//!
//! The crate is a passive library around a [`QueueStore`]: there is no
//! scheduler thread, and the only operation the store must synchronize is
//! the pop-time claim. See [`MemoryStore`] for an embedded store;
//! `schedq-server` ships the Postgres-backed one.

mod engine;
mod entry;
mod error;
mod job;
mod manager;
mod memory;
mod store;

pub use engine::QueueEngine;
pub use entry::{EntryId, EntryStatus, JobStatus, NewEntry, Placement, QueueEntry};
pub use error::QueueError;
pub use job::{JobDescriptor, MaxSchedules};
pub use manager::QueueManager;
pub use memory::MemoryStore;
pub use store::QueueStore;
