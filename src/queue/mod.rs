//! The durable action queue the journal plans work through.
//!
//! The queue itself is an external collaborator: this module only fixes the
//! interface the journal needs. Implementations persist payloads, survive
//! process death, and re-deliver whatever was not completed. [`MemoryQueue`]
//! ships for tests and for running against a queue whose durability you do
//! not need.
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

mod memory;
pub use memory::{MemoryQueue, MemoryQueueProvider};

/// A claimed queue entry.
///
/// The payload is whatever bytes were `put`; a task stays claimed until the
/// consumer calls [`complete`](ActionQueue::complete) or
/// [`retry`](ActionQueue::retry) with it.
#[derive(Debug, Clone)]
pub struct QueueTask {
    /// Queue-assigned identity of this delivery.
    pub id: u64,
    /// The serialized payload.
    pub payload: Bytes,
}

/// Counters a queue reports about one topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueueStats {
    /// Tasks taken but neither completed nor retried.
    pub in_progress: u64,
    /// Tasks acknowledged as done.
    pub completed: u64,
    /// Tasks handed back for re-delivery.
    pub retried: u64,
    /// Tasks ever put on the topic.
    pub enqueued: u64,
    /// Storage slabs backing the topic.
    pub num_slabs: u64,
    /// Slabs with undelivered tasks.
    pub num_active_slabs: u64,
}

impl QueueStats {
    /// Accumulate another snapshot into this one, field-wise.
    pub fn merge(&mut self, other: &QueueStats) {
        self.in_progress += other.in_progress;
        self.completed += other.completed;
        self.retried += other.retried;
        self.enqueued += other.enqueued;
        self.num_slabs += other.num_slabs;
        self.num_active_slabs += other.num_active_slabs;
    }
}

/// A named durable FIFO of planned work.
pub trait ActionQueue: Send + Sync {
    /// Persist a payload at the tail of `topic`.
    fn put<'a, 'queue: 'a>(
        &'queue self,
        topic: &'a str,
        payload: Bytes,
    ) -> BoxFuture<'a, Result<(), QueueError>>;

    /// Claim the next task, waiting up to `timeout` (or indefinitely when
    /// `None`) for one to arrive.
    fn take<'a, 'queue: 'a>(
        &'queue self,
        topic: &'a str,
        timeout: Option<Duration>,
    ) -> BoxFuture<'a, Option<QueueTask>>;

    /// Acknowledge a claimed task as done.
    fn complete(&self, topic: &str, task: &QueueTask);

    /// Hand a claimed task back for re-delivery after the tasks currently
    /// queued.
    fn retry(&self, topic: &str, task: &QueueTask);

    /// Claim every currently pending task without completing any, in queue
    /// order. Callers [`retry`](ActionQueue::retry) them afterwards to
    /// restore delivery.
    fn snapshot(&self, topic: &str) -> Vec<QueueTask>;

    /// Counters for `topic`.
    fn stats(&self, topic: &str) -> QueueStats;
}

/// Opens the durable queue backing one journal.
///
/// The journal derives the directory (per shard, when sharding) and forwards
/// its `fsync` configuration.
pub trait QueueProvider: Send + Sync {
    /// Open, or re-open, the queue stored under `directory`.
    fn open(&self, directory: &Path, fsync: bool) -> Result<Arc<dyn ActionQueue>, QueueError>;
}

/// A durable queue failure.
#[derive(Debug, thiserror::Error)]
#[error("durable queue: {0}")]
pub struct QueueError(
    /// Description of the failure.
    pub String,
);
