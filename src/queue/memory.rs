use crate::queue::{ActionQueue, QueueError, QueueProvider, QueueStats, QueueTask};

use bytes::Bytes;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// An in-memory [`ActionQueue`] for tests.
///
/// Delivery order is put order; retried tasks re-enter at the tail so a
/// retried task can never starve the work queued behind it. Paired with
/// [`MemoryQueueProvider`], re-opening the same directory resumes the same
/// queue with claimed-but-uncompleted tasks re-delivered, which is the
/// restart behavior a durable implementation provides from disk.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    topics: Mutex<HashMap<String, TopicState>>,
    signal: Notify,
}

#[derive(Debug, Default)]
struct TopicState {
    next_id: u64,
    pending: BTreeMap<u64, Bytes>,
    in_progress: HashMap<u64, Bytes>,
    completed: u64,
    retried: u64,
    enqueued: u64,
}

impl MemoryQueue {
    /// Create an empty `MemoryQueue`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-deliver claimed tasks at their original queue positions, as a
    /// durable queue does for uncompleted work after a restart.
    pub fn recover(&self) {
        let mut topics = self.topics.lock().unwrap();
        for state in topics.values_mut() {
            let claimed = std::mem::take(&mut state.in_progress);
            state.pending.extend(claimed);
        }
        drop(topics);
        self.signal.notify_one();
    }

    fn try_take(&self, topic: &str) -> Option<QueueTask> {
        let mut topics = self.topics.lock().unwrap();
        let state = topics.get_mut(topic)?;
        let (&id, _) = state.pending.first_key_value()?;
        let payload = state.pending.remove(&id)?;
        state.in_progress.insert(id, payload.clone());
        Some(QueueTask { id, payload })
    }
}

impl ActionQueue for MemoryQueue {
    fn put<'a, 'queue: 'a>(
        &'queue self,
        topic: &'a str,
        payload: Bytes,
    ) -> BoxFuture<'a, Result<(), QueueError>> {
        let mut topics = self.topics.lock().unwrap();
        let state = topics.entry(topic.to_string()).or_default();
        let id = state.next_id;
        state.next_id += 1;
        state.pending.insert(id, payload);
        state.enqueued += 1;
        drop(topics);
        self.signal.notify_one();
        Box::pin(futures::future::ready(Ok(())))
    }

    fn take<'a, 'queue: 'a>(
        &'queue self,
        topic: &'a str,
        timeout: Option<Duration>,
    ) -> BoxFuture<'a, Option<QueueTask>> {
        Box::pin(async move {
            let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
            loop {
                let notified = self.signal.notified();
                if let Some(task) = self.try_take(topic) {
                    return Some(task);
                }
                match deadline {
                    Some(deadline) => {
                        if tokio::time::timeout_at(deadline, notified).await.is_err() {
                            return self.try_take(topic);
                        }
                    }
                    None => notified.await,
                }
            }
        })
    }

    fn complete(&self, topic: &str, task: &QueueTask) {
        let mut topics = self.topics.lock().unwrap();
        if let Some(state) = topics.get_mut(topic)
            && state.in_progress.remove(&task.id).is_some()
        {
            state.completed += 1;
        }
    }

    fn retry(&self, topic: &str, task: &QueueTask) {
        let mut requeued = false;
        {
            let mut topics = self.topics.lock().unwrap();
            if let Some(state) = topics.get_mut(topic)
                && let Some(payload) = state.in_progress.remove(&task.id)
            {
                let id = state.next_id;
                state.next_id += 1;
                state.pending.insert(id, payload);
                state.retried += 1;
                requeued = true;
            }
        }
        if requeued {
            self.signal.notify_one();
        }
    }

    fn snapshot(&self, topic: &str) -> Vec<QueueTask> {
        let mut topics = self.topics.lock().unwrap();
        let Some(state) = topics.get_mut(topic) else {
            return Vec::new();
        };
        let pending = std::mem::take(&mut state.pending);
        let mut tasks = Vec::with_capacity(pending.len());
        for (id, payload) in pending {
            state.in_progress.insert(id, payload.clone());
            tasks.push(QueueTask { id, payload });
        }
        tasks
    }

    fn stats(&self, topic: &str) -> QueueStats {
        let topics = self.topics.lock().unwrap();
        let Some(state) = topics.get(topic) else {
            return QueueStats::default();
        };
        QueueStats {
            in_progress: state.in_progress.len() as u64,
            completed: state.completed,
            retried: state.retried,
            enqueued: state.enqueued,
            num_slabs: 1,
            num_active_slabs: u64::from(!state.pending.is_empty()),
        }
    }
}

/// Opens [`MemoryQueue`]s keyed by directory, so a journal re-opened on the
/// same directory resumes the queue a previous instance left behind.
#[derive(Debug, Default)]
pub struct MemoryQueueProvider {
    queues: Mutex<HashMap<PathBuf, Arc<MemoryQueue>>>,
}

impl MemoryQueueProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueProvider for MemoryQueueProvider {
    fn open(&self, directory: &Path, _fsync: bool) -> Result<Arc<dyn ActionQueue>, QueueError> {
        let queue = {
            let mut queues = self.queues.lock().unwrap();
            queues
                .entry(directory.to_path_buf())
                .or_insert_with(|| Arc::new(MemoryQueue::new()))
                .clone()
        };
        queue.recover();
        Ok(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "actions";

    fn payload(n: u8) -> Bytes {
        Bytes::copy_from_slice(&[n])
    }

    #[tokio::test]
    async fn delivers_in_put_order() {
        let queue = MemoryQueue::new();
        for n in 0..3 {
            queue.put(TOPIC, payload(n)).await.unwrap();
        }
        for n in 0..3 {
            let task = queue.take(TOPIC, Some(Duration::from_millis(10))).await;
            assert_eq!(task.unwrap().payload, payload(n));
        }
        assert!(
            queue
                .take(TOPIC, Some(Duration::from_millis(10)))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn retry_re_enqueues_at_the_tail() {
        let queue = MemoryQueue::new();
        queue.put(TOPIC, payload(0)).await.unwrap();
        queue.put(TOPIC, payload(1)).await.unwrap();
        let first = queue.take(TOPIC, None).await.unwrap();
        queue.retry(TOPIC, &first);
        assert_eq!(queue.take(TOPIC, None).await.unwrap().payload, payload(1));
        assert_eq!(queue.take(TOPIC, None).await.unwrap().payload, payload(0));
    }

    #[tokio::test]
    async fn snapshot_claims_and_retry_restores_order() {
        let queue = MemoryQueue::new();
        for n in 0..3 {
            queue.put(TOPIC, payload(n)).await.unwrap();
        }
        let snapshot = queue.snapshot(TOPIC);
        assert_eq!(snapshot.len(), 3);
        assert!(
            queue
                .take(TOPIC, Some(Duration::from_millis(10)))
                .await
                .is_none()
        );
        for task in &snapshot {
            queue.retry(TOPIC, task);
        }
        for n in 0..3 {
            let task = queue.take(TOPIC, None).await.unwrap();
            assert_eq!(task.payload, payload(n));
        }
    }

    #[tokio::test]
    async fn reopen_re_delivers_claimed_tasks() {
        let provider = MemoryQueueProvider::new();
        let dir = Path::new("/tmp/journal-queue");
        let queue = provider.open(dir, true).unwrap();
        queue.put(TOPIC, payload(7)).await.unwrap();
        let task = queue.take(TOPIC, None).await.unwrap();
        assert_eq!(queue.stats(TOPIC).in_progress, 1);
        drop(task);

        let reopened = provider.open(dir, true).unwrap();
        let task = reopened.take(TOPIC, Some(Duration::from_millis(10))).await;
        assert_eq!(task.unwrap().payload, payload(7));
    }

    #[tokio::test]
    async fn stats_track_the_lifecycle() {
        let queue = MemoryQueue::new();
        queue.put(TOPIC, payload(0)).await.unwrap();
        queue.put(TOPIC, payload(1)).await.unwrap();
        let task = queue.take(TOPIC, None).await.unwrap();
        queue.complete(TOPIC, &task);
        let task = queue.take(TOPIC, None).await.unwrap();
        queue.retry(TOPIC, &task);
        let stats = queue.stats(TOPIC);
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.in_progress, 0);
        assert_eq!(stats.num_active_slabs, 1);
    }
}
