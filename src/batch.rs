//! Coalescing submitted entries into bounded batches.
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Channel depth when only the latency bound is configured.
const DEFAULT_DEPTH: usize = 1024;

pub(crate) type FlushFn<T> = Arc<dyn Fn(Vec<T>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Aggregates entries and invokes the flush callback serially, whenever the
/// buffer reaches `max_size` or `max_latency` has passed since the last
/// flush attempt.
///
/// Submissions apply backpressure through the bounded channel while a flush
/// is in progress. Closing performs one final flush and joins the worker.
pub(crate) struct Batcher<T> {
    tx: Mutex<Option<mpsc::Sender<T>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Batcher<T> {
    /// Requires at least one of the two bounds, which the journal builder
    /// validates.
    pub(crate) fn new(
        max_size: Option<usize>,
        max_latency: Option<Duration>,
        on_flush: FlushFn<T>,
    ) -> Self {
        debug_assert!(max_size.is_some() || max_latency.is_some());
        let (tx, rx) = mpsc::channel(max_size.unwrap_or(DEFAULT_DEPTH).max(1));
        let worker = tokio::spawn(run(rx, max_size, max_latency, on_flush));
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue one entry, waiting for room when the buffer is full.
    ///
    /// Errors when the batcher was closed.
    pub(crate) async fn submit(&self, entry: T) -> Result<(), Closed> {
        let tx = self.tx.lock().unwrap().clone();
        match tx {
            Some(tx) => tx.send(entry).await.map_err(|_| Closed),
            None => Err(Closed),
        }
    }

    /// Stop accepting entries, flush whatever is buffered, and wait for the
    /// worker to finish.
    pub(crate) async fn close(&self) {
        let tx = self.tx.lock().unwrap().take();
        drop(tx);
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

/// Submitted to a closed batcher.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Closed;

async fn run<T>(
    mut rx: mpsc::Receiver<T>,
    max_size: Option<usize>,
    max_latency: Option<Duration>,
    on_flush: FlushFn<T>,
) {
    let mut buf: Vec<T> = Vec::new();
    let mut last_flush = Instant::now();
    loop {
        match max_latency {
            Some(latency) => {
                tokio::select! {
                    entry = rx.recv() => match entry {
                        Some(entry) => {
                            buf.push(entry);
                            if max_size.is_some_and(|n| buf.len() >= n) {
                                on_flush(std::mem::take(&mut buf)).await;
                                last_flush = Instant::now();
                            }
                        }
                        None => break,
                    },
                    _ = tokio::time::sleep_until(last_flush + latency) => {
                        if !buf.is_empty() {
                            on_flush(std::mem::take(&mut buf)).await;
                        }
                        last_flush = Instant::now();
                    }
                }
            }
            None => match rx.recv().await {
                Some(entry) => {
                    buf.push(entry);
                    if max_size.is_some_and(|n| buf.len() >= n) {
                        on_flush(std::mem::take(&mut buf)).await;
                        last_flush = Instant::now();
                    }
                }
                None => break,
            },
        }
    }
    if !buf.is_empty() {
        on_flush(buf).await;
    }
}
