//! The journal façade: configuration, submission, stats, and shutdown.
use crate::action::{Action, TOPIC, put_with_retry};
use crate::batch::{Batcher, FlushFn};
use crate::codec::{BytesEncoder, Compression, EntryEncoder, build_chunk};
use crate::coordinator::Coordinator;
use crate::error::{ErrorRepr, Result};
use crate::position::{PartLimits, Position, Step, advance};
use crate::queue::{ActionQueue, QueueProvider, QueueStats};
use crate::store::{Bucket, ObjectStore, SdkStore, StoreAdapter};
use crate::time::{Clock, DirectoryFormat, SystemClock};

use serde::Serialize;
use std::collections::HashSet;
use std::fmt::{self, Debug, Formatter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Flush at least once a minute when no latency bound is configured.
const DEFAULT_BATCH_LATENCY: Duration = Duration::from_secs(60);

/// Counters shared between the façade and the upload coordinator.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    enqueued: AtomicU64,
    uploaded: AtomicU64,
}

impl Counters {
    pub(crate) fn add_enqueued(&self, n: u64) {
        self.enqueued.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_uploaded(&self, n: u64) {
        self.uploaded.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub(crate) fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }
}

/// A snapshot of journal progress.
///
/// The gap between `enqueued` and `uploaded` is the backlog the object store
/// has not yet acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JournalStats {
    /// Entries accepted by `submit`.
    pub enqueued: u64,
    /// Entries whose bytes the store has acknowledged in an uploaded part.
    pub uploaded: u64,
    /// The durable queue's own counters.
    pub queue: QueueStats,
}

impl JournalStats {
    /// Entries submitted but not yet acknowledged by the store.
    pub fn backlog(&self) -> u64 {
        self.enqueued.saturating_sub(self.uploaded)
    }

    pub(crate) fn merge(&mut self, other: &JournalStats) {
        self.enqueued += other.enqueued;
        self.uploaded += other.uploaded;
        self.queue.merge(&other.queue);
    }
}

/// Configures and builds a [`Journal`].
///
/// Start from [`JournalBuilder::bytes`] when entries are already byte-like;
/// otherwise start from [`JournalBuilder::new`] and supply an
/// [`EntryEncoder`].
pub struct JournalBuilder<T> {
    bucket: Option<Bucket>,
    store: Option<Arc<dyn ObjectStore>>,
    access_key: Option<String>,
    secret_key: Option<String>,
    directory_format: String,
    local_directory: Option<PathBuf>,
    encoder: Option<Arc<dyn EntryEncoder<T>>>,
    compression: Compression,
    delimiter: Vec<u8>,
    max_batch_size: Option<usize>,
    max_batch_latency: Option<Duration>,
    fsync: bool,
    id: Option<String>,
    queue_provider: Option<Arc<dyn QueueProvider>>,
    clock: Arc<dyn Clock>,
    limits: PartLimits,
    retry_delay: Duration,
    shards: Option<usize>,
}

impl<T> JournalBuilder<T> {
    /// Create a builder with defaults: daily directories, newline delimiter,
    /// identity compression, a one-minute batch latency, and fsync on.
    pub fn new() -> Self {
        Self {
            bucket: None,
            store: None,
            access_key: None,
            secret_key: None,
            directory_format: "%Y/%m/%d".to_string(),
            local_directory: None,
            encoder: None,
            compression: Compression::Identity,
            delimiter: vec![b'\n'],
            max_batch_size: None,
            max_batch_latency: Some(DEFAULT_BATCH_LATENCY),
            fsync: true,
            id: None,
            queue_provider: None,
            clock: Arc::new(SystemClock),
            limits: PartLimits::default(),
            retry_delay: Duration::from_secs(1),
            shards: None,
        }
    }

    /// A builder that journals entries as their own bytes.
    pub fn bytes() -> Self
    where
        T: AsRef<[u8]>,
    {
        Self::new().encoder(BytesEncoder)
    }

    /// The destination bucket. Required.
    pub fn bucket<B: Into<Bucket>>(mut self, bucket: B) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// The object store to upload through.
    ///
    /// Defaults to [`SdkStore`] configured from the environment, or from
    /// [`credentials`](JournalBuilder::credentials) when those are set.
    pub fn store<S: ObjectStore + 'static>(self, store: S) -> Self {
        self.shared_store(Arc::new(store))
    }

    /// An already shared object store.
    pub fn shared_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Static S3 credentials for the default [`SdkStore`].
    pub fn credentials(mut self, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    /// A `strftime` pattern for the time-partitioned directories, optionally
    /// led by a single-quoted literal segment, e.g. `'events/'%Y/%m/%d`.
    pub fn directory_format(mut self, format: impl Into<String>) -> Self {
        self.directory_format = format.into();
        self
    }

    /// Directory for durable queue state, created if missing. Required.
    pub fn local_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.local_directory = Some(directory.into());
        self
    }

    /// How one entry becomes bytes.
    pub fn encoder<E>(mut self, encoder: E) -> Self
    where
        E: EntryEncoder<T> + 'static,
    {
        self.encoder = Some(Arc::new(encoder));
        self
    }

    /// Compression applied to each flushed batch.
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Bytes interposed after every encoded entry.
    pub fn delimiter(mut self, delimiter: impl Into<Vec<u8>>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Flush whenever this many entries are buffered.
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    /// Flush whenever this much time has passed since the last flush.
    pub fn max_batch_latency(mut self, latency: Duration) -> Self {
        self.max_batch_latency = Some(latency);
        self
    }

    /// Flush on size only. Requires a batch size.
    pub fn no_batch_latency(mut self) -> Self {
        self.max_batch_latency = None;
        self
    }

    /// Whether the durable queue should fsync every put.
    pub fn fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    /// The journal identity embedded in object keys.
    ///
    /// Must be stable across restarts; recovery only adopts uploads whose
    /// keys carry it. Defaults to the hostname with `/` replaced by `_`.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Opens the durable queue backing this journal. Required.
    pub fn queue_provider(mut self, provider: Arc<dyn QueueProvider>) -> Self {
        self.queue_provider = Some(provider);
        self
    }

    /// The clock driving directory partitioning.
    pub fn clock<C: Clock + 'static>(self, clock: C) -> Self {
        self.shared_clock(Arc::new(clock))
    }

    /// An already shared clock.
    pub fn shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Multipart geometry, injectable for tests.
    pub fn limits(mut self, limits: PartLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Backoff between retries of failed store and queue calls.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Fan submissions out over this many independent journals, in `1..=36`.
    ///
    /// Build with [`build_sharded`](JournalBuilder::build_sharded).
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = Some(shards);
        self
    }

    pub(crate) async fn resolve(self) -> Result<Resolved<T>> {
        let bucket = self
            .bucket
            .ok_or(ErrorRepr::Missing("JournalBuilder", "bucket"))?;
        if bucket.is_empty() {
            return Err(ErrorRepr::Missing("JournalBuilder", "bucket").into());
        }
        let dirfmt = DirectoryFormat::parse(&self.directory_format)?;
        let local_directory = self
            .local_directory
            .ok_or(ErrorRepr::Missing("JournalBuilder", "local_directory"))?;
        let encoder = self
            .encoder
            .ok_or(ErrorRepr::Missing("JournalBuilder", "encoder"))?;
        if self.max_batch_size.is_none() && self.max_batch_latency.is_none() {
            return Err(ErrorRepr::Config(
                "at least one of max_batch_size and max_batch_latency is required".to_string(),
            )
            .into());
        }
        let provider = self
            .queue_provider
            .ok_or(ErrorRepr::Missing("JournalBuilder", "queue_provider"))?;
        if let Some(shards) = self.shards
            && !(1..=36).contains(&shards)
        {
            return Err(ErrorRepr::Config(format!("shards must be in 1..=36, got {shards}")).into());
        }
        let id = match self.id {
            Some(id) => id,
            None => hostname::get()
                .map_err(ErrorRepr::Io)?
                .to_string_lossy()
                .replace('/', "_"),
        };
        let store = match (self.store, self.access_key, self.secret_key) {
            (Some(store), _, _) => store,
            (None, Some(access), Some(secret)) => {
                Arc::new(SdkStore::from_keys(&access, &secret).await)
            }
            _ => Arc::new(SdkStore::defaults().await),
        };
        Ok(Resolved {
            bucket,
            store,
            dirfmt,
            local_directory,
            encoder,
            compression: self.compression,
            delimiter: self.delimiter,
            max_batch_size: self.max_batch_size,
            max_batch_latency: self.max_batch_latency,
            fsync: self.fsync,
            id,
            provider,
            clock: self.clock,
            limits: self.limits,
            retry_delay: self.retry_delay,
            shards: self.shards,
        })
    }
}

impl<T: Send + 'static> JournalBuilder<T> {
    /// Build a single-shard [`Journal`].
    pub async fn build(self) -> Result<Journal<T>> {
        let resolved = self.resolve().await?;
        if resolved.shards.is_some() {
            return Err(ErrorRepr::Config(
                "shards is configured; use build_sharded".to_string(),
            )
            .into());
        }
        Journal::open(resolved).await
    }
}

impl<T> Default for JournalBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for JournalBuilder<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("JournalBuilder")
            .field("bucket", &self.bucket)
            .field("directory_format", &self.directory_format)
            .field("local_directory", &self.local_directory)
            .field("compression", &self.compression)
            .field("max_batch_size", &self.max_batch_size)
            .field("max_batch_latency", &self.max_batch_latency)
            .field("fsync", &self.fsync)
            .field("id", &self.id)
            .field("limits", &self.limits)
            .field("shards", &self.shards)
            .finish()
    }
}

/// A validated configuration, one per journal instance.
pub(crate) struct Resolved<T> {
    pub(crate) bucket: Bucket,
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) dirfmt: DirectoryFormat,
    pub(crate) local_directory: PathBuf,
    pub(crate) encoder: Arc<dyn EntryEncoder<T>>,
    pub(crate) compression: Compression,
    pub(crate) delimiter: Vec<u8>,
    pub(crate) max_batch_size: Option<usize>,
    pub(crate) max_batch_latency: Option<Duration>,
    pub(crate) fsync: bool,
    pub(crate) id: String,
    pub(crate) provider: Arc<dyn QueueProvider>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) limits: PartLimits,
    pub(crate) retry_delay: Duration,
    pub(crate) shards: Option<usize>,
}

impl<T> Resolved<T> {
    /// The configuration of one shard: its own directory tree and its own
    /// durable queue directory.
    pub(crate) fn for_shard(&self, symbol: char) -> Self {
        let segment = symbol.to_string();
        Self {
            bucket: self.bucket.clone(),
            store: self.store.clone(),
            dirfmt: self.dirfmt.prefixed(&segment),
            local_directory: self.local_directory.join(&segment),
            encoder: self.encoder.clone(),
            compression: self.compression.clone(),
            delimiter: self.delimiter.clone(),
            max_batch_size: self.max_batch_size,
            max_batch_latency: self.max_batch_latency,
            fsync: self.fsync,
            id: self.id.clone(),
            provider: self.provider.clone(),
            clock: self.clock.clone(),
            limits: self.limits,
            retry_delay: self.retry_delay,
            shards: self.shards,
        }
    }
}

/// A durable, batching journal of entries to S3 multipart objects.
///
/// Entries go in through [`submit`](Journal::submit); batches of them are
/// encoded, compressed, and planned onto a durable queue; a background
/// coordinator drives the resulting multipart uploads with at-least-once
/// retry. [`close`](Journal::close) drains everything before returning.
pub struct Journal<T> {
    batcher: Batcher<T>,
    queue: Arc<dyn ActionQueue>,
    counters: Arc<Counters>,
    closed: AtomicBool,
    latch: Arc<AtomicBool>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
    retry_delay: Duration,
}

impl<T: Send + 'static> Journal<T> {
    /// Start configuring a journal.
    pub fn builder() -> JournalBuilder<T> {
        JournalBuilder::new()
    }

    pub(crate) async fn open(cfg: Resolved<T>) -> Result<Self> {
        std::fs::create_dir_all(&cfg.local_directory).map_err(ErrorRepr::Io)?;
        let queue = cfg.provider.open(&cfg.local_directory, cfg.fsync)?;
        let store = StoreAdapter::from_arc(cfg.store.clone(), cfg.limits);

        let directory = cfg.dirfmt.directory(cfg.clock.now());
        let position = initial_position(&store, queue.as_ref(), &cfg, &directory).await?;
        put_with_retry(
            queue.as_ref(),
            &Action::Start(position.clone()),
            cfg.retry_delay,
        )
        .await;

        let counters = Arc::new(Counters::default());
        let latch = Arc::new(AtomicBool::new(false));
        let coordinator = Coordinator::new(
            queue.clone(),
            store,
            cfg.bucket.clone(),
            cfg.id.clone(),
            cfg.dirfmt.listing_prefix().to_string(),
            cfg.limits,
            cfg.retry_delay,
            counters.clone(),
            latch.clone(),
        );
        let coordinator = tokio::spawn(coordinator.run());

        let position = Arc::new(Mutex::new(position));
        let flush_queue = queue.clone();
        let encoder = cfg.encoder.clone();
        let compression = cfg.compression.clone();
        let delimiter = cfg.delimiter.clone();
        let dirfmt = cfg.dirfmt.clone();
        let clock = cfg.clock.clone();
        let limits = cfg.limits;
        let retry_delay = cfg.retry_delay;
        let on_flush: FlushFn<T> = Arc::new(move |entries| {
            let queue = flush_queue.clone();
            let position = position.clone();
            let encoder = encoder.clone();
            let compression = compression.clone();
            let delimiter = delimiter.clone();
            let dirfmt = dirfmt.clone();
            let clock = clock.clone();
            Box::pin(async move {
                flush_batch(
                    entries,
                    queue,
                    position,
                    encoder,
                    compression,
                    delimiter,
                    dirfmt,
                    clock,
                    limits,
                    retry_delay,
                )
                .await;
            })
        });
        let batcher = Batcher::new(cfg.max_batch_size, cfg.max_batch_latency, on_flush);

        Ok(Self {
            batcher,
            queue,
            counters,
            closed: AtomicBool::new(false),
            latch,
            coordinator: Mutex::new(Some(coordinator)),
            retry_delay: cfg.retry_delay,
        })
    }

    /// Hand one entry to the journal.
    ///
    /// Blocks while the batch buffer is full; fails once the journal is
    /// closed.
    pub async fn submit(&self, entry: T) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ErrorRepr::Closed.into());
        }
        self.counters.add_enqueued(1);
        self.batcher
            .submit(entry)
            .await
            .map_err(|_| ErrorRepr::Closed.into())
    }

    /// A snapshot of progress counters.
    pub fn stats(&self) -> JournalStats {
        JournalStats {
            enqueued: self.counters.enqueued(),
            uploaded: self.counters.uploaded(),
            queue: self.queue.stats(TOPIC),
        }
    }

    /// Flush what is buffered, finalize every live upload, and wait for the
    /// coordinator to drain. Subsequent submissions fail.
    pub async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let handle = self.coordinator.lock().unwrap().take();
        let Some(handle) = handle else {
            return Ok(());
        };
        self.batcher.close().await;
        put_with_retry(self.queue.as_ref(), &Action::Flush, self.retry_delay).await;
        self.latch.store(true, Ordering::SeqCst);
        if let Err(e) = handle.await {
            warn!(error = %e, "upload coordinator exited abnormally");
        }
        Ok(())
    }

    /// Tear the journal down without draining.
    ///
    /// Buffered batches still reach the durable queue, but the coordinator
    /// is stopped where it stands; whatever it owed the store is left for
    /// the next journal opened with the same identity to recover.
    pub async fn abort(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let handle = self.coordinator.lock().unwrap().take();
        self.batcher.close().await;
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl<T> Debug for Journal<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Journal")
            .field("closed", &self.closed)
            .field("stats", &"Counters")
            .finish()
    }
}

/// Where this process should write so it never collides with prior files:
/// past the files visible in the store and past any file the durable queue
/// still has work planned for.
async fn initial_position<T>(
    store: &StoreAdapter,
    queue: &dyn ActionQueue,
    cfg: &Resolved<T>,
    directory: &str,
) -> Result<Position> {
    let prefix = format!("{directory}/{}", cfg.id);
    let complete = store.list_complete(&cfg.bucket, &prefix).await?;
    let pending = store.list_multipart(&cfg.bucket, &prefix).await?;
    let mut distinct: HashSet<String> = complete.into_iter().collect();
    distinct.extend(pending.into_iter().map(|listing| listing.key));
    let from_listings = distinct.len() as u64;

    let snapshot = queue.snapshot(TOPIC);
    let mut highest: Option<u64> = None;
    for task in &snapshot {
        if let Ok(action) = Action::decode(&task.payload)
            && let Some(position) = action.position()
        {
            highest = Some(highest.map_or(position.part_index, |h| h.max(position.part_index)));
        }
    }
    for task in &snapshot {
        queue.retry(TOPIC, task);
    }
    let from_queue = highest.map_or(0, |h| h / cfg.limits.max_parts_per_file + 1);

    let file_count = from_listings.max(from_queue);
    Ok(Position::new(
        0,
        cfg.limits.max_parts_per_file * file_count,
        directory,
    ))
}

#[allow(clippy::too_many_arguments)]
async fn flush_batch<T>(
    entries: Vec<T>,
    queue: Arc<dyn ActionQueue>,
    position: Arc<Mutex<Position>>,
    encoder: Arc<dyn EntryEncoder<T>>,
    compression: Compression,
    delimiter: Vec<u8>,
    dirfmt: DirectoryFormat,
    clock: Arc<dyn Clock>,
    limits: PartLimits,
    retry_delay: Duration,
) {
    let chunk = match build_chunk(&entries, encoder.as_ref(), &delimiter, &compression) {
        Ok(chunk) => chunk,
        Err(e) => {
            error!(error = %e, entries = entries.len(), "failed to encode batch; dropping it");
            return;
        }
    };
    let directory = dirfmt.directory(clock.now());
    let (next, steps) = {
        let mut position = position.lock().unwrap();
        let (next, steps) = advance(&position, &directory, chunk.bytes.len() as u64, &limits);
        *position = next.clone();
        (next, steps)
    };
    // Starts must land before the chunk they cover; uploads and ends after.
    for step in &steps {
        if let Step::Start(pos) = step {
            put_with_retry(queue.as_ref(), &Action::Start(pos.clone()), retry_delay).await;
        }
    }
    let conj = Action::Conj {
        position: next,
        entry_count: chunk.entry_count,
        bytes: chunk.bytes.to_vec(),
    };
    put_with_retry(queue.as_ref(), &conj, retry_delay).await;
    for step in steps {
        match step {
            Step::Start(_) => {}
            Step::Upload(pos) => {
                put_with_retry(queue.as_ref(), &Action::Upload(pos), retry_delay).await;
            }
            Step::End(pos) => {
                put_with_retry(queue.as_ref(), &Action::End(pos), retry_delay).await;
            }
        }
    }
}
