//! The single consumer of the durable action queue.
//!
//! The coordinator owns every in-flight multipart upload: it is the only
//! task that reads or writes [`UploadRecord`]s, so the state needs no locks.
//! All store failures are contained here, either by retrying the claimed
//! task or by dropping work whose target upload no longer exists; nothing
//! propagates to producers.
use crate::action::{Action, TOPIC, put_with_retry};
use crate::journal::Counters;
use crate::position::{FileId, PartLimits, Position};
use crate::queue::{ActionQueue, QueueTask};
use crate::store::{
    Bucket, EntityTag, MultipartDescriptor, PartUpload, StoreAdapter, UploadedPart,
};

use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long a take waits while the journal is open.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);
/// How long a take waits once the close latch is set; exhausting it ends the
/// coordinator.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// One in-flight multipart upload, keyed in the coordinator state by its
/// [`FileId`].
struct UploadRecord {
    descriptor: MultipartDescriptor,
    parts: BTreeMap<u64, PartState>,
}

impl UploadRecord {
    fn new(descriptor: MultipartDescriptor) -> Self {
        Self {
            descriptor,
            parts: BTreeMap::new(),
        }
    }
}

/// What the coordinator knows about one part.
#[derive(Default)]
struct PartState {
    tasks: Vec<PendingChunk>,
    etag: EntityTag,
    size: u64,
    uploaded: bool,
}

impl PartState {
    fn recovered(part: &UploadedPart) -> Self {
        Self {
            tasks: Vec::new(),
            etag: part.etag.clone(),
            size: part.size,
            uploaded: true,
        }
    }
}

/// A chunk whose queue task completes when its part uploads.
struct PendingChunk {
    task: QueueTask,
    entry_count: u64,
    bytes: Bytes,
}

pub(crate) struct Coordinator {
    queue: Arc<dyn ActionQueue>,
    store: StoreAdapter,
    bucket: Bucket,
    journal_id: String,
    listing_prefix: String,
    limits: PartLimits,
    retry_delay: Duration,
    counters: Arc<Counters>,
    latch: Arc<AtomicBool>,
    state: HashMap<FileId, UploadRecord>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        queue: Arc<dyn ActionQueue>,
        store: StoreAdapter,
        bucket: Bucket,
        journal_id: String,
        listing_prefix: String,
        limits: PartLimits,
        retry_delay: Duration,
        counters: Arc<Counters>,
        latch: Arc<AtomicBool>,
    ) -> Self {
        Self {
            queue,
            store,
            bucket,
            journal_id,
            listing_prefix,
            limits,
            retry_delay,
            counters,
            latch,
            state: HashMap::new(),
        }
    }

    /// Recover prior in-flight uploads, then consume the queue until the
    /// close latch is set and the queue stays empty through a drain timeout.
    pub(crate) async fn run(mut self) {
        self.recover().await;
        loop {
            let closing = self.latch.load(Ordering::SeqCst);
            let timeout = if closing { DRAIN_TIMEOUT } else { POLL_TIMEOUT };
            match self.queue.take(TOPIC, Some(timeout)).await {
                Some(task) => self.dispatch(task).await,
                None => {
                    if self.latch.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }
        debug!(live_uploads = self.state.len(), "upload coordinator stopped");
    }

    /// Reconcile multipart uploads the store still holds for this journal
    /// against the durable queue: rebuild their part tables and enqueue an
    /// `End` to drive each to completion.
    async fn recover(&mut self) {
        let listings = loop {
            match self
                .store
                .list_multipart(&self.bucket, &self.listing_prefix)
                .await
            {
                Ok(listings) => break listings,
                Err(e) => {
                    warn!(error = %e, "multipart listing failed during recovery; retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        };
        for listing in listings {
            let Some(file) = parse_key(&listing.key, &self.journal_id, &self.limits) else {
                continue;
            };
            let descriptor = MultipartDescriptor {
                bucket: self.bucket.clone(),
                key: listing.key,
                upload_id: listing.upload_id,
            };
            let mut record = UploadRecord::new(descriptor);
            let mut gone = false;
            loop {
                match self.store.list_parts(&record.descriptor).await {
                    Ok(parts) => {
                        for part in &parts {
                            let index = file.part_base + (part.part_number as u64 - 1);
                            record.parts.insert(index, PartState::recovered(part));
                        }
                        break;
                    }
                    Err(e) if e.is_not_found() => {
                        gone = true;
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "part listing failed during recovery; retrying");
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
            if gone {
                continue;
            }
            info!(
                key = %record.descriptor.key,
                parts = record.parts.len(),
                "recovered in-flight upload"
            );
            let end = Action::End(Position::new(0, file.part_base, file.directory.clone()));
            put_with_retry(self.queue.as_ref(), &end, self.retry_delay).await;
            self.state.insert(file, record);
        }
    }

    async fn dispatch(&mut self, task: QueueTask) {
        let action = match Action::decode(&task.payload) {
            Ok(action) => action,
            Err(e) => {
                warn!(task = task.id, error = %e, "dropping corrupt action");
                self.queue.complete(TOPIC, &task);
                return;
            }
        };
        // Anything but a start or flush needs a live upload to apply to.
        if let Some(position) = action.position()
            && !matches!(action, Action::Start(_))
        {
            let file = position.file_id(&self.limits);
            if !self.state.contains_key(&file) {
                debug!(
                    directory = %file.directory,
                    part_base = file.part_base,
                    "no active upload for action; dropping"
                );
                self.queue.complete(TOPIC, &task);
                return;
            }
        }
        let result = match action {
            Action::Start(position) => self.handle_start(&task, &position).await,
            Action::Conj {
                position,
                entry_count,
                bytes,
            } => {
                self.handle_conj(&task, &position, entry_count, bytes.into());
                Ok(())
            }
            Action::Upload(position) => self.handle_upload(&task, &position).await,
            Action::End(position) => self.handle_end(&task, &position).await,
            Action::Flush => {
                self.handle_flush(&task).await;
                Ok(())
            }
            Action::Skip => {
                self.queue.complete(TOPIC, &task);
                Ok(())
            }
        };
        if let Err(e) = result {
            info!(error = %e, "upload action failed; will retry");
            self.queue.retry(TOPIC, &task);
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// Idempotent: a start for a file that already has a descriptor is
    /// acknowledged and dropped. Init retries forever, since abandoning it
    /// would lose the ordering of everything queued behind it.
    async fn handle_start(
        &mut self,
        task: &QueueTask,
        position: &Position,
    ) -> Result<(), crate::store::StoreError> {
        let file = position.file_id(&self.limits);
        if self.state.contains_key(&file) {
            self.queue.complete(TOPIC, task);
            return Ok(());
        }
        let key = file.key(&self.journal_id, &self.limits);
        let descriptor = loop {
            match self.store.init_multipart(&self.bucket, &key).await {
                Ok(descriptor) => break descriptor,
                Err(e) => {
                    info!(key = %key, error = %e, "init multipart failed; retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        };
        debug!(key = %key, upload_id = %descriptor.upload_id, "started multipart upload");
        self.state.insert(file, UploadRecord::new(descriptor));
        self.queue.complete(TOPIC, task);
        Ok(())
    }

    /// The chunk's task is retained, not completed: it completes when the
    /// part carrying its bytes uploads. A conj for a part that already
    /// uploaded is a re-delivery from a crash and completes immediately.
    fn handle_conj(
        &mut self,
        task: &QueueTask,
        position: &Position,
        entry_count: u64,
        bytes: Bytes,
    ) {
        let file = position.file_id(&self.limits);
        let Some(record) = self.state.get_mut(&file) else {
            self.queue.complete(TOPIC, task);
            return;
        };
        let part = record.parts.entry(position.part_index).or_default();
        if part.uploaded {
            self.queue.complete(TOPIC, task);
            return;
        }
        part.tasks.push(PendingChunk {
            task: task.clone(),
            entry_count,
            bytes,
        });
    }

    async fn handle_upload(
        &mut self,
        task: &QueueTask,
        position: &Position,
    ) -> Result<(), crate::store::StoreError> {
        let file = position.file_id(&self.limits);
        let part_number = position.part_number(&self.limits);
        let Some(record) = self.state.get_mut(&file) else {
            self.queue.complete(TOPIC, task);
            return Ok(());
        };
        let part = record.parts.entry(position.part_index).or_default();
        if part.uploaded {
            self.queue.complete(TOPIC, task);
            return Ok(());
        }
        let body = gather(part);
        match self
            .store
            .upload_part(&record.descriptor, part_number, body, false)
            .await
        {
            Ok(uploaded) => {
                finish_part(self.queue.as_ref(), &self.counters, part, uploaded);
                self.queue.complete(TOPIC, task);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                warn!(key = %record.descriptor.key, "multipart upload gone; dropping its work");
                self.drop_record(&file);
                self.queue.complete(TOPIC, task);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Finalize the file at `position`. A sole trailing unuploaded part is
    /// the file's last and may go up below the part minimum; a file whose
    /// parts are all uploaded is completed and forgotten; otherwise uploads
    /// are still queued behind this end, so it is retried.
    async fn handle_end(
        &mut self,
        task: &QueueTask,
        position: &Position,
    ) -> Result<(), crate::store::StoreError> {
        let file = position.file_id(&self.limits);
        let Some(record) = self.state.get_mut(&file) else {
            self.queue.complete(TOPIC, task);
            return Ok(());
        };

        let unuploaded: Vec<u64> = record
            .parts
            .iter()
            .filter(|(_, part)| !part.uploaded)
            .map(|(index, _)| *index)
            .collect();
        let max_index = record.parts.keys().next_back().copied();
        if unuploaded.len() == 1 && Some(unuploaded[0]) == max_index {
            let index = unuploaded[0];
            let part_number = FileId::part_number(index, &self.limits);
            if let Some(part) = record.parts.get_mut(&index) {
                let body = gather(part);
                match self
                    .store
                    .upload_part(&record.descriptor, part_number, body, true)
                    .await
                {
                    Ok(uploaded) => {
                        finish_part(self.queue.as_ref(), &self.counters, part, uploaded);
                    }
                    Err(e) if e.is_not_found() => {
                        warn!(key = %record.descriptor.key, "multipart upload gone; dropping its work");
                        self.drop_record(&file);
                        self.queue.complete(TOPIC, task);
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let Some(record) = self.state.get(&file) else {
            self.queue.complete(TOPIC, task);
            return Ok(());
        };
        if record.parts.values().all(|part| part.uploaded) {
            let parts: Vec<PartUpload> = record
                .parts
                .iter()
                .map(|(index, part)| PartUpload {
                    part_number: FileId::part_number(*index, &self.limits),
                    etag: part.etag.clone(),
                })
                .collect();
            self.store
                .complete_multipart(&record.descriptor, parts)
                .await?;
            info!(
                key = %record.descriptor.key,
                parts = record.parts.len(),
                bytes = record.parts.values().map(|part| part.size).sum::<u64>(),
                "completed journal file"
            );
            self.state.remove(&file);
            self.queue.complete(TOPIC, task);
        } else {
            debug!(key = %record.descriptor.key, "parts still pending; retrying end");
            self.queue.retry(TOPIC, task);
            tokio::time::sleep(self.retry_delay).await;
        }
        Ok(())
    }

    /// Plan an end for every live upload.
    async fn handle_flush(&mut self, task: &QueueTask) {
        let files: Vec<FileId> = self.state.keys().cloned().collect();
        for file in files {
            let end = Action::End(Position::new(0, file.part_base, file.directory));
            put_with_retry(self.queue.as_ref(), &end, self.retry_delay).await;
        }
        self.queue.complete(TOPIC, task);
    }

    /// Forget an upload whose multipart no longer exists, acknowledging any
    /// chunk tasks still parked under it so they are not re-delivered into
    /// work that can never finish.
    fn drop_record(&mut self, file: &FileId) {
        if let Some(record) = self.state.remove(file) {
            for part in record.parts.into_values() {
                for chunk in part.tasks {
                    self.queue.complete(TOPIC, &chunk.task);
                }
            }
        }
    }
}

/// Concatenate the chunks accumulated for one part, in arrival order.
fn gather(part: &PartState) -> Bytes {
    let total = part.tasks.iter().map(|chunk| chunk.bytes.len()).sum();
    let mut buf = BytesMut::with_capacity(total);
    for chunk in &part.tasks {
        buf.extend_from_slice(&chunk.bytes);
    }
    buf.freeze()
}

/// Mark a part uploaded and settle its chunks: their queue tasks complete
/// and their entries count as uploaded.
fn finish_part(
    queue: &dyn ActionQueue,
    counters: &Counters,
    part: &mut PartState,
    uploaded: UploadedPart,
) {
    part.uploaded = true;
    part.etag = uploaded.etag;
    part.size = uploaded.size;
    for chunk in part.tasks.drain(..) {
        queue.complete(TOPIC, &chunk.task);
        counters.add_uploaded(chunk.entry_count);
    }
}

/// Parse `{directory}/{journal_id}-{file_number}.journal`, ignoring keys
/// that belong to other journals or do not look like journal files.
fn parse_key(key: &str, journal_id: &str, limits: &PartLimits) -> Option<FileId> {
    let (directory, name) = key.rsplit_once('/')?;
    let digits = name
        .strip_prefix(journal_id)?
        .strip_prefix('-')?
        .strip_suffix(".journal")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let file_number: u64 = digits.parse().ok()?;
    Some(FileId {
        part_base: file_number * limits.max_parts_per_file,
        directory: directory.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: PartLimits = PartLimits {
        min_part_size: 100,
        max_parts_per_file: 4,
    };

    #[test]
    fn parses_journal_keys() {
        let file = parse_key("2026/08/01/host-a-000002.journal", "host-a", &LIMITS).unwrap();
        assert_eq!(file.part_base, 8);
        assert_eq!(file.directory, "2026/08/01");
    }

    #[test]
    fn ignores_foreign_and_malformed_keys() {
        assert!(parse_key("2026/08/01/other-000002.journal", "host-a", &LIMITS).is_none());
        assert!(parse_key("2026/08/01/host-a-00000x.journal", "host-a", &LIMITS).is_none());
        assert!(parse_key("2026/08/01/host-a-000002.snapshot", "host-a", &LIMITS).is_none());
        assert!(parse_key("host-a-000002.journal", "host-a", &LIMITS).is_none());
    }
}
