//! The capability layer over the object store.
//!
//! [`ObjectStore`] is the narrow set of operations a multipart journal needs;
//! [`StoreAdapter`] wraps any implementation and owns the contracts every
//! backend must get for free: an empty completion aborts instead, and a
//! not-found completion means somebody already finalized the upload.
use crate::position::PartLimits;

use bytes::Bytes;
use futures::future::BoxFuture;
use std::borrow::Cow;
use std::fmt::{self, Debug, Display, Formatter};
use std::ops::Deref;
use std::sync::Arc;

mod memory;
pub use memory::MemoryStore;

mod sdk;
pub use sdk::SdkStore;

/// The destination bucket for journal objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Bucket(Cow<'static, str>);

impl Bucket {
    /// Create a new `Bucket` from the plain bucket name.
    pub fn new<T: Into<Cow<'static, str>>>(bucket: T) -> Self {
        let bucket: Cow<'static, str> = bucket.into();
        match bucket.strip_suffix('/') {
            Some(v) => Self(v.to_string().into()),
            _ => Self(bucket),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for Bucket {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Display for Bucket {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<&str> for Bucket {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

impl From<String> for Bucket {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// The ID the store assigns an in-progress multipart upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct UploadId(Cow<'static, str>);

impl UploadId {
    /// Create a new `UploadId`.
    pub fn new<T: Into<Cow<'static, str>>>(id: T) -> Self {
        Self(id.into())
    }
}

impl Deref for UploadId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Display for UploadId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<&str> for UploadId {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

impl From<String> for UploadId {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

/// Entity tag the store assigns an uploaded part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityTag(Cow<'static, str>);

impl EntityTag {
    /// Create a new `EntityTag`.
    pub fn new<T: Into<Cow<'static, str>>>(etag: T) -> Self {
        Self(etag.into())
    }
}

impl Deref for EntityTag {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Display for EntityTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<&str> for EntityTag {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

impl From<String> for EntityTag {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

/// Identifies one in-progress multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartDescriptor {
    /// The bucket holding the upload.
    pub bucket: Bucket,
    /// The object key being assembled.
    pub key: String,
    /// The store-assigned upload ID.
    pub upload_id: UploadId,
}

/// A part the store has accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    /// The 1-based part number within the upload.
    pub part_number: i32,
    /// The entity tag returned by the store.
    pub etag: EntityTag,
    /// The size of the part in bytes.
    pub size: u64,
}

/// One `(part number, entity tag)` reference in a completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartUpload {
    /// The 1-based part number within the upload.
    pub part_number: i32,
    /// The entity tag the part upload returned.
    pub etag: EntityTag,
}

/// One in-progress multipart upload found by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartListing {
    /// The object key being assembled.
    pub key: String,
    /// The store-assigned upload ID.
    pub upload_id: UploadId,
}

/// The atomic object-store operations a journal needs.
pub trait ObjectStore: Send + Sync {
    /// Create a fresh multipart upload for `key`.
    fn init_multipart<'a, 'store: 'a>(
        &'store self,
        bucket: &'a Bucket,
        key: &'a str,
    ) -> BoxFuture<'a, Result<MultipartDescriptor, StoreError>>;

    /// Upload one part. A not-found upload surfaces as
    /// [`StoreErrorKind::NotFound`], never a panic.
    fn upload_part<'a, 'store: 'a>(
        &'store self,
        descriptor: &'a MultipartDescriptor,
        part_number: i32,
        body: Bytes,
        last: bool,
    ) -> BoxFuture<'a, Result<UploadedPart, StoreError>>;

    /// Finalize the upload from parts ordered by ascending part number.
    fn complete_multipart<'a, 'store: 'a>(
        &'store self,
        descriptor: &'a MultipartDescriptor,
        parts: &'a [PartUpload],
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Abandon the upload, discarding its parts.
    fn abort_multipart<'a, 'store: 'a>(
        &'store self,
        descriptor: &'a MultipartDescriptor,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Keys of completed objects under `prefix`.
    fn list_complete<'a, 'store: 'a>(
        &'store self,
        bucket: &'a Bucket,
        prefix: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, StoreError>>;

    /// In-progress multipart uploads under `prefix`.
    fn list_multipart<'a, 'store: 'a>(
        &'store self,
        bucket: &'a Bucket,
        prefix: &'a str,
    ) -> BoxFuture<'a, Result<Vec<MultipartListing>, StoreError>>;

    /// Parts the store has already accepted for an upload.
    fn list_parts<'a, 'store: 'a>(
        &'store self,
        descriptor: &'a MultipartDescriptor,
    ) -> BoxFuture<'a, Result<Vec<UploadedPart>, StoreError>>;
}

/// `StoreAdapter` holds a type implementing [`ObjectStore`] and layers the
/// idempotence contracts on top of it.
#[derive(Clone)]
pub struct StoreAdapter {
    inner: Arc<dyn ObjectStore>,
    limits: PartLimits,
}

impl StoreAdapter {
    /// Wrap an [`ObjectStore`].
    pub fn new<S>(store: S, limits: PartLimits) -> Self
    where
        S: ObjectStore + 'static,
    {
        Self {
            inner: Arc::new(store),
            limits,
        }
    }

    /// Wrap an already shared [`ObjectStore`].
    pub fn from_arc(store: Arc<dyn ObjectStore>, limits: PartLimits) -> Self {
        Self {
            inner: store,
            limits,
        }
    }

    /// Create a fresh multipart upload for `key`.
    pub async fn init_multipart(
        &self,
        bucket: &Bucket,
        key: &str,
    ) -> Result<MultipartDescriptor, StoreError> {
        self.inner.init_multipart(bucket, key).await
    }

    /// Upload one part.
    ///
    /// Non-final parts must exceed the configured part minimum; the store
    /// would reject the completion otherwise.
    pub async fn upload_part(
        &self,
        descriptor: &MultipartDescriptor,
        part_number: i32,
        body: Bytes,
        last: bool,
    ) -> Result<UploadedPart, StoreError> {
        debug_assert!(last || body.len() as u64 > self.limits.min_part_size);
        self.inner
            .upload_part(descriptor, part_number, body, last)
            .await
    }

    /// Finalize the upload.
    ///
    /// An empty part list aborts the upload instead, and a not-found
    /// response from either call means the upload was already finalized.
    pub async fn complete_multipart(
        &self,
        descriptor: &MultipartDescriptor,
        mut parts: Vec<PartUpload>,
    ) -> Result<(), StoreError> {
        let result = if parts.is_empty() {
            self.inner.abort_multipart(descriptor).await
        } else {
            parts.sort_by_key(|part| part.part_number);
            self.inner.complete_multipart(descriptor, &parts).await
        };
        match result {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Keys of completed objects under `prefix`.
    pub async fn list_complete(
        &self,
        bucket: &Bucket,
        prefix: &str,
    ) -> Result<Vec<String>, StoreError> {
        self.inner.list_complete(bucket, prefix).await
    }

    /// In-progress multipart uploads under `prefix`.
    pub async fn list_multipart(
        &self,
        bucket: &Bucket,
        prefix: &str,
    ) -> Result<Vec<MultipartListing>, StoreError> {
        self.inner.list_multipart(bucket, prefix).await
    }

    /// Parts the store has already accepted for an upload.
    pub async fn list_parts(
        &self,
        descriptor: &MultipartDescriptor,
    ) -> Result<Vec<UploadedPart>, StoreError> {
        self.inner.list_parts(descriptor).await
    }
}

impl Debug for StoreAdapter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreAdapter")
            .field("inner", &"ObjectStore")
            .field("limits", &self.limits)
            .finish()
    }
}

/// An object store failure, categorized for retry decisions.
#[derive(Debug, thiserror::Error)]
#[error("{kind} store error: {message}")]
pub struct StoreError {
    kind: StoreErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl StoreError {
    /// A failure worth retrying: network trouble, throttling, 5xx.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Transient,
            message: message.into(),
            source: None,
        }
    }

    /// The target upload or object does not exist.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::NotFound,
            message: message.into(),
            source: None,
        }
    }

    /// A failure retrying will not fix.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Fatal,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// The category of this failure.
    pub fn kind(&self) -> StoreErrorKind {
        self.kind
    }

    /// Whether the failure is worth retrying.
    pub fn is_transient(&self) -> bool {
        self.kind == StoreErrorKind::Transient
    }

    /// Whether the target of the operation does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind == StoreErrorKind::NotFound
    }
}

/// The category of a [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Worth retrying.
    Transient,
    /// The target does not exist.
    NotFound,
    /// Retrying will not fix it.
    Fatal,
}

impl Display for StoreErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::NotFound => write!(f, "not-found"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}
