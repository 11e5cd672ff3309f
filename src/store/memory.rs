use crate::position::PartLimits;
use crate::store::{
    Bucket, EntityTag, MultipartDescriptor, MultipartListing, ObjectStore, PartUpload, StoreError,
    UploadId, UploadedPart,
};

use bytes::Bytes;
use futures::future::{BoxFuture, ready};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// For testing, an in-memory [`ObjectStore`] with full multipart semantics.
///
/// Completions validate what the real store validates: part numbers must be
/// dense from 1, entity tags must match the uploaded parts, and every
/// non-final part must meet the configured part minimum. Completed objects
/// are the ordered concatenation of their parts and can be read back with
/// [`object`](MemoryStore::object).
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    limits: PartLimits,
}

#[derive(Debug, Default)]
struct Inner {
    next_upload: u64,
    complete: BTreeMap<String, Vec<u8>>,
    uploads: BTreeMap<String, InFlight>,
}

#[derive(Debug)]
struct InFlight {
    key: String,
    parts: BTreeMap<i32, StoredPart>,
}

#[derive(Debug)]
struct StoredPart {
    etag: String,
    bytes: Vec<u8>,
}

impl MemoryStore {
    /// Create a `MemoryStore` validating against `limits`.
    pub fn new(limits: PartLimits) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            limits,
        }
    }

    /// The bytes of a completed object.
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().complete.get(key).cloned()
    }

    /// All completed objects, ordered by key.
    pub fn objects(&self) -> BTreeMap<String, Vec<u8>> {
        self.inner.lock().unwrap().complete.clone()
    }

    /// Number of multipart uploads still in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().unwrap().uploads.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(PartLimits::default())
    }
}

impl ObjectStore for MemoryStore {
    fn init_multipart<'a, 'store: 'a>(
        &'store self,
        bucket: &'a Bucket,
        key: &'a str,
    ) -> BoxFuture<'a, Result<MultipartDescriptor, StoreError>> {
        let mut inner = self.inner.lock().unwrap();
        let upload_id = format!("upload-{:04}", inner.next_upload);
        inner.next_upload += 1;
        inner.uploads.insert(
            upload_id.clone(),
            InFlight {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Box::pin(ready(Ok(MultipartDescriptor {
            bucket: bucket.clone(),
            key: key.to_string(),
            upload_id: UploadId::from(upload_id),
        })))
    }

    fn upload_part<'a, 'store: 'a>(
        &'store self,
        descriptor: &'a MultipartDescriptor,
        part_number: i32,
        body: Bytes,
        _last: bool,
    ) -> BoxFuture<'a, Result<UploadedPart, StoreError>> {
        let mut inner = self.inner.lock().unwrap();
        let result = match inner.uploads.get_mut(&*descriptor.upload_id) {
            Some(upload) => {
                let etag = format!("\"{}-{part_number}-{}\"", descriptor.upload_id, body.len());
                let size = body.len() as u64;
                upload.parts.insert(
                    part_number,
                    StoredPart {
                        etag: etag.clone(),
                        bytes: body.to_vec(),
                    },
                );
                Ok(UploadedPart {
                    part_number,
                    etag: EntityTag::from(etag),
                    size,
                })
            }
            None => Err(StoreError::not_found(format!(
                "no such upload {}",
                descriptor.upload_id
            ))),
        };
        Box::pin(ready(result))
    }

    fn complete_multipart<'a, 'store: 'a>(
        &'store self,
        descriptor: &'a MultipartDescriptor,
        parts: &'a [PartUpload],
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        let mut inner = self.inner.lock().unwrap();
        let result = (|| {
            let Some(upload) = inner.uploads.remove(&*descriptor.upload_id) else {
                return Err(StoreError::not_found(format!(
                    "no such upload {}",
                    descriptor.upload_id
                )));
            };
            let mut assembled = Vec::new();
            for (offset, part) in parts.iter().enumerate() {
                let expected = offset as i32 + 1;
                if part.part_number != expected {
                    return Err(StoreError::fatal(format!(
                        "part numbers not dense: got {} at slot {expected}",
                        part.part_number
                    )));
                }
                let Some(stored) = upload.parts.get(&part.part_number) else {
                    return Err(StoreError::fatal(format!(
                        "part {} was never uploaded",
                        part.part_number
                    )));
                };
                if stored.etag != &*part.etag {
                    return Err(StoreError::fatal(format!(
                        "etag mismatch on part {}",
                        part.part_number
                    )));
                }
                let is_final = offset + 1 == parts.len();
                if !is_final && (stored.bytes.len() as u64) < self.limits.min_part_size {
                    return Err(StoreError::fatal(format!(
                        "non-final part {} below part minimum",
                        part.part_number
                    )));
                }
                assembled.extend_from_slice(&stored.bytes);
            }
            inner.complete.insert(upload.key, assembled);
            Ok(())
        })();
        Box::pin(ready(result))
    }

    fn abort_multipart<'a, 'store: 'a>(
        &'store self,
        descriptor: &'a MultipartDescriptor,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        let mut inner = self.inner.lock().unwrap();
        let result = match inner.uploads.remove(&*descriptor.upload_id) {
            Some(_) => Ok(()),
            None => Err(StoreError::not_found(format!(
                "no such upload {}",
                descriptor.upload_id
            ))),
        };
        Box::pin(ready(result))
    }

    fn list_complete<'a, 'store: 'a>(
        &'store self,
        _bucket: &'a Bucket,
        prefix: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, StoreError>> {
        let inner = self.inner.lock().unwrap();
        let keys = inner
            .complete
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        Box::pin(ready(Ok(keys)))
    }

    fn list_multipart<'a, 'store: 'a>(
        &'store self,
        _bucket: &'a Bucket,
        prefix: &'a str,
    ) -> BoxFuture<'a, Result<Vec<MultipartListing>, StoreError>> {
        let inner = self.inner.lock().unwrap();
        let listings = inner
            .uploads
            .iter()
            .filter(|(_, upload)| upload.key.starts_with(prefix))
            .map(|(id, upload)| MultipartListing {
                key: upload.key.clone(),
                upload_id: UploadId::from(id.clone()),
            })
            .collect();
        Box::pin(ready(Ok(listings)))
    }

    fn list_parts<'a, 'store: 'a>(
        &'store self,
        descriptor: &'a MultipartDescriptor,
    ) -> BoxFuture<'a, Result<Vec<UploadedPart>, StoreError>> {
        let inner = self.inner.lock().unwrap();
        let result = match inner.uploads.get(&*descriptor.upload_id) {
            Some(upload) => Ok(upload
                .parts
                .iter()
                .map(|(number, stored)| UploadedPart {
                    part_number: *number,
                    etag: EntityTag::from(stored.etag.clone()),
                    size: stored.bytes.len() as u64,
                })
                .collect()),
            None => Err(StoreError::not_found(format!(
                "no such upload {}",
                descriptor.upload_id
            ))),
        };
        Box::pin(ready(result))
    }
}
