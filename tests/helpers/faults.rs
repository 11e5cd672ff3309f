use s3_journal::store::{
    Bucket, MemoryStore, MultipartDescriptor, MultipartListing, ObjectStore, PartUpload,
    StoreError, UploadedPart,
};

use bytes::Bytes;
use futures::future::BoxFuture;
use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// When an injected fault should fire.
pub enum FaultPolicy {
    /// Fail each call independently with the given probability.
    Random { rng: StdRng, probability: f64 },
    /// Fail every call landing in the outage window at the head of each
    /// period, simulating streaked service outages.
    Windowed {
        started: Instant,
        period: Duration,
        outage: Duration,
    },
}

impl FaultPolicy {
    fn should_fail(&mut self) -> bool {
        match self {
            Self::Random { rng, probability } => rng.gen_bool(*probability),
            Self::Windowed {
                started,
                period,
                outage,
            } => started.elapsed().as_micros() % period.as_micros() < outage.as_micros(),
        }
    }
}

/// A [`MemoryStore`] wrapper that injects transient failures into the three
/// upload operations. Listings and aborts always pass through.
pub struct FaultStore {
    inner: Arc<MemoryStore>,
    policy: Mutex<FaultPolicy>,
}

impl FaultStore {
    pub fn random(inner: Arc<MemoryStore>, seed: u64, probability: f64) -> Self {
        Self {
            inner,
            policy: Mutex::new(FaultPolicy::Random {
                rng: StdRng::seed_from_u64(seed),
                probability,
            }),
        }
    }

    pub fn windowed(inner: Arc<MemoryStore>, period: Duration, outage: Duration) -> Self {
        Self {
            inner,
            policy: Mutex::new(FaultPolicy::Windowed {
                started: Instant::now(),
                period,
                outage,
            }),
        }
    }

    fn check(&self, operation: &str) -> Result<(), StoreError> {
        if self.policy.lock().unwrap().should_fail() {
            Err(StoreError::transient(format!("injected {operation} fault")))
        } else {
            Ok(())
        }
    }
}

impl ObjectStore for FaultStore {
    fn init_multipart<'a, 'store: 'a>(
        &'store self,
        bucket: &'a Bucket,
        key: &'a str,
    ) -> BoxFuture<'a, Result<MultipartDescriptor, StoreError>> {
        Box::pin(async move {
            self.check("init multipart")?;
            self.inner.init_multipart(bucket, key).await
        })
    }

    fn upload_part<'a, 'store: 'a>(
        &'store self,
        descriptor: &'a MultipartDescriptor,
        part_number: i32,
        body: Bytes,
        last: bool,
    ) -> BoxFuture<'a, Result<UploadedPart, StoreError>> {
        Box::pin(async move {
            self.check("upload part")?;
            self.inner
                .upload_part(descriptor, part_number, body, last)
                .await
        })
    }

    fn complete_multipart<'a, 'store: 'a>(
        &'store self,
        descriptor: &'a MultipartDescriptor,
        parts: &'a [PartUpload],
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.check("complete multipart")?;
            self.inner.complete_multipart(descriptor, parts).await
        })
    }

    fn abort_multipart<'a, 'store: 'a>(
        &'store self,
        descriptor: &'a MultipartDescriptor,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        self.inner.abort_multipart(descriptor)
    }

    fn list_complete<'a, 'store: 'a>(
        &'store self,
        bucket: &'a Bucket,
        prefix: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, StoreError>> {
        self.inner.list_complete(bucket, prefix)
    }

    fn list_multipart<'a, 'store: 'a>(
        &'store self,
        bucket: &'a Bucket,
        prefix: &'a str,
    ) -> BoxFuture<'a, Result<Vec<MultipartListing>, StoreError>> {
        self.inner.list_multipart(bucket, prefix)
    }

    fn list_parts<'a, 'store: 'a>(
        &'store self,
        descriptor: &'a MultipartDescriptor,
    ) -> BoxFuture<'a, Result<Vec<UploadedPart>, StoreError>> {
        self.inner.list_parts(descriptor)
    }
}
