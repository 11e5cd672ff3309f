use crate::store::{
    Bucket, MultipartDescriptor, MultipartListing, ObjectStore, PartUpload, StoreError,
    StoreErrorKind, UploadId, UploadedPart,
};

use aws_config::ConfigLoader;
use aws_sdk::error::SdkError;
use aws_sdk::primitives::ByteStream;
use aws_sdk::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3 as aws_sdk;
use bytes::Bytes;
use futures::future::BoxFuture;

/// AWS S3 SDK client implementing [`ObjectStore`].
#[derive(Debug, Clone)]
pub struct SdkStore(aws_sdk::Client);

impl SdkStore {
    /// Create a new `SdkStore` from an existing [`Client`].
    ///
    /// [`Client`]: aws_sdk_s3::Client
    pub fn new(client: aws_sdk::Client) -> Self {
        Self(client)
    }

    /// Create a new `SdkStore` from the supplied [`ConfigLoader`].
    ///
    /// [`ConfigLoader`]: aws_config::ConfigLoader
    pub async fn from_config(loader: ConfigLoader) -> Self {
        let config = loader.load().await;
        let client = aws_sdk::Client::new(&config);
        Self::new(client)
    }

    /// Create a new `SdkStore` using the default [`ConfigLoader`].
    pub async fn defaults() -> Self {
        let loader = aws_config::from_env();
        Self::from_config(loader).await
    }

    /// Create a new `SdkStore` from static credentials, with everything else
    /// coming from the environment.
    pub async fn from_keys(access_key: &str, secret_key: &str) -> Self {
        let credentials =
            aws_sdk::config::Credentials::new(access_key, secret_key, None, None, "s3-journal");
        let loader = aws_config::from_env().credentials_provider(credentials);
        Self::from_config(loader).await
    }
}

impl ObjectStore for SdkStore {
    fn init_multipart<'a, 'store: 'a>(
        &'store self,
        bucket: &'a Bucket,
        key: &'a str,
    ) -> BoxFuture<'a, Result<MultipartDescriptor, StoreError>> {
        Box::pin(async move {
            let resp = self
                .0
                .create_multipart_upload()
                .bucket(&**bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| map_sdk_error("create multipart upload", e))?;
            let upload_id = resp
                .upload_id()
                .map(UploadId::from)
                .ok_or_else(|| StoreError::fatal("create response missing upload id"))?;
            Ok(MultipartDescriptor {
                bucket: bucket.clone(),
                key: key.to_string(),
                upload_id,
            })
        })
    }

    fn upload_part<'a, 'store: 'a>(
        &'store self,
        descriptor: &'a MultipartDescriptor,
        part_number: i32,
        body: Bytes,
        _last: bool,
    ) -> BoxFuture<'a, Result<UploadedPart, StoreError>> {
        Box::pin(async move {
            let size = body.len() as u64;
            let resp = self
                .0
                .upload_part()
                .bucket(&*descriptor.bucket)
                .key(&descriptor.key)
                .upload_id(&*descriptor.upload_id)
                .part_number(part_number)
                .body(ByteStream::from(body))
                .send()
                .await
                .map_err(|e| map_sdk_error("upload part", e))?;
            let etag = resp
                .e_tag()
                .map(crate::store::EntityTag::from)
                .ok_or_else(|| StoreError::fatal("upload part response missing etag"))?;
            Ok(UploadedPart {
                part_number,
                etag,
                size,
            })
        })
    }

    fn complete_multipart<'a, 'store: 'a>(
        &'store self,
        descriptor: &'a MultipartDescriptor,
        parts: &'a [PartUpload],
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let completed = parts.iter().fold(Vec::new(), |mut acc, part| {
                acc.push(
                    CompletedPart::builder()
                        .e_tag(part.etag.to_string())
                        .part_number(part.part_number)
                        .build(),
                );
                acc
            });
            let upload = CompletedMultipartUpload::builder()
                .set_parts(Some(completed))
                .build();
            self.0
                .complete_multipart_upload()
                .bucket(&*descriptor.bucket)
                .key(&descriptor.key)
                .upload_id(&*descriptor.upload_id)
                .multipart_upload(upload)
                .send()
                .await
                .map_err(|e| map_sdk_error("complete multipart upload", e))?;
            Ok(())
        })
    }

    fn abort_multipart<'a, 'store: 'a>(
        &'store self,
        descriptor: &'a MultipartDescriptor,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.0
                .abort_multipart_upload()
                .bucket(&*descriptor.bucket)
                .key(&descriptor.key)
                .upload_id(&*descriptor.upload_id)
                .send()
                .await
                .map_err(|e| map_sdk_error("abort multipart upload", e))?;
            Ok(())
        })
    }

    fn list_complete<'a, 'store: 'a>(
        &'store self,
        bucket: &'a Bucket,
        prefix: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, StoreError>> {
        Box::pin(async move {
            let mut keys = Vec::new();
            let mut pages = self
                .0
                .list_objects_v2()
                .bucket(&**bucket)
                .prefix(prefix)
                .into_paginator()
                .send();
            while let Some(page) = pages.next().await {
                let page = page.map_err(|e| map_sdk_error("list objects", e))?;
                keys.extend(
                    page.contents()
                        .iter()
                        .filter_map(|object| object.key().map(str::to_string)),
                );
            }
            Ok(keys)
        })
    }

    fn list_multipart<'a, 'store: 'a>(
        &'store self,
        bucket: &'a Bucket,
        prefix: &'a str,
    ) -> BoxFuture<'a, Result<Vec<MultipartListing>, StoreError>> {
        Box::pin(async move {
            let mut listings = Vec::new();
            let mut key_marker: Option<String> = None;
            let mut id_marker: Option<String> = None;
            loop {
                let resp = self
                    .0
                    .list_multipart_uploads()
                    .bucket(&**bucket)
                    .prefix(prefix)
                    .set_key_marker(key_marker.take())
                    .set_upload_id_marker(id_marker.take())
                    .send()
                    .await
                    .map_err(|e| map_sdk_error("list multipart uploads", e))?;
                for upload in resp.uploads() {
                    if let (Some(key), Some(id)) = (upload.key(), upload.upload_id()) {
                        listings.push(MultipartListing {
                            key: key.to_string(),
                            upload_id: UploadId::from(id),
                        });
                    }
                }
                if resp.is_truncated() != Some(true) {
                    break;
                }
                key_marker = resp.next_key_marker().map(str::to_string);
                id_marker = resp.next_upload_id_marker().map(str::to_string);
            }
            Ok(listings)
        })
    }

    fn list_parts<'a, 'store: 'a>(
        &'store self,
        descriptor: &'a MultipartDescriptor,
    ) -> BoxFuture<'a, Result<Vec<UploadedPart>, StoreError>> {
        Box::pin(async move {
            let mut parts = Vec::new();
            let mut marker: Option<String> = None;
            loop {
                let resp = self
                    .0
                    .list_parts()
                    .bucket(&*descriptor.bucket)
                    .key(&descriptor.key)
                    .upload_id(&*descriptor.upload_id)
                    .set_part_number_marker(marker.take())
                    .send()
                    .await
                    .map_err(|e| map_sdk_error("list parts", e))?;
                for part in resp.parts() {
                    if let (Some(number), Some(etag)) = (part.part_number(), part.e_tag()) {
                        parts.push(UploadedPart {
                            part_number: number,
                            etag: etag.into(),
                            size: part.size().unwrap_or_default() as u64,
                        });
                    }
                }
                if resp.is_truncated() != Some(true) {
                    break;
                }
                marker = resp.next_part_number_marker().map(str::to_string);
            }
            Ok(parts)
        })
    }
}

/// Categorize an SDK failure for the coordinator's retry decisions: 404 is
/// not-found, throttling and 5xx and anything that never reached the service
/// are transient, the rest are fatal.
fn map_sdk_error<E>(context: &'static str, err: SdkError<E>) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let kind = match &err {
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            if status == 404 {
                StoreErrorKind::NotFound
            } else if status == 429 || status >= 500 {
                StoreErrorKind::Transient
            } else {
                StoreErrorKind::Fatal
            }
        }
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_) => {
            StoreErrorKind::Transient
        }
        _ => StoreErrorKind::Fatal,
    };
    let error = match kind {
        StoreErrorKind::Transient => StoreError::transient(context),
        StoreErrorKind::NotFound => StoreError::not_found(context),
        StoreErrorKind::Fatal => StoreError::fatal(context),
    };
    error.with_source(err)
}
