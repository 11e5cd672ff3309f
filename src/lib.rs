#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

//! # Description
//!
//! A durable, batching journal of entry streams to S3 multipart objects,
//! built on the official [SDK] for Rust.
//!
//! Producers hand opaque entries to the journal; the journal coalesces them
//! into batches, encodes and compresses each batch into a chunk, stages the
//! planned upload work on a crash-safe local queue, and asynchronously
//! drives multipart uploads into time-partitioned directories like
//! `2026/08/01/host-a-000000.journal`. Producer throughput is decoupled from
//! object-store latency, and a process that dies mid-upload picks its work
//! back up on the next start with the same journal id.
//!
//! Delivery is at least once: parts are idempotent on the wire, transient
//! store failures are retried from the durable queue, and completion of a
//! multipart object tolerates having already happened.
//!
//! # Examples
//!
//! ```no_run
//! use s3_journal::queue::MemoryQueueProvider;
//! use s3_journal::store::SdkStore;
//! use s3_journal::JournalBuilder;
//! use std::sync::Arc;
//!
//! # async fn run() -> s3_journal::Result<()> {
//! /// Upload through the ambient AWS configuration. Any `ObjectStore`
//! /// works; any durable `QueueProvider` does too, and the in-memory one
//! /// here trades crash safety away.
//! let journal = JournalBuilder::<String>::bytes()
//!     .bucket("a-bucket-us-east-1")
//!     .store(SdkStore::defaults().await)
//!     .queue_provider(Arc::new(MemoryQueueProvider::new()))
//!     .local_directory("/var/lib/s3-journal")
//!     .max_batch_size(100_000)
//!     .build()
//!     .await?;
//!
//! for n in 0..1_000_000u64 {
//!     journal.submit(n.to_string()).await?;
//! }
//!
//! /// Drains every pending upload before returning.
//! journal.close().await?;
//! let stats = journal.stats();
//! assert_eq!(stats.enqueued, stats.uploaded);
//! # Ok(())
//! # }
//! ```
//!
//! [SDK]: https://awslabs.github.io/aws-sdk-rust/

#[doc(hidden)]
pub extern crate aws_config;
#[doc(hidden)]
pub extern crate aws_sdk_s3 as aws_sdk;

mod action;
mod batch;
mod coordinator;

pub mod codec;
#[doc(inline)]
pub use codec::{BytesEncoder, Compression, EntryEncoder};

pub mod error;
#[doc(inline)]
pub use error::{Error, ErrorKind, Result};

mod journal;
pub use journal::{Journal, JournalBuilder, JournalStats};

pub mod position;
#[doc(inline)]
pub use position::{PartLimits, Position};

pub mod queue;
#[doc(inline)]
pub use queue::{ActionQueue, QueueProvider, QueueStats};

mod shard;
pub use shard::ShardedJournal;

pub mod store;
#[doc(inline)]
pub use store::{ObjectStore, SdkStore};

pub mod time;
#[doc(inline)]
pub use time::{Clock, DirectoryFormat, SystemClock};

// https://docs.aws.amazon.com/AmazonS3/latest/userguide/qfacts.html
/// Size every part except the last of its file must exceed.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
/// Parts per journal file before rolling to the next file number.
pub const MAX_PARTS_PER_FILE: u64 = 500;
