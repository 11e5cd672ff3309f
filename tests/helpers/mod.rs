#![allow(dead_code)]
pub mod faults;

use s3_journal::store::MemoryStore;
use s3_journal::{JournalBuilder, PartLimits};

use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

pub static TRACER: LazyLock<()> = LazyLock::new(|| {
    let level = std::env::var("LOG_LEVEL")
        .map(|l| tracing::Level::from_str(l.as_str()).unwrap())
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init()
});

/// Small enough that a few kilobytes of entries exercise part and file
/// rollover.
pub const LIMITS: PartLimits = PartLimits {
    min_part_size: 1024,
    max_parts_per_file: 8,
};

pub const BUCKET: &str = "journal-test";

/// A builder with the knobs every test wants: tiny retry delay, small
/// limits, and a scratch queue directory derived from the test name.
pub fn test_builder(name: &str) -> JournalBuilder<String> {
    JournalBuilder::<String>::bytes()
        .bucket(BUCKET)
        .id("host-a")
        .limits(LIMITS)
        .retry_delay(Duration::from_millis(5))
        .local_directory(scratch_dir(name))
}

pub fn scratch_dir(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join("s3-journal-tests").join(name)
}

pub fn store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(LIMITS))
}

/// The ordered concatenation of every completed object under `prefix`.
pub fn concat_objects(store: &MemoryStore, prefix: &str) -> Vec<u8> {
    store
        .objects()
        .into_iter()
        .filter(|(key, _)| key.starts_with(prefix))
        .flat_map(|(_, bytes)| bytes)
        .collect()
}

/// What the journal should have written for `entries`, newline-delimited.
pub fn expected<I>(entries: I) -> Vec<u8>
where
    I: IntoIterator,
    I::Item: ToString,
{
    let mut out = Vec::new();
    for entry in entries {
        out.extend_from_slice(entry.to_string().as_bytes());
        out.push(b'\n');
    }
    out
}

/// Poll `condition` until it holds or `deadline` passes.
pub async fn wait_until<F: FnMut() -> bool>(deadline: Duration, mut condition: F) -> bool {
    let end = tokio::time::Instant::now() + deadline;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= end {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
