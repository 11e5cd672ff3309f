//! Fanning submissions out over independent journal shards.
use crate::error::Result;
use crate::journal::{Journal, JournalBuilder, JournalStats};

use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};

/// One symbol per possible shard; shard `i` prefixes its directories with
/// `SHARD_SYMBOLS[i]` and keeps its durable queue under a directory of the
/// same name.
const SHARD_SYMBOLS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Round-robin fan-out over up to 36 independent [`Journal`]s.
///
/// Each shard has its own durable queue, upload coordinator, and directory
/// tree, so shards never contend; submission order is preserved within a
/// shard and unspecified across shards.
pub struct ShardedJournal<T> {
    shards: Vec<Journal<T>>,
    cursor: AtomicUsize,
}

impl<T: Send + 'static> JournalBuilder<T> {
    /// Build a [`ShardedJournal`] with the configured shard count.
    pub async fn build_sharded(self) -> Result<ShardedJournal<T>> {
        let resolved = self.resolve().await?;
        let count = resolved.shards.unwrap_or(1);
        let mut shards = Vec::with_capacity(count);
        for index in 0..count {
            let symbol = SHARD_SYMBOLS[index] as char;
            shards.push(Journal::open(resolved.for_shard(symbol)).await?);
        }
        Ok(ShardedJournal {
            shards,
            cursor: AtomicUsize::new(0),
        })
    }
}

impl<T: Send + 'static> ShardedJournal<T> {
    /// Hand one entry to the next shard in rotation.
    pub async fn submit(&self, entry: T) -> Result<()> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.shards.len();
        self.shards[index].submit(entry).await
    }

    /// Progress counters summed over every shard.
    pub fn stats(&self) -> JournalStats {
        let mut stats = JournalStats::default();
        for shard in &self.shards {
            stats.merge(&shard.stats());
        }
        stats
    }

    /// The number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Close every shard, draining each in turn.
    pub async fn close(&self) -> Result<()> {
        for shard in &self.shards {
            shard.close().await?;
        }
        Ok(())
    }
}

impl<T> Debug for ShardedJournal<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedJournal")
            .field("shards", &self.shards.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_symbols_cover_the_range() {
        assert_eq!(SHARD_SYMBOLS.len(), 36);
        assert_eq!(SHARD_SYMBOLS[0], b'0');
        assert_eq!(SHARD_SYMBOLS[9], b'9');
        assert_eq!(SHARD_SYMBOLS[10], b'a');
        assert_eq!(SHARD_SYMBOLS[35], b'z');
    }
}
