//! Positions in the journal stream and the state machine advancing them.
use serde::{Deserialize, Serialize};

/// Multipart geometry the journal operates under.
///
/// The defaults are the S3 service quotas this crate targets; tests inject
/// smaller values to exercise part and file rollover without gigabytes of
/// input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartLimits {
    /// Size every part except the last of its file must exceed.
    pub min_part_size: u64,
    /// Number of parts after which a new file is started.
    pub max_parts_per_file: u64,
}

impl Default for PartLimits {
    fn default() -> Self {
        Self {
            min_part_size: crate::MIN_PART_SIZE,
            max_parts_per_file: crate::MAX_PARTS_PER_FILE,
        }
    }
}

/// Where the next chunk will be appended.
///
/// `part_index` counts parts within a directory and never decreases during
/// process lifetime; `running_bytes` accumulates the size of the part under
/// construction and resets when the part rolls over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Bytes accumulated toward the current part.
    pub running_bytes: u64,
    /// Directory-global part counter.
    pub part_index: u64,
    /// The time-formatted directory this position writes under.
    pub directory: String,
}

impl Position {
    /// Create a new `Position`.
    pub fn new(running_bytes: u64, part_index: u64, directory: impl Into<String>) -> Self {
        Self {
            running_bytes,
            part_index,
            directory: directory.into(),
        }
    }

    /// The file this position's part belongs to.
    pub fn file_id(&self, limits: &PartLimits) -> FileId {
        let file_number = self.part_index / limits.max_parts_per_file;
        FileId {
            part_base: file_number * limits.max_parts_per_file,
            directory: self.directory.clone(),
        }
    }

    /// The 1-based part number on the wire, local to the multipart upload.
    pub fn part_number(&self, limits: &PartLimits) -> i32 {
        (self.part_index % limits.max_parts_per_file) as i32 + 1
    }
}

/// Identifies one multipart object: the directory plus the directory-global
/// index of the file's first part.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileId {
    /// First directory-global part index of the file.
    pub part_base: u64,
    /// The directory the file lives under.
    pub directory: String,
}

impl FileId {
    /// The object key for this file.
    pub fn key(&self, journal_id: &str, limits: &PartLimits) -> String {
        let file_number = self.part_base / limits.max_parts_per_file;
        format!("{}/{journal_id}-{file_number:06}.journal", self.directory)
    }

    /// The wire part number a directory-global `part_index` maps to within
    /// this file.
    pub fn part_number(part_index: u64, limits: &PartLimits) -> i32 {
        (part_index % limits.max_parts_per_file) as i32 + 1
    }
}

/// A side effect planned by [`advance`].
///
/// The caller enqueues these on the durable queue around the chunk append so
/// that, per file, a start precedes every append and uploads follow the
/// appends they cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Initialize the multipart upload for the file containing the position.
    Start(Position),
    /// Upload the part accumulated at the position.
    Upload(Position),
    /// Finalize the multipart upload for the file containing the position.
    End(Position),
}

/// Advance `current` by a chunk of `chunk_size` bytes destined for
/// `directory`, returning the next position and the side effects to enqueue.
///
/// Pure: equal inputs always produce equal outputs. Rules, in order:
///
/// 1. a directory change ends the current file and starts part 0 of a fresh
///    one;
/// 2. the part index increments when the accumulated bytes already exceed
///    the part minimum, resetting the accumulation to this chunk;
/// 3. an increment landing on a multiple of the parts-per-file limit ends
///    the current file and starts the next;
/// 4. an accumulation exceeding the part minimum schedules a part upload.
pub fn advance(
    current: &Position,
    directory: &str,
    chunk_size: u64,
    limits: &PartLimits,
) -> (Position, Vec<Step>) {
    if directory != current.directory {
        let next = Position::new(chunk_size, 0, directory);
        let steps = vec![Step::End(current.clone()), Step::Start(next.clone())];
        return (next, steps);
    }

    let crossed = current.running_bytes > limits.min_part_size;
    let part_index = if crossed {
        current.part_index + 1
    } else {
        current.part_index
    };
    let running_bytes = if crossed {
        chunk_size
    } else {
        current.running_bytes + chunk_size
    };
    let next = Position::new(running_bytes, part_index, current.directory.clone());

    let mut steps = Vec::new();
    if crossed && part_index % limits.max_parts_per_file == 0 {
        steps.push(Step::End(current.clone()));
        steps.push(Step::Start(next.clone()));
    }
    if running_bytes > limits.min_part_size {
        steps.push(Step::Upload(next.clone()));
    }
    (next, steps)
}
