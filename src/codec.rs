//! Turning a batch of entries into one compressed chunk.
//!
//! This module defines [`EntryEncoder`], which describes how a single entry
//! is written as bytes, and [`Compression`], applied to the concatenation of
//! a flushed batch. The journal emits each encoded entry followed by the
//! configured delimiter, so an identity-compressed object reads back as
//! `entry, delimiter` pairs.
use bytes::{BufMut as _, Bytes, BytesMut};

use std::fmt::{self, Debug, Formatter};
use std::io::{self, Write as _};
use std::sync::Arc;

/// Encoding for a single journal entry.
pub trait EntryEncoder<T>: Send + Sync {
    /// Encode this entry as bytes.
    fn encode(&self, entry: &T) -> Bytes;
}

impl<T, F> EntryEncoder<T> for F
where
    F: Fn(&T) -> Bytes + Send + Sync,
{
    fn encode(&self, entry: &T) -> Bytes {
        self(entry)
    }
}

/// Encodes an entry as its own bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesEncoder;

impl<T: AsRef<[u8]>> EntryEncoder<T> for BytesEncoder {
    fn encode(&self, entry: &T) -> Bytes {
        Bytes::copy_from_slice(entry.as_ref())
    }
}

/// Compression applied to a concatenated batch.
#[derive(Clone, Default)]
pub enum Compression {
    /// Pass the bytes through untouched.
    #[default]
    Identity,
    /// Gzip at the default level.
    Gzip,
    /// Raw snappy.
    Snappy,
    /// xz containers (LZMA2) at the default preset.
    Lzma2,
    /// A caller-supplied transformation.
    Custom(Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>),
}

impl Compression {
    /// Compress `input` into a fresh buffer.
    pub fn compress(&self, input: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Self::Identity => Ok(input.to_vec()),
            Self::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(input)?;
                encoder.finish()
            }
            Self::Snappy => snap::raw::Encoder::new()
                .compress_vec(input)
                .map_err(io::Error::other),
            Self::Lzma2 => {
                let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
                encoder.write_all(input)?;
                encoder.finish()
            }
            Self::Custom(f) => Ok(f(input)),
        }
    }
}

impl Debug for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => write!(f, "Identity"),
            Self::Gzip => write!(f, "Gzip"),
            Self::Snappy => write!(f, "Snappy"),
            Self::Lzma2 => write!(f, "Lzma2"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// A compressed byte run produced from one flushed batch.
#[derive(Debug, Clone)]
pub(crate) struct Chunk {
    pub(crate) bytes: Bytes,
    pub(crate) entry_count: u64,
}

/// Encode every entry followed by the delimiter, then compress.
pub(crate) fn build_chunk<T>(
    entries: &[T],
    encoder: &dyn EntryEncoder<T>,
    delimiter: &[u8],
    compression: &Compression,
) -> io::Result<Chunk> {
    let mut buf = BytesMut::new();
    for entry in entries {
        let encoded = encoder.encode(entry);
        buf.reserve(encoded.len() + delimiter.len());
        buf.put(encoded);
        buf.put(delimiter);
    }
    let bytes = compression.compress(&buf)?.into();
    Ok(Chunk {
        bytes,
        entry_count: entries.len() as u64,
    })
}
