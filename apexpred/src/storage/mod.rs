//! Storage-side collaborators of the predicate engine
//!
//! Everything here is read-only for the lifetime of a scan snapshot:
//! chunk data, zone maps, dictionaries and index handles are loaded when a
//! segment is opened and shared by every worker.

pub mod bitmap_index;
pub mod bloom;
pub mod index_handle;
pub mod inverted;
pub mod metrics;
pub mod segment;
pub mod zone_map;

use std::io;
use std::sync::Arc;

use crate::data::column::ColumnChunk;
use crate::data::dictionary::Dictionary;
use crate::{ChunkId, ColumnId, Result};
use index_handle::IndexHandle;
use zone_map::ZoneMap;

/// Materializes column chunks on demand
pub trait ChunkReader: Send + Sync {
    /// Number of chunks in the segment
    fn chunk_count(&self) -> usize;

    /// Row count of a chunk, identical for every column
    fn chunk_row_count(&self, chunk_id: ChunkId) -> Option<usize>;

    /// Values (or codes), null bitmap and dictionary of one column chunk
    fn read_chunk(&self, column_id: ColumnId, chunk_id: ChunkId) -> Result<Arc<ColumnChunk>>;
}

pub trait ZoneMapProvider: Send + Sync {
    /// Statistics for a column chunk, `None` when none were recorded
    fn zone_map(&self, column_id: ColumnId, chunk_id: ChunkId) -> Option<ZoneMap>;
}

pub trait DictionaryProvider: Send + Sync {
    /// Dictionary encoding the column chunk, if any. Available without
    /// reading the chunk's code buffer.
    fn dictionary(&self, column_id: ColumnId, chunk_id: ChunkId) -> Option<Arc<Dictionary>>;
}

pub trait IndexProvider: Send + Sync {
    /// Indexes of a column chunk; `None` when the column has none at all
    fn index_handle(&self, column_id: ColumnId, chunk_id: ChunkId) -> Option<IndexHandle>;
}

/// Everything a scan needs from a segment
pub trait SegmentSource: ChunkReader + ZoneMapProvider + DictionaryProvider + IndexProvider {}

impl<T> SegmentSource for T where T: ChunkReader + ZoneMapProvider + DictionaryProvider + IndexProvider {}

// ============================================================================
// Checksummed blob framing
// ============================================================================

/// Frame a payload as `[magic(4)][crc32 LE(4)][payload]`
pub(crate) fn seal(magic: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(magic);
    out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Verify magic and checksum, returning the payload
pub(crate) fn unseal<'a>(magic: &[u8; 4], data: &'a [u8]) -> io::Result<&'a [u8]> {
    if data.len() < 8 || &data[0..4] != magic {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid blob header"));
    }
    let expected = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let payload = &data[8..];
    if crc32fast::hash(payload) != expected {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "blob checksum mismatch"));
    }
    Ok(payload)
}

pub(crate) fn invalid_data(e: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}
