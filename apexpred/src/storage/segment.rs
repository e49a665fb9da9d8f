//! Segment Snapshot - read-only view of one segment for the lifetime of a scan
//!
//! Owns the column chunks, zone maps, dictionaries (through the chunks) and
//! index sources of a segment. Index blobs are decoded lazily on first use
//! and cached per reader; nothing is shared process-wide, so dropping the
//! snapshot drops every cache with it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::bitmap_index::BitmapIndex;
use super::bloom::{ChunkBloomFilter, BLOOM_FP_RATE};
use super::index_handle::IndexHandle;
use super::inverted::InvertedIndex;
use super::zone_map::ZoneMap;
use super::{ChunkReader, DictionaryProvider, IndexProvider, ZoneMapProvider};
use crate::data::column::{ColumnChunk, ColumnValues};
use crate::data::dictionary::Dictionary;
use crate::data::ColumnDef;
use crate::{ChunkId, ColumnId, PredicateError, Result};

/// Hash width used for inverted indexes built in memory
const DEFAULT_INVERTED_HASH_BITS: u8 = 32;

// ============================================================================
// Index Sources
// ============================================================================

/// Kind of per-chunk index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    Bitmap,
    Bloom,
    Inverted,
}

impl IndexKind {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bitmap" => Some(IndexKind::Bitmap),
            "bloom" => Some(IndexKind::Bloom),
            "inverted" | "fulltext" => Some(IndexKind::Inverted),
            _ => None,
        }
    }
}

/// Where an index's serialized form lives
#[derive(Debug, Clone)]
enum BlobSource {
    Bytes(Arc<Vec<u8>>),
    File(PathBuf),
}

impl BlobSource {
    fn read(&self) -> std::io::Result<std::borrow::Cow<'_, [u8]>> {
        match self {
            BlobSource::Bytes(bytes) => Ok(std::borrow::Cow::Borrowed(bytes.as_slice())),
            BlobSource::File(path) => Ok(std::borrow::Cow::Owned(std::fs::read(path)?)),
        }
    }
}

// ============================================================================
// Segment Snapshot
// ============================================================================

struct ChunkSlot {
    data: Arc<ColumnChunk>,
    zone_map: Option<ZoneMap>,
    indexes: Vec<(IndexKind, BlobSource)>,
}

struct ColumnSlot {
    def: ColumnDef,
    chunks: Vec<ChunkSlot>,
}

pub struct SegmentSnapshot {
    chunk_rows: Vec<usize>,
    columns: AHashMap<ColumnId, ColumnSlot>,
    /// Decoded index handles, filled on first request per column chunk
    index_cache: RwLock<AHashMap<(ColumnId, ChunkId), Option<IndexHandle>>>,
}

impl SegmentSnapshot {
    /// Empty segment; the first column added fixes the chunk layout
    pub fn new() -> Self {
        Self {
            chunk_rows: Vec::new(),
            columns: AHashMap::new(),
            index_cache: RwLock::new(AHashMap::new()),
        }
    }

    /// Add a column's chunks. Zone maps are computed from the data; use
    /// [`set_zone_map`](Self::set_zone_map) to replace them with stored ones.
    pub fn add_column(&mut self, def: ColumnDef, chunks: Vec<ColumnChunk>) -> Result<()> {
        if self.columns.contains_key(&def.id) {
            return Err(PredicateError::InvalidChunk(format!(
                "column {} already present in segment",
                def.id
            )));
        }
        let rows: Vec<usize> = chunks.iter().map(|c| c.row_count()).collect();
        if self.columns.is_empty() {
            self.chunk_rows = rows;
        } else if rows != self.chunk_rows {
            return Err(PredicateError::InvalidChunk(format!(
                "column {} chunk layout {:?} differs from segment layout {:?}",
                def.id, rows, self.chunk_rows
            )));
        }

        let expected = def.scalar_type.physical();
        let mut slots = Vec::with_capacity(chunks.len());
        for (chunk_id, chunk) in chunks.into_iter().enumerate() {
            let physical = match chunk.values() {
                ColumnValues::Codes(_) => chunk.dictionary().and_then(|d| d.physical_type()),
                values => values.physical_type(),
            };
            // empty dictionaries carry no type
            if physical.is_some() && physical != expected {
                return Err(PredicateError::InvalidChunk(format!(
                    "column {} chunk {} holds {:?}, declared {}",
                    def.id, chunk_id, physical, def.scalar_type
                )));
            }
            slots.push(ChunkSlot {
                zone_map: Some(ZoneMap::from_chunk(&chunk)),
                data: Arc::new(chunk),
                indexes: Vec::new(),
            });
        }
        self.columns.insert(def.id, ColumnSlot { def, chunks: slots });
        Ok(())
    }

    fn slot_mut(&mut self, column_id: ColumnId, chunk_id: ChunkId) -> Result<&mut ChunkSlot> {
        let column = self
            .columns
            .get_mut(&column_id)
            .ok_or(PredicateError::UnknownColumn(column_id))?;
        column
            .chunks
            .get_mut(chunk_id as usize)
            .ok_or_else(|| PredicateError::InvalidChunk(format!("chunk {} out of range", chunk_id)))
    }

    fn slot(&self, column_id: ColumnId, chunk_id: ChunkId) -> Option<&ChunkSlot> {
        self.columns.get(&column_id)?.chunks.get(chunk_id as usize)
    }

    /// Replace (or remove, with `None`) the stored zone map of a chunk
    pub fn set_zone_map(
        &mut self,
        column_id: ColumnId,
        chunk_id: ChunkId,
        zone_map: Option<ZoneMap>,
    ) -> Result<()> {
        self.slot_mut(column_id, chunk_id)?.zone_map = zone_map;
        self.invalidate(column_id, chunk_id);
        Ok(())
    }

    /// Register a serialized index for a chunk
    pub fn attach_index_bytes(
        &mut self,
        column_id: ColumnId,
        chunk_id: ChunkId,
        kind: IndexKind,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let slot = self.slot_mut(column_id, chunk_id)?;
        slot.indexes.retain(|(k, _)| *k != kind);
        slot.indexes.push((kind, BlobSource::Bytes(Arc::new(bytes))));
        self.invalidate(column_id, chunk_id);
        Ok(())
    }

    /// Register an index file for a chunk; the file is read on first use
    pub fn attach_index_file(
        &mut self,
        column_id: ColumnId,
        chunk_id: ChunkId,
        kind: IndexKind,
        path: impl AsRef<Path>,
    ) -> Result<()> {
        let slot = self.slot_mut(column_id, chunk_id)?;
        slot.indexes.retain(|(k, _)| *k != kind);
        slot.indexes.push((kind, BlobSource::File(path.as_ref().to_path_buf())));
        self.invalidate(column_id, chunk_id);
        Ok(())
    }

    /// Build an index of `kind` for every chunk of a column from its data
    pub fn build_index(&mut self, column_id: ColumnId, kind: IndexKind) -> Result<()> {
        let chunk_count = self
            .columns
            .get(&column_id)
            .ok_or(PredicateError::UnknownColumn(column_id))?
            .chunks
            .len();
        for chunk_id in 0..chunk_count as ChunkId {
            let chunk = Arc::clone(&self.slot_mut(column_id, chunk_id)?.data);
            let bytes = match kind {
                IndexKind::Bitmap => BitmapIndex::build(&chunk).to_bytes()?,
                IndexKind::Bloom => ChunkBloomFilter::build(&chunk, BLOOM_FP_RATE).to_bytes(),
                IndexKind::Inverted => {
                    let values: Vec<_> = (0..chunk.row_count()).map(|row| chunk.value(row)).collect();
                    InvertedIndex::build(values.iter().map(|v| v.as_str()), DEFAULT_INVERTED_HASH_BITS)
                        .to_bytes()?
                }
            };
            self.attach_index_bytes(column_id, chunk_id, kind, bytes)?;
        }
        Ok(())
    }

    pub fn column(&self, column_id: ColumnId) -> Option<&ColumnDef> {
        self.columns.get(&column_id).map(|c| &c.def)
    }

    pub fn columns(&self) -> Vec<ColumnDef> {
        let mut defs: Vec<ColumnDef> = self.columns.values().map(|c| c.def.clone()).collect();
        defs.sort_by_key(|d| d.id);
        defs
    }

    /// Number of column chunks whose indexes have been decoded so far
    pub fn cached_index_handles(&self) -> usize {
        self.index_cache.read().len()
    }

    fn invalidate(&mut self, column_id: ColumnId, chunk_id: ChunkId) {
        self.index_cache.get_mut().remove(&(column_id, chunk_id));
    }

    fn load_handle(&self, column_id: ColumnId, chunk_id: ChunkId) -> Option<IndexHandle> {
        let slot = self.slot(column_id, chunk_id)?;
        if slot.indexes.is_empty() {
            return None;
        }
        let mut handle = IndexHandle::empty(column_id, chunk_id, slot.data.row_count());
        for (kind, source) in &slot.indexes {
            let bytes = match source.read() {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!(
                        "failed to read {:?} index for column {} chunk {}: {}",
                        kind, column_id, chunk_id, e
                    );
                    handle = fail(handle, *kind, e.to_string());
                    continue;
                }
            };
            handle = match kind {
                IndexKind::Bitmap => match BitmapIndex::from_bytes(&bytes) {
                    Ok(idx) => handle.with_bitmap(Arc::new(idx)),
                    Err(e) => fail(handle, *kind, e.to_string()),
                },
                IndexKind::Bloom => match ChunkBloomFilter::from_bytes(&bytes) {
                    Ok(filter) => handle.with_bloom(Arc::new(filter)),
                    Err(e) => fail(handle, *kind, e.to_string()),
                },
                IndexKind::Inverted => match InvertedIndex::from_bytes(&bytes) {
                    Ok(idx) => handle.with_inverted(Arc::new(idx)),
                    Err(e) => fail(handle, *kind, e.to_string()),
                },
            };
        }
        Some(handle)
    }
}

fn fail(handle: IndexHandle, kind: IndexKind, reason: String) -> IndexHandle {
    match kind {
        IndexKind::Bitmap => handle.with_failed_bitmap(reason),
        IndexKind::Bloom => handle.with_failed_bloom(reason),
        IndexKind::Inverted => handle.with_failed_inverted(reason),
    }
}

impl Default for SegmentSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkReader for SegmentSnapshot {
    fn chunk_count(&self) -> usize {
        self.chunk_rows.len()
    }

    fn chunk_row_count(&self, chunk_id: ChunkId) -> Option<usize> {
        self.chunk_rows.get(chunk_id as usize).copied()
    }

    fn read_chunk(&self, column_id: ColumnId, chunk_id: ChunkId) -> Result<Arc<ColumnChunk>> {
        if !self.columns.contains_key(&column_id) {
            return Err(PredicateError::UnknownColumn(column_id));
        }
        self.slot(column_id, chunk_id)
            .map(|slot| Arc::clone(&slot.data))
            .ok_or_else(|| PredicateError::InvalidChunk(format!("chunk {} out of range", chunk_id)))
    }
}

impl ZoneMapProvider for SegmentSnapshot {
    fn zone_map(&self, column_id: ColumnId, chunk_id: ChunkId) -> Option<ZoneMap> {
        self.slot(column_id, chunk_id)?.zone_map.clone()
    }
}

impl DictionaryProvider for SegmentSnapshot {
    fn dictionary(&self, column_id: ColumnId, chunk_id: ChunkId) -> Option<Arc<Dictionary>> {
        self.slot(column_id, chunk_id)?.data.dictionary().cloned()
    }
}

impl IndexProvider for SegmentSnapshot {
    fn index_handle(&self, column_id: ColumnId, chunk_id: ChunkId) -> Option<IndexHandle> {
        let key = (column_id, chunk_id);
        if let Some(cached) = self.index_cache.read().get(&key) {
            return cached.clone();
        }
        let loaded = self.load_handle(column_id, chunk_id);
        // a racing worker may have loaded it too; either copy is equivalent
        self.index_cache.write().entry(key).or_insert(loaded).clone()
    }
}
