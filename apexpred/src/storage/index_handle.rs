//! Read-only handle to the indexes of one column within one chunk
//!
//! Each index kind is either absent, loaded, or failed. A failed index
//! (load error, checksum mismatch, postings beyond the chunk) is reported as
//! a `Degradation` and treated exactly like an absent one by the seeker.

use std::sync::Arc;

use super::bitmap_index::{BitmapIndex, RowIdSet};
use super::bloom::{BloomProbe, ChunkBloomFilter};
use super::inverted::InvertedIndex;
use crate::data::Value;
use crate::{ChunkId, ColumnId, Degradation};

type Slot<T> = Option<std::result::Result<Arc<T>, String>>;

#[derive(Debug, Clone)]
pub struct IndexHandle {
    column_id: ColumnId,
    chunk_id: ChunkId,
    row_count: usize,
    bitmap: Slot<BitmapIndex>,
    bloom: Slot<ChunkBloomFilter>,
    inverted: Slot<InvertedIndex>,
}

impl IndexHandle {
    /// Handle with no index of any kind
    pub fn empty(column_id: ColumnId, chunk_id: ChunkId, row_count: usize) -> Self {
        Self {
            column_id,
            chunk_id,
            row_count,
            bitmap: None,
            bloom: None,
            inverted: None,
        }
    }

    pub fn column_id(&self) -> ColumnId {
        self.column_id
    }

    pub fn chunk_id(&self) -> ChunkId {
        self.chunk_id
    }

    /// Attach a bitmap index; postings beyond the chunk mark it failed
    pub fn with_bitmap(mut self, index: Arc<BitmapIndex>) -> Self {
        self.bitmap = Some(match index.max_row_id() {
            Some(max) if max as usize >= self.row_count => Err(format!(
                "bitmap posting row {} beyond chunk of {} rows",
                max, self.row_count
            )),
            _ => Ok(index),
        });
        self
    }

    pub fn with_bloom(mut self, filter: Arc<ChunkBloomFilter>) -> Self {
        self.bloom = Some(Ok(filter));
        self
    }

    /// Attach an inverted index; postings beyond the chunk mark it failed
    pub fn with_inverted(mut self, index: Arc<InvertedIndex>) -> Self {
        self.inverted = Some(match index.max_row_id() {
            Some(max) if max as usize >= self.row_count => Err(format!(
                "inverted posting row {} beyond chunk of {} rows",
                max, self.row_count
            )),
            _ => Ok(index),
        });
        self
    }

    pub fn with_failed_bitmap(mut self, reason: impl Into<String>) -> Self {
        self.bitmap = Some(Err(reason.into()));
        self
    }

    pub fn with_failed_bloom(mut self, reason: impl Into<String>) -> Self {
        self.bloom = Some(Err(reason.into()));
        self
    }

    pub fn with_failed_inverted(mut self, reason: impl Into<String>) -> Self {
        self.inverted = Some(Err(reason.into()));
        self
    }

    fn degraded(&self, reason: &str) -> Degradation {
        Degradation::IndexUnavailable {
            column_id: self.column_id,
            chunk_id: self.chunk_id,
            reason: reason.to_string(),
        }
    }

    fn resolve<'a, T>(&self, slot: &'a Slot<T>) -> Result<Option<&'a Arc<T>>, Degradation> {
        match slot {
            None => Ok(None),
            Some(Ok(index)) => Ok(Some(index)),
            Some(Err(reason)) => Err(self.degraded(reason)),
        }
    }

    /// A usable bitmap index is attached
    pub fn has_bitmap_index(&self) -> bool {
        matches!(self.bitmap, Some(Ok(_)))
    }

    /// Exact postings for `value`; `Ok(None)` when no bitmap index exists
    pub fn seek_bitmap(&self, value: &Value) -> Result<Option<RowIdSet>, Degradation> {
        Ok(self.resolve(&self.bitmap)?.map(|idx| idx.seek(value)))
    }

    /// Bloom probe; `Ok(None)` when no bloom filter exists
    pub fn bloom_test(&self, value: &Value) -> Result<Option<BloomProbe>, Degradation> {
        Ok(self.resolve(&self.bloom)?.map(|f| f.probe(value)))
    }

    /// Candidate superset for `token`; `Ok(None)` when no inverted index exists
    pub fn seek_inverted(&self, token: &str) -> Result<Option<RowIdSet>, Degradation> {
        Ok(self.resolve(&self.inverted)?.map(|idx| idx.seek(token)))
    }
}
