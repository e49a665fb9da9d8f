//! Exact equality index: distinct value -> posting list of row ids
//!
//! Optimized for equality and membership (`col = v`, `col IN (...)`).
//! One index covers one column of one chunk; row ids are chunk-relative.
//! Unlike the inverted index the result of a lookup is exact, so rows it
//! selects need no re-verification.

use std::io;
use std::path::Path;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use super::{invalid_data, seal, unseal};
use crate::data::column::ColumnChunk;
use crate::data::Value;
use crate::RowId;

const INDEX_MAGIC: &[u8; 4] = b"BMIX";

// ============================================================================
// Row id sets
// ============================================================================

/// Sorted, de-duplicated chunk-relative row ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowIdSet {
    rows: Vec<RowId>,
}

impl RowIdSet {
    pub fn empty() -> Self {
        Self { rows: Vec::new() }
    }

    /// Wrap an already sorted list (debug-checked)
    pub fn from_sorted(rows: Vec<RowId>) -> Self {
        debug_assert!(rows.windows(2).all(|w| w[0] < w[1]));
        Self { rows }
    }

    pub fn from_unsorted(mut rows: Vec<RowId>) -> Self {
        rows.sort_unstable();
        rows.dedup();
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, row: RowId) -> bool {
        self.rows.binary_search(&row).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = RowId> + '_ {
        self.rows.iter().copied()
    }

    pub fn as_slice(&self) -> &[RowId] {
        &self.rows
    }

    pub fn max(&self) -> Option<RowId> {
        self.rows.last().copied()
    }

    /// Sorted merge of two sets
    pub fn union(&self, other: &RowIdSet) -> RowIdSet {
        let (a, b) = (&self.rows, &other.rows);
        let mut out = Vec::with_capacity(a.len() + b.len());
        let (mut i, mut j) = (0, 0);
        while i < a.len() && j < b.len() {
            match a[i].cmp(&b[j]) {
                std::cmp::Ordering::Less => {
                    out.push(a[i]);
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    out.push(b[j]);
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    out.push(a[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        out.extend_from_slice(&a[i..]);
        out.extend_from_slice(&b[j..]);
        RowIdSet { rows: out }
    }
}

impl FromIterator<RowId> for RowIdSet {
    fn from_iter<T: IntoIterator<Item = RowId>>(iter: T) -> Self {
        Self::from_unsorted(iter.into_iter().collect())
    }
}

// ============================================================================
// Bitmap Index
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BitmapIndex {
    postings: AHashMap<Value, Vec<RowId>>,
    row_count: usize,
}

impl BitmapIndex {
    pub fn new(row_count: usize) -> Self {
        Self {
            postings: AHashMap::new(),
            row_count,
        }
    }

    /// Index every non-null row of a chunk
    pub fn build(chunk: &ColumnChunk) -> Self {
        let mut index = Self::new(chunk.row_count());
        for row in 0..chunk.row_count() {
            let value = chunk.value(row);
            if !value.is_null() {
                index.insert(value, row as RowId);
            }
        }
        index
    }

    /// Append a posting; rows must be inserted in ascending order per value
    pub fn insert(&mut self, value: Value, row: RowId) {
        let list = self.postings.entry(value).or_default();
        if list.last() != Some(&row) {
            list.push(row);
        }
        self.row_count = self.row_count.max(row as usize + 1);
    }

    /// Exact row ids holding `value`
    pub fn seek(&self, value: &Value) -> RowIdSet {
        match self.postings.get(value) {
            Some(rows) => RowIdSet::from_sorted(rows.clone()),
            None => RowIdSet::empty(),
        }
    }

    pub fn distinct_values(&self) -> usize {
        self.postings.len()
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn max_row_id(&self) -> Option<RowId> {
        self.postings.values().filter_map(|rows| rows.last().copied()).max()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Serialize as `[magic][crc32][bincode payload]`
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let payload = bincode::serialize(self).map_err(invalid_data)?;
        Ok(seal(INDEX_MAGIC, &payload))
    }

    pub fn from_bytes(data: &[u8]) -> io::Result<Self> {
        bincode::deserialize(unseal(INDEX_MAGIC, data)?).map_err(invalid_data)
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.to_bytes()?)
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
