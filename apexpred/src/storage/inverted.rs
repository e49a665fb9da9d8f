//! Token inverted index for string columns
//!
//! Postings are keyed by a fixed-seed hash of the token rather than the token
//! text, so distinct tokens may share a posting list. A lookup therefore
//! returns a candidate superset and every candidate row must be re-checked
//! against the real value.

use std::io;

use ahash::{AHashMap, RandomState};
use serde::{Deserialize, Serialize};

use super::bitmap_index::RowIdSet;
use super::{invalid_data, seal, unseal};
use crate::RowId;

const INDEX_MAGIC: &[u8; 4] = b"INVX";

// Fixed seeds: hashes must be stable across processes for persisted indexes
const TOKEN_SEEDS: (u64, u64, u64, u64) = (
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
);

/// Split a string into lowercase alphanumeric tokens
pub fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvertedIndex {
    /// token hash (masked to `hash_bits`) -> sorted row ids
    postings: AHashMap<u64, Vec<RowId>>,
    /// Width of the hash space; smaller widths trade precision for size
    hash_bits: u8,
    row_count: usize,
}

impl InvertedIndex {
    pub fn new(hash_bits: u8, row_count: usize) -> Self {
        Self {
            postings: AHashMap::new(),
            hash_bits: hash_bits.clamp(1, 64),
            row_count,
        }
    }

    /// Build from optional string values (NULL rows are not indexed)
    pub fn build<'a, I>(values: I, hash_bits: u8) -> Self
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let mut index = Self::new(hash_bits, 0);
        for (row, value) in values.into_iter().enumerate() {
            index.row_count = row + 1;
            if let Some(s) = value {
                for token in tokenize(s) {
                    let key = index.token_key(&token);
                    let list = index.postings.entry(key).or_default();
                    if list.last() != Some(&(row as RowId)) {
                        list.push(row as RowId);
                    }
                }
            }
        }
        index
    }

    fn token_key(&self, token: &str) -> u64 {
        let state = RandomState::with_seeds(TOKEN_SEEDS.0, TOKEN_SEEDS.1, TOKEN_SEEDS.2, TOKEN_SEEDS.3);
        let hash = state.hash_one(token);
        if self.hash_bits >= 64 {
            hash
        } else {
            hash & ((1u64 << self.hash_bits) - 1)
        }
    }

    /// Candidate rows that may contain `token` (superset of true matches)
    pub fn seek(&self, token: &str) -> RowIdSet {
        let key = self.token_key(&token.to_lowercase());
        match self.postings.get(&key) {
            Some(rows) => RowIdSet::from_sorted(rows.clone()),
            None => RowIdSet::empty(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Largest row id referenced by any posting list
    pub fn max_row_id(&self) -> Option<RowId> {
        self.postings.values().filter_map(|rows| rows.last().copied()).max()
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let payload = bincode::serialize(self).map_err(invalid_data)?;
        Ok(seal(INDEX_MAGIC, &payload))
    }

    pub fn from_bytes(data: &[u8]) -> io::Result<Self> {
        bincode::deserialize(unseal(INDEX_MAGIC, data)?).map_err(invalid_data)
    }
}
