//! Bloom Filter for fast equality membership testing
//!
//! Used to skip chunks that definitely don't contain a value.
//! A negative answer is final; a positive answer only means the evaluator
//! still has to look at the rows.

use bloomfilter::Bloom;
use std::io;

use crate::data::column::ColumnChunk;
use crate::data::Value;

/// Default false positive rate (1%)
pub const BLOOM_FP_RATE: f64 = 0.01;

/// Outcome of a bloom filter probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BloomProbe {
    /// No row of the chunk holds the value
    DefinitelyAbsent,
    /// Some row may hold the value
    MaybePresent,
}

/// Per-chunk bloom filter over canonical value key bytes
pub struct ChunkBloomFilter {
    filter: Bloom<[u8]>,
    /// Number of values inserted
    item_count: usize,
}

impl std::fmt::Debug for ChunkBloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkBloomFilter")
            .field("item_count", &self.item_count)
            .field("num_bits", &self.filter.number_of_bits())
            .finish()
    }
}

impl ChunkBloomFilter {
    /// Create an empty filter sized for `expected_items`
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        Self {
            filter: Bloom::new_for_fp_rate(expected_items.max(1), false_positive_rate),
            item_count: 0,
        }
    }

    /// Build from the distinct non-null values of a chunk
    pub fn build(chunk: &ColumnChunk, false_positive_rate: f64) -> Self {
        let mut filter = Self::new(chunk.row_count(), false_positive_rate);
        for row in 0..chunk.row_count() {
            let value = chunk.value(row);
            if !value.is_null() {
                filter.insert(&value);
            }
        }
        filter
    }

    #[inline]
    pub fn insert(&mut self, value: &Value) {
        self.filter.set(&value.key_bytes()[..]);
        self.item_count += 1;
    }

    #[inline]
    pub fn probe(&self, value: &Value) -> BloomProbe {
        if self.filter.check(&value.key_bytes()[..]) {
            BloomProbe::MaybePresent
        } else {
            BloomProbe::DefinitelyAbsent
        }
    }

    /// Serialize bloom filter to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let bitmap = self.filter.bitmap();
        let num_bits = self.filter.number_of_bits();
        let num_hashes = self.filter.number_of_hash_functions();
        let sip_keys = self.filter.sip_keys();

        let mut bytes = Vec::with_capacity(56 + bitmap.len());

        // Header: item_count(8) + num_bits(8) + num_hashes(4) + bitmap_len(4) + sip_keys(32)
        bytes.extend_from_slice(&(self.item_count as u64).to_le_bytes());
        bytes.extend_from_slice(&num_bits.to_le_bytes());
        bytes.extend_from_slice(&num_hashes.to_le_bytes());
        bytes.extend_from_slice(&(bitmap.len() as u32).to_le_bytes());
        for (k0, k1) in sip_keys.iter() {
            bytes.extend_from_slice(&k0.to_le_bytes());
            bytes.extend_from_slice(&k1.to_le_bytes());
        }
        bytes.extend_from_slice(&bitmap);

        bytes
    }

    /// Deserialize bloom filter from bytes
    pub fn from_bytes(data: &[u8]) -> io::Result<Self> {
        if data.len() < 56 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "Bloom filter data too short"));
        }

        let u64_at = |off: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&data[off..off + 8]);
            u64::from_le_bytes(buf)
        };
        let u32_at = |off: usize| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&data[off..off + 4]);
            u32::from_le_bytes(buf)
        };

        let item_count = u64_at(0) as usize;
        let num_bits = u64_at(8);
        let num_hashes = u32_at(16);
        let bitmap_len = u32_at(20) as usize;
        let sip_keys = [(u64_at(24), u64_at(32)), (u64_at(40), u64_at(48))];

        if data.len() < 56 + bitmap_len {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "Bloom filter bitmap incomplete"));
        }
        if num_hashes == 0 || num_bits == 0 || num_bits > (bitmap_len as u64) * 8 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "Bloom filter header inconsistent"));
        }

        let bitmap = &data[56..56 + bitmap_len];
        let filter = Bloom::from_existing(bitmap, num_bits, num_hashes, sip_keys);

        Ok(Self { filter, item_count })
    }

    pub fn item_count(&self) -> usize {
        self.item_count
    }
}
