//! Selection Vectors - per-chunk row masks
//!
//! A selection covers the rows `[0, n)` of one chunk. Two forms exist:
//! - `Dense`: one bit per row in `u64` words (bits past `n` are always zero)
//! - `Sparse`: sorted, disjoint, non-empty row ranges
//!
//! Evaluation works on dense words; the output form handed downstream is
//! chosen by `compact` from the observed density. Word buffers are drawn
//! from a thread-local pool so the hot path does not hit the allocator for
//! every chunk.

use std::borrow::Cow;
use std::cell::RefCell;
use std::ops::Range;

use arrow::array::BooleanArray;
use arrow::compute::filter_record_batch;
use arrow::record_batch::RecordBatch;

use crate::config::EngineConfig;
use crate::storage::bitmap_index::RowIdSet;
use crate::{PredicateError, Result, RowId};

/// Buffers kept per thread
const POOL_CAPACITY: usize = 32;

thread_local! {
    static WORD_POOL: RefCell<Vec<Vec<u64>>> = RefCell::new(Vec::new());
}

#[inline]
pub(crate) fn word_count(len: usize) -> usize {
    (len + 63) / 64
}

/// Set bits `[start, end)`
pub(crate) fn set_range(words: &mut [u64], start: usize, end: usize) {
    let mut i = start;
    while i < end {
        let bit = i % 64;
        let span = (64 - bit).min(end - i);
        let mask = if span == 64 { u64::MAX } else { ((1u64 << span) - 1) << bit };
        words[i / 64] |= mask;
        i += span;
    }
}

/// Thread-local pool of word buffers
pub struct SelectionPool;

impl SelectionPool {
    /// Zeroed buffer covering `len` rows
    pub fn take(len: usize) -> Vec<u64> {
        let mut buf = WORD_POOL.with(|p| p.borrow_mut().pop()).unwrap_or_default();
        buf.clear();
        buf.resize(word_count(len), 0);
        buf
    }

    /// Return a buffer for reuse by later chunks on this thread
    pub fn give(buf: Vec<u64>) {
        if buf.capacity() == 0 {
            return;
        }
        WORD_POOL.with(|p| {
            let mut pool = p.borrow_mut();
            if pool.len() < POOL_CAPACITY {
                pool.push(buf);
            }
        });
    }

    /// Buffers currently pooled on this thread
    pub fn pooled() -> usize {
        WORD_POOL.with(|p| p.borrow().len())
    }
}

/// Output representation choice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    Dense,
    Sparse,
    /// Runs when `run_count <= rows / run_divisor`, dense otherwise
    Auto { run_divisor: usize },
}

impl SelectionPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        SelectionPolicy::Auto {
            run_divisor: config.selection_run_divisor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionVector {
    Dense { words: Vec<u64>, len: usize },
    Sparse { runs: Vec<Range<u32>>, len: usize },
}

impl SelectionVector {
    /// Every row selected
    pub fn all(len: usize) -> Self {
        Self::from_range(len, 0..len)
    }

    /// No row selected
    pub fn none(len: usize) -> Self {
        SelectionVector::Sparse { runs: Vec::new(), len }
    }

    /// Rows `[from, to)`, clamped to the chunk
    pub fn from_range(len: usize, range: Range<usize>) -> Self {
        let end = range.end.min(len);
        let runs = if range.start < end {
            vec![range.start as u32..end as u32]
        } else {
            Vec::new()
        };
        SelectionVector::Sparse { runs, len }
    }

    /// Wrap raw words; bits past `len` are cleared
    pub fn from_words(mut words: Vec<u64>, len: usize) -> Self {
        words.resize(word_count(len), 0);
        if len % 64 != 0 {
            if let Some(last) = words.last_mut() {
                *last &= (1u64 << (len % 64)) - 1;
            }
        }
        SelectionVector::Dense { words, len }
    }

    /// Rows of an index posting list; ids at or beyond `len` are ignored
    pub fn from_row_ids(len: usize, rows: &RowIdSet) -> Self {
        let mut words = SelectionPool::take(len);
        for row in rows.iter().map(|r| r as usize).filter(|&r| r < len) {
            words[row / 64] |= 1u64 << (row % 64);
        }
        SelectionVector::Dense { words, len }
    }

    pub fn from_bools(flags: &[bool]) -> Self {
        let mut words = SelectionPool::take(flags.len());
        for (row, &flag) in flags.iter().enumerate() {
            if flag {
                words[row / 64] |= 1u64 << (row % 64);
            }
        }
        SelectionVector::Dense { words, len: flags.len() }
    }

    /// Number of rows covered (selected or not)
    #[inline]
    pub fn row_count(&self) -> usize {
        match self {
            SelectionVector::Dense { len, .. } | SelectionVector::Sparse { len, .. } => *len,
        }
    }

    /// Number of selected rows
    pub fn count(&self) -> usize {
        match self {
            SelectionVector::Dense { words, .. } => {
                words.iter().map(|w| w.count_ones() as usize).sum()
            }
            SelectionVector::Sparse { runs, .. } => {
                runs.iter().map(|r| (r.end - r.start) as usize).sum()
            }
        }
    }

    /// At least one row selected
    pub fn any(&self) -> bool {
        match self {
            SelectionVector::Dense { words, .. } => words.iter().any(|&w| w != 0),
            SelectionVector::Sparse { runs, .. } => !runs.is_empty(),
        }
    }

    pub fn is_all(&self) -> bool {
        self.count() == self.row_count()
    }

    pub fn contains(&self, row: usize) -> bool {
        match self {
            SelectionVector::Dense { words, len } => {
                row < *len && (words[row / 64] >> (row % 64)) & 1 == 1
            }
            SelectionVector::Sparse { runs, .. } => {
                let row = row as u32;
                let idx = runs.partition_point(|r| r.end <= row);
                runs.get(idx).map_or(false, |r| r.start <= row)
            }
        }
    }

    /// Selected row ids in ascending order
    pub fn iter(&self) -> SelectionIter<'_> {
        match self {
            SelectionVector::Dense { words, .. } => SelectionIter::Dense {
                words,
                word_idx: 0,
                current: words.first().copied().unwrap_or(0),
            },
            SelectionVector::Sparse { runs, .. } => SelectionIter::Sparse {
                runs,
                run_idx: 0,
                next: 0,
            },
        }
    }

    pub fn to_row_ids(&self) -> Vec<RowId> {
        self.iter().collect()
    }

    /// Dense word view, borrowed when already dense
    pub fn words(&self) -> Cow<'_, [u64]> {
        match self {
            SelectionVector::Dense { words, .. } => Cow::Borrowed(words.as_slice()),
            SelectionVector::Sparse { runs, len } => {
                let mut words = SelectionPool::take(*len);
                for r in runs {
                    set_range(&mut words, r.start as usize, r.end as usize);
                }
                Cow::Owned(words)
            }
        }
    }

    /// Selected rows as sorted disjoint ranges
    pub fn runs(&self) -> Cow<'_, [Range<u32>]> {
        match self {
            SelectionVector::Sparse { runs, .. } => Cow::Borrowed(runs.as_slice()),
            SelectionVector::Dense { words, len } => Cow::Owned(runs_from_words(words, *len)),
        }
    }

    fn into_words(self) -> Vec<u64> {
        match self {
            SelectionVector::Dense { words, .. } => words,
            sparse => {
                let words = sparse.words().into_owned();
                words
            }
        }
    }

    pub fn and(&self, other: &SelectionVector) -> SelectionVector {
        debug_assert_eq!(self.row_count(), other.row_count());
        if let (SelectionVector::Sparse { runs: a, len }, SelectionVector::Sparse { runs: b, .. }) =
            (self, other)
        {
            return SelectionVector::Sparse {
                runs: intersect_runs(a, b),
                len: *len,
            };
        }
        self.zip_words(other, |a, b| a & b)
    }

    pub fn or(&self, other: &SelectionVector) -> SelectionVector {
        debug_assert_eq!(self.row_count(), other.row_count());
        self.zip_words(other, |a, b| a | b)
    }

    /// Rows selected here but not in `other`
    pub fn and_not(&self, other: &SelectionVector) -> SelectionVector {
        debug_assert_eq!(self.row_count(), other.row_count());
        self.zip_words(other, |a, b| a & !b)
    }

    /// Rows not selected
    pub fn complement(&self) -> SelectionVector {
        SelectionVector::all(self.row_count()).and_not(self)
    }

    fn zip_words(&self, other: &SelectionVector, op: impl Fn(u64, u64) -> u64) -> SelectionVector {
        let len = self.row_count();
        let (a, b) = (self.words(), other.words());
        let mut out = SelectionPool::take(len);
        for ((o, &x), &y) in out.iter_mut().zip(a.iter()).zip(b.iter()) {
            *o = op(x, y);
        }
        recycle_cow(a);
        recycle_cow(b);
        SelectionVector::Dense { words: out, len }
    }

    /// Re-encode in the representation picked by `policy`
    pub fn compact(self, policy: SelectionPolicy) -> SelectionVector {
        let len = self.row_count();
        match policy {
            SelectionPolicy::Dense => SelectionVector::Dense {
                words: self.into_words(),
                len,
            },
            SelectionPolicy::Sparse => match self {
                sparse @ SelectionVector::Sparse { .. } => sparse,
                SelectionVector::Dense { words, len } => {
                    let runs = runs_from_words(&words, len);
                    SelectionPool::give(words);
                    SelectionVector::Sparse { runs, len }
                }
            },
            SelectionPolicy::Auto { run_divisor } => {
                let run_count = self.runs().len();
                if run_count <= len / run_divisor.max(1) {
                    self.compact(SelectionPolicy::Sparse)
                } else {
                    self.compact(SelectionPolicy::Dense)
                }
            }
        }
    }

    /// Hand the word buffer back to this thread's pool
    pub fn recycle(self) {
        if let SelectionVector::Dense { words, .. } = self {
            SelectionPool::give(words);
        }
    }

    /// Same selected rows, regardless of representation
    pub fn same_rows(&self, other: &SelectionVector) -> bool {
        self.row_count() == other.row_count() && self.runs() == other.runs()
    }

    // ========================================================================
    // Arrow interop
    // ========================================================================

    pub fn to_boolean_array(&self) -> BooleanArray {
        let mut flags = vec![false; self.row_count()];
        for row in self.iter() {
            flags[row as usize] = true;
        }
        BooleanArray::from(flags)
    }

    /// Keep the selected rows of a batch holding this chunk's rows
    pub fn filter_batch(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        if batch.num_rows() != self.row_count() {
            return Err(PredicateError::InvalidChunk(format!(
                "batch has {} rows, selection covers {}",
                batch.num_rows(),
                self.row_count()
            )));
        }
        Ok(filter_record_batch(batch, &self.to_boolean_array())?)
    }
}

fn recycle_cow(words: Cow<'_, [u64]>) {
    if let Cow::Owned(buf) = words {
        SelectionPool::give(buf);
    }
}

fn runs_from_words(words: &[u64], len: usize) -> Vec<Range<u32>> {
    let mut runs = Vec::new();
    let mut start: Option<usize> = None;
    for (wi, &w) in words.iter().enumerate() {
        let base = wi * 64;
        if w == 0 {
            if let Some(s) = start.take() {
                runs.push(s as u32..base as u32);
            }
            continue;
        }
        if w == u64::MAX {
            start.get_or_insert(base);
            continue;
        }
        for bit in 0..64 {
            let row = base + bit;
            if row >= len {
                break;
            }
            match ((w >> bit) & 1 == 1, start) {
                (true, None) => start = Some(row),
                (false, Some(s)) => {
                    runs.push(s as u32..row as u32);
                    start = None;
                }
                _ => {}
            }
        }
    }
    if let Some(s) = start {
        runs.push(s as u32..len as u32);
    }
    runs
}

fn intersect_runs(a: &[Range<u32>], b: &[Range<u32>]) -> Vec<Range<u32>> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let start = a[i].start.max(b[j].start);
        let end = a[i].end.min(b[j].end);
        if start < end {
            out.push(start..end);
        }
        if a[i].end < b[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

/// Ascending iterator over selected rows
pub enum SelectionIter<'a> {
    Dense { words: &'a [u64], word_idx: usize, current: u64 },
    Sparse { runs: &'a [Range<u32>], run_idx: usize, next: u32 },
}

impl Iterator for SelectionIter<'_> {
    type Item = RowId;

    fn next(&mut self) -> Option<RowId> {
        match self {
            SelectionIter::Dense { words, word_idx, current } => loop {
                if *current != 0 {
                    let bit = current.trailing_zeros() as usize;
                    *current &= *current - 1;
                    return Some((*word_idx * 64 + bit) as RowId);
                }
                *word_idx += 1;
                *current = *words.get(*word_idx)?;
            },
            SelectionIter::Sparse { runs, run_idx, next } => {
                while let Some(run) = runs.get(*run_idx) {
                    if *next < run.start {
                        *next = run.start;
                    }
                    if *next < run.end {
                        let row = *next;
                        *next += 1;
                        return Some(row);
                    }
                    *run_idx += 1;
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{Array, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};

    #[test]
    fn test_dense_and_sparse_agree() {
        let dense = SelectionVector::from_bools(&[true, true, false, true, false, false, true]);
        let sparse = dense.clone().compact(SelectionPolicy::Sparse);
        assert_eq!(sparse, SelectionVector::Sparse { runs: vec![0..2, 3..4, 6..7], len: 7 });
        assert_eq!(dense.to_row_ids(), sparse.to_row_ids());
        assert_eq!(sparse.count(), 4);
        assert!(sparse.contains(3) && !sparse.contains(4));
        assert!(dense.same_rows(&sparse));
    }

    #[test]
    fn test_set_ops() {
        let a = SelectionVector::from_range(200, 10..150);
        let b = SelectionVector::from_range(200, 100..180);
        assert_eq!(a.and(&b).to_row_ids(), (100u32..150).collect::<Vec<_>>());
        assert_eq!(a.or(&b).count(), 170);
        assert_eq!(a.and_not(&b).count(), 90);
        assert_eq!(a.complement().count(), 60);
    }

    #[test]
    fn test_runs_span_words() {
        let sel = SelectionVector::from_range(300, 60..260);
        let dense = sel.clone().compact(SelectionPolicy::Dense);
        assert_eq!(dense.runs().into_owned(), vec![60..260]);
        assert_eq!(dense.count(), 200);
    }

    #[test]
    fn test_auto_policy_by_density() {
        let policy = SelectionPolicy::Auto { run_divisor: 32 };
        let contiguous = SelectionVector::from_range(1024, 0..512).compact(policy);
        assert!(matches!(contiguous, SelectionVector::Sparse { .. }));

        let flags: Vec<bool> = (0..1024).map(|i| i % 2 == 0).collect();
        let alternating = SelectionVector::from_bools(&flags).compact(policy);
        assert!(matches!(alternating, SelectionVector::Dense { .. }));
    }

    #[test]
    fn test_from_words_masks_tail() {
        let sel = SelectionVector::from_words(vec![u64::MAX], 10);
        assert_eq!(sel.count(), 10);
    }

    #[test]
    fn test_pool_reuse() {
        let sel = SelectionVector::from_bools(&[true; 100]);
        let before = SelectionPool::pooled();
        sel.recycle();
        assert_eq!(SelectionPool::pooled(), before + 1);
        let buf = SelectionPool::take(100);
        assert!(buf.iter().all(|&w| w == 0));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_filter_batch() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int64Array::from(vec![1, 2, 3, 4]))],
        )
        .unwrap();
        let sel = SelectionVector::from_bools(&[false, true, false, true]);
        let filtered = sel.filter_batch(&batch).unwrap();
        assert_eq!(filtered.num_rows(), 2);
        let col = filtered.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!((col.value(0), col.value(1)), (2, 4));

        assert!(SelectionVector::all(3).filter_batch(&batch).is_err());
    }
}
