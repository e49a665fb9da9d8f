//! Scan statistics
//!
//! Lock-free counters shared by every worker of a scan. Each recording is a
//! single relaxed atomic increment; readers take a `snapshot()`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Cache-line aligned counter so workers bumping neighbouring counters do
/// not contend on the same line
#[repr(align(64))]
#[derive(Default)]
struct AlignedCounter(AtomicU64);

impl AlignedCounter {
    #[inline]
    fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    #[inline]
    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn clear(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// Where a chunk-level verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    ZoneMap,
    Dictionary,
    /// Bitmap postings or bloom filter
    Index,
}

#[derive(Default)]
pub struct ScanMetrics {
    chunks_scanned: AlignedCounter,
    chunks_skipped: AlignedCounter,
    skipped_by_zone_map: AlignedCounter,
    skipped_by_dictionary: AlignedCounter,
    skipped_by_index: AlignedCounter,
    all_by_zone_map: AlignedCounter,
    index_exact_leaves: AlignedCounter,
    index_candidate_leaves: AlignedCounter,
    rows_evaluated: AlignedCounter,
    rows_selected: AlignedCounter,
    degradations: AlignedCounter,
}

impl ScanMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_chunk(&self, rows_selected: usize) {
        self.chunks_scanned.add(1);
        self.rows_selected.add(rows_selected as u64);
    }

    /// Whole chunk dropped before any row was evaluated
    #[inline]
    pub fn record_chunk_skipped(&self) {
        self.chunks_skipped.add(1);
    }

    /// A leaf predicate was resolved to SKIP for a chunk
    #[inline]
    pub fn record_skip(&self, source: VerdictSource) {
        match source {
            VerdictSource::ZoneMap => self.skipped_by_zone_map.add(1),
            VerdictSource::Dictionary => self.skipped_by_dictionary.add(1),
            VerdictSource::Index => self.skipped_by_index.add(1),
        }
    }

    /// A leaf predicate was resolved to ALL by the zone map
    #[inline]
    pub fn record_zone_map_all(&self) {
        self.all_by_zone_map.add(1);
    }

    #[inline]
    pub fn record_index_exact(&self) {
        self.index_exact_leaves.add(1);
    }

    #[inline]
    pub fn record_index_candidates(&self) {
        self.index_candidate_leaves.add(1);
    }

    #[inline]
    pub fn record_rows_evaluated(&self, rows: usize) {
        self.rows_evaluated.add(rows as u64);
    }

    #[inline]
    pub fn record_degradation(&self) {
        self.degradations.add(1);
    }

    pub fn reset(&self) {
        for counter in [
            &self.chunks_scanned,
            &self.chunks_skipped,
            &self.skipped_by_zone_map,
            &self.skipped_by_dictionary,
            &self.skipped_by_index,
            &self.all_by_zone_map,
            &self.index_exact_leaves,
            &self.index_candidate_leaves,
            &self.rows_evaluated,
            &self.rows_selected,
            &self.degradations,
        ] {
            counter.clear();
        }
    }

    pub fn snapshot(&self) -> ScanMetricsSnapshot {
        ScanMetricsSnapshot {
            chunks_scanned: self.chunks_scanned.get(),
            chunks_skipped: self.chunks_skipped.get(),
            skipped_by_zone_map: self.skipped_by_zone_map.get(),
            skipped_by_dictionary: self.skipped_by_dictionary.get(),
            skipped_by_index: self.skipped_by_index.get(),
            all_by_zone_map: self.all_by_zone_map.get(),
            index_exact_leaves: self.index_exact_leaves.get(),
            index_candidate_leaves: self.index_candidate_leaves.get(),
            rows_evaluated: self.rows_evaluated.get(),
            rows_selected: self.rows_selected.get(),
            degradations: self.degradations.get(),
        }
    }
}

impl std::fmt::Debug for ScanMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.snapshot().fmt(f)
    }
}

/// Point-in-time copy of the scan counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanMetricsSnapshot {
    pub chunks_scanned: u64,
    pub chunks_skipped: u64,
    pub skipped_by_zone_map: u64,
    pub skipped_by_dictionary: u64,
    pub skipped_by_index: u64,
    pub all_by_zone_map: u64,
    pub index_exact_leaves: u64,
    pub index_candidate_leaves: u64,
    pub rows_evaluated: u64,
    pub rows_selected: u64,
    pub degradations: u64,
}

impl ScanMetricsSnapshot {
    /// Format snapshot as human-readable string
    pub fn format(&self) -> String {
        format!(
            "ScanMetrics {{\n\
            \tchunks: {} scanned, {} skipped\n\
            \tleaf skips: {} zone map, {} dictionary, {} index\n\
            \tleaf all: {} zone map\n\
            \tindex: {} exact, {} candidate\n\
            \trows: {} evaluated, {} selected\n\
            \tdegradations: {}\n\
            }}",
            self.chunks_scanned,
            self.chunks_skipped,
            self.skipped_by_zone_map,
            self.skipped_by_dictionary,
            self.skipped_by_index,
            self.all_by_zone_map,
            self.index_exact_leaves,
            self.index_candidate_leaves,
            self.rows_evaluated,
            self.rows_selected,
            self.degradations,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_concurrent_recording() {
        let metrics = Arc::new(ScanMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        m.record_skip(VerdictSource::ZoneMap);
                        m.record_rows_evaluated(2);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.skipped_by_zone_map, 4000);
        assert_eq!(snap.rows_evaluated, 8000);

        metrics.reset();
        assert_eq!(metrics.snapshot(), ScanMetricsSnapshot::default());
    }
}
