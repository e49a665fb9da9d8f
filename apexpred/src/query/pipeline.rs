//! Per-chunk pipeline and the segment scanner
//!
//! For each leaf predicate the stages run cheapest first:
//! Rewrite -> ZoneMapPrune -> IndexSeek -> Evaluate. The first three never
//! touch row data; a column chunk is only read when some leaf on it reaches
//! the evaluator with rows still in play.
//!
//! Inside an AND node every leaf gets its cheap stages before any value is
//! evaluated, so a single SKIP drops the chunk without reading a byte of it.
//! Inside an OR node each child only evaluates rows no earlier child has
//! already selected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use rayon::prelude::*;

use crate::config::EngineConfig;
use crate::data::column::ColumnChunk;
use crate::data::dictionary::Dictionary;
use crate::query::dict_rewriter::{DictPredicate, DictionaryRewriter, RewriteOutcome};
use crate::query::evaluator::{Compose, EvalTarget, PredicateEvaluator};
use crate::query::filter_tree::FilterExpr;
use crate::query::index_seeker::{IndexSeeker, SeekOutcome};
use crate::query::predicate::Predicate;
use crate::query::selection::{SelectionPolicy, SelectionVector};
use crate::query::zone_map_pruner::{PruneVerdict, ZoneMapPruner};
use crate::storage::metrics::{ScanMetrics, VerdictSource};
use crate::storage::SegmentSource;
use crate::{ChunkId, ColumnId, Degradation, PredicateError, Result};

/// Cooperative cancellation flag, checked between chunks
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Selected rows of one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSelection {
    pub chunk_id: ChunkId,
    pub selection: SelectionVector,
}

/// Leaf state after the stages that do not read row data
enum LeafStage<'p> {
    Skip,
    All,
    Exact(SelectionVector),
    Pending(PendingLeaf<'p>),
}

struct PendingLeaf<'p> {
    predicate: &'p Predicate,
    /// Code-space rewrite and the dictionary it was computed against
    rewritten: Option<(Arc<Dictionary>, DictPredicate)>,
    candidates: Option<SelectionVector>,
}

impl PendingLeaf<'_> {
    /// Null checks, then code-space kernels, then value kernels by cost
    fn order_key(&self) -> (u8, u8) {
        let tier = if self.predicate.is_null_check() {
            0
        } else if self.rewritten.is_some() {
            1
        } else {
            2
        };
        (tier, self.predicate.eval_cost())
    }
}

/// Mutable per-chunk scan state
struct ChunkContext<'s, S: ?Sized> {
    source: &'s S,
    chunk_id: ChunkId,
    row_count: usize,
    chunks: AHashMap<ColumnId, Arc<ColumnChunk>>,
    degradations: Vec<Degradation>,
}

impl<'s, S: SegmentSource + ?Sized> ChunkContext<'s, S> {
    fn column(&mut self, column_id: ColumnId) -> Result<Arc<ColumnChunk>> {
        if let Some(chunk) = self.chunks.get(&column_id) {
            return Ok(Arc::clone(chunk));
        }
        let chunk = self.source.read_chunk(column_id, self.chunk_id)?;
        if chunk.row_count() != self.row_count {
            return Err(PredicateError::InvalidChunk(format!(
                "column {} chunk {} has {} rows, expected {}",
                column_id,
                self.chunk_id,
                chunk.row_count(),
                self.row_count
            )));
        }
        self.chunks.insert(column_id, Arc::clone(&chunk));
        Ok(chunk)
    }
}

/// Drives one filter tree through every stage for a single chunk
pub struct ChunkPipeline {
    config: EngineConfig,
    rewriter: DictionaryRewriter,
    evaluator: PredicateEvaluator,
    metrics: Arc<ScanMetrics>,
}

impl ChunkPipeline {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_metrics(config, Arc::new(ScanMetrics::new()))
    }

    pub fn with_metrics(config: EngineConfig, metrics: Arc<ScanMetrics>) -> Self {
        Self {
            rewriter: DictionaryRewriter::new(&config),
            evaluator: PredicateEvaluator::new(&config),
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<ScanMetrics> {
        &self.metrics
    }

    /// Rows of `chunk_id` selected by `expr`
    pub fn process_chunk<S>(&self, expr: &FilterExpr, source: &S, chunk_id: ChunkId) -> Result<SelectionVector>
    where
        S: SegmentSource + ?Sized,
    {
        let row_count = source
            .chunk_row_count(chunk_id)
            .ok_or_else(|| PredicateError::InvalidChunk(format!("chunk {} out of range", chunk_id)))?;

        let mut ctx = ChunkContext {
            source,
            chunk_id,
            row_count,
            chunks: AHashMap::new(),
            degradations: Vec::new(),
        };

        let selection = if row_count == 0 {
            SelectionVector::none(0)
        } else {
            self.eval_expr(expr, SelectionVector::all(row_count), &mut ctx)?
        };

        for d in ctx.degradations.drain(..) {
            log::warn!("chunk {}: {}, falling back to row evaluation", chunk_id, d);
            self.metrics.record_degradation();
        }
        if ctx.chunks.is_empty() && !selection.any() {
            self.metrics.record_chunk_skipped();
        }
        let selected = selection.count();
        self.metrics.record_chunk(selected);
        log::debug!(
            "chunk {}: {} of {} rows selected, {} column(s) read",
            chunk_id,
            selected,
            row_count,
            ctx.chunks.len()
        );

        Ok(selection.compact(SelectionPolicy::from_config(&self.config)))
    }

    fn eval_expr<S>(&self, expr: &FilterExpr, scope: SelectionVector, ctx: &mut ChunkContext<'_, S>) -> Result<SelectionVector>
    where
        S: SegmentSource + ?Sized,
    {
        match expr {
            FilterExpr::Predicate(_) => self.eval_and(std::slice::from_ref(expr), scope, ctx),
            FilterExpr::And(children) => self.eval_and(children, scope, ctx),
            FilterExpr::Or(children) => self.eval_or(children, scope, ctx),
        }
    }

    /// Rewrite, zone map and index stages for one leaf
    fn cheap_stages<'p, S>(&self, predicate: &'p Predicate, ctx: &mut ChunkContext<'_, S>) -> LeafStage<'p>
    where
        S: SegmentSource + ?Sized,
    {
        let column_id = predicate.column_id();
        let (chunk_id, n) = (ctx.chunk_id, ctx.row_count);

        // the rewrite is only valid for this chunk's dictionary
        let mut rewritten = None;
        if self.config.use_dictionaries && !predicate.is_null_check() {
            if let Some(dict) = ctx.source.dictionary(column_id, chunk_id) {
                match self.rewriter.rewrite(predicate, &dict) {
                    RewriteOutcome::AlwaysFalse => {
                        log::debug!("chunk {}: {} is false for every dictionary code", chunk_id, predicate);
                        self.metrics.record_skip(VerdictSource::Dictionary);
                        return LeafStage::Skip;
                    }
                    RewriteOutcome::Rewritten(d) => rewritten = Some((dict, d)),
                    RewriteOutcome::NotApplicable => {}
                }
            }
        }

        if self.config.use_zone_maps {
            let zm = ctx.source.zone_map(column_id, chunk_id);
            match ZoneMapPruner::prune_checked(predicate, zm.as_ref(), chunk_id, n, &mut ctx.degradations) {
                PruneVerdict::Skip => {
                    log::debug!("chunk {}: zone map excludes {}", chunk_id, predicate);
                    self.metrics.record_skip(VerdictSource::ZoneMap);
                    return LeafStage::Skip;
                }
                PruneVerdict::All => {
                    self.metrics.record_zone_map_all();
                    return LeafStage::All;
                }
                PruneVerdict::Maybe => {}
            }
        }

        let mut candidates = None;
        if self.config.use_indexes {
            let handle = ctx.source.index_handle(column_id, chunk_id);
            match IndexSeeker::seek(predicate, handle.as_ref(), n, 0..n, None, &mut ctx.degradations) {
                SeekOutcome::Skip => {
                    log::debug!("chunk {}: index excludes {}", chunk_id, predicate);
                    self.metrics.record_skip(VerdictSource::Index);
                    return LeafStage::Skip;
                }
                SeekOutcome::Exact(sel) => {
                    self.metrics.record_index_exact();
                    return LeafStage::Exact(sel);
                }
                SeekOutcome::Candidates(sel) => {
                    self.metrics.record_index_candidates();
                    candidates = Some(sel);
                }
                SeekOutcome::Maybe => {}
            }
        }

        LeafStage::Pending(PendingLeaf {
            predicate,
            rewritten,
            candidates,
        })
    }

    /// Evaluate a pending leaf over `incoming` (AND) or over the rows of
    /// `scope` not yet in `incoming` (OR)
    fn eval_leaf<S>(
        &self,
        leaf: &PendingLeaf<'_>,
        incoming: &SelectionVector,
        compose: Compose,
        ctx: &mut ChunkContext<'_, S>,
    ) -> Result<SelectionVector>
    where
        S: SegmentSource + ?Sized,
    {
        let chunk = ctx.column(leaf.predicate.column_id())?;
        let n = ctx.row_count;
        let target = match (&leaf.rewritten, chunk.dictionary()) {
            (Some((dict, d)), Some(actual)) if Arc::ptr_eq(dict, actual) => EvalTarget::Code(d),
            (Some(_), _) => {
                log::debug!(
                    "chunk {}: column {} dictionary differs from the one rewritten against",
                    ctx.chunk_id,
                    leaf.predicate.column_id()
                );
                EvalTarget::Value(leaf.predicate)
            }
            _ => EvalTarget::Value(leaf.predicate),
        };
        self.metrics.record_rows_evaluated(match compose {
            Compose::And => incoming.count(),
            Compose::Or => n - incoming.count(),
        });
        self.evaluator.evaluate(target, &chunk, incoming, 0..n, compose)
    }

    fn eval_and<S>(&self, children: &[FilterExpr], scope: SelectionVector, ctx: &mut ChunkContext<'_, S>) -> Result<SelectionVector>
    where
        S: SegmentSource + ?Sized,
    {
        let n = ctx.row_count;
        let mut sel = scope;
        let mut pending = Vec::new();
        let mut subtrees = Vec::new();

        for child in children {
            let predicate = match child {
                FilterExpr::Predicate(p) => p,
                nested => {
                    subtrees.push(nested);
                    continue;
                }
            };
            match self.cheap_stages(predicate, ctx) {
                LeafStage::Skip => {
                    sel.recycle();
                    return Ok(SelectionVector::none(n));
                }
                LeafStage::All => {}
                LeafStage::Exact(rows) => {
                    sel = intersect(sel, &rows);
                    rows.recycle();
                    if !sel.any() {
                        return Ok(sel);
                    }
                }
                LeafStage::Pending(leaf) => pending.push(leaf),
            }
        }

        pending.sort_by_key(|leaf| leaf.order_key());
        for leaf in &pending {
            if !sel.any() {
                break;
            }
            if let Some(candidates) = &leaf.candidates {
                sel = intersect(sel, candidates);
            }
            let next = self.eval_leaf(leaf, &sel, Compose::And, ctx)?;
            sel.recycle();
            sel = next;
        }
        for leaf in pending {
            if let Some(candidates) = leaf.candidates {
                candidates.recycle();
            }
        }

        subtrees.sort_by_key(|e| e.eval_cost());
        for subtree in subtrees {
            if !sel.any() {
                break;
            }
            sel = self.eval_expr(subtree, sel, ctx)?;
        }
        Ok(sel)
    }

    fn eval_or<S>(&self, children: &[FilterExpr], scope: SelectionVector, ctx: &mut ChunkContext<'_, S>) -> Result<SelectionVector>
    where
        S: SegmentSource + ?Sized,
    {
        let n = ctx.row_count;
        let mut result = SelectionVector::none(n);
        let mut pending = Vec::new();
        let mut subtrees = Vec::new();

        for child in children {
            let predicate = match child {
                FilterExpr::Predicate(p) => p,
                nested => {
                    subtrees.push(nested);
                    continue;
                }
            };
            match self.cheap_stages(predicate, ctx) {
                LeafStage::Skip => {}
                LeafStage::All => {
                    result.recycle();
                    return Ok(scope);
                }
                LeafStage::Exact(rows) => {
                    let hit = rows.and(&scope);
                    rows.recycle();
                    result = union(result, &hit);
                    hit.recycle();
                }
                LeafStage::Pending(leaf) => pending.push(leaf),
            }
        }

        // result is always a subset of scope
        let scope_rows = scope.count();
        pending.sort_by_key(|leaf| leaf.order_key());
        for leaf in &pending {
            if result.count() == scope_rows {
                break;
            }
            let next = match (&leaf.candidates, scope.is_all()) {
                // whole chunk in play: evaluate only rows not yet selected
                (None, true) => self.eval_leaf(leaf, &result, Compose::Or, ctx)?,
                (candidates, _) => {
                    let mut remaining = scope.and_not(&result);
                    if let Some(c) = candidates {
                        remaining = intersect(remaining, c);
                    }
                    let hit = self.eval_leaf(leaf, &remaining, Compose::And, ctx)?;
                    remaining.recycle();
                    let merged = result.or(&hit);
                    hit.recycle();
                    merged
                }
            };
            result.recycle();
            result = next;
        }
        for leaf in pending {
            if let Some(candidates) = leaf.candidates {
                candidates.recycle();
            }
        }

        subtrees.sort_by_key(|e| e.eval_cost());
        for subtree in subtrees {
            let remaining = scope.and_not(&result);
            if !remaining.any() {
                remaining.recycle();
                break;
            }
            let hit = self.eval_expr(subtree, remaining, ctx)?;
            result = union(result, &hit);
            hit.recycle();
        }
        scope.recycle();
        Ok(result)
    }
}

fn intersect(sel: SelectionVector, other: &SelectionVector) -> SelectionVector {
    let out = sel.and(other);
    sel.recycle();
    out
}

fn union(sel: SelectionVector, other: &SelectionVector) -> SelectionVector {
    let out = sel.or(other);
    sel.recycle();
    out
}

/// Runs a filter over every chunk of a segment
pub struct Scanner<'s, S: SegmentSource + ?Sized> {
    source: &'s S,
    pipeline: ChunkPipeline,
    cancel: CancellationToken,
}

impl<'s, S: SegmentSource + ?Sized> Scanner<'s, S> {
    pub fn new(source: &'s S, config: EngineConfig) -> Self {
        Self {
            source,
            pipeline: ChunkPipeline::new(config),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ScanMetrics>) -> Self {
        self.pipeline = ChunkPipeline::with_metrics(self.pipeline.config.clone(), metrics);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn metrics(&self) -> Arc<ScanMetrics> {
        Arc::clone(self.pipeline.metrics())
    }

    /// Per-chunk selections in chunk order
    pub fn scan(&self, expr: &FilterExpr) -> Result<Vec<ChunkSelection>> {
        let chunk_count = self.source.chunk_count() as ChunkId;
        let config = self.pipeline.config();

        let run = |chunk_id: ChunkId| -> Result<ChunkSelection> {
            if self.cancel.is_cancelled() {
                return Err(PredicateError::Cancelled);
            }
            let selection = self.pipeline.process_chunk(expr, self.source, chunk_id)?;
            Ok(ChunkSelection { chunk_id, selection })
        };

        if config.parallel && chunk_count as usize >= config.min_parallel_chunks {
            (0..chunk_count).into_par_iter().map(run).collect()
        } else {
            (0..chunk_count).map(run).collect()
        }
    }

    /// Total selected rows across the segment
    pub fn count(&self, expr: &FilterExpr) -> Result<usize> {
        Ok(self.scan(expr)?.iter().map(|c| c.selection.count()).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::column::{ColumnChunk, ColumnValues};
    use crate::data::{ColumnDef, ScalarType, Value};
    use crate::storage::index_handle::IndexHandle;
    use crate::storage::segment::{IndexKind, SegmentSnapshot};
    use crate::storage::zone_map::ZoneMap;
    use crate::storage::{ChunkReader, DictionaryProvider, IndexProvider, ZoneMapProvider};

    fn int_chunk(values: std::ops::Range<i64>) -> ColumnChunk {
        ColumnChunk::plain(ColumnValues::Int64(values.collect()), None).unwrap()
    }

    fn two_chunk_segment() -> SegmentSnapshot {
        let mut seg = SegmentSnapshot::new();
        seg.add_column(ColumnDef::new(0, "v", ScalarType::Int64), vec![int_chunk(0..50), int_chunk(300..350)])
            .unwrap();
        seg
    }

    fn between(lo: i64, hi: i64) -> FilterExpr {
        FilterExpr::leaf(Predicate::between(0, ScalarType::Int64, lo, hi))
    }

    #[test]
    fn test_zone_map_skip_reads_nothing() {
        let seg = two_chunk_segment();
        let pipeline = ChunkPipeline::new(EngineConfig::default());
        let sel = pipeline.process_chunk(&between(100, 200), &seg, 1).unwrap();
        assert_eq!(sel.count(), 0);
        let snap = pipeline.metrics().snapshot();
        assert_eq!(snap.skipped_by_zone_map, 1);
        assert_eq!(snap.chunks_skipped, 1);
        assert_eq!(snap.rows_evaluated, 0);
    }

    #[test]
    fn test_zone_map_all_selects_everything() {
        let seg = two_chunk_segment();
        let pipeline = ChunkPipeline::new(EngineConfig::default());
        let sel = pipeline.process_chunk(&between(0, 1000), &seg, 0).unwrap();
        assert!(sel.is_all());
        assert_eq!(pipeline.metrics().snapshot().rows_evaluated, 0);
    }

    #[test]
    fn test_and_or_tree() {
        let seg = two_chunk_segment();
        let expr = FilterExpr::or(vec![
            between(10, 12),
            FilterExpr::and(vec![
                between(40, 1000),
                FilterExpr::leaf(Predicate::not_in_set(0, ScalarType::Int64, vec![Value::Int64(41)])),
            ]),
        ]);
        for config in [EngineConfig::default(), EngineConfig::naive()] {
            let pipeline = ChunkPipeline::new(config);
            let sel = pipeline.process_chunk(&expr, &seg, 0).unwrap();
            let expected: Vec<u32> = vec![10, 11, 12, 40, 42, 43, 44, 45, 46, 47, 48, 49];
            assert_eq!(sel.to_row_ids(), expected);
        }
    }

    #[test]
    fn test_corrupt_zone_map_degrades_to_evaluation() {
        let mut seg = two_chunk_segment();
        seg.set_zone_map(0, 0, Some(ZoneMap::new(Value::Int64(500), Value::Int64(400), 0, 50)))
            .unwrap();
        let pipeline = ChunkPipeline::new(EngineConfig::default());
        let sel = pipeline.process_chunk(&between(5, 7), &seg, 0).unwrap();
        assert_eq!(sel.to_row_ids(), vec![5, 6, 7]);
        assert_eq!(pipeline.metrics().snapshot().degradations, 1);
    }

    #[test]
    fn test_bitmap_exact_leaf() {
        let mut seg = SegmentSnapshot::new();
        let chunk = ColumnChunk::plain(
            ColumnValues::Utf8(["x", "x", "y", "x", "x", "x", "x", "y", "x", "y"].iter().map(|s| s.to_string()).collect()),
            None,
        )
        .unwrap();
        seg.add_column(ColumnDef::new(0, "s", ScalarType::Utf8), vec![chunk]).unwrap();
        seg.build_index(0, IndexKind::Bitmap).unwrap();

        let pipeline = ChunkPipeline::new(EngineConfig::default());
        let expr = FilterExpr::leaf(Predicate::equals(0, ScalarType::Utf8, "y"));
        let sel = pipeline.process_chunk(&expr, &seg, 0).unwrap();
        assert_eq!(sel.to_row_ids(), vec![2, 7, 9]);
        let snap = pipeline.metrics().snapshot();
        assert_eq!(snap.index_exact_leaves, 1);
        assert_eq!(snap.rows_evaluated, 0);
    }

    /// Serves `inner`'s chunks but reports a different dictionary for them
    struct StaleDictionary {
        inner: SegmentSnapshot,
        dict: Arc<Dictionary>,
    }

    impl ChunkReader for StaleDictionary {
        fn chunk_count(&self) -> usize {
            self.inner.chunk_count()
        }

        fn chunk_row_count(&self, chunk_id: ChunkId) -> Option<usize> {
            self.inner.chunk_row_count(chunk_id)
        }

        fn read_chunk(&self, column_id: ColumnId, chunk_id: ChunkId) -> Result<Arc<ColumnChunk>> {
            self.inner.read_chunk(column_id, chunk_id)
        }
    }

    impl ZoneMapProvider for StaleDictionary {
        fn zone_map(&self, _column_id: ColumnId, _chunk_id: ChunkId) -> Option<ZoneMap> {
            None
        }
    }

    impl DictionaryProvider for StaleDictionary {
        fn dictionary(&self, _column_id: ColumnId, _chunk_id: ChunkId) -> Option<Arc<Dictionary>> {
            Some(Arc::clone(&self.dict))
        }
    }

    impl IndexProvider for StaleDictionary {
        fn index_handle(&self, _column_id: ColumnId, _chunk_id: ChunkId) -> Option<IndexHandle> {
            None
        }
    }

    #[test]
    fn test_rewrite_against_other_dictionary_falls_back_to_values() {
        let chunk_dict = Arc::new(Dictionary::new(vec!["c".into(), "b".into(), "a".into()], false).unwrap());
        let chunk = ColumnChunk::encoded(vec![0, 1, 2, 1], None, chunk_dict).unwrap();
        let mut inner = SegmentSnapshot::new();
        inner.add_column(ColumnDef::new(0, "s", ScalarType::Utf8), vec![chunk]).unwrap();
        let source = StaleDictionary {
            inner,
            dict: Arc::new(Dictionary::new(vec!["a".into(), "b".into(), "c".into()], true).unwrap()),
        };

        let pipeline = ChunkPipeline::new(EngineConfig::default());
        let expr = FilterExpr::leaf(Predicate::equals(0, ScalarType::Utf8, "a"));
        let sel = pipeline.process_chunk(&expr, &source, 0).unwrap();
        assert_eq!(sel.to_row_ids(), vec![2]);
    }

    #[test]
    fn test_scanner_orders_chunks_and_cancels() {
        let seg = two_chunk_segment();
        let scanner = Scanner::new(&seg, EngineConfig::default());
        let out = scanner.scan(&between(45, 305)).unwrap();
        assert_eq!(out.iter().map(|c| c.chunk_id).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(out[0].selection.to_row_ids(), vec![45, 46, 47, 48, 49]);
        assert_eq!(out[1].selection.to_row_ids(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(scanner.count(&between(45, 305)).unwrap(), 11);

        let token = CancellationToken::new();
        token.cancel();
        let cancelled = Scanner::new(&seg, EngineConfig::default()).with_cancellation(token);
        assert!(matches!(cancelled.scan(&between(0, 1)), Err(PredicateError::Cancelled)));
    }
}
