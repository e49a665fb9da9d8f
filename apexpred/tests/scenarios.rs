//! End-to-end scans over segment snapshots

use std::ops::Bound;
use std::sync::Arc;

use apexpred::storage::segment::IndexKind;
use apexpred::{
    BuilderConfig, ChunkBloomFilter, ColumnChunk, ColumnDef, ColumnValues, Dictionary, EngineConfig, FilterExpr,
    FilterOp, FilterRequest, NullBitmap, Predicate, PredicateBuilder, ScalarType, Scanner, SegmentSnapshot, Value,
};

fn strings(values: &[&str]) -> ColumnChunk {
    ColumnChunk::plain(ColumnValues::Utf8(values.iter().map(|s| s.to_string()).collect()), None).unwrap()
}

fn selected_rows(segment: &SegmentSnapshot, expr: &FilterExpr, config: EngineConfig) -> Vec<Vec<u32>> {
    Scanner::new(segment, config)
        .scan(expr)
        .unwrap()
        .into_iter()
        .map(|c| c.selection.to_row_ids())
        .collect()
}

#[test]
fn in_set_over_sequential_ints() {
    let mut segment = SegmentSnapshot::new();
    let chunk = ColumnChunk::plain(ColumnValues::Int32((1..=20).collect()), None).unwrap();
    segment.add_column(ColumnDef::new(0, "n", ScalarType::Int32), vec![chunk]).unwrap();

    let builder = PredicateBuilder::new(&segment.columns(), BuilderConfig::default());
    let p = builder
        .build(&FilterRequest::new(0, FilterOp::In, vec![5i32.into(), 10i32.into(), 15i32.into()]))
        .unwrap();

    for config in [EngineConfig::default(), EngineConfig::default().with_in_set_linear_threshold(0)] {
        // values 5, 10, 15 sit at rows 4, 9, 14
        assert_eq!(selected_rows(&segment, &FilterExpr::leaf(p.clone()), config), vec![vec![4, 9, 14]]);
    }
}

#[test]
fn zone_map_skip_never_reads_the_chunk() {
    let mut segment = SegmentSnapshot::new();
    let chunk = ColumnChunk::plain(ColumnValues::Int64((300..=400).collect()), None).unwrap();
    segment.add_column(ColumnDef::new(0, "n", ScalarType::Int64), vec![chunk]).unwrap();

    let scanner = Scanner::new(&segment, EngineConfig::default());
    let expr = FilterExpr::leaf(Predicate::between(0, ScalarType::Int64, 100i64, 200i64));
    let out = scanner.scan(&expr).unwrap();
    assert_eq!(out[0].selection.count(), 0);

    let snap = scanner.metrics().snapshot();
    assert_eq!(snap.skipped_by_zone_map, 1);
    assert_eq!(snap.chunks_skipped, 1);
    assert_eq!(snap.rows_evaluated, 0);
}

#[test]
fn dictionary_rewrite_drops_unknown_literal() {
    let dict = Arc::new(Dictionary::new(vec!["a".into(), "b".into(), "c".into()], true).unwrap());
    let chunk = ColumnChunk::encoded(vec![0, 1, 2, 1, 0, 1], None, Arc::clone(&dict)).unwrap();
    let mut segment = SegmentSnapshot::new();
    segment.add_column(ColumnDef::new(0, "s", ScalarType::Utf8), vec![chunk]).unwrap();

    let expr = FilterExpr::leaf(Predicate::in_set(0, ScalarType::Utf8, vec!["b".into(), "z".into()]));
    assert_eq!(selected_rows(&segment, &expr, EngineConfig::default()), vec![vec![1, 3, 5]]);
    assert_eq!(selected_rows(&segment, &expr, EngineConfig::naive()), vec![vec![1, 3, 5]]);

    let absent = FilterExpr::leaf(Predicate::in_set(0, ScalarType::Utf8, vec!["x".into(), "z".into()]));
    let scanner = Scanner::new(&segment, EngineConfig::default());
    assert_eq!(scanner.count(&absent).unwrap(), 0);
    assert_eq!(scanner.metrics().snapshot().skipped_by_dictionary, 1);
}

#[test]
fn bloom_absent_skips_chunk() {
    let chunk = strings(&["w", "a", "y", "z", "m"]);
    let bloom = ChunkBloomFilter::build(&chunk, 1e-9).to_bytes();
    let mut segment = SegmentSnapshot::new();
    segment.add_column(ColumnDef::new(0, "s", ScalarType::Utf8), vec![chunk]).unwrap();
    segment.attach_index_bytes(0, 0, IndexKind::Bloom, bloom).unwrap();

    let scanner = Scanner::new(&segment, EngineConfig::default());
    // "x" lies between min and max, so only the bloom filter can exclude it
    let expr = FilterExpr::leaf(Predicate::equals(0, ScalarType::Utf8, "x"));
    assert_eq!(scanner.count(&expr).unwrap(), 0);

    let snap = scanner.metrics().snapshot();
    assert_eq!(snap.skipped_by_index, 1);
    assert_eq!(snap.rows_evaluated, 0);
}

#[test]
fn not_in_excludes_null_rows() {
    let nulls = NullBitmap::from_nulls(&[false, false, false, true, false]);
    let chunk = ColumnChunk::plain(ColumnValues::Int64(vec![1, 2, 5, 0, 7]), Some(nulls)).unwrap();
    let mut segment = SegmentSnapshot::new();
    segment.add_column(ColumnDef::new(0, "n", ScalarType::Int64), vec![chunk]).unwrap();

    let expr = FilterExpr::leaf(Predicate::not_in_set(0, ScalarType::Int64, vec![Value::Int64(1), Value::Int64(2)]));
    assert_eq!(selected_rows(&segment, &expr, EngineConfig::default()), vec![vec![2, 4]]);
}

#[test]
fn bitmap_postings_are_final() {
    let chunk = strings(&["x", "x", "y", "x", "x", "x", "x", "y", "x", "y"]);
    let mut segment = SegmentSnapshot::new();
    segment.add_column(ColumnDef::new(0, "s", ScalarType::Utf8), vec![chunk]).unwrap();
    segment.build_index(0, IndexKind::Bitmap).unwrap();

    let scanner = Scanner::new(&segment, EngineConfig::default());
    let out = scanner.scan(&FilterExpr::leaf(Predicate::equals(0, ScalarType::Utf8, "y"))).unwrap();
    assert_eq!(out[0].selection.to_row_ids(), vec![2, 7, 9]);
    assert_eq!(scanner.metrics().snapshot().index_exact_leaves, 1);
    assert_eq!(segment.cached_index_handles(), 1);
}

#[test]
fn corrupt_index_blob_degrades_not_fails() {
    let chunk = strings(&["x", "y", "x"]);
    let mut segment = SegmentSnapshot::new();
    segment.add_column(ColumnDef::new(0, "s", ScalarType::Utf8), vec![chunk]).unwrap();
    segment
        .attach_index_bytes(0, 0, IndexKind::Bitmap, b"BMIX garbage".to_vec())
        .unwrap();

    let scanner = Scanner::new(&segment, EngineConfig::default());
    let out = scanner.scan(&FilterExpr::leaf(Predicate::equals(0, ScalarType::Utf8, "x"))).unwrap();
    assert_eq!(out[0].selection.to_row_ids(), vec![0, 2]);
    assert!(scanner.metrics().snapshot().degradations >= 1);
}

#[test]
fn token_search_with_inverted_index() {
    let text = ["the quick fox", "lazy dog", "Fox hunt", "foxes"];
    let mut segment = SegmentSnapshot::new();
    segment.add_column(ColumnDef::new(0, "body", ScalarType::Utf8), vec![strings(&text)]).unwrap();
    segment.build_index(0, IndexKind::Inverted).unwrap();

    let expr = FilterExpr::leaf(Predicate::contains_token(0, ScalarType::Utf8, "fox"));
    assert_eq!(selected_rows(&segment, &expr, EngineConfig::default()), vec![vec![0, 2]]);
    assert_eq!(selected_rows(&segment, &expr, EngineConfig::naive()), vec![vec![0, 2]]);
}

#[test]
fn multi_column_plan_across_chunks() {
    let mut segment = SegmentSnapshot::new();
    let ids = vec![
        ColumnChunk::plain(ColumnValues::Int64((0..64).collect()), None).unwrap(),
        ColumnChunk::plain(ColumnValues::Int64((64..128).collect()), None).unwrap(),
    ];
    let flags: Vec<ColumnChunk> = (0..2)
        .map(|_| ColumnChunk::plain(ColumnValues::Bool((0..64).map(|i| i % 2 == 0).collect()), None).unwrap())
        .collect();
    segment.add_column(ColumnDef::new(0, "id", ScalarType::Int64), ids).unwrap();
    segment.add_column(ColumnDef::new(1, "even", ScalarType::Boolean), flags).unwrap();

    let builder = PredicateBuilder::new(&segment.columns(), BuilderConfig::default());
    let plan = builder
        .build_conjunction(&[
            FilterRequest::new(0, FilterOp::GtEq, vec![60i64.into()]),
            FilterRequest::new(0, FilterOp::Lt, vec![70i64.into()]),
            FilterRequest::new(1, FilterOp::Eq, vec![true.into()]),
        ])
        .unwrap();
    assert!(plan.is_fully_pushed());

    let rows = selected_rows(&segment, &plan.to_filter(), EngineConfig::default());
    assert_eq!(rows, vec![vec![60, 62], vec![0, 2, 4]]);
    assert_eq!(rows, selected_rows(&segment, &plan.to_filter(), EngineConfig::naive().with_parallel(false)));
}

#[test]
fn signed_zeros_compare_equal() {
    let mut segment = SegmentSnapshot::new();
    let chunk = ColumnChunk::plain(ColumnValues::Float64(vec![-0.0, 0.0, 1.0]), None).unwrap();
    segment.add_column(ColumnDef::new(0, "x", ScalarType::Float64), vec![chunk]).unwrap();

    for literal in [0.0, -0.0] {
        let expr = FilterExpr::leaf(Predicate::equals(0, ScalarType::Float64, literal));
        assert_eq!(selected_rows(&segment, &expr, EngineConfig::default()), vec![vec![0, 1]]);
        assert_eq!(selected_rows(&segment, &expr, EngineConfig::naive()), vec![vec![0, 1]]);
    }
    let positive = FilterExpr::leaf(Predicate::range(
        0,
        ScalarType::Float64,
        Bound::Excluded(Value::Float64(-0.0)),
        Bound::Unbounded,
    ));
    assert_eq!(selected_rows(&segment, &positive, EngineConfig::default()), vec![vec![2]]);

    segment.build_index(0, IndexKind::Bitmap).unwrap();
    segment.build_index(0, IndexKind::Bloom).unwrap();
    let builder = PredicateBuilder::new(&segment.columns(), BuilderConfig::default());
    let p = builder.build(&FilterRequest::new(0, FilterOp::Eq, vec![(-0.0).into()])).unwrap();
    assert_eq!(selected_rows(&segment, &FilterExpr::leaf(p), EngineConfig::default()), vec![vec![0, 1]]);
}

#[test]
fn unordered_dictionary_range_and_not_in() {
    // pear apple fig kiwi apple pear
    let dict = Arc::new(Dictionary::new(vec!["pear".into(), "apple".into(), "fig".into(), "kiwi".into()], false).unwrap());
    let chunk = ColumnChunk::encoded(vec![0, 1, 2, 3, 1, 0], None, dict).unwrap();
    let mut segment = SegmentSnapshot::new();
    segment.add_column(ColumnDef::new(0, "fruit", ScalarType::Utf8), vec![chunk]).unwrap();

    let range = FilterExpr::leaf(Predicate::range(
        0,
        ScalarType::Utf8,
        Bound::Included("b".into()),
        Bound::Excluded("l".into()),
    ));
    let not_in = FilterExpr::leaf(Predicate::not_in_set(0, ScalarType::Utf8, vec!["apple".into(), "zzz".into()]));
    let cases = [
        (range.clone(), vec![vec![2, 3]]),
        (not_in.clone(), vec![vec![0, 2, 3, 5]]),
        (FilterExpr::and(vec![range.clone(), not_in.clone()]), vec![vec![2, 3]]),
        (FilterExpr::or(vec![range, not_in]), vec![vec![0, 2, 3, 5]]),
    ];
    for (expr, expected) in cases {
        assert_eq!(selected_rows(&segment, &expr, EngineConfig::default()), expected);
        assert_eq!(selected_rows(&segment, &expr, EngineConfig::naive()), expected);
    }
}

#[test]
fn fractional_bound_on_int_column_plans() {
    let mut segment = SegmentSnapshot::new();
    let chunk = ColumnChunk::plain(ColumnValues::Int64((0..6).collect()), None).unwrap();
    segment.add_column(ColumnDef::new(0, "n", ScalarType::Int64), vec![chunk]).unwrap();

    let builder = PredicateBuilder::new(&segment.columns(), BuilderConfig::default());
    let plan = builder
        .build_conjunction(&[
            FilterRequest::new(0, FilterOp::Gt, vec![1.5.into()]),
            FilterRequest::new(0, FilterOp::Lt, vec![4.5.into()]),
        ])
        .unwrap();
    assert!(plan.is_fully_pushed());
    assert_eq!(selected_rows(&segment, &plan.to_filter(), EngineConfig::default()), vec![vec![2, 3, 4]]);
}
