//! Evaluator kernel benchmarks
//!
//! 1. Flat vs hashed IN-lists across list sizes
//! 2. Value-space vs code-space evaluation of the same predicate
//! 3. Full segment scan with and without pruning structures

use std::sync::Arc;

use apexpred::{
    ColumnChunk, ColumnDef, ColumnValues, Compose, Dictionary, DictionaryRewriter, EngineConfig, EvalTarget,
    FilterExpr, Predicate, PredicateEvaluator, RewriteOutcome, ScalarType, Scanner, SegmentSnapshot,
    SelectionVector, Value,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

const ROWS: usize = 64 * 1024;

fn int_chunk() -> ColumnChunk {
    let values = (0..ROWS as i64).map(|i| (i * 7919) % 10_000).collect();
    ColumnChunk::plain(ColumnValues::Int64(values), None).unwrap()
}

fn bench_in_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("in_set");
    let chunk = int_chunk();
    let all = SelectionVector::all(ROWS);

    for size in [2usize, 4, 16, 256] {
        let lits: Vec<Value> = (0..size as i64).map(|i| Value::Int64(i * 37)).collect();
        let p = Predicate::in_set(0, ScalarType::Int64, lits);
        for (label, threshold) in [("flat", usize::MAX), ("hashed", 0)] {
            let evaluator = PredicateEvaluator::new(&EngineConfig::default().with_in_set_linear_threshold(threshold));
            group.bench_with_input(BenchmarkId::new(label, size), &p, |b, p| {
                b.iter(|| {
                    let sel = evaluator
                        .evaluate(EvalTarget::Value(p), &chunk, &all, 0..ROWS, Compose::And)
                        .unwrap();
                    black_box(sel.count());
                    sel.recycle();
                })
            });
        }
    }
    group.finish();
}

fn bench_code_space(c: &mut Criterion) {
    let mut group = c.benchmark_group("code_space");
    let words: Vec<Value> = (0..1000).map(|i| Value::from(format!("word-{:04}", i))).collect();
    let dict = Arc::new(Dictionary::new(words, true).unwrap());
    let codes = (0..ROWS as u32).map(|i| (i * 31) % 1000).collect();
    let chunk = ColumnChunk::encoded(codes, None, Arc::clone(&dict)).unwrap();
    let all = SelectionVector::all(ROWS);
    let evaluator = PredicateEvaluator::default();

    let p = Predicate::in_set(
        0,
        ScalarType::Utf8,
        vec!["word-0001".into(), "word-0500".into(), "word-0999".into()],
    );
    group.bench_function("decoded_values", |b| {
        b.iter(|| {
            let sel = evaluator
                .evaluate(EvalTarget::Value(&p), &chunk, &all, 0..ROWS, Compose::And)
                .unwrap();
            black_box(sel.count());
        })
    });

    if let RewriteOutcome::Rewritten(code_pred) = DictionaryRewriter::new(&EngineConfig::default()).rewrite(&p, &dict) {
        group.bench_function("rewritten_codes", |b| {
            b.iter(|| {
                let sel = evaluator
                    .evaluate(EvalTarget::Code(&code_pred), &chunk, &all, 0..ROWS, Compose::And)
                    .unwrap();
                black_box(sel.count());
                sel.recycle();
            })
        });
    }
    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_scan");
    let mut segment = SegmentSnapshot::new();
    let chunks = (0..16i64)
        .map(|k| {
            let values = (0..4096).map(|i| k * 4096 + i).collect();
            ColumnChunk::plain(ColumnValues::Int64(values), None).unwrap()
        })
        .collect();
    segment.add_column(ColumnDef::new(0, "id", ScalarType::Int64), chunks).unwrap();
    let expr = FilterExpr::leaf(Predicate::between(0, ScalarType::Int64, 10_000i64, 12_000i64));

    for (label, config) in [("pruned", EngineConfig::default()), ("naive", EngineConfig::naive())] {
        let scanner = Scanner::new(&segment, config);
        group.bench_function(label, |b| b.iter(|| black_box(scanner.count(&expr).unwrap())));
    }
    group.finish();
}

criterion_group!(benches, bench_in_set, bench_code_space, bench_scan);
criterion_main!(benches);
