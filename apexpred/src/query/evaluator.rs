//! Predicate Evaluator - per-row evaluation over materialized chunk data
//!
//! Evaluation is word-at-a-time over dense selection words. The incoming
//! selection decides which words are evaluated at all:
//! - `And`: only rows selected by the incoming selection and inside the
//!   row range are evaluated; the result is their intersection with the
//!   predicate.
//! - `Or`: only rows inside the range that are *not* yet selected are
//!   evaluated; the result is the union with the incoming selection.
//!
//! NULL rows never satisfy a value predicate. `IsNull` / `IsNotNull` read
//! the null bitmap and nothing else.

use std::ops::Range;

use crate::config::EngineConfig;
use crate::data::column::{ColumnChunk, ColumnValues};
use crate::query::dict_rewriter::DictPredicate;
use crate::query::kernels::{eval_typed, fill_words};
use crate::query::predicate::{Predicate, PredicateKind};
use crate::query::selection::{SelectionPool, SelectionVector};
use crate::{PredicateError, Result};

/// How a predicate's result combines with the incoming selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compose {
    And,
    Or,
}

/// What to evaluate: the original value predicate or its code-space rewrite
#[derive(Debug, Clone, Copy)]
pub enum EvalTarget<'a> {
    Value(&'a Predicate),
    Code(&'a DictPredicate),
}

#[derive(Debug, Clone)]
pub struct PredicateEvaluator {
    in_set_linear_threshold: usize,
}

impl Default for PredicateEvaluator {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl PredicateEvaluator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            in_set_linear_threshold: config.in_set_linear_threshold,
        }
    }

    /// Evaluate `target` over `rows` of `chunk` and compose the result with
    /// `incoming`
    pub fn evaluate(
        &self,
        target: EvalTarget<'_>,
        chunk: &ColumnChunk,
        incoming: &SelectionVector,
        rows: Range<usize>,
        compose: Compose,
    ) -> Result<SelectionVector> {
        let n = chunk.row_count();
        if incoming.row_count() != n {
            return Err(PredicateError::InvalidChunk(format!(
                "selection covers {} rows, chunk has {}",
                incoming.row_count(),
                n
            )));
        }
        if rows.start > rows.end || rows.end > n {
            return Err(PredicateError::InvalidChunk(format!(
                "row range {:?} outside chunk of {} rows",
                rows, n
            )));
        }

        let range = SelectionVector::from_range(n, rows);
        let (inc, rng) = (incoming.words(), range.words());
        let mut mask = SelectionPool::take(n);
        for ((m, &i), &r) in mask.iter_mut().zip(inc.iter()).zip(rng.iter()) {
            *m = match compose {
                Compose::And => i & r,
                Compose::Or => r & !i,
            };
        }

        let mut out = SelectionPool::take(n);
        let evaluated = self.eval_masked(target, chunk, &mask, &mut out);
        if evaluated.is_ok() && compose == Compose::Or {
            for (o, &i) in out.iter_mut().zip(inc.iter()) {
                *o |= i;
            }
        }

        SelectionPool::give(mask);
        if let std::borrow::Cow::Owned(words) = rng {
            SelectionPool::give(words);
        }
        if let std::borrow::Cow::Owned(words) = inc {
            SelectionPool::give(words);
        }
        evaluated?;
        Ok(SelectionVector::Dense { words: out, len: n })
    }

    /// Set `out` bits for masked rows satisfying `target`
    fn eval_masked(
        &self,
        target: EvalTarget<'_>,
        chunk: &ColumnChunk,
        mask: &[u64],
        out: &mut [u64],
    ) -> Result<()> {
        let n = chunk.row_count();
        let nulls = chunk.nulls().map(|b| b.words());

        if let EvalTarget::Value(p) = target {
            match p.kind() {
                PredicateKind::IsNull => {
                    if let Some(nulls) = nulls {
                        for ((o, &m), &nw) in out.iter_mut().zip(mask).zip(nulls) {
                            *o = m & nw;
                        }
                    }
                    return Ok(());
                }
                PredicateKind::IsNotNull => {
                    out.copy_from_slice(mask);
                    if let Some(nulls) = nulls {
                        for (o, &nw) in out.iter_mut().zip(nulls) {
                            *o &= !nw;
                        }
                    }
                    return Ok(());
                }
                PredicateKind::Never => return Ok(()),
                _ => {}
            }
        }

        match (target, chunk.values()) {
            (EvalTarget::Value(_), ColumnValues::Codes(_)) => {
                // no usable rewrite (e.g. range over an unordered dictionary):
                // gather values through the dictionary and evaluate those
                let decoded = chunk.decode()?;
                return self.eval_masked(target, &decoded, mask, out);
            }
            (EvalTarget::Value(p), values) => {
                let th = self.in_set_linear_threshold;
                let done = match values {
                    ColumnValues::Bool(v) => eval_typed(v, p.kind(), th, mask, out),
                    ColumnValues::Int32(v) => eval_typed(v, p.kind(), th, mask, out),
                    ColumnValues::Int64(v) => eval_typed(v, p.kind(), th, mask, out),
                    ColumnValues::Float64(v) => eval_typed(v, p.kind(), th, mask, out),
                    ColumnValues::Utf8(v) => eval_typed(v, p.kind(), th, mask, out),
                    ColumnValues::Codes(_) => None,
                };
                if done.is_none() {
                    // literal of another physical type: row-at-a-time
                    fill_words(mask, n, out, |row| p.matches(Some(&chunk.value(row))));
                }
            }
            (EvalTarget::Code(d), ColumnValues::Codes(codes)) => match d {
                DictPredicate::InCodes(set) => {
                    fill_words(mask, n, out, |row| set.contains(codes[row]))
                }
                DictPredicate::NotInCodes(set) => {
                    fill_words(mask, n, out, |row| !set.contains(codes[row]))
                }
                DictPredicate::CodeRange { lo, hi } => {
                    let (lo, hi) = (*lo, *hi);
                    fill_words(mask, n, out, |row| (codes[row] >= lo) & (codes[row] < hi))
                }
            },
            (EvalTarget::Code(_), _) => {
                return Err(PredicateError::InvalidChunk(
                    "code-space predicate over a plain chunk".into(),
                ));
            }
        }

        if let Some(nulls) = nulls {
            for (o, &nw) in out.iter_mut().zip(nulls) {
                *o &= !nw;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::data::column::NullBitmap;
    use crate::data::dictionary::Dictionary;
    use crate::data::{ScalarType, Value};
    use crate::query::dict_rewriter::{DictionaryRewriter, RewriteOutcome};

    fn ints(values: Vec<i64>, nulls: Option<&[bool]>) -> ColumnChunk {
        ColumnChunk::plain(ColumnValues::Int64(values), nulls.map(NullBitmap::from_nulls)).unwrap()
    }

    fn eval(p: &Predicate, chunk: &ColumnChunk) -> Vec<u32> {
        let all = SelectionVector::all(chunk.row_count());
        PredicateEvaluator::default()
            .evaluate(EvalTarget::Value(p), chunk, &all, 0..chunk.row_count(), Compose::And)
            .unwrap()
            .to_row_ids()
    }

    #[test]
    fn test_in_set_over_sequence() {
        let chunk = ints((1..=20).collect(), None);
        let p = Predicate::in_set(0, ScalarType::Int64, vec![5i64.into(), 10i64.into(), 15i64.into()]);
        assert_eq!(eval(&p, &chunk), vec![4, 9, 14]);
    }

    #[test]
    fn test_not_in_excludes_nulls() {
        let chunk = ints(vec![1, 2, 5, 0, 7], Some(&[false, false, false, true, false]));
        let p = Predicate::not_in_set(0, ScalarType::Int64, vec![1i64.into(), 2i64.into()]);
        assert_eq!(eval(&p, &chunk), vec![2, 4]);

        let is_null = Predicate::is_null(0, ScalarType::Int64);
        assert_eq!(eval(&is_null, &chunk), vec![3]);
        let not_null = Predicate::is_not_null(0, ScalarType::Int64);
        assert_eq!(eval(&not_null, &chunk), vec![0, 1, 2, 4]);
    }

    #[test]
    fn test_placeholder_under_null_not_selected() {
        // the NULL slot holds 7, which would otherwise match
        let chunk = ints(vec![7, 7], Some(&[true, false]));
        let p = Predicate::equals(0, ScalarType::Int64, 7i64);
        assert_eq!(eval(&p, &chunk), vec![1]);
    }

    #[test]
    fn test_and_or_composition() {
        let chunk = ints((0..10).collect(), None);
        let ev = PredicateEvaluator::default();
        let lt5 = Predicate::range(
            0,
            ScalarType::Int64,
            std::ops::Bound::Unbounded,
            std::ops::Bound::Excluded(Value::Int64(5)),
        );
        let eq8 = Predicate::equals(0, ScalarType::Int64, 8i64);

        let evens = SelectionVector::from_bools(&(0..10).map(|i| i % 2 == 0).collect::<Vec<_>>());
        let and = ev
            .evaluate(EvalTarget::Value(&lt5), &chunk, &evens, 0..10, Compose::And)
            .unwrap();
        assert_eq!(and.to_row_ids(), vec![0, 2, 4]);

        let or = ev
            .evaluate(EvalTarget::Value(&eq8), &chunk, &and, 0..10, Compose::Or)
            .unwrap();
        assert_eq!(or.to_row_ids(), vec![0, 2, 4, 8]);

        // rows outside the range are neither evaluated nor kept under AND
        let ranged = ev
            .evaluate(EvalTarget::Value(&lt5), &chunk, &SelectionVector::all(10), 2..4, Compose::And)
            .unwrap();
        assert_eq!(ranged.to_row_ids(), vec![2, 3]);
    }

    #[test]
    fn test_code_space_matches_value_space() {
        let dict = Arc::new(Dictionary::new(vec!["a".into(), "b".into(), "c".into()], true).unwrap());
        let chunk = ColumnChunk::encoded(
            vec![0, 1, 2, 1, 0, 1],
            Some(NullBitmap::from_nulls(&[false, false, false, true, false, false])),
            dict.clone(),
        )
        .unwrap();
        let p = Predicate::in_set(0, ScalarType::Utf8, vec!["b".into(), "z".into()]);
        let rewritten = match DictionaryRewriter::new(&EngineConfig::default()).rewrite(&p, &dict) {
            RewriteOutcome::Rewritten(d) => d,
            other => panic!("unexpected {:?}", other),
        };
        let ev = PredicateEvaluator::default();
        let all = SelectionVector::all(6);
        let by_code = ev
            .evaluate(EvalTarget::Code(&rewritten), &chunk, &all, 0..6, Compose::And)
            .unwrap();
        let by_value = ev
            .evaluate(EvalTarget::Value(&p), &chunk, &all, 0..6, Compose::And)
            .unwrap();
        assert_eq!(by_code.to_row_ids(), vec![1, 5]);
        assert_eq!(by_code, by_value);
    }

    #[test]
    fn test_mismatched_literal_falls_back() {
        let chunk = ints(vec![1, 2, 3], None);
        // Int32 literal on an Int64 buffer never equals any row
        let p = Predicate::equals(0, ScalarType::Int64, Value::Int32(2));
        assert!(eval(&p, &chunk).is_empty());
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let chunk = ints(vec![1, 2, 3], None);
        let ev = PredicateEvaluator::default();
        let p = Predicate::equals(0, ScalarType::Int64, 1i64);
        let wrong_len = SelectionVector::all(4);
        assert!(ev
            .evaluate(EvalTarget::Value(&p), &chunk, &wrong_len, 0..3, Compose::And)
            .is_err());
        let all = SelectionVector::all(3);
        assert!(ev.evaluate(EvalTarget::Value(&p), &chunk, &all, 0..9, Compose::And).is_err());
        let code = DictPredicate::CodeRange { lo: 0, hi: 1 };
        assert!(ev.evaluate(EvalTarget::Code(&code), &chunk, &all, 0..3, Compose::And).is_err());
    }

    #[test]
    fn test_idempotent() {
        let chunk = ints((0..300).map(|i| i % 17).collect(), None);
        let p = Predicate::in_set(0, ScalarType::Int64, (0..9i64).map(Value::from).collect());
        let all = SelectionVector::all(300);
        let ev = PredicateEvaluator::default();
        let a = ev.evaluate(EvalTarget::Value(&p), &chunk, &all, 0..300, Compose::And).unwrap();
        let b = ev.evaluate(EvalTarget::Value(&p), &chunk, &all, 0..300, Compose::And).unwrap();
        assert_eq!(a, b);
    }
}
