//! Dictionary Rewriter - value-space predicates to code-space predicates
//!
//! A rewrite is only valid for the dictionary it was computed against.
//! Dictionaries are chunk- or segment-local, so the pipeline recomputes the
//! rewrite for every chunk and never caches it across chunks.

use crate::config::EngineConfig;
use crate::data::dictionary::Dictionary;
use crate::query::kernels::CodeSet;
use crate::query::predicate::{Predicate, PredicateKind};
use crate::storage::inverted::tokenize;

/// Code-space predicate over one dictionary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictPredicate {
    InCodes(CodeSet),
    NotInCodes(CodeSet),
    /// Half-open code interval `[lo, hi)` of an order-preserving dictionary
    CodeRange { lo: u32, hi: u32 },
}

impl DictPredicate {
    #[inline]
    pub fn matches_code(&self, code: u32) -> bool {
        match self {
            DictPredicate::InCodes(set) => set.contains(code),
            DictPredicate::NotInCodes(set) => !set.contains(code),
            DictPredicate::CodeRange { lo, hi } => *lo <= code && code < *hi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    Rewritten(DictPredicate),
    /// No code can satisfy the predicate; the chunk contributes no rows
    AlwaysFalse,
    /// Evaluate the original value predicate instead
    NotApplicable,
}

pub struct DictionaryRewriter {
    code_mask_max_cardinality: usize,
}

impl DictionaryRewriter {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            code_mask_max_cardinality: config.code_mask_max_cardinality,
        }
    }

    fn code_set(&self, codes: &[u32], dict: &Dictionary) -> CodeSet {
        CodeSet::from_codes(codes, dict.len(), self.code_mask_max_cardinality)
    }

    pub fn rewrite(&self, predicate: &Predicate, dict: &Dictionary) -> RewriteOutcome {
        match predicate.kind() {
            PredicateKind::Equals(v) => match dict.lookup(v) {
                Some(code) => RewriteOutcome::Rewritten(DictPredicate::InCodes(
                    self.code_set(&[code], dict),
                )),
                None => RewriteOutcome::AlwaysFalse,
            },
            PredicateKind::InSet(lits) => {
                // literals absent from the dictionary cannot match any row
                let codes: Vec<u32> = lits.iter().filter_map(|v| dict.lookup(v)).collect();
                if codes.is_empty() {
                    RewriteOutcome::AlwaysFalse
                } else {
                    RewriteOutcome::Rewritten(DictPredicate::InCodes(self.code_set(&codes, dict)))
                }
            }
            PredicateKind::NotInSet(lits) => {
                // unresolved literals exclude nothing
                let codes: Vec<u32> = lits.iter().filter_map(|v| dict.lookup(v)).collect();
                let excluded = self.code_set(&codes, dict);
                if !dict.is_empty() && excluded.len() == dict.len() {
                    RewriteOutcome::AlwaysFalse
                } else {
                    RewriteOutcome::Rewritten(DictPredicate::NotInCodes(excluded))
                }
            }
            PredicateKind::Range { lower, upper } => {
                match dict.code_range(lower.as_ref(), upper.as_ref()) {
                    Some((lo, hi)) if lo >= hi => RewriteOutcome::AlwaysFalse,
                    Some((lo, hi)) => RewriteOutcome::Rewritten(DictPredicate::CodeRange { lo, hi }),
                    None => RewriteOutcome::NotApplicable,
                }
            }
            PredicateKind::ContainsToken(token) => {
                // one tokenization per distinct value instead of per row
                let codes: Vec<u32> = dict
                    .values()
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.as_str().map_or(false, |s| tokenize(s).any(|t| t == *token)))
                    .map(|(code, _)| code as u32)
                    .collect();
                if codes.is_empty() {
                    RewriteOutcome::AlwaysFalse
                } else {
                    RewriteOutcome::Rewritten(DictPredicate::InCodes(self.code_set(&codes, dict)))
                }
            }
            PredicateKind::Never => RewriteOutcome::AlwaysFalse,
            // answered from the null bitmap
            PredicateKind::IsNull | PredicateKind::IsNotNull => RewriteOutcome::NotApplicable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ScalarType, Value};
    use std::ops::Bound;

    fn abc(order_preserving: bool) -> Dictionary {
        Dictionary::new(vec!["a".into(), "b".into(), "c".into()], order_preserving).unwrap()
    }

    fn rewriter() -> DictionaryRewriter {
        DictionaryRewriter::new(&EngineConfig::default())
    }

    #[test]
    fn test_in_drops_unknown_literals() {
        let p = Predicate::in_set(0, ScalarType::Utf8, vec!["b".into(), "z".into()]);
        match rewriter().rewrite(&p, &abc(false)) {
            RewriteOutcome::Rewritten(DictPredicate::InCodes(set)) => assert_eq!(set.codes(), vec![1]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_empty_code_set_is_always_false() {
        let p = Predicate::in_set(0, ScalarType::Utf8, vec!["x".into(), "z".into()]);
        assert_eq!(rewriter().rewrite(&p, &abc(false)), RewriteOutcome::AlwaysFalse);
        let eq = Predicate::equals(0, ScalarType::Utf8, "q");
        assert_eq!(rewriter().rewrite(&eq, &abc(true)), RewriteOutcome::AlwaysFalse);
    }

    #[test]
    fn test_not_in() {
        let p = Predicate::not_in_set(0, ScalarType::Utf8, vec!["a".into(), "zz".into()]);
        match rewriter().rewrite(&p, &abc(false)) {
            RewriteOutcome::Rewritten(d) => {
                assert!(!d.matches_code(0));
                assert!(d.matches_code(1) && d.matches_code(2));
            }
            other => panic!("unexpected {:?}", other),
        }
        let everything = Predicate::not_in_set(0, ScalarType::Utf8, vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(rewriter().rewrite(&everything, &abc(false)), RewriteOutcome::AlwaysFalse);
    }

    #[test]
    fn test_range_needs_order_preserving() {
        let p = Predicate::range(0, ScalarType::Utf8, Bound::Included("b".into()), Bound::Unbounded);
        assert_eq!(rewriter().rewrite(&p, &abc(false)), RewriteOutcome::NotApplicable);
        assert_eq!(
            rewriter().rewrite(&p, &abc(true)),
            RewriteOutcome::Rewritten(DictPredicate::CodeRange { lo: 1, hi: 3 })
        );
        let empty = Predicate::range(0, ScalarType::Utf8, Bound::Excluded("c".into()), Bound::Unbounded);
        assert_eq!(rewriter().rewrite(&empty, &abc(true)), RewriteOutcome::AlwaysFalse);
    }

    #[test]
    fn test_token_rewrite_scans_dictionary() {
        let dict = Dictionary::new(
            vec![Value::from("red car"), Value::from("blue car"), Value::from("redcar")],
            false,
        )
        .unwrap();
        let p = Predicate::contains_token(0, ScalarType::Utf8, "red");
        match rewriter().rewrite(&p, &dict) {
            RewriteOutcome::Rewritten(DictPredicate::InCodes(set)) => assert_eq!(set.codes(), vec![0]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_null_checks_not_rewritten() {
        let p = Predicate::is_null(0, ScalarType::Utf8);
        assert_eq!(rewriter().rewrite(&p, &abc(true)), RewriteOutcome::NotApplicable);
    }
}
