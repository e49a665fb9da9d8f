//! Zone Map Pruner - chunk-level SKIP / ALL / MAYBE from min/max/null counts
//!
//! A `Skip` or `All` verdict is final for the chunk and later stages never
//! see it, so every rule below only answers definitively when the statistics
//! prove it. Anything else is `Maybe`.

use std::ops::Bound;

use crate::query::predicate::{in_bounds, Predicate, PredicateKind};
use crate::storage::zone_map::ZoneMap;
use crate::{ChunkId, Degradation};

/// Three-state outcome of a chunk-level check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneVerdict {
    /// No row of the chunk satisfies the predicate
    Skip,
    /// Every row of the chunk satisfies the predicate
    All,
    /// Rows must be examined
    Maybe,
}

pub struct ZoneMapPruner;

impl ZoneMapPruner {
    /// Verdict from a zone map that is known to be consistent
    pub fn prune(predicate: &Predicate, zm: &ZoneMap) -> PruneVerdict {
        if zm.row_count == 0 {
            return PruneVerdict::Skip;
        }
        let no_nulls = zm.null_count == 0;

        match predicate.kind() {
            PredicateKind::Never => return PruneVerdict::Skip,
            PredicateKind::IsNull => {
                return if no_nulls {
                    PruneVerdict::Skip
                } else if zm.has_all_null {
                    PruneVerdict::All
                } else {
                    PruneVerdict::Maybe
                };
            }
            PredicateKind::IsNotNull => {
                return if zm.has_all_null {
                    PruneVerdict::Skip
                } else if no_nulls {
                    PruneVerdict::All
                } else {
                    PruneVerdict::Maybe
                };
            }
            _ => {}
        }

        // NULL rows never satisfy a value predicate
        if zm.has_all_null {
            return PruneVerdict::Skip;
        }
        let (min, max) = match (&zm.min, &zm.max) {
            (Some(min), Some(max)) => (min, max),
            _ => return PruneVerdict::Maybe,
        };

        match predicate.kind() {
            PredicateKind::Equals(v) => {
                if v < min || v > max {
                    PruneVerdict::Skip
                } else if no_nulls && min == max {
                    PruneVerdict::All
                } else {
                    PruneVerdict::Maybe
                }
            }
            PredicateKind::Range { lower, upper } => {
                let (lower, upper) = (lower.as_ref(), upper.as_ref());
                let below_lower = match lower {
                    Bound::Unbounded => false,
                    Bound::Included(l) => max < l,
                    Bound::Excluded(l) => max <= l,
                };
                let above_upper = match upper {
                    Bound::Unbounded => false,
                    Bound::Included(u) => min > u,
                    Bound::Excluded(u) => min >= u,
                };
                if below_lower || above_upper {
                    PruneVerdict::Skip
                } else if no_nulls && in_bounds(min, lower, upper) && in_bounds(max, lower, upper) {
                    PruneVerdict::All
                } else {
                    PruneVerdict::Maybe
                }
            }
            PredicateKind::InSet(lits) => {
                // literals are sorted: check the extremes first, then one
                // binary search for the first literal >= min
                match (lits.first(), lits.last()) {
                    (Some(first), Some(last)) if last >= min && first <= max => {
                        let idx = lits.partition_point(|l| l < min);
                        match lits.get(idx) {
                            Some(l) if l <= max => {
                                if no_nulls && min == max {
                                    PruneVerdict::All
                                } else {
                                    PruneVerdict::Maybe
                                }
                            }
                            _ => PruneVerdict::Skip,
                        }
                    }
                    _ => PruneVerdict::Skip,
                }
            }
            PredicateKind::NotInSet(lits) => {
                if min == max && lits.binary_search(min).is_ok() {
                    PruneVerdict::Skip
                } else {
                    PruneVerdict::Maybe
                }
            }
            PredicateKind::ContainsToken(_) => PruneVerdict::Maybe,
            PredicateKind::IsNull | PredicateKind::IsNotNull | PredicateKind::Never => {
                PruneVerdict::Maybe
            }
        }
    }

    /// Validate the zone map before trusting it. A missing map answers
    /// `Maybe`; an inconsistent one answers `Maybe` and reports why.
    pub fn prune_checked(
        predicate: &Predicate,
        zone_map: Option<&ZoneMap>,
        chunk_id: ChunkId,
        chunk_rows: usize,
        degradations: &mut Vec<Degradation>,
    ) -> PruneVerdict {
        let zm = match zone_map {
            Some(zm) => zm,
            None => return PruneVerdict::Maybe,
        };
        let problem = if zm.row_count != chunk_rows as u64 {
            Some(format!(
                "zone map covers {} rows, chunk has {}",
                zm.row_count, chunk_rows
            ))
        } else {
            zm.validate(predicate.scalar_type().physical()).err()
        };
        if let Some(reason) = problem {
            degradations.push(Degradation::CorruptZoneMap {
                column_id: predicate.column_id(),
                chunk_id,
                reason,
            });
            return PruneVerdict::Maybe;
        }
        Self::prune(predicate, zm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ScalarType, Value};

    fn int_zm(min: i64, max: i64, nulls: u64) -> ZoneMap {
        ZoneMap::new(Value::Int64(min), Value::Int64(max), nulls, 100)
    }

    fn ints(v: &[i64]) -> Vec<Value> {
        v.iter().map(|&x| Value::Int64(x)).collect()
    }

    #[test]
    fn test_between_outside_zone_skips() {
        let p = Predicate::between(0, ScalarType::Int64, 100i64, 200i64);
        assert_eq!(ZoneMapPruner::prune(&p, &int_zm(300, 400, 0)), PruneVerdict::Skip);
        assert_eq!(ZoneMapPruner::prune(&p, &int_zm(150, 160, 0)), PruneVerdict::All);
        assert_eq!(ZoneMapPruner::prune(&p, &int_zm(150, 160, 3)), PruneVerdict::Maybe);
        assert_eq!(ZoneMapPruner::prune(&p, &int_zm(50, 160, 0)), PruneVerdict::Maybe);
    }

    #[test]
    fn test_exclusive_bounds() {
        let gt = Predicate::range(0, ScalarType::Int64, Bound::Excluded(Value::Int64(400)), Bound::Unbounded);
        assert_eq!(ZoneMapPruner::prune(&gt, &int_zm(300, 400, 0)), PruneVerdict::Skip);
        let lt = Predicate::range(0, ScalarType::Int64, Bound::Unbounded, Bound::Excluded(Value::Int64(300)));
        assert_eq!(ZoneMapPruner::prune(&lt, &int_zm(300, 400, 0)), PruneVerdict::Skip);
    }

    #[test]
    fn test_in_set() {
        let p = Predicate::in_set(0, ScalarType::Int64, ints(&[1, 50, 999]));
        assert_eq!(ZoneMapPruner::prune(&p, &int_zm(10, 40, 0)), PruneVerdict::Skip);
        assert_eq!(ZoneMapPruner::prune(&p, &int_zm(10, 60, 0)), PruneVerdict::Maybe);
        assert_eq!(ZoneMapPruner::prune(&p, &int_zm(50, 50, 0)), PruneVerdict::All);
        assert_eq!(ZoneMapPruner::prune(&p, &int_zm(1000, 2000, 0)), PruneVerdict::Skip);
    }

    #[test]
    fn test_not_in_only_degenerate_skip() {
        let p = Predicate::not_in_set(0, ScalarType::Int64, ints(&[7]));
        assert_eq!(ZoneMapPruner::prune(&p, &int_zm(7, 7, 5)), PruneVerdict::Skip);
        assert_eq!(ZoneMapPruner::prune(&p, &int_zm(8, 9, 0)), PruneVerdict::Maybe);
    }

    #[test]
    fn test_null_checks() {
        let is_null = Predicate::is_null(0, ScalarType::Int64);
        let not_null = Predicate::is_not_null(0, ScalarType::Int64);
        assert_eq!(ZoneMapPruner::prune(&is_null, &int_zm(1, 2, 0)), PruneVerdict::Skip);
        assert_eq!(ZoneMapPruner::prune(&not_null, &int_zm(1, 2, 0)), PruneVerdict::All);
        let all_null = ZoneMap::all_null(100);
        assert_eq!(ZoneMapPruner::prune(&is_null, &all_null), PruneVerdict::All);
        assert_eq!(ZoneMapPruner::prune(&not_null, &all_null), PruneVerdict::Skip);

        let eq = Predicate::equals(0, ScalarType::Int64, 1i64);
        assert_eq!(ZoneMapPruner::prune(&eq, &all_null), PruneVerdict::Skip);
    }

    #[test]
    fn test_corrupt_zone_map_degrades() {
        let p = Predicate::between(0, ScalarType::Int64, 100i64, 200i64);
        let corrupt = int_zm(400, 300, 0);
        let mut degradations = Vec::new();
        let verdict = ZoneMapPruner::prune_checked(&p, Some(&corrupt), 3, 100, &mut degradations);
        assert_eq!(verdict, PruneVerdict::Maybe);
        assert!(matches!(
            degradations.as_slice(),
            [Degradation::CorruptZoneMap { chunk_id: 3, .. }]
        ));

        let mut degradations = Vec::new();
        let stale = int_zm(300, 400, 0);
        let verdict = ZoneMapPruner::prune_checked(&p, Some(&stale), 3, 50, &mut degradations);
        assert_eq!(verdict, PruneVerdict::Maybe);
        assert_eq!(degradations.len(), 1);

        assert_eq!(
            ZoneMapPruner::prune_checked(&p, None, 0, 100, &mut Vec::new()),
            PruneVerdict::Maybe
        );
    }
}
