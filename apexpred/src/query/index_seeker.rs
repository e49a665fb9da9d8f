//! Index Seeker - narrows candidate rows through bitmap, bloom and inverted
//! indexes before any value is materialized
//!
//! Only exact structures may produce a final answer. Bitmap postings are
//! exact for equality and membership; a bloom filter can only prove absence;
//! inverted-index postings are a superset that must be re-checked. A
//! missing or broken index degrades to `Maybe`.

use std::ops::Range;

use crate::data::Value;
use crate::query::predicate::{Predicate, PredicateKind};
use crate::query::selection::SelectionVector;
use crate::storage::bitmap_index::RowIdSet;
use crate::storage::bloom::BloomProbe;
use crate::storage::index_handle::IndexHandle;
use crate::Degradation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeekOutcome {
    /// No candidate row can match
    Skip,
    /// Exactly the matching rows (within range and incoming selection)
    Exact(SelectionVector),
    /// A superset of the matching rows; the evaluator re-checks each one
    Candidates(SelectionVector),
    /// The indexes cannot narrow this predicate
    Maybe,
}

pub struct IndexSeeker;

impl IndexSeeker {
    /// Consult the chunk's indexes for `predicate` over rows `[from, to)`
    /// of a chunk with `row_count` rows, intersected with `incoming` when
    /// given. Index failures are appended to `degradations`.
    pub fn seek(
        predicate: &Predicate,
        handle: Option<&IndexHandle>,
        row_count: usize,
        rows: Range<usize>,
        incoming: Option<&SelectionVector>,
        degradations: &mut Vec<Degradation>,
    ) -> SeekOutcome {
        let handle = match handle {
            Some(h) => h,
            None => return SeekOutcome::Maybe,
        };

        match predicate.kind() {
            PredicateKind::Never => SeekOutcome::Skip,
            PredicateKind::Equals(v) => {
                Self::seek_members(std::slice::from_ref(v), handle, row_count, &rows, incoming, degradations)
            }
            PredicateKind::InSet(lits) => {
                Self::seek_members(lits, handle, row_count, &rows, incoming, degradations)
            }
            PredicateKind::ContainsToken(token) => match handle.seek_inverted(token) {
                Ok(Some(candidates)) => {
                    let sel = narrow(&candidates, row_count, &rows, incoming);
                    if sel.any() {
                        SeekOutcome::Candidates(sel)
                    } else {
                        SeekOutcome::Skip
                    }
                }
                Ok(None) => SeekOutcome::Maybe,
                Err(d) => {
                    degradations.push(d);
                    SeekOutcome::Maybe
                }
            },
            // negated predicates, ranges and null checks are not index-prunable
            PredicateKind::NotInSet(_)
            | PredicateKind::Range { .. }
            | PredicateKind::IsNull
            | PredicateKind::IsNotNull => SeekOutcome::Maybe,
        }
    }

    fn seek_members(
        literals: &[Value],
        handle: &IndexHandle,
        row_count: usize,
        rows: &Range<usize>,
        incoming: Option<&SelectionVector>,
        degradations: &mut Vec<Degradation>,
    ) -> SeekOutcome {
        if literals.is_empty() {
            return SeekOutcome::Skip;
        }

        // exact postings first
        let mut postings = RowIdSet::empty();
        let mut bitmap_ok = handle.has_bitmap_index();
        if bitmap_ok {
            for lit in literals {
                match handle.seek_bitmap(lit) {
                    Ok(Some(rows)) => postings = postings.union(&rows),
                    Ok(None) => {
                        bitmap_ok = false;
                        break;
                    }
                    Err(d) => {
                        degradations.push(d);
                        bitmap_ok = false;
                        break;
                    }
                }
            }
        } else if let Err(d) = handle.seek_bitmap(&literals[0]) {
            degradations.push(d);
        }
        if bitmap_ok {
            let sel = narrow(&postings, row_count, rows, incoming);
            return if sel.any() {
                SeekOutcome::Exact(sel)
            } else {
                SeekOutcome::Skip
            };
        }

        // bloom can only prove absence of every literal
        for lit in literals {
            match handle.bloom_test(lit) {
                Ok(Some(BloomProbe::DefinitelyAbsent)) => continue,
                Ok(Some(BloomProbe::MaybePresent)) | Ok(None) => return SeekOutcome::Maybe,
                Err(d) => {
                    degradations.push(d);
                    return SeekOutcome::Maybe;
                }
            }
        }
        SeekOutcome::Skip
    }
}

/// Posting list restricted to `[from, to)` and the incoming selection
fn narrow(
    rows: &RowIdSet,
    row_count: usize,
    range: &Range<usize>,
    incoming: Option<&SelectionVector>,
) -> SelectionVector {
    let in_range: RowIdSet = rows
        .iter()
        .filter(|&r| (r as usize) >= range.start && (r as usize) < range.end)
        .collect();
    let sel = SelectionVector::from_row_ids(row_count, &in_range);
    match incoming {
        Some(incoming) => {
            let narrowed = sel.and(incoming);
            sel.recycle();
            narrowed
        }
        None => sel,
    }
}
