//! Single-column predicates and their reference (row-at-a-time) semantics

use std::ops::Bound;

use crate::data::{ScalarType, Value};
use crate::storage::inverted::tokenize;
use crate::ColumnId;

/// Predicate variants.
///
/// Literals are already normalized to the column's physical representation.
/// `InSet` / `NotInSet` literals are sorted and de-duplicated.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateKind {
    Equals(Value),
    Range { lower: Bound<Value>, upper: Bound<Value> },
    InSet(Vec<Value>),
    NotInSet(Vec<Value>),
    IsNull,
    IsNotNull,
    /// Lowercase alphanumeric token contained in a string value
    ContainsToken(String),
    /// Satisfied by no row (e.g. comparison against a NULL literal)
    Never,
}

/// A predicate bound to one column
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    column_id: ColumnId,
    scalar_type: ScalarType,
    kind: PredicateKind,
}

impl Predicate {
    pub fn new(column_id: ColumnId, scalar_type: ScalarType, kind: PredicateKind) -> Self {
        let kind = match kind {
            PredicateKind::InSet(values) => PredicateKind::InSet(sorted_unique(values)),
            PredicateKind::NotInSet(values) => PredicateKind::NotInSet(sorted_unique(values)),
            other => other,
        };
        Self {
            column_id,
            scalar_type,
            kind,
        }
    }

    pub fn equals(column_id: ColumnId, ty: ScalarType, value: impl Into<Value>) -> Self {
        Self::new(column_id, ty, PredicateKind::Equals(value.into()))
    }

    pub fn range(column_id: ColumnId, ty: ScalarType, lower: Bound<Value>, upper: Bound<Value>) -> Self {
        Self::new(column_id, ty, PredicateKind::Range { lower, upper })
    }

    /// Inclusive `BETWEEN low AND high`
    pub fn between(column_id: ColumnId, ty: ScalarType, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::range(column_id, ty, Bound::Included(low.into()), Bound::Included(high.into()))
    }

    pub fn in_set(column_id: ColumnId, ty: ScalarType, values: Vec<Value>) -> Self {
        Self::new(column_id, ty, PredicateKind::InSet(values))
    }

    pub fn not_in_set(column_id: ColumnId, ty: ScalarType, values: Vec<Value>) -> Self {
        Self::new(column_id, ty, PredicateKind::NotInSet(values))
    }

    pub fn is_null(column_id: ColumnId, ty: ScalarType) -> Self {
        Self::new(column_id, ty, PredicateKind::IsNull)
    }

    pub fn is_not_null(column_id: ColumnId, ty: ScalarType) -> Self {
        Self::new(column_id, ty, PredicateKind::IsNotNull)
    }

    pub fn contains_token(column_id: ColumnId, ty: ScalarType, token: impl Into<String>) -> Self {
        Self::new(column_id, ty, PredicateKind::ContainsToken(token.into().to_lowercase()))
    }

    pub fn never(column_id: ColumnId, ty: ScalarType) -> Self {
        Self::new(column_id, ty, PredicateKind::Never)
    }

    #[inline]
    pub fn column_id(&self) -> ColumnId {
        self.column_id
    }

    #[inline]
    pub fn scalar_type(&self) -> &ScalarType {
        &self.scalar_type
    }

    #[inline]
    pub fn kind(&self) -> &PredicateKind {
        &self.kind
    }

    /// `IS NULL` / `IS NOT NULL`: the only kinds that can select NULL rows
    /// or that never need value materialization.
    pub fn is_null_check(&self) -> bool {
        matches!(self.kind, PredicateKind::IsNull | PredicateKind::IsNotNull)
    }

    /// Relative per-row cost of full evaluation, used to order conjunctions
    pub fn eval_cost(&self) -> u8 {
        match &self.kind {
            PredicateKind::Never => 0,
            PredicateKind::IsNull | PredicateKind::IsNotNull => 1,
            PredicateKind::Equals(_) | PredicateKind::Range { .. } => 2,
            PredicateKind::InSet(v) | PredicateKind::NotInSet(v) if v.len() <= 4 => 3,
            PredicateKind::InSet(_) | PredicateKind::NotInSet(_) => 4,
            PredicateKind::ContainsToken(_) => 6,
        }
    }

    /// SQL three-valued evaluation of one cell. `None` means UNKNOWN.
    pub fn eval_value(&self, value: Option<&Value>) -> Option<bool> {
        let value = value.filter(|v| !v.is_null());
        match &self.kind {
            PredicateKind::IsNull => return Some(value.is_none()),
            PredicateKind::IsNotNull => return Some(value.is_some()),
            _ => {}
        }
        let v = value?;
        Some(match &self.kind {
            PredicateKind::Equals(lit) => v == lit,
            PredicateKind::Range { lower, upper } => in_bounds(v, lower.as_ref(), upper.as_ref()),
            PredicateKind::InSet(lits) => lits.binary_search(v).is_ok(),
            PredicateKind::NotInSet(lits) => lits.binary_search(v).is_err(),
            PredicateKind::ContainsToken(token) => match v.as_str() {
                Some(s) => tokenize(s).any(|t| t == *token),
                None => false,
            },
            PredicateKind::Never => false,
            PredicateKind::IsNull | PredicateKind::IsNotNull => unreachable!(),
        })
    }

    /// Whether the row is selected (UNKNOWN collapses to not selected)
    #[inline]
    pub fn matches(&self, value: Option<&Value>) -> bool {
        self.eval_value(value) == Some(true)
    }
}

/// `lower <= v <= upper` with inclusive/exclusive/unbounded ends
pub(crate) fn in_bounds(v: &Value, lower: Bound<&Value>, upper: Bound<&Value>) -> bool {
    let above = match lower {
        Bound::Unbounded => true,
        Bound::Included(l) => v >= l,
        Bound::Excluded(l) => v > l,
    };
    let below = match upper {
        Bound::Unbounded => true,
        Bound::Included(u) => v <= u,
        Bound::Excluded(u) => v < u,
    };
    above && below
}

fn sorted_unique(mut values: Vec<Value>) -> Vec<Value> {
    values.retain(|v| !v.is_null());
    values.sort();
    values.dedup();
    values
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let col = format!("#{}", self.column_id);
        match &self.kind {
            PredicateKind::Equals(v) => write!(f, "{} = {}", col, v),
            PredicateKind::Range { lower, upper } => {
                match lower {
                    Bound::Included(v) => write!(f, "{} <= ", v)?,
                    Bound::Excluded(v) => write!(f, "{} < ", v)?,
                    Bound::Unbounded => {}
                }
                write!(f, "{}", col)?;
                match upper {
                    Bound::Included(v) => write!(f, " <= {}", v),
                    Bound::Excluded(v) => write!(f, " < {}", v),
                    Bound::Unbounded => Ok(()),
                }
            }
            PredicateKind::InSet(v) => write!(f, "{} IN ({} values)", col, v.len()),
            PredicateKind::NotInSet(v) => write!(f, "{} NOT IN ({} values)", col, v.len()),
            PredicateKind::IsNull => write!(f, "{} IS NULL", col),
            PredicateKind::IsNotNull => write!(f, "{} IS NOT NULL", col),
            PredicateKind::ContainsToken(t) => write!(f, "{} CONTAINS TOKEN '{}'", col, t),
            PredicateKind::Never => write!(f, "FALSE"),
        }
    }
}
