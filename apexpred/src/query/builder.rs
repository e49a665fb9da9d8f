//! Predicate Builder - validates pushdown requests and normalizes literals
//!
//! Runs once per query. A request that cannot be pushed is not a failure:
//! it comes back as a `PushdownRejectReason` and the caller filters those
//! rows after the scan. Type and arity problems are planning errors.

use std::ops::Bound;

use ahash::AHashMap;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};

use crate::config::BuilderConfig;
use crate::data::{canonical_f64, ColumnDef, ScalarType, Value};
use crate::query::filter_tree::FilterExpr;
use crate::query::predicate::Predicate;
use crate::storage::inverted::tokenize;
use crate::{ColumnId, PredicateError, PushdownRejectReason, Result};

/// `NaiveDate::num_days_from_ce()` of 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SECOND;

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// A request after folding fractional literals on integer columns
enum Folded {
    Request(FilterOp, Vec<Value>),
    /// No integer satisfies the comparison
    Never,
    /// Every non-null integer satisfies the comparison
    NotNull,
}

/// Filter operator as offered by the query engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Between,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    ContainsToken,
    Like,
}

impl FilterOp {
    fn name(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::NotEq => "!=",
            FilterOp::Lt => "<",
            FilterOp::LtEq => "<=",
            FilterOp::Gt => ">",
            FilterOp::GtEq => ">=",
            FilterOp::Between => "BETWEEN",
            FilterOp::In => "IN",
            FilterOp::NotIn => "NOT IN",
            FilterOp::IsNull => "IS NULL",
            FilterOp::IsNotNull => "IS NOT NULL",
            FilterOp::ContainsToken => "CONTAINS TOKEN",
            FilterOp::Like => "LIKE",
        }
    }

    fn is_range(&self) -> bool {
        matches!(
            self,
            FilterOp::Lt | FilterOp::LtEq | FilterOp::Gt | FilterOp::GtEq | FilterOp::Between
        )
    }

    fn check_arity(&self, actual: usize) -> Result<()> {
        let (ok, expected) = match self {
            FilterOp::IsNull | FilterOp::IsNotNull => (actual == 0, "0"),
            FilterOp::Between => (actual == 2, "2"),
            FilterOp::In | FilterOp::NotIn => (actual >= 1, "at least 1"),
            _ => (actual == 1, "1"),
        };
        if ok {
            Ok(())
        } else {
            Err(PredicateError::Arity {
                op: self.name().to_string(),
                expected: expected.to_string(),
                actual,
            })
        }
    }
}

impl std::fmt::Display for FilterOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One `(column_id, operator, literal[])` filter offered for pushdown
#[derive(Debug, Clone, PartialEq)]
pub struct FilterRequest {
    pub column_id: ColumnId,
    pub op: FilterOp,
    pub literals: Vec<Value>,
    /// Set by the query engine when the filter expression has no side
    /// effects and yields the same result for the same input
    pub deterministic: bool,
}

impl FilterRequest {
    pub fn new(column_id: ColumnId, op: FilterOp, literals: Vec<Value>) -> Self {
        Self {
            column_id,
            op,
            literals,
            deterministic: true,
        }
    }

    pub fn non_deterministic(mut self) -> Self {
        self.deterministic = false;
        self
    }
}

/// Result of planning a conjunction of filters
#[derive(Debug, Clone, Default)]
pub struct PushdownPlan {
    pub pushed: Vec<Predicate>,
    /// Requests the caller must apply after the scan
    pub residual: Vec<(FilterRequest, PushdownRejectReason)>,
}

impl PushdownPlan {
    pub fn is_fully_pushed(&self) -> bool {
        self.residual.is_empty()
    }

    /// The pushed predicates as one AND node
    pub fn to_filter(&self) -> FilterExpr {
        FilterExpr::and(self.pushed.iter().cloned().map(FilterExpr::leaf).collect())
    }
}

pub struct PredicateBuilder {
    columns: AHashMap<ColumnId, ColumnDef>,
    config: BuilderConfig,
}

impl PredicateBuilder {
    pub fn new(columns: &[ColumnDef], config: BuilderConfig) -> Self {
        Self {
            columns: columns.iter().map(|c| (c.id, c.clone())).collect(),
            config,
        }
    }

    /// Validate and normalize a single request
    pub fn build(&self, request: &FilterRequest) -> Result<Predicate> {
        let column = self
            .columns
            .get(&request.column_id)
            .ok_or(PredicateError::UnknownColumn(request.column_id))?;
        let ty = &column.scalar_type;

        if !request.deterministic {
            return Err(PushdownRejectReason::NonDeterministicExpression.into());
        }
        if ty.physical().is_none() {
            return Err(PushdownRejectReason::UnsupportedType.into());
        }
        if request.op == FilterOp::Like {
            return Err(PushdownRejectReason::UnsupportedOperator.into());
        }
        request.op.check_arity(request.literals.len())?;

        if request.op.is_range() && !ty.is_ordered() {
            return Err(PushdownRejectReason::UnsupportedOperator.into());
        }
        if request.op == FilterOp::ContainsToken && !ty.is_string_like() {
            return Err(PushdownRejectReason::UnsupportedOperator.into());
        }
        if matches!(request.op, FilterOp::In | FilterOp::NotIn)
            && request.literals.len() > self.config.max_in_list_len
        {
            return Err(PushdownRejectReason::UnsupportedOperator.into());
        }

        let id = column.id;
        let (op, literals) = match fold_fractional(ty, request.op, &request.literals) {
            Folded::Request(op, literals) => (op, literals),
            Folded::Never => return Ok(Predicate::never(id, ty.clone())),
            Folded::NotNull => return Ok(Predicate::is_not_null(id, ty.clone())),
        };

        let lits = literals
            .iter()
            .map(|v| self.normalize(column, v))
            .collect::<Result<Vec<_>>>()?;

        let ty = ty.clone();
        // comparisons against NULL are UNKNOWN for every row
        let never = |ty: ScalarType| -> Result<Predicate> { Ok(Predicate::never(id, ty)) };

        match op {
            FilterOp::IsNull if !column.nullable => never(ty),
            FilterOp::IsNull => Ok(Predicate::is_null(id, ty)),
            FilterOp::IsNotNull => Ok(Predicate::is_not_null(id, ty)),
            _ if op != FilterOp::In && lits.iter().any(Value::is_null) => never(ty),
            FilterOp::Eq => Ok(Predicate::equals(id, ty, lits[0].clone())),
            FilterOp::NotEq => Ok(Predicate::not_in_set(id, ty, lits)),
            FilterOp::Lt => Ok(Predicate::range(id, ty, Bound::Unbounded, Bound::Excluded(lits[0].clone()))),
            FilterOp::LtEq => Ok(Predicate::range(id, ty, Bound::Unbounded, Bound::Included(lits[0].clone()))),
            FilterOp::Gt => Ok(Predicate::range(id, ty, Bound::Excluded(lits[0].clone()), Bound::Unbounded)),
            FilterOp::GtEq => Ok(Predicate::range(id, ty, Bound::Included(lits[0].clone()), Bound::Unbounded)),
            FilterOp::Between if lits[0] > lits[1] => never(ty),
            FilterOp::Between => Ok(Predicate::between(id, ty, lits[0].clone(), lits[1].clone())),
            FilterOp::In => {
                if lits.iter().all(Value::is_null) {
                    never(ty)
                } else {
                    Ok(Predicate::in_set(id, ty, lits))
                }
            }
            FilterOp::NotIn => Ok(Predicate::not_in_set(id, ty, lits)),
            FilterOp::ContainsToken => {
                let text = lits[0].as_str().unwrap_or_default();
                let mut tokens = tokenize(text);
                match (tokens.next(), tokens.next()) {
                    (None, _) => never(ty),
                    (Some(token), None) => Ok(Predicate::contains_token(id, ty, token)),
                    // phrase search is not served by the token index
                    (Some(_), Some(_)) => Err(PushdownRejectReason::UnsupportedOperator.into()),
                }
            }
            FilterOp::Like => Err(PushdownRejectReason::UnsupportedOperator.into()),
        }
    }

    /// Plan a conjunction. Rejected requests become residual filters;
    /// planning errors abort the whole plan.
    pub fn build_conjunction(&self, requests: &[FilterRequest]) -> Result<PushdownPlan> {
        let mut plan = PushdownPlan::default();
        for request in requests {
            match self.build(request) {
                Ok(p) => plan.pushed.push(p),
                Err(PredicateError::Unsupported(reason)) => {
                    log::debug!(
                        "filter on column {} ({}) kept for post-scan: {}",
                        request.column_id,
                        request.op,
                        reason
                    );
                    plan.residual.push((request.clone(), reason));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(plan)
    }

    fn normalize(&self, column: &ColumnDef, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let mismatch = |detail: String| PredicateError::TypeMismatch {
            column: column.name.clone(),
            detail,
        };
        let incompatible = || mismatch(format!("{} literal for {} column", value, column.scalar_type));

        match (&column.scalar_type, value) {
            (ScalarType::Boolean, Value::Bool(b)) => Ok(Value::Bool(*b)),
            (ScalarType::Int32, Value::Int32(v)) => Ok(Value::Int32(*v)),
            (ScalarType::Int32, Value::Int64(v)) => i32::try_from(*v)
                .map(Value::Int32)
                .map_err(|_| mismatch(format!("{} out of range for INT", v))),
            (ScalarType::Int32, Value::Float64(f)) => integral(*f)
                .and_then(|v| i32::try_from(v).ok())
                .map(Value::Int32)
                .ok_or_else(incompatible),
            (ScalarType::Int64, Value::Int32(v)) => Ok(Value::Int64(*v as i64)),
            (ScalarType::Int64, Value::Int64(v)) => Ok(Value::Int64(*v)),
            (ScalarType::Int64, Value::Float64(f)) => {
                integral(*f).map(Value::Int64).ok_or_else(incompatible)
            }
            (ScalarType::Float64, Value::Int32(v)) => Ok(Value::Float64(*v as f64)),
            (ScalarType::Float64, Value::Int64(v)) => Ok(Value::Float64(*v as f64)),
            (ScalarType::Float64, Value::Float64(f)) => Ok(Value::Float64(canonical_f64(*f))),
            (ScalarType::Utf8, Value::String(s)) => Ok(Value::String(s.clone())),
            (ScalarType::FixedChar(width), Value::String(s)) => {
                let width = *width as usize;
                let len = s.chars().count();
                if len > width {
                    return Err(mismatch(format!(
                        "literal of {} characters exceeds CHAR({})",
                        len, width
                    )));
                }
                let mut padded = s.clone();
                padded.extend(std::iter::repeat('\0').take(width - len));
                Ok(Value::String(padded))
            }
            (ScalarType::Json, Value::String(s)) => serde_json::from_str::<serde_json::Value>(s)
                .map(|doc| Value::String(doc.to_string()))
                .map_err(|e| mismatch(format!("invalid JSON literal: {}", e))),
            (ScalarType::Date, Value::Date(d)) | (ScalarType::Date, Value::Int32(d)) => {
                Ok(Value::Date(*d))
            }
            (ScalarType::Date, Value::String(s)) => parse_date(s)
                .map(Value::Date)
                .ok_or_else(|| mismatch(format!("cannot parse '{}' as DATE", s))),
            (ScalarType::Timestamp, Value::Timestamp(t)) | (ScalarType::Timestamp, Value::Int64(t)) => {
                Ok(Value::Timestamp(*t))
            }
            (ScalarType::Timestamp, Value::Int32(t)) => Ok(Value::Timestamp(*t as i64)),
            (ScalarType::Timestamp, Value::Date(d)) => self
                .local_midnight(*d)
                .map(Value::Timestamp)
                .ok_or_else(incompatible),
            (ScalarType::Timestamp, Value::String(s)) => self
                .parse_timestamp(s)
                .map(Value::Timestamp)
                .ok_or_else(|| mismatch(format!("cannot parse '{}' as TIMESTAMP", s))),
            _ => Err(incompatible()),
        }
    }

    fn session_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.config.session_utc_offset_secs)
    }

    /// Microseconds since the epoch, UTC
    fn parse_timestamp(&self, s: &str) -> Option<i64> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.timestamp_micros());
        }
        let offset = self.session_offset()?;
        let naive = NAIVE_TIMESTAMP_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok());
        match naive {
            Some(naive) => offset
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.timestamp_micros()),
            None => parse_date(s).and_then(|d| self.local_midnight(d)),
        }
    }

    fn local_midnight(&self, days: i32) -> Option<i64> {
        let offset = self.session_offset()?;
        Some(days as i64 * MICROS_PER_DAY - offset.local_minus_utc() as i64 * MICROS_PER_SECOND)
    }
}

fn fractional(v: &Value) -> Option<f64> {
    match v {
        Value::Float64(f) if f.is_finite() && f.fract() != 0.0 => Some(*f),
        _ => None,
    }
}

/// Integer columns compared with a fractional literal: tighten each bound
/// to the integers it admits and drop list members no integer can equal.
fn fold_fractional(ty: &ScalarType, op: FilterOp, literals: &[Value]) -> Folded {
    if !matches!(ty, ScalarType::Int32 | ScalarType::Int64) || !literals.iter().any(|v| fractional(v).is_some()) {
        return Folded::Request(op, literals.to_vec());
    }
    let floor = |v: &Value| fractional(v).map_or_else(|| v.clone(), |f| Value::Float64(f.floor()));
    let ceil = |v: &Value| fractional(v).map_or_else(|| v.clone(), |f| Value::Float64(f.ceil()));
    let members = || -> Vec<Value> { literals.iter().filter(|v| fractional(v).is_none()).cloned().collect() };

    match op {
        FilterOp::Eq => Folded::Never,
        FilterOp::NotEq => Folded::NotNull,
        FilterOp::Lt | FilterOp::LtEq => Folded::Request(FilterOp::LtEq, vec![floor(&literals[0])]),
        FilterOp::Gt | FilterOp::GtEq => Folded::Request(FilterOp::GtEq, vec![ceil(&literals[0])]),
        FilterOp::Between => Folded::Request(FilterOp::Between, vec![ceil(&literals[0]), floor(&literals[1])]),
        FilterOp::In => match members() {
            m if m.is_empty() => Folded::Never,
            m => Folded::Request(FilterOp::In, m),
        },
        FilterOp::NotIn => match members() {
            m if m.is_empty() => Folded::NotNull,
            m => Folded::Request(FilterOp::NotIn, m),
        },
        other => Folded::Request(other, literals.to_vec()),
    }
}

fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Days since the Unix epoch
fn parse_date(s: &str) -> Option<i32> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
}
