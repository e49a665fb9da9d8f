//! Value model: scalar types, literal values and column definitions

pub mod column;
pub mod dictionary;

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::ColumnId;

/// Declared (logical) column type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarType {
    Boolean,
    Int32,
    Int64,
    Float64,
    Utf8,
    /// Fixed-length string, right-padded with NUL bytes
    FixedChar(u16),
    /// Days since the Unix epoch
    Date,
    /// Microseconds since the Unix epoch, UTC
    Timestamp,
    /// JSON document; no ordering, equality on canonical text
    Json,
    List(Box<ScalarType>),
}

/// In-memory buffer representation of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalType {
    Bool,
    Int32,
    Int64,
    Float64,
    Utf8,
}

impl ScalarType {
    /// Physical buffer type, `None` for types that cannot be stored flat
    pub fn physical(&self) -> Option<PhysicalType> {
        match self {
            ScalarType::Boolean => Some(PhysicalType::Bool),
            ScalarType::Int32 | ScalarType::Date => Some(PhysicalType::Int32),
            ScalarType::Int64 | ScalarType::Timestamp => Some(PhysicalType::Int64),
            ScalarType::Float64 => Some(PhysicalType::Float64),
            ScalarType::Utf8 | ScalarType::FixedChar(_) | ScalarType::Json => {
                Some(PhysicalType::Utf8)
            }
            ScalarType::List(_) => None,
        }
    }

    /// Whether range comparisons are meaningful
    pub fn is_ordered(&self) -> bool {
        !matches!(self, ScalarType::Json | ScalarType::List(_))
    }

    pub fn is_string_like(&self) -> bool {
        matches!(self, ScalarType::Utf8 | ScalarType::FixedChar(_) | ScalarType::Json)
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarType::Boolean => write!(f, "BOOLEAN"),
            ScalarType::Int32 => write!(f, "INT"),
            ScalarType::Int64 => write!(f, "BIGINT"),
            ScalarType::Float64 => write!(f, "DOUBLE"),
            ScalarType::Utf8 => write!(f, "VARCHAR"),
            ScalarType::FixedChar(n) => write!(f, "CHAR({})", n),
            ScalarType::Date => write!(f, "DATE"),
            ScalarType::Timestamp => write!(f, "TIMESTAMP"),
            ScalarType::Json => write!(f, "JSON"),
            ScalarType::List(inner) => write!(f, "LIST<{}>", inner),
        }
    }
}

/// Column definition as seen by the pushdown builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub id: ColumnId,
    pub name: String,
    pub scalar_type: ScalarType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(id: ColumnId, name: impl Into<String>, scalar_type: ScalarType) -> Self {
        Self {
            id,
            name: name.into(),
            scalar_type,
            nullable: true,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// Collapse `-0.0` onto `0.0` and every NaN payload onto one quiet NaN.
///
/// All float comparison, hashing and key encoding goes through this, so
/// `-0.0 = 0.0` holds and NaN sorts above every other float.
#[inline]
pub fn canonical_f64(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else if v.is_nan() {
        f64::NAN
    } else {
        v
    }
}

/// Total order over canonical floats
#[inline]
pub fn float_cmp(a: f64, b: f64) -> Ordering {
    canonical_f64(a).total_cmp(&canonical_f64(b))
}

/// A scalar literal or decoded cell value.
///
/// Floats compare and hash through `canonical_f64`, so that every stage of
/// the engine agrees on equality and ordering. NaN equals NaN and sorts
/// last, as in PostgreSQL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Date(i32),
    Timestamp(i64),
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Physical type this value is stored as, `None` for NULL
    pub fn physical_type(&self) -> Option<PhysicalType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(PhysicalType::Bool),
            Value::Int32(_) | Value::Date(_) => Some(PhysicalType::Int32),
            Value::Int64(_) | Value::Timestamp(_) => Some(PhysicalType::Int64),
            Value::Float64(_) => Some(PhysicalType::Float64),
            Value::String(_) => Some(PhysicalType::Utf8),
        }
    }

    /// Same value with floats in canonical form
    pub fn canonical(self) -> Value {
        match self {
            Value::Float64(v) => Value::Float64(canonical_f64(v)),
            other => other,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Three-way comparison between two non-null values of the same
    /// physical type. `None` when either side is NULL or types differ.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        if self.is_null() || other.is_null() || self.physical_type() != other.physical_type() {
            return None;
        }
        Some(self.cmp(other))
    }

    /// Canonical byte encoding used for bloom filter probes.
    /// Values that compare equal produce identical bytes.
    pub fn key_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9);
        match self {
            Value::Null => out.push(0),
            Value::Bool(b) => {
                out.push(1);
                out.push(*b as u8);
            }
            Value::Int32(v) | Value::Date(v) => {
                out.push(2);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Value::Int64(v) | Value::Timestamp(v) => {
                out.push(3);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Value::Float64(v) => {
                out.push(4);
                out.extend_from_slice(&canonical_f64(*v).to_bits().to_le_bytes());
            }
            Value::String(s) => {
                out.push(5);
                out.extend_from_slice(s.as_bytes());
            }
        }
        out
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int32(_) | Value::Date(_) => 2,
            Value::Int64(_) | Value::Timestamp(_) => 3,
            Value::Float64(_) => 4,
            Value::String(_) => 5,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int32(a) | Value::Date(a), Value::Int32(b) | Value::Date(b)) => a.cmp(b),
            (Value::Int64(a) | Value::Timestamp(a), Value::Int64(b) | Value::Timestamp(b)) => {
                a.cmp(b)
            }
            (Value::Float64(a), Value::Float64(b)) => float_cmp(*a, *b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            // Cross-type (and NULL): order by physical rank
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int32(v) | Value::Date(v) => v.hash(state),
            Value::Int64(v) | Value::Timestamp(v) => v.hash(state),
            Value::Float64(v) => canonical_f64(*v).to_bits().hash(state),
            Value::String(s) => s.hash(state),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "'{}'", s),
            Value::Date(d) => write!(f, "DATE {}", d),
            Value::Timestamp(t) => write!(f, "TIMESTAMP {}", t),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}
