//! Column chunks: typed value buffers, null bitmaps and dictionary codes

use std::sync::Arc;

use super::dictionary::Dictionary;
use super::{canonical_f64, PhysicalType, Value};
use crate::{PredicateError, Result};

/// Null bitmap over a chunk. A set bit marks a NULL row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NullBitmap {
    data: Vec<u64>,
    len: usize,
}

impl NullBitmap {
    pub fn new() -> Self {
        Self { data: Vec::new(), len: 0 }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity((capacity + 63) / 64),
            len: 0,
        }
    }

    /// Build from per-row null flags
    pub fn from_nulls(nulls: &[bool]) -> Self {
        let mut bitmap = Self::with_capacity(nulls.len());
        for &is_null in nulls {
            bitmap.push(is_null);
        }
        bitmap
    }

    #[inline]
    pub fn push(&mut self, is_null: bool) {
        let word_idx = self.len / 64;
        let bit_idx = self.len % 64;
        if word_idx >= self.data.len() {
            self.data.push(0);
        }
        if is_null {
            self.data[word_idx] |= 1u64 << bit_idx;
        }
        self.len += 1;
    }

    #[inline]
    pub fn is_null(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        (self.data[index / 64] >> (index % 64)) & 1 == 1
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of NULL rows
    pub fn null_count(&self) -> usize {
        self.data.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// No NULL rows at all - O(words)
    #[inline]
    pub fn all_valid(&self) -> bool {
        self.data.iter().all(|&w| w == 0)
    }

    /// Raw words; bits past `len` are always zero
    #[inline]
    pub fn words(&self) -> &[u64] {
        &self.data
    }
}

/// Physical value buffer of a chunk
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Bool(Vec<bool>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Utf8(Vec<String>),
    /// Dictionary codes; resolved through the chunk's dictionary
    Codes(Vec<u32>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Bool(v) => v.len(),
            ColumnValues::Int32(v) => v.len(),
            ColumnValues::Int64(v) => v.len(),
            ColumnValues::Float64(v) => v.len(),
            ColumnValues::Utf8(v) => v.len(),
            ColumnValues::Codes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Physical type of the materialized values, `None` for codes
    pub fn physical_type(&self) -> Option<PhysicalType> {
        match self {
            ColumnValues::Bool(_) => Some(PhysicalType::Bool),
            ColumnValues::Int32(_) => Some(PhysicalType::Int32),
            ColumnValues::Int64(_) => Some(PhysicalType::Int64),
            ColumnValues::Float64(_) => Some(PhysicalType::Float64),
            ColumnValues::Utf8(_) => Some(PhysicalType::Utf8),
            ColumnValues::Codes(_) => None,
        }
    }
}

/// One column's rows for one chunk of a segment.
///
/// Immutable for the lifetime of the scan snapshot. NULL slots in the value
/// buffer hold arbitrary placeholder values and are masked by the bitmap.
#[derive(Debug, Clone)]
pub struct ColumnChunk {
    row_count: usize,
    values: ColumnValues,
    nulls: Option<NullBitmap>,
    dictionary: Option<Arc<Dictionary>>,
}

impl ColumnChunk {
    /// Create a chunk, validating buffer, bitmap and code invariants
    pub fn new(
        mut values: ColumnValues,
        nulls: Option<NullBitmap>,
        dictionary: Option<Arc<Dictionary>>,
    ) -> Result<Self> {
        let row_count = values.len();
        if let Some(nulls) = &nulls {
            if nulls.len() != row_count {
                return Err(PredicateError::InvalidChunk(format!(
                    "null bitmap covers {} rows, buffer has {}",
                    nulls.len(),
                    row_count
                )));
            }
        }
        match (&values, &dictionary) {
            (ColumnValues::Codes(codes), Some(dict)) => {
                let card = dict.len();
                if let Some(bad) = codes.iter().find(|&&c| c as usize >= card) {
                    return Err(PredicateError::InvalidChunk(format!(
                        "code {} out of range for dictionary of {} entries",
                        bad, card
                    )));
                }
            }
            (ColumnValues::Codes(_), None) => {
                return Err(PredicateError::InvalidChunk(
                    "dictionary codes without a dictionary".into(),
                ));
            }
            (_, Some(_)) => {
                return Err(PredicateError::InvalidChunk(
                    "dictionary attached to a plain value buffer".into(),
                ));
            }
            _ => {}
        }
        if let ColumnValues::Float64(floats) = &mut values {
            floats.iter_mut().for_each(|v| *v = canonical_f64(*v));
        }
        Ok(Self {
            row_count,
            values,
            nulls,
            dictionary,
        })
    }

    /// Plain (non-dictionary) chunk
    pub fn plain(values: ColumnValues, nulls: Option<NullBitmap>) -> Result<Self> {
        Self::new(values, nulls, None)
    }

    /// Dictionary-encoded chunk
    pub fn encoded(
        codes: Vec<u32>,
        nulls: Option<NullBitmap>,
        dictionary: Arc<Dictionary>,
    ) -> Result<Self> {
        Self::new(ColumnValues::Codes(codes), nulls, Some(dictionary))
    }

    /// Build a plain chunk from optional values; all non-null entries must
    /// share one physical type.
    pub fn from_values(physical: PhysicalType, values: &[Value]) -> Result<Self> {
        let mut nulls = NullBitmap::with_capacity(values.len());
        let mismatch = |v: &Value| {
            PredicateError::InvalidChunk(format!("value {} is not {:?}", v, physical))
        };
        macro_rules! collect {
            ($variant:ident, $default:expr, $extract:expr) => {{
                let mut out = Vec::with_capacity(values.len());
                for v in values {
                    if v.is_null() {
                        nulls.push(true);
                        out.push($default);
                    } else {
                        nulls.push(false);
                        out.push($extract(v).ok_or_else(|| mismatch(v))?);
                    }
                }
                ColumnValues::$variant(out)
            }};
        }
        let buffer = match physical {
            PhysicalType::Bool => collect!(Bool, false, |v: &Value| match v {
                Value::Bool(b) => Some(*b),
                _ => None,
            }),
            PhysicalType::Int32 => collect!(Int32, 0, |v: &Value| match v {
                Value::Int32(x) | Value::Date(x) => Some(*x),
                _ => None,
            }),
            PhysicalType::Int64 => collect!(Int64, 0, |v: &Value| match v {
                Value::Int64(x) | Value::Timestamp(x) => Some(*x),
                _ => None,
            }),
            PhysicalType::Float64 => collect!(Float64, 0.0, |v: &Value| match v {
                Value::Float64(x) => Some(*x),
                _ => None,
            }),
            PhysicalType::Utf8 => collect!(Utf8, String::new(), |v: &Value| match v {
                Value::String(s) => Some(s.clone()),
                _ => None,
            }),
        };
        let nulls = if nulls.all_valid() { None } else { Some(nulls) };
        Self::plain(buffer, nulls)
    }

    #[inline]
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    #[inline]
    pub fn values(&self) -> &ColumnValues {
        &self.values
    }

    #[inline]
    pub fn nulls(&self) -> Option<&NullBitmap> {
        self.nulls.as_ref()
    }

    #[inline]
    pub fn dictionary(&self) -> Option<&Arc<Dictionary>> {
        self.dictionary.as_ref()
    }

    pub fn is_dictionary_encoded(&self) -> bool {
        matches!(self.values, ColumnValues::Codes(_))
    }

    #[inline]
    pub fn is_null(&self, row: usize) -> bool {
        self.nulls.as_ref().map_or(false, |n| n.is_null(row))
    }

    pub fn null_count(&self) -> usize {
        self.nulls.as_ref().map_or(0, |n| n.null_count())
    }

    /// Decoded value of one row (`Value::Null` for NULL rows).
    /// Logical types like Date/Timestamp come back as their physical variant.
    pub fn value(&self, row: usize) -> Value {
        if self.is_null(row) {
            return Value::Null;
        }
        match &self.values {
            ColumnValues::Bool(v) => Value::Bool(v[row]),
            ColumnValues::Int32(v) => Value::Int32(v[row]),
            ColumnValues::Int64(v) => Value::Int64(v[row]),
            ColumnValues::Float64(v) => Value::Float64(v[row]),
            ColumnValues::Utf8(v) => Value::String(v[row].clone()),
            ColumnValues::Codes(codes) => match &self.dictionary {
                Some(dict) => dict.value(codes[row]).cloned().unwrap_or(Value::Null),
                None => Value::Null,
            },
        }
    }

    /// Materialize dictionary codes into a plain buffer (gather through the
    /// dictionary). Plain chunks are returned as-is.
    pub fn decode(&self) -> Result<ColumnChunk> {
        let (codes, dict) = match (&self.values, &self.dictionary) {
            (ColumnValues::Codes(codes), Some(dict)) => (codes, dict),
            _ => return Ok(self.clone()),
        };
        let physical = dict.physical_type().ok_or_else(|| {
            PredicateError::InvalidDictionary("cannot decode an empty dictionary".into())
        })?;
        let decoded: Vec<Value> = codes
            .iter()
            .enumerate()
            .map(|(row, &code)| {
                if self.is_null(row) {
                    Value::Null
                } else {
                    dict.value(code).cloned().unwrap_or(Value::Null)
                }
            })
            .collect();
        let mut plain = ColumnChunk::from_values(physical, &decoded)?;
        // keep the original bitmap so NULL rows stay NULL even if the
        // dictionary maps their placeholder code to a real value
        plain.nulls = self.nulls.clone();
        Ok(plain)
    }
}
