//! Ordinal code -> value tables for dictionary-encoded chunks
//!
//! A dictionary is owned by the segment reader and shared read-only by every
//! chunk (or the one chunk) it encodes. Codes `0..len` are densely populated
//! and values are unique. An order-preserving dictionary additionally
//! guarantees `code_a < code_b <=> value_a < value_b`.

use std::ops::Bound;

use ahash::AHashMap;

use super::{PhysicalType, Value};
use crate::{PredicateError, Result};

#[derive(Debug, Clone)]
pub struct Dictionary {
    values: Vec<Value>,
    /// Reverse lookup, only built for unordered dictionaries
    index: AHashMap<Value, u32>,
    order_preserving: bool,
}

impl Dictionary {
    /// Build a dictionary, validating uniqueness, NULL-freedom, a single
    /// physical type and (when declared) ascending order.
    pub fn new(values: Vec<Value>, order_preserving: bool) -> Result<Self> {
        if values.len() > u32::MAX as usize {
            return Err(PredicateError::InvalidDictionary("too many entries".into()));
        }
        let values: Vec<Value> = values.into_iter().map(Value::canonical).collect();
        let physical = values.first().and_then(|v| v.physical_type());
        for v in &values {
            if v.is_null() {
                return Err(PredicateError::InvalidDictionary("NULL entry".into()));
            }
            if v.physical_type() != physical {
                return Err(PredicateError::InvalidDictionary(format!(
                    "mixed value types ({} vs {:?})",
                    v, physical
                )));
            }
        }

        let mut index = AHashMap::new();
        if order_preserving {
            if let Some(pos) = values.windows(2).position(|w| w[0] >= w[1]) {
                return Err(PredicateError::InvalidDictionary(format!(
                    "order-preserving dictionary not strictly ascending at code {}",
                    pos + 1
                )));
            }
        } else {
            index.reserve(values.len());
            for (code, v) in values.iter().enumerate() {
                if index.insert(v.clone(), code as u32).is_some() {
                    return Err(PredicateError::InvalidDictionary(format!(
                        "duplicate value {}",
                        v
                    )));
                }
            }
        }

        Ok(Self {
            values,
            index,
            order_preserving,
        })
    }

    /// Number of codes
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_order_preserving(&self) -> bool {
        self.order_preserving
    }

    pub fn physical_type(&self) -> Option<PhysicalType> {
        self.values.first().and_then(|v| v.physical_type())
    }

    #[inline]
    pub fn value(&self, code: u32) -> Option<&Value> {
        self.values.get(code as usize)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Code of `value`: binary search when sorted, hash lookup otherwise
    pub fn lookup(&self, value: &Value) -> Option<u32> {
        if self.order_preserving {
            self.values.binary_search(value).ok().map(|c| c as u32)
        } else {
            self.index.get(value).copied()
        }
    }

    /// Half-open code interval `[lo, hi)` whose values satisfy the bounds.
    /// Only meaningful for order-preserving dictionaries.
    pub fn code_range(&self, lower: Bound<&Value>, upper: Bound<&Value>) -> Option<(u32, u32)> {
        if !self.order_preserving {
            return None;
        }
        let lo = match lower {
            Bound::Unbounded => 0,
            Bound::Included(v) => self.values.partition_point(|x| x < v),
            Bound::Excluded(v) => self.values.partition_point(|x| x <= v),
        };
        let hi = match upper {
            Bound::Unbounded => self.values.len(),
            Bound::Included(v) => self.values.partition_point(|x| x <= v),
            Bound::Excluded(v) => self.values.partition_point(|x| x < v),
        };
        Some((lo as u32, hi.max(lo) as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(v: &[&str]) -> Vec<Value> {
        v.iter().map(|s| Value::from(*s)).collect()
    }

    #[test]
    fn test_lookup_unordered() {
        let dict = Dictionary::new(strs(&["b", "a", "c"]), false).unwrap();
        assert_eq!(dict.lookup(&"a".into()), Some(1));
        assert_eq!(dict.lookup(&"z".into()), None);
        assert_eq!(dict.code_range(Bound::Unbounded, Bound::Unbounded), None);
    }

    #[test]
    fn test_lookup_sorted() {
        let dict = Dictionary::new(strs(&["a", "b", "c"]), true).unwrap();
        assert_eq!(dict.lookup(&"c".into()), Some(2));
        assert_eq!(dict.lookup(&"bb".into()), None);
    }

    #[test]
    fn test_rejects_invalid_dictionaries() {
        assert!(Dictionary::new(strs(&["a", "a"]), false).is_err());
        assert!(Dictionary::new(strs(&["b", "a"]), true).is_err());
        assert!(Dictionary::new(vec![Value::Null], false).is_err());
        assert!(Dictionary::new(vec![Value::Int64(1), "x".into()], false).is_err());
    }

    #[test]
    fn test_code_range() {
        let dict = Dictionary::new(
            vec![Value::Int64(10), Value::Int64(20), Value::Int64(30)],
            true,
        )
        .unwrap();
        let v15 = Value::Int64(15);
        let v20 = Value::Int64(20);
        assert_eq!(dict.code_range(Bound::Included(&v15), Bound::Unbounded), Some((1, 3)));
        assert_eq!(dict.code_range(Bound::Excluded(&v20), Bound::Unbounded), Some((2, 3)));
        assert_eq!(dict.code_range(Bound::Unbounded, Bound::Excluded(&v20)), Some((0, 1)));
        assert_eq!(dict.code_range(Bound::Unbounded, Bound::Included(&v20)), Some((0, 2)));
        // empty interval collapses to lo == hi
        assert_eq!(dict.code_range(Bound::Included(&v20), Bound::Excluded(&v15)), Some((1, 1)));
    }
}
