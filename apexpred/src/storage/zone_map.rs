//! Per-chunk min/max/null-count statistics
//!
//! `min`/`max` cover non-null values only. Every non-null value `v` of the
//! chunk satisfies `min <= v <= max` under the engine's total value order.

use serde::{Deserialize, Serialize};

use crate::data::column::ColumnChunk;
use crate::data::{PhysicalType, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneMap {
    /// Smallest non-null value, `None` when every row is NULL
    pub min: Option<Value>,
    /// Largest non-null value, `None` when every row is NULL
    pub max: Option<Value>,
    pub null_count: u64,
    pub row_count: u64,
    pub has_all_null: bool,
}

impl ZoneMap {
    pub fn new(min: Value, max: Value, null_count: u64, row_count: u64) -> Self {
        Self {
            min: Some(min.canonical()),
            max: Some(max.canonical()),
            null_count,
            row_count,
            has_all_null: row_count > 0 && null_count == row_count,
        }
    }

    /// Zone map of a chunk whose rows are all NULL
    pub fn all_null(row_count: u64) -> Self {
        Self {
            min: None,
            max: None,
            null_count: row_count,
            row_count,
            has_all_null: true,
        }
    }

    /// Compute statistics from chunk contents
    pub fn from_chunk(chunk: &ColumnChunk) -> Self {
        let mut min: Option<Value> = None;
        let mut max: Option<Value> = None;
        let mut null_count = 0u64;

        for row in 0..chunk.row_count() {
            let v = chunk.value(row).canonical();
            if v.is_null() {
                null_count += 1;
                continue;
            }
            if min.as_ref().map_or(true, |m| v < *m) {
                min = Some(v.clone());
            }
            if max.as_ref().map_or(true, |m| v > *m) {
                max = Some(v);
            }
        }

        let row_count = chunk.row_count() as u64;
        Self {
            min,
            max,
            null_count,
            row_count,
            has_all_null: row_count > 0 && null_count == row_count,
        }
    }

    /// Check internal consistency and agreement with the column's physical
    /// type. Returns a description of the first problem found.
    pub fn validate(&self, physical: Option<PhysicalType>) -> std::result::Result<(), String> {
        if self.null_count > self.row_count {
            return Err(format!(
                "null_count {} exceeds row_count {}",
                self.null_count, self.row_count
            ));
        }
        let all_null = self.row_count > 0 && self.null_count == self.row_count;
        if self.has_all_null != all_null {
            return Err("has_all_null disagrees with null_count".into());
        }
        match (&self.min, &self.max) {
            (None, None) => {
                if self.null_count < self.row_count {
                    return Err("missing min/max for a chunk with non-null rows".into());
                }
            }
            (Some(min), Some(max)) => {
                if min.is_null() || max.is_null() {
                    return Err("NULL min/max".into());
                }
                if min.physical_type() != physical || max.physical_type() != physical {
                    return Err(format!(
                        "bound types ({:?}, {:?}) do not match column type {:?}",
                        min.physical_type(),
                        max.physical_type(),
                        physical
                    ));
                }
                if min > max {
                    return Err(format!("min {} greater than max {}", min, max));
                }
                if all_null {
                    return Err("min/max present on an all-null chunk".into());
                }
            }
            _ => return Err("only one of min/max present".into()),
        }
        Ok(())
    }
}
