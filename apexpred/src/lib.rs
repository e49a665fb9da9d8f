//! ApexBase Predicate Pushdown Engine
//!
//! Filters rows read from encoded column storage during a table scan.
//! A pushed-down filter is built once per query and then driven through a
//! short-circuiting pipeline for every chunk of a segment:
//!
//! ```text
//! PredicateBuilder ──► DictionaryRewriter ──► ZoneMapPruner ──► IndexSeeker ──► Evaluator
//!   (once/query)         (once/chunk)          (once/chunk)     (once/chunk)    (rows left)
//! ```
//!
//! Every stage may end the chunk early with a definitive SKIP or ALL verdict.
//! Optimization structures (zone maps, dictionaries, bitmap/bloom/inverted
//! indexes) are only ever allowed to make the scan faster: a missing or
//! corrupt structure degrades to full evaluation, never to a wrong answer.

pub mod config;
pub mod data;
pub mod query;
pub mod storage;

pub use config::{BuilderConfig, EngineConfig};
pub use data::column::{ColumnChunk, ColumnValues, NullBitmap};
pub use data::dictionary::Dictionary;
pub use data::{ColumnDef, PhysicalType, ScalarType, Value};
pub use query::builder::{FilterOp, FilterRequest, PredicateBuilder, PushdownPlan};
pub use query::dict_rewriter::{DictPredicate, DictionaryRewriter, RewriteOutcome};
pub use query::evaluator::{Compose, EvalTarget, PredicateEvaluator};
pub use query::filter_tree::FilterExpr;
pub use query::index_seeker::{IndexSeeker, SeekOutcome};
pub use query::pipeline::{CancellationToken, ChunkPipeline, ChunkSelection, Scanner};
pub use query::predicate::{Predicate, PredicateKind};
pub use query::selection::{SelectionPolicy, SelectionVector};
pub use query::zone_map_pruner::{PruneVerdict, ZoneMapPruner};
pub use storage::bitmap_index::{BitmapIndex, RowIdSet};
pub use storage::bloom::{BloomProbe, ChunkBloomFilter};
pub use storage::index_handle::IndexHandle;
pub use storage::inverted::InvertedIndex;
pub use storage::metrics::{ScanMetrics, ScanMetricsSnapshot};
pub use storage::segment::SegmentSnapshot;
pub use storage::zone_map::ZoneMap;
pub use storage::{ChunkReader, DictionaryProvider, IndexProvider, SegmentSource, ZoneMapProvider};

/// Column identifier within a table schema
pub type ColumnId = u32;

/// Chunk ordinal within a segment
pub type ChunkId = u32;

/// Row position relative to the start of its chunk
pub type RowId = u32;

/// Reason a filter cannot be pushed into the scan.
///
/// Not a runtime failure: the caller keeps the filter and applies it after
/// the scan instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushdownRejectReason {
    UnsupportedType,
    NonDeterministicExpression,
    UnsupportedOperator,
}

impl std::fmt::Display for PushdownRejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushdownRejectReason::UnsupportedType => write!(f, "unsupported column type"),
            PushdownRejectReason::NonDeterministicExpression => {
                write!(f, "non-deterministic expression")
            }
            PushdownRejectReason::UnsupportedOperator => write!(f, "unsupported operator"),
        }
    }
}

/// Stage-local, non-fatal conditions.
///
/// These never abort a scan. The affected stage answers MAYBE and the rows
/// flow on to the next, more expensive stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Degradation {
    /// Index missing, failed to load, or failed validation
    IndexUnavailable { column_id: ColumnId, chunk_id: ChunkId, reason: String },
    /// Zone map statistics are inconsistent with themselves or the column
    CorruptZoneMap { column_id: ColumnId, chunk_id: ChunkId, reason: String },
}

impl std::fmt::Display for Degradation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Degradation::IndexUnavailable { column_id, chunk_id, reason } => write!(
                f,
                "index unavailable for column {} chunk {}: {}",
                column_id, chunk_id, reason
            ),
            Degradation::CorruptZoneMap { column_id, chunk_id, reason } => write!(
                f,
                "corrupt zone map for column {} chunk {}: {}",
                column_id, chunk_id, reason
            ),
        }
    }
}

/// Predicate engine error type
#[derive(Debug, thiserror::Error)]
pub enum PredicateError {
    #[error("predicate not pushable: {0}")]
    Unsupported(PushdownRejectReason),

    #[error("type mismatch on column {column}: {detail}")]
    TypeMismatch { column: String, detail: String },

    #[error("operator {op} expects {expected} literal(s), got {actual}")]
    Arity { op: String, expected: String, actual: usize },

    #[error("unknown column id: {0}")]
    UnknownColumn(ColumnId),

    #[error("invalid column chunk: {0}")]
    InvalidChunk(String),

    #[error("invalid dictionary: {0}")]
    InvalidDictionary(String),

    #[error("scan cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl PredicateError {
    /// True when the caller can fall back to filtering after the scan
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PredicateError::Unsupported(_))
    }
}

impl From<PushdownRejectReason> for PredicateError {
    fn from(reason: PushdownRejectReason) -> Self {
        PredicateError::Unsupported(reason)
    }
}

pub type Result<T> = std::result::Result<T, PredicateError>;
