//! Engine tunables
//!
//! Both structs are plain values with defaults; a catalog may persist them
//! alongside the table metadata.

use serde::{Deserialize, Serialize};

/// Literal count at or below which IN-lists are scanned linearly
const DEFAULT_IN_SET_LINEAR_THRESHOLD: usize = 4;

/// Dictionaries with more codes than this fall back to hashed code sets
const DEFAULT_CODE_MASK_MAX_CARDINALITY: usize = 1 << 20;

/// Emit run-length ranges when runs <= rows / divisor
const DEFAULT_SELECTION_RUN_DIVISOR: usize = 32;

/// Below this many chunks a scan stays on the calling thread
const DEFAULT_MIN_PARALLEL_CHUNKS: usize = 2;

/// Evaluation / pruning configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// IN-list size up to which a flat array is used instead of a hash set
    pub in_set_linear_threshold: usize,
    /// Largest dictionary served by a direct code bitmask
    pub code_mask_max_cardinality: usize,
    /// Density divisor for choosing the output selection representation
    pub selection_run_divisor: usize,
    /// Consult zone maps
    pub use_zone_maps: bool,
    /// Rewrite predicates into dictionary code space
    pub use_dictionaries: bool,
    /// Consult bitmap / bloom / inverted indexes
    pub use_indexes: bool,
    /// Process chunks on the rayon pool
    pub parallel: bool,
    /// Minimum chunk count before the scan goes parallel
    pub min_parallel_chunks: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            in_set_linear_threshold: DEFAULT_IN_SET_LINEAR_THRESHOLD,
            code_mask_max_cardinality: DEFAULT_CODE_MASK_MAX_CARDINALITY,
            selection_run_divisor: DEFAULT_SELECTION_RUN_DIVISOR,
            use_zone_maps: true,
            use_dictionaries: true,
            use_indexes: true,
            parallel: true,
            min_parallel_chunks: DEFAULT_MIN_PARALLEL_CHUNKS,
        }
    }
}

impl EngineConfig {
    /// Configuration with every optimization structure disabled.
    /// Results must be identical to the default configuration.
    pub fn naive() -> Self {
        Self {
            use_zone_maps: false,
            use_dictionaries: false,
            use_indexes: false,
            ..Self::default()
        }
    }

    pub fn with_in_set_linear_threshold(mut self, threshold: usize) -> Self {
        self.in_set_linear_threshold = threshold;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Literal normalization settings used at plan time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// UTC offset (seconds east) applied to timestamp literals without one
    pub session_utc_offset_secs: i32,
    /// Longest accepted IN / NOT IN list
    pub max_in_list_len: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            session_utc_offset_secs: 0,
            max_in_list_len: 65_536,
        }
    }
}
