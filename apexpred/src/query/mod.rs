//! Query-side stages: building, pruning, rewriting, seeking and evaluating
//! pushed-down predicates

pub mod builder;
pub mod dict_rewriter;
pub mod evaluator;
pub mod filter_tree;
pub mod index_seeker;
pub mod kernels;
pub mod pipeline;
pub mod predicate;
pub mod selection;
pub mod zone_map_pruner;
