//! Core data structures for gene-level count consolidation.

mod feature;
mod table;

pub use feature::{strip_version, FeatureRecord, Symbol};
pub use table::ExpressionTable;
