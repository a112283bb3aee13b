//! Filtering primitives for expression tables.

pub mod category;
pub mod expression;

pub use category::filter_by_category;
pub use expression::{
    filter_count_in_samples, filter_expression, filter_mean_expression, ExpressionPredicate, FilterResult,
};
