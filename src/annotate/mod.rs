//! Annotation: map feature ids to gene symbols and symbols to categories.

pub mod lookup;
pub mod mapper;

pub use lookup::{namespace, AnnotationLookup, LookupError, LookupMapping, LookupRequest, TableLookup};
pub use mapper::{annotate_categories, annotate_symbols, AnnotateOptions, MatchReport};
