//! Gene identity consolidation and filtering for expression count tables.
//!
//! Turns a raw feature-level count table (one row per feature id, one count
//! per sample) into a clean matrix keyed by unique gene symbols.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Core data structures (ExpressionTable, FeatureRecord, Symbol)
//! - **annotate**: Symbol and category annotation through a lookup collaborator
//! - **consolidate**: Duplicate symbol resolution (first, random, average, highest)
//! - **filter**: Expression and category filters
//! - **profile**: Table profiles and before/after summaries
//! - **pipeline**: Pipeline composition and execution
//!
//! Every stage takes a table by reference and returns a new one.
//!
//! # Example
//!
//! ```no_run
//! use gene_consolidate::prelude::*;
//!
//! let counts = ExpressionTable::from_tsv("counts.tsv").unwrap();
//! let lookup = TableLookup::from_tsv("biomart.tsv", "hsapiens_gene_ensembl").unwrap();
//!
//! let output = Pipeline::new()
//!     .annotate_symbols(&AnnotateOptions::default().with_strip_version(true))
//!     .resolve_duplicates(MergeMethod::Highest, DEFAULT_SEED)
//!     .filter_count_in_samples(10.0, 3)
//!     .run(&counts, &lookup)
//!     .unwrap();
//!
//! output.table.to_tsv("genes.tsv").unwrap();
//! println!("{}", output.summary);
//! ```

pub mod annotate;
pub mod consolidate;
pub mod data;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod profile;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::annotate::{
        annotate_categories, annotate_symbols, namespace, AnnotateOptions, AnnotationLookup, LookupError,
        LookupMapping, LookupRequest, MatchReport, TableLookup,
    };
    pub use crate::consolidate::{
        find_duplicates, resolve_duplicates, DuplicateGroup, DuplicateReport, MergeMethod, DEFAULT_SEED,
    };
    pub use crate::data::{ExpressionTable, FeatureRecord, Symbol};
    pub use crate::error::{Column, ConsolidateError, Result};
    pub use crate::filter::{
        filter_by_category, filter_count_in_samples, filter_expression, filter_mean_expression,
        ExpressionPredicate, FilterResult,
    };
    pub use crate::pipeline::{run_consolidation, Pipeline, PipelineConfig, PipelineOutput, PipelineStep, StageReport};
    pub use crate::profile::{profile_table, summarize, SampleSummary, SummaryReport, TableProfile};
}
