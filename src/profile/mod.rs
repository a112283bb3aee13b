//! Table profiling and before/after summaries.

mod summary;

pub use summary::{profile_table, summarize, SampleSummary, SummaryReport, TableProfile};
