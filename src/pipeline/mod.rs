//! Pipeline composition and execution for gene consolidation.

mod runner;

pub use runner::{run_consolidation, Pipeline, PipelineConfig, PipelineOutput, PipelineStep, StageReport};
