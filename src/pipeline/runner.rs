//! Pipeline runner for composing and executing consolidation steps.

use crate::annotate::{annotate_categories, annotate_symbols, namespace, AnnotateOptions, AnnotationLookup, MatchReport};
use crate::consolidate::{resolve_duplicates, DuplicateReport, MergeMethod, DEFAULT_SEED};
use crate::data::ExpressionTable;
use crate::error::{ConsolidateError, Result};
use crate::filter::{filter_by_category, filter_expression, ExpressionPredicate, FilterResult};
use crate::profile::{summarize, SummaryReport};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_dataset() -> String {
    "hsapiens_gene_ensembl".to_string()
}

fn default_id_namespace() -> String {
    namespace::ENSEMBL_GENE_ID.to_string()
}

fn default_symbol_namespace() -> String {
    namespace::GENE_SYMBOL.to_string()
}

fn default_category_namespace() -> String {
    namespace::GENE_BIOTYPE.to_string()
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

/// A step in the consolidation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineStep {
    // === Annotation ===
    /// Resolve feature ids to gene symbols.
    AnnotateSymbols {
        #[serde(default = "default_dataset")]
        dataset: String,
        #[serde(default = "default_id_namespace")]
        id_namespace: String,
        #[serde(default = "default_symbol_namespace")]
        symbol_namespace: String,
        #[serde(default)]
        discard_unmatched: bool,
        #[serde(default)]
        strip_version: bool,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    /// Resolve gene symbols to categories.
    AnnotateCategories {
        #[serde(default = "default_dataset")]
        dataset: String,
        #[serde(default = "default_symbol_namespace")]
        symbol_namespace: String,
        #[serde(default = "default_category_namespace")]
        category_namespace: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    // === Consolidation ===
    /// Merge rows sharing a symbol.
    ResolveDuplicates {
        method: MergeMethod,
        #[serde(default = "default_seed")]
        seed: u64,
    },

    // === Filtering ===
    /// Filter by mean and/or count-in-samples thresholds.
    FilterExpression {
        #[serde(default)]
        min_mean: Option<f64>,
        #[serde(default)]
        min_count: Option<f64>,
        #[serde(default)]
        min_samples: Option<usize>,
    },
    /// Keep only the listed categories.
    FilterCategory { allowed: Vec<String> },
}

impl PipelineStep {
    /// Short stage name used in logs and error context.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStep::AnnotateSymbols { .. } => "annotate_symbols",
            PipelineStep::AnnotateCategories { .. } => "annotate_categories",
            PipelineStep::ResolveDuplicates { .. } => "resolve_duplicates",
            PipelineStep::FilterExpression { .. } => "filter_expression",
            PipelineStep::FilterCategory { .. } => "filter_category",
        }
    }
}

/// Report produced by one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageReport {
    Annotation(MatchReport),
    Duplicates(DuplicateReport),
    Filter(FilterResult),
}

/// Pipeline configuration for serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name of the pipeline.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Steps to execute.
    pub steps: Vec<PipelineStep>,
}

/// Merge method names of a config, read before the full parse so a bad
/// name surfaces as `UnknownMethod` instead of a format error.
#[derive(Deserialize)]
struct MethodNames {
    #[serde(default)]
    steps: Vec<StepMethod>,
}

#[derive(Deserialize)]
enum StepMethod {
    AnnotateSymbols(IgnoredAny),
    AnnotateCategories(IgnoredAny),
    ResolveDuplicates { method: String },
    FilterExpression(IgnoredAny),
    FilterCategory(IgnoredAny),
}

impl MethodNames {
    fn check(self) -> Result<()> {
        for step in self.steps {
            if let StepMethod::ResolveDuplicates { method } = step {
                method.parse::<MergeMethod>()?;
            }
        }
        Ok(())
    }
}

impl PipelineConfig {
    /// Load from YAML string.
    ///
    /// # Errors
    /// `UnknownMethod` if a `ResolveDuplicates` step names an unsupported method.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if let Ok(names) = serde_yaml::from_str::<MethodNames>(yaml) {
            names.check()?;
        }
        serde_yaml::from_str(yaml).map_err(ConsolidateError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(ConsolidateError::from)
    }

    /// Load from JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        if let Ok(names) = serde_json::from_str::<MethodNames>(json) {
            names.check()?;
        }
        serde_json::from_str(json).map_err(ConsolidateError::from)
    }

    /// Save to JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(ConsolidateError::from)
    }
}

/// Result of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Final table.
    pub table: ExpressionTable,
    /// One report per executed step, in order.
    pub reports: Vec<StageReport>,
    /// Input vs. final table.
    pub summary: SummaryReport,
}

/// Builder for constructing and running consolidation pipelines.
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Vec<PipelineStep>,
    name: String,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Create a new empty pipeline.
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            name: "unnamed".to_string(),
        }
    }

    /// Create from a config.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            steps: config.steps.clone(),
            name: config.name.clone(),
        }
    }

    /// Set the pipeline name.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Add symbol annotation.
    pub fn annotate_symbols(mut self, options: &AnnotateOptions) -> Self {
        self.steps.push(PipelineStep::AnnotateSymbols {
            dataset: options.dataset.clone(),
            id_namespace: options.id_namespace.clone(),
            symbol_namespace: options.symbol_namespace.clone(),
            discard_unmatched: options.discard_unmatched,
            strip_version: options.strip_version,
            timeout_ms: options.timeout.map(|t| t.as_millis() as u64),
        });
        self
    }

    /// Add category annotation.
    pub fn annotate_categories(mut self, options: &AnnotateOptions) -> Self {
        self.steps.push(PipelineStep::AnnotateCategories {
            dataset: options.dataset.clone(),
            symbol_namespace: options.symbol_namespace.clone(),
            category_namespace: options.category_namespace.clone(),
            timeout_ms: options.timeout.map(|t| t.as_millis() as u64),
        });
        self
    }

    /// Add duplicate resolution.
    pub fn resolve_duplicates(mut self, method: MergeMethod, seed: u64) -> Self {
        self.steps.push(PipelineStep::ResolveDuplicates { method, seed });
        self
    }

    /// Add an expression filter.
    pub fn filter_expression(mut self, predicate: &ExpressionPredicate) -> Self {
        self.steps.push(PipelineStep::FilterExpression {
            min_mean: predicate.min_mean,
            min_count: predicate.min_count,
            min_samples: predicate.min_samples,
        });
        self
    }

    /// Keep rows whose mean count is strictly above `min_mean`.
    pub fn filter_mean(self, min_mean: f64) -> Self {
        self.filter_expression(&ExpressionPredicate::mean(min_mean))
    }

    /// Keep rows with at least `min_samples` samples strictly above `min_count`.
    pub fn filter_count_in_samples(self, min_count: f64, min_samples: usize) -> Self {
        self.filter_expression(&ExpressionPredicate::count_in_samples(min_count, min_samples))
    }

    /// Add a category filter.
    pub fn filter_category<S: AsRef<str>>(mut self, allowed: &[S]) -> Self {
        self.steps.push(PipelineStep::FilterCategory {
            allowed: allowed.iter().map(|s| s.as_ref().to_string()).collect(),
        });
        self
    }

    /// Convert to config for serialization.
    pub fn to_config(&self, description: Option<&str>) -> PipelineConfig {
        PipelineConfig {
            name: self.name.clone(),
            description: description.map(String::from),
            steps: self.steps.clone(),
        }
    }

    /// Run the pipeline on a table.
    ///
    /// The input is never modified. A failing step aborts the run; its error
    /// is wrapped with the step number and name.
    pub fn run<L: AnnotationLookup + ?Sized>(&self, table: &ExpressionTable, lookup: &L) -> Result<PipelineOutput> {
        log::info!("Running pipeline '{}' ({} steps)", self.name, self.steps.len());
        let mut state = PipelineState::new(table.clone());

        for (i, step) in self.steps.iter().enumerate() {
            log::info!("Step {}: {}", i + 1, step.name());
            state = state.apply(step, lookup).map_err(|e| ConsolidateError::Stage {
                step: i + 1,
                stage: step.name().to_string(),
                source: Box::new(e),
            })?;
        }

        let summary = summarize(table, &state.table);
        Ok(PipelineOutput {
            table: state.table,
            reports: state.reports,
            summary,
        })
    }
}

/// Internal state during pipeline execution.
struct PipelineState {
    table: ExpressionTable,
    reports: Vec<StageReport>,
}

impl PipelineState {
    fn new(table: ExpressionTable) -> Self {
        Self {
            table,
            reports: Vec::new(),
        }
    }

    fn apply<L: AnnotationLookup + ?Sized>(mut self, step: &PipelineStep, lookup: &L) -> Result<Self> {
        match step {
            // === Annotation ===
            PipelineStep::AnnotateSymbols {
                dataset,
                id_namespace,
                symbol_namespace,
                discard_unmatched,
                strip_version,
                timeout_ms,
            } => {
                let options = AnnotateOptions {
                    dataset: dataset.clone(),
                    id_namespace: id_namespace.clone(),
                    symbol_namespace: symbol_namespace.clone(),
                    discard_unmatched: *discard_unmatched,
                    strip_version: *strip_version,
                    timeout: timeout_ms.map(Duration::from_millis),
                    ..AnnotateOptions::default()
                };
                let (table, report) = annotate_symbols(&self.table, lookup, &options)?;
                self.table = table;
                self.reports.push(StageReport::Annotation(report));
            }
            PipelineStep::AnnotateCategories {
                dataset,
                symbol_namespace,
                category_namespace,
                timeout_ms,
            } => {
                let options = AnnotateOptions {
                    dataset: dataset.clone(),
                    symbol_namespace: symbol_namespace.clone(),
                    category_namespace: category_namespace.clone(),
                    timeout: timeout_ms.map(Duration::from_millis),
                    ..AnnotateOptions::default()
                };
                let (table, report) = annotate_categories(&self.table, lookup, &options)?;
                self.table = table;
                self.reports.push(StageReport::Annotation(report));
            }

            // === Consolidation ===
            PipelineStep::ResolveDuplicates { method, seed } => {
                let (table, report) = resolve_duplicates(&self.table, *method, *seed)?;
                self.table = table;
                self.reports.push(StageReport::Duplicates(report));
            }

            // === Filtering ===
            PipelineStep::FilterExpression {
                min_mean,
                min_count,
                min_samples,
            } => {
                let predicate = ExpressionPredicate {
                    min_mean: *min_mean,
                    min_count: *min_count,
                    min_samples: *min_samples,
                };
                let (table, result) = filter_expression(&self.table, &predicate)?;
                self.table = table;
                self.reports.push(StageReport::Filter(result));
            }
            PipelineStep::FilterCategory { allowed } => {
                let (table, result) = filter_by_category(&self.table, allowed)?;
                self.table = table;
                self.reports.push(StageReport::Filter(result));
            }
        }
        Ok(self)
    }
}

/// Run the standard consolidation: annotate symbols, merge duplicates,
/// filter by expression, then (if `categories` is given) annotate and
/// filter by category.
pub fn run_consolidation<L: AnnotationLookup + ?Sized>(
    table: &ExpressionTable,
    lookup: &L,
    annotate: &AnnotateOptions,
    method: MergeMethod,
    seed: u64,
    predicate: &ExpressionPredicate,
    categories: Option<&[String]>,
) -> Result<PipelineOutput> {
    let mut pipeline = Pipeline::new()
        .name("consolidate")
        .annotate_symbols(annotate)
        .resolve_duplicates(method, seed)
        .filter_expression(predicate);
    if let Some(allowed) = categories {
        pipeline = pipeline.annotate_categories(annotate).filter_category(allowed);
    }
    pipeline.run(table, lookup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::{LookupError, LookupMapping, LookupRequest, TableLookup};
    use crate::data::FeatureRecord;
    use crate::error::Column;

    fn create_table() -> ExpressionTable {
        let features = vec![
            FeatureRecord::new("ENSG1"),
            FeatureRecord::new("ENSG2"),
            FeatureRecord::new("ENSG3"),
            FeatureRecord::new("ENSG4"),
            FeatureRecord::new("ENSG5"),
        ];
        let rows = vec![
            vec![100.0, 110.0, 90.0],
            vec![150.0, 160.0, 170.0],
            vec![0.0, 1.0, 0.0],
            vec![40.0, 50.0, 60.0],
            vec![9.0, 9.0, 9.0],
        ];
        let samples = vec!["S1".to_string(), "S2".to_string(), "S3".to_string()];
        ExpressionTable::from_rows(features, rows, samples).unwrap()
    }

    fn create_lookup() -> TableLookup {
        let columns = vec![
            namespace::ENSEMBL_GENE_ID.to_string(),
            namespace::GENE_SYMBOL.to_string(),
            namespace::GENE_BIOTYPE.to_string(),
        ];
        let row = |a: &str, b: &str, c: &str| vec![a.to_string(), b.to_string(), c.to_string()];
        let rows = vec![
            row("ENSG1", "G1", "protein_coding"),
            row("ENSG2", "G1", "protein_coding"),
            row("ENSG3", "G3", "lncRNA"),
            row("ENSG4", "G4", "lncRNA"),
        ];
        TableLookup::new("hsapiens_gene_ensembl", columns, rows).unwrap()
    }

    struct DownLookup;

    impl AnnotationLookup for DownLookup {
        fn resolve(&self, _request: &LookupRequest<'_>) -> std::result::Result<LookupMapping, LookupError> {
            Err(LookupError::Unreachable("no route to host".to_string()))
        }
    }

    #[test]
    fn test_pipeline_builder() {
        let pipeline = Pipeline::new()
            .name("test")
            .annotate_symbols(&AnnotateOptions::default())
            .resolve_duplicates(MergeMethod::Highest, 42)
            .filter_mean(10.0)
            .annotate_categories(&AnnotateOptions::default())
            .filter_category(&["protein_coding"]);

        let config = pipeline.to_config(Some("Test pipeline"));
        assert_eq!(config.steps.len(), 5);
        assert_eq!(config.name, "test");
    }

    #[test]
    fn test_pipeline_run() {
        let output = Pipeline::new()
            .annotate_symbols(&AnnotateOptions::default().with_discard_unmatched(true))
            .resolve_duplicates(MergeMethod::Highest, DEFAULT_SEED)
            .filter_mean(10.0)
            .run(&create_table(), &create_lookup())
            .unwrap();

        // ENSG5 unmatched, G1 collapses to ENSG2, G3 fails the mean filter
        assert_eq!(output.table.feature_ids(), vec!["ENSG2", "ENSG4"]);
        assert_eq!(output.table.symbols(), vec![Some("G1"), Some("G4")]);
        assert_eq!(output.reports.len(), 3);
        assert_eq!(output.summary.before.n_rows, 5);
        assert_eq!(output.summary.after.n_rows, 2);
        assert_eq!(output.summary.rows_removed, 3);
    }

    #[test]
    fn test_run_consolidation_with_categories() {
        let allowed = vec!["protein_coding".to_string()];
        let output = run_consolidation(
            &create_table(),
            &create_lookup(),
            &AnnotateOptions::default(),
            MergeMethod::Average,
            DEFAULT_SEED,
            &ExpressionPredicate::count_in_samples(5.0, 2),
            Some(&allowed),
        )
        .unwrap();

        assert_eq!(output.table.feature_ids(), vec!["ENSG1"]);
        assert_eq!(output.table.row_dense(0), vec![125.0, 135.0, 130.0]);
        assert_eq!(output.table.features()[0].category.as_deref(), Some("protein_coding"));
    }

    #[test]
    fn test_category_filter_without_annotation_fails() {
        let err = Pipeline::new()
            .annotate_symbols(&AnnotateOptions::default())
            .filter_category(&["protein_coding"])
            .run(&create_table(), &create_lookup())
            .unwrap_err();

        assert!(err.is_missing(Column::Category));
        match err {
            ConsolidateError::Stage { step, stage, .. } => {
                assert_eq!(step, 2);
                assert_eq!(stage, "filter_category");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_lookup_failure_aborts_pipeline() {
        let err = Pipeline::new()
            .annotate_symbols(&AnnotateOptions::default())
            .resolve_duplicates(MergeMethod::First, DEFAULT_SEED)
            .run(&create_table(), &DownLookup)
            .unwrap_err();
        assert!(matches!(err.root(), ConsolidateError::LookupUnavailable { .. }));
    }

    #[test]
    fn test_resolve_before_annotation_fails() {
        let err = Pipeline::new()
            .resolve_duplicates(MergeMethod::First, DEFAULT_SEED)
            .run(&create_table(), &create_lookup())
            .unwrap_err();
        assert!(err.is_missing(Column::Symbol));
    }

    #[test]
    fn test_pipeline_config_yaml() {
        let pipeline = Pipeline::new()
            .name("example")
            .annotate_symbols(&AnnotateOptions::default().with_strip_version(true))
            .resolve_duplicates(MergeMethod::Random, 7)
            .filter_expression(&ExpressionPredicate::both(1.0, 10.0, 3))
            .annotate_categories(&AnnotateOptions::default())
            .filter_category(&["protein_coding", "lncRNA"]);

        let config = pipeline.to_config(Some("Example consolidation pipeline"));
        let yaml = config.to_yaml().unwrap();
        let parsed = PipelineConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, config);

        let json = config.to_json().unwrap();
        assert_eq!(PipelineConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_pipeline_config_defaults() {
        let yaml = r#"
name: minimal
description: null
steps:
  - !AnnotateSymbols {}
  - !ResolveDuplicates
    method: average
  - !FilterExpression
    min_mean: 5.0
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.steps.len(), 3);
        assert_eq!(
            config.steps[1],
            PipelineStep::ResolveDuplicates {
                method: MergeMethod::Average,
                seed: DEFAULT_SEED,
            }
        );
        match &config.steps[0] {
            PipelineStep::AnnotateSymbols { dataset, discard_unmatched, .. } => {
                assert_eq!(dataset, "hsapiens_gene_ensembl");
                assert!(!discard_unmatched);
            }
            other => panic!("unexpected step: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_method_in_config() {
        let yaml = r#"
name: bad
description: null
steps:
  - !ResolveDuplicates
    method: median
"#;
        let err = PipelineConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err.root(), ConsolidateError::UnknownMethod(name) if name == "median"));

        let json = r#"{"name": "bad", "description": null, "steps": [{"ResolveDuplicates": {"method": "median"}}]}"#;
        let err = PipelineConfig::from_json(json).unwrap_err();
        assert!(matches!(err.root(), ConsolidateError::UnknownMethod(_)));
    }

    #[test]
    fn test_method_aliases_in_config() {
        let yaml = r#"
name: aliases
description: null
steps:
  - !AnnotateSymbols {}
  - !ResolveDuplicates
    method: mean
  - !ResolveDuplicates
    method: Highest
    seed: 3
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.steps[1],
            PipelineStep::ResolveDuplicates {
                method: MergeMethod::Average,
                seed: DEFAULT_SEED,
            }
        );
        assert_eq!(
            config.steps[2],
            PipelineStep::ResolveDuplicates {
                method: MergeMethod::Highest,
                seed: 3,
            }
        );
        // aliases are written back under their canonical name
        assert!(config.to_yaml().unwrap().contains("method: average"));
    }
}
