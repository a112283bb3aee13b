//! genecon - Gene identity consolidation CLI
//!
//! Command-line interface for annotating, de-duplicating and filtering
//! feature count tables.

use clap::{Parser, Subcommand, ValueEnum};
use gene_consolidate::annotate::{namespace, AnnotateOptions, TableLookup};
use gene_consolidate::consolidate::{MergeMethod, DEFAULT_SEED};
use gene_consolidate::data::ExpressionTable;
use gene_consolidate::error::Result;
use gene_consolidate::filter::ExpressionPredicate;
use gene_consolidate::pipeline::{Pipeline, PipelineConfig, PipelineOutput};
use gene_consolidate::profile::{summarize, SummaryReport};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Output format for summaries
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
    Yaml,
}

/// Gene identity consolidation and filtering
#[derive(Parser)]
#[command(name = "genecon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline from a YAML configuration file
    Run {
        /// Path to pipeline configuration YAML
        #[arg(long)]
        config: PathBuf,

        /// Path to feature count table (TSV)
        #[arg(short = 'c', long)]
        counts: PathBuf,

        /// Path to annotation table (TSV, one column per namespace)
        #[arg(short, long)]
        annotation: PathBuf,

        /// Organism dataset the annotation table belongs to
        #[arg(long, default_value = "hsapiens_gene_ensembl")]
        dataset: String,

        /// Output path for the consolidated table
        #[arg(short, long)]
        output: PathBuf,

        /// Optional path for a JSON summary
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Annotate, merge duplicates and filter in the standard order
    Consolidate {
        /// Path to feature count table (TSV)
        #[arg(short = 'c', long)]
        counts: PathBuf,

        /// Path to annotation table (TSV, one column per namespace)
        #[arg(short, long)]
        annotation: PathBuf,

        /// Output path for the consolidated table
        #[arg(short, long)]
        output: PathBuf,

        /// Organism dataset the annotation table belongs to
        #[arg(long, default_value = "hsapiens_gene_ensembl")]
        dataset: String,

        /// Namespace of the feature ids
        #[arg(long, default_value = namespace::ENSEMBL_GENE_ID)]
        id_namespace: String,

        /// Merge method: first, random, average or highest
        #[arg(short, long, default_value = "first")]
        method: String,

        /// Seed for the random merge method
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,

        /// Keep genes whose mean count is above this value
        #[arg(long)]
        min_mean: Option<f64>,

        /// Count a sample only if its count is above this value
        #[arg(long)]
        min_count: Option<f64>,

        /// Keep genes with at least this many samples above --min-count
        #[arg(long)]
        min_samples: Option<usize>,

        /// Keep only these categories (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Drop features that received no symbol
        #[arg(long)]
        discard_unmatched: bool,

        /// Remove version suffixes from feature ids before lookup
        #[arg(long)]
        strip_version: bool,

        /// Lookup timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Optional path for a JSON summary
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Compare two tables
    Summarize {
        /// Table before processing
        #[arg(long)]
        before: PathBuf,

        /// Table after processing
        #[arg(long)]
        after: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Generate an example pipeline configuration
    Example {
        /// Output path for the example YAML
        #[arg(short, long, default_value = "pipeline.yaml")]
        output: PathBuf,
    },
}

fn init_logging(verbosity: u8, quiet: bool) {
    let log_level = match (quiet, verbosity) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Run {
            config,
            counts,
            annotation,
            dataset,
            output,
            summary,
        } => cmd_run(&config, &counts, &annotation, &dataset, &output, summary.as_deref()),

        Commands::Consolidate {
            counts,
            annotation,
            output,
            dataset,
            id_namespace,
            method,
            seed,
            min_mean,
            min_count,
            min_samples,
            categories,
            discard_unmatched,
            strip_version,
            timeout_ms,
            summary,
        } => {
            let mut options = AnnotateOptions::new(&dataset)
                .with_id_namespace(&id_namespace)
                .with_discard_unmatched(discard_unmatched)
                .with_strip_version(strip_version);
            if let Some(ms) = timeout_ms {
                options = options.with_timeout(Duration::from_millis(ms));
            }
            let predicate = ExpressionPredicate {
                min_mean,
                min_count,
                min_samples,
            };
            cmd_consolidate(
                &counts,
                &annotation,
                &output,
                &options,
                &method,
                seed,
                &predicate,
                &categories,
                summary.as_deref(),
            )
        }

        Commands::Summarize { before, after, format } => cmd_summarize(&before, &after, format),

        Commands::Example { output } => cmd_example(&output),
    };

    if let Err(e) = result {
        log::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_inputs(counts_path: &Path, annotation_path: &Path, dataset: &str) -> Result<(ExpressionTable, TableLookup)> {
    log::info!("Loading counts from {:?}...", counts_path);
    let table = ExpressionTable::from_tsv(counts_path)?;
    log::info!("Loaded {} features x {} samples", table.n_features(), table.n_samples());

    log::info!("Loading annotation from {:?}...", annotation_path);
    let lookup = TableLookup::from_tsv(annotation_path, dataset)?;
    log::info!("Loaded {} annotation rows ({})", lookup.len(), lookup.columns().join(", "));

    Ok((table, lookup))
}

fn write_outputs(output: &PipelineOutput, output_path: &Path, summary_path: Option<&Path>) -> Result<()> {
    log::info!("Writing consolidated table to {:?}...", output_path);
    output.table.to_tsv(output_path)?;

    if let Some(path) = summary_path {
        log::info!("Writing summary to {:?}...", path);
        std::fs::write(path, output.summary.to_json()?)?;
    }

    eprintln!("{}", output.summary);
    Ok(())
}

/// Run a pipeline from configuration
fn cmd_run(
    config_path: &Path,
    counts_path: &Path,
    annotation_path: &Path,
    dataset: &str,
    output_path: &Path,
    summary_path: Option<&Path>,
) -> Result<()> {
    log::info!("Loading pipeline configuration from {:?}...", config_path);
    let config_str = std::fs::read_to_string(config_path)?;
    let config = PipelineConfig::from_yaml(&config_str)?;

    let (table, lookup) = load_inputs(counts_path, annotation_path, dataset)?;
    let output = Pipeline::from_config(&config).run(&table, &lookup)?;
    write_outputs(&output, output_path, summary_path)
}

/// Run the standard consolidation order
#[allow(clippy::too_many_arguments)]
fn cmd_consolidate(
    counts_path: &Path,
    annotation_path: &Path,
    output_path: &Path,
    options: &AnnotateOptions,
    method: &str,
    seed: u64,
    predicate: &ExpressionPredicate,
    categories: &[String],
    summary_path: Option<&Path>,
) -> Result<()> {
    let method: MergeMethod = method.parse()?;
    let (table, lookup) = load_inputs(counts_path, annotation_path, &options.dataset)?;

    let mut pipeline = Pipeline::new()
        .name("consolidate")
        .annotate_symbols(options)
        .resolve_duplicates(method, seed);
    if predicate.min_mean.is_some() || predicate.min_count.is_some() || predicate.min_samples.is_some() {
        pipeline = pipeline.filter_expression(predicate);
    }
    if !categories.is_empty() {
        pipeline = pipeline.annotate_categories(options).filter_category(categories);
    }

    let output = pipeline.run(&table, &lookup)?;
    write_outputs(&output, output_path, summary_path)
}

/// Compare two tables on disk
fn cmd_summarize(before_path: &Path, after_path: &Path, format: Format) -> Result<()> {
    let before = ExpressionTable::from_tsv(before_path)?;
    let after = ExpressionTable::from_tsv(after_path)?;
    let report: SummaryReport = summarize(&before, &after);

    match format {
        Format::Text => print!("{}", report),
        Format::Json => println!("{}", report.to_json()?),
        Format::Yaml => print!("{}", report.to_yaml()?),
    }
    Ok(())
}

/// Generate example pipeline configuration
fn cmd_example(output_path: &Path) -> Result<()> {
    let annotate = AnnotateOptions::default()
        .with_strip_version(true)
        .with_discard_unmatched(true);
    let pipeline = Pipeline::new()
        .name("example-consolidation")
        .annotate_symbols(&annotate)
        .resolve_duplicates(MergeMethod::Highest, DEFAULT_SEED)
        .filter_expression(&ExpressionPredicate::count_in_samples(10.0, 3))
        .annotate_categories(&annotate)
        .filter_category(&["protein_coding", "lncRNA"]);

    let config = pipeline.to_config(Some(
        "Collapse Ensembl gene counts to unique symbols and keep expressed coding and lncRNA genes",
    ));
    std::fs::write(output_path, config.to_yaml()?)?;
    eprintln!("Example pipeline written to {:?}", output_path);
    Ok(())
}
