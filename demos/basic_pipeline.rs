//! Basic example demonstrating gene identity consolidation.
//!
//! This example shows how to:
//! 1. Build a small count table and annotation
//! 2. Inspect duplicate symbols
//! 3. Run a consolidation pipeline
//! 4. Examine the summary

use gene_consolidate::prelude::*;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== Gene Consolidation Example ===\n");

    let table = create_example_table()?;
    let lookup = create_example_lookup()?;

    println!("Input:");
    println!("  Features: {}", table.n_features());
    println!("  Samples:  {}", table.sample_ids().join(", "));
    println!();

    // Annotate first to see which symbols repeat
    let options = AnnotateOptions::default().with_strip_version(true);
    let (annotated, report) = annotate_symbols(&table, &lookup, &options)?;
    println!("{}", report);

    println!("=== Duplicate Symbols ===\n");
    for group in find_duplicates(&annotated) {
        let ids: Vec<&str> = group
            .rows
            .iter()
            .map(|&row| annotated.features()[row].feature_id.as_str())
            .collect();
        println!("  {:<8} {}", group.symbol, ids.join(", "));
    }
    println!();

    // Full pipeline on the raw table
    println!("=== Pipeline ===\n");
    let pipeline = Pipeline::new()
        .name("demo")
        .annotate_symbols(&options.clone().with_discard_unmatched(true))
        .resolve_duplicates(MergeMethod::Highest, DEFAULT_SEED)
        .filter_count_in_samples(10.0, 2)
        .annotate_categories(&options)
        .filter_category(&["protein_coding"]);

    let output = pipeline.run(&table, &lookup)?;

    for report in &output.reports {
        match report {
            StageReport::Annotation(r) => println!("  annotation: {}/{} matched", r.n_matched, r.n_total),
            StageReport::Duplicates(r) => println!("  duplicates: {} -> {} rows", r.n_rows, r.n_after),
            StageReport::Filter(r) => println!("  filter:     {} -> {} rows", r.n_before, r.n_after),
        }
    }
    println!();

    println!("Consolidated genes:");
    for (row, feature) in output.table.features().iter().enumerate() {
        println!(
            "  {:<8} {:<10} {:?}",
            feature.symbol.as_str().unwrap_or("NA"),
            feature.feature_id,
            output.table.row_dense(row)
        );
    }
    println!();

    println!("{}", output.summary);

    // Save the configuration for reuse
    let config = pipeline.to_config(Some("Demo consolidation pipeline"));
    println!("=== Pipeline Configuration (YAML) ===\n");
    println!("{}", config.to_yaml()?);

    Ok(())
}

/// Create a small table with duplicated symbols and one unknown gene.
fn create_example_table() -> Result<ExpressionTable> {
    let entries: [(&str, [f64; 4]); 7] = [
        ("ENSG00000111640.15", [1200.0, 1100.0, 1350.0, 1280.0]),
        ("ENSG00000288825.1", [12.0, 8.0, 15.0, 10.0]),
        ("ENSG00000075624.17", [900.0, 950.0, 870.0, 1010.0]),
        ("ENSG00000251562.8", [300.0, 280.0, 320.0, 295.0]),
        ("ENSG00000141510.18", [45.0, 50.0, 38.0, 42.0]),
        ("ENSG00000230699.2", [0.0, 3.0, 1.0, 0.0]),
        ("ENSG00000999999.1", [60.0, 70.0, 65.0, 80.0]),
    ];

    let features = entries.iter().map(|(id, _)| FeatureRecord::new(id)).collect();
    let rows = entries.iter().map(|(_, counts)| counts.to_vec()).collect();
    let samples = vec![
        "ctrl_1".to_string(),
        "ctrl_2".to_string(),
        "trt_1".to_string(),
        "trt_2".to_string(),
    ];
    ExpressionTable::from_rows(features, rows, samples)
}

/// Annotation covering the example genes.
fn create_example_lookup() -> Result<TableLookup> {
    let columns = vec![
        namespace::ENSEMBL_GENE_ID.to_string(),
        namespace::GENE_SYMBOL.to_string(),
        namespace::GENE_BIOTYPE.to_string(),
    ];
    let rows = [
        ("ENSG00000111640", "GAPDH", "protein_coding"),
        ("ENSG00000288825", "GAPDH", "protein_coding"),
        ("ENSG00000075624", "ACTB", "protein_coding"),
        ("ENSG00000251562", "MALAT1", "lncRNA"),
        ("ENSG00000141510", "TP53", "protein_coding"),
        ("ENSG00000230699", "TP53", "protein_coding"),
    ]
    .iter()
    .map(|(id, symbol, biotype)| vec![id.to_string(), symbol.to_string(), biotype.to_string()])
    .collect();

    TableLookup::new("hsapiens_gene_ensembl", columns, rows)
}
