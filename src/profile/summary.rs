//! Before/after summaries of an expression table.

use crate::consolidate::find_duplicates;
use crate::data::ExpressionTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Count totals for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSummary {
    pub sample_id: String,
    /// Sum of counts over all rows (library size).
    pub total: f64,
    /// Mean count per row.
    pub mean: f64,
    /// Median count per row.
    pub median: f64,
}

/// Profile of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableProfile {
    pub n_rows: usize,
    pub n_samples: usize,
    /// Rows with a resolved symbol.
    pub n_resolved: usize,
    pub n_unresolved: usize,
    /// n_resolved / n_rows (0 if the symbol column is absent).
    pub symbol_rate: f64,
    pub n_unique_symbols: usize,
    /// Symbols carried by more than one row.
    pub n_duplicated_symbols: usize,
    /// Rows beyond the first for each symbol.
    pub n_duplicate_entries: usize,
    /// Rows per category; empty if the category column is absent.
    pub categories: BTreeMap<String, usize>,
    /// Sum of all counts.
    pub total_counts: f64,
    pub samples: Vec<SampleSummary>,
}

/// Comparison of a table before and after processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub before: TableProfile,
    pub after: TableProfile,
    /// Rows removed (negative would mean rows were added).
    pub rows_removed: i64,
    /// Proportion of rows retained.
    pub retention_rate: f64,
    /// Proportion of total counts retained.
    pub counts_retained: f64,
}

impl SummaryReport {
    /// Load from a JSON string.
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Save to a JSON string.
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Save to a YAML string.
    pub fn to_yaml(&self) -> crate::error::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

impl std::fmt::Display for SummaryReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Consolidation Summary")?;
        writeln!(f, "  Rows:              {} -> {}", self.before.n_rows, self.after.n_rows)?;
        writeln!(f, "  Rows removed:      {}", self.rows_removed)?;
        writeln!(f, "  Retained:          {:.1}%", self.retention_rate * 100.0)?;
        writeln!(f, "  Counts retained:   {:.1}%", self.counts_retained * 100.0)?;
        writeln!(
            f,
            "  Unique symbols:    {} -> {}",
            self.before.n_unique_symbols, self.after.n_unique_symbols
        )?;
        writeln!(
            f,
            "  Duplicate entries: {} -> {}",
            self.before.n_duplicate_entries, self.after.n_duplicate_entries
        )?;
        writeln!(
            f,
            "  Unresolved rows:   {} -> {}",
            self.before.n_unresolved, self.after.n_unresolved
        )?;
        if !self.after.categories.is_empty() {
            writeln!(f, "  Categories:")?;
            for (category, n) in &self.after.categories {
                writeln!(f, "    {:<24} {}", category, n)?;
            }
        }
        writeln!(f, "  Samples:")?;
        for sample in &self.after.samples {
            let before_total = self
                .before
                .samples
                .iter()
                .find(|s| s.sample_id == sample.sample_id)
                .map(|s| s.total)
                .unwrap_or(0.0);
            writeln!(
                f,
                "    {:<16} total {:.0} -> {:.0}, mean {:.2}",
                sample.sample_id, before_total, sample.total, sample.mean
            )?;
        }
        Ok(())
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Profile a single table.
pub fn profile_table(table: &ExpressionTable) -> TableProfile {
    let n_rows = table.n_features();
    let n_resolved = table.features().iter().filter(|f| f.symbol.is_resolved()).count();

    let duplicates = find_duplicates(table);
    let n_duplicate_entries: usize = duplicates.iter().map(|g| g.rows.len() - 1).sum();
    let n_unique_symbols = n_resolved - n_duplicate_entries;

    let mut categories = BTreeMap::new();
    if table.has_categories() {
        for feature in table.features() {
            let key = feature.category.clone().unwrap_or_else(|| "NA".to_string());
            *categories.entry(key).or_insert(0) += 1;
        }
    }

    let totals = table.col_sums();
    let samples: Vec<SampleSummary> = table
        .sample_ids()
        .iter()
        .zip(&totals)
        .enumerate()
        .map(|(col, (sample_id, &total))| SampleSummary {
            sample_id: sample_id.clone(),
            total,
            mean: if n_rows > 0 { total / n_rows as f64 } else { 0.0 },
            median: median(&table.col_dense(col)),
        })
        .collect();

    TableProfile {
        n_rows,
        n_samples: table.n_samples(),
        n_resolved,
        n_unresolved: n_rows - n_resolved,
        symbol_rate: if table.has_symbols() && n_rows > 0 {
            n_resolved as f64 / n_rows as f64
        } else {
            0.0
        },
        n_unique_symbols,
        n_duplicated_symbols: duplicates.len(),
        n_duplicate_entries,
        categories,
        total_counts: totals.iter().sum(),
        samples,
    }
}

/// Compare two tables. Neither input is modified.
pub fn summarize(before: &ExpressionTable, after: &ExpressionTable) -> SummaryReport {
    let before = profile_table(before);
    let after = profile_table(after);
    let retention_rate = if before.n_rows > 0 {
        after.n_rows as f64 / before.n_rows as f64
    } else {
        1.0
    };
    let counts_retained = if before.total_counts > 0.0 {
        after.total_counts / before.total_counts
    } else {
        1.0
    };
    SummaryReport {
        rows_removed: before.n_rows as i64 - after.n_rows as i64,
        retention_rate,
        counts_retained,
        before,
        after,
    }
}
