//! Expression table: feature metadata plus a sparse feature × sample count matrix.

use crate::data::feature::{FeatureRecord, Symbol};
use crate::error::{Column, ConsolidateError, Result};
use rayon::prelude::*;
use sprs::{CsMat, TriMat};
use std::collections::HashSet;
use std::path::Path;

const ID_HEADERS: &[&str] = &["geneid", "gene_id", "feature_id", "id", "ensembl_gene_id"];
const CHROM_HEADERS: &[&str] = &["chr", "chrom", "chromosome", "seqname"];
const SYMBOL_HEADERS: &[&str] = &["symbol", "gene_name", "external_gene_name"];
const CATEGORY_HEADERS: &[&str] = &["category", "gene_biotype", "biotype"];

/// Role of a column in a tab-delimited feature table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnRole {
    Chromosome,
    Start,
    End,
    Strand,
    Length,
    Symbol,
    Category,
    Sample(usize),
}

fn classify_header(name: &str) -> Option<ColumnRole> {
    let lower = name.trim().to_ascii_lowercase();
    let lower = lower.as_str();
    if CHROM_HEADERS.contains(&lower) {
        Some(ColumnRole::Chromosome)
    } else if SYMBOL_HEADERS.contains(&lower) {
        Some(ColumnRole::Symbol)
    } else if CATEGORY_HEADERS.contains(&lower) {
        Some(ColumnRole::Category)
    } else {
        match lower {
            "start" => Some(ColumnRole::Start),
            "end" => Some(ColumnRole::End),
            "strand" => Some(ColumnRole::Strand),
            "length" => Some(ColumnRole::Length),
            _ => None,
        }
    }
}

/// Reduce an alignment-file column name (`/data/run1/S1.bam`) to its sample name (`S1`).
fn clean_sample_name(name: &str) -> String {
    let trimmed = name.trim();
    let looks_like_path = trimmed.contains('/')
        || trimmed.ends_with(".bam")
        || trimmed.ends_with(".sam")
        || trimmed.ends_with(".cram");
    if !looks_like_path {
        return trimmed.to_string();
    }
    Path::new(trimmed)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(String::from)
        .unwrap_or_else(|| trimmed.to_string())
}

fn format_count(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as u64)
    } else {
        format!("{}", value)
    }
}

/// A table of genomic features with one count per sample.
///
/// Rows are features, columns are samples. The sample ordering is fixed when the
/// table is built and shared by every row; stages only ever drop or merge rows.
/// Counts are stored in CSR form since most genes are unexpressed in most samples.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionTable {
    /// Sparse matrix in CSR format (features × samples)
    data: CsMat<f64>,
    /// Per-row metadata
    features: Vec<FeatureRecord>,
    /// Sample identifiers (column names)
    sample_ids: Vec<String>,
    /// Whether the symbol column has been populated
    has_symbols: bool,
    /// Whether the category column has been populated
    has_categories: bool,
}

impl ExpressionTable {
    /// Create a table from a sparse matrix, feature metadata and sample identifiers.
    ///
    /// The symbol and category columns are considered present if any record carries one.
    pub fn new(data: CsMat<f64>, features: Vec<FeatureRecord>, sample_ids: Vec<String>) -> Result<Self> {
        let (nrows, ncols) = data.shape();
        if nrows != features.len() {
            return Err(ConsolidateError::DimensionMismatch {
                expected: nrows,
                actual: features.len(),
            });
        }
        if ncols != sample_ids.len() {
            return Err(ConsolidateError::DimensionMismatch {
                expected: ncols,
                actual: sample_ids.len(),
            });
        }
        let has_symbols = features.iter().any(|f| f.symbol.is_resolved());
        let has_categories = features.iter().any(|f| f.category.is_some());
        let table = Self {
            data,
            features,
            sample_ids,
            has_symbols,
            has_categories,
        };
        table.validate("new")?;
        Ok(table)
    }

    /// Create a table from dense count rows.
    pub fn from_rows(features: Vec<FeatureRecord>, rows: Vec<Vec<f64>>, sample_ids: Vec<String>) -> Result<Self> {
        if features.len() != rows.len() {
            return Err(ConsolidateError::DimensionMismatch {
                expected: features.len(),
                actual: rows.len(),
            });
        }
        let n_samples = sample_ids.len();
        let mut tri_mat = TriMat::new((rows.len(), n_samples));
        for (row, values) in rows.iter().enumerate() {
            if values.len() != n_samples {
                return Err(ConsolidateError::DimensionMismatch {
                    expected: n_samples,
                    actual: values.len(),
                });
            }
            for (col, &val) in values.iter().enumerate() {
                if !val.is_finite() || val < 0.0 {
                    return Err(ConsolidateError::InvalidCount {
                        value: val.to_string(),
                        row,
                        col,
                    });
                }
                if val != 0.0 {
                    tri_mat.add_triplet(row, col, val);
                }
            }
        }
        Self::new(tri_mat.to_csr(), features, sample_ids)
    }

    /// Mark the symbol column as present even if no record resolved.
    pub fn with_symbol_column(mut self) -> Self {
        self.has_symbols = true;
        self
    }

    /// Mark the category column as present even if no record matched.
    pub fn with_category_column(mut self) -> Self {
        self.has_categories = true;
        self
    }

    /// Replace the feature metadata, keeping counts and samples.
    ///
    /// Column presence flags are kept and widened by whatever the new records carry.
    pub fn with_features(&self, features: Vec<FeatureRecord>) -> Result<Self> {
        if features.len() != self.n_features() {
            return Err(ConsolidateError::DimensionMismatch {
                expected: self.n_features(),
                actual: features.len(),
            });
        }
        let has_symbols = self.has_symbols || features.iter().any(|f| f.symbol.is_resolved());
        let has_categories = self.has_categories || features.iter().any(|f| f.category.is_some());
        Ok(Self {
            data: self.data.clone(),
            features,
            sample_ids: self.sample_ids.clone(),
            has_symbols,
            has_categories,
        })
    }

    /// Check the table-wide invariants on entry to a stage.
    ///
    /// Every row shares the sample set, sample names are unique, and all
    /// counts are finite and non-negative.
    pub fn validate(&self, stage: &'static str) -> Result<()> {
        if self.sample_ids.is_empty() {
            return Err(ConsolidateError::MissingColumn {
                stage,
                column: Column::Samples,
            });
        }
        let (nrows, ncols) = self.data.shape();
        if nrows != self.features.len() {
            return Err(ConsolidateError::DimensionMismatch {
                expected: nrows,
                actual: self.features.len(),
            });
        }
        if ncols != self.sample_ids.len() {
            return Err(ConsolidateError::DimensionMismatch {
                expected: ncols,
                actual: self.sample_ids.len(),
            });
        }
        let mut seen = HashSet::with_capacity(self.sample_ids.len());
        for sample in &self.sample_ids {
            if !seen.insert(sample.as_str()) {
                return Err(ConsolidateError::SampleMismatch(format!(
                    "{}: sample '{}' appears more than once",
                    stage, sample
                )));
            }
        }
        for (row, row_vec) in self.data.outer_iterator().enumerate() {
            for (col, &val) in row_vec.iter() {
                if !val.is_finite() || val < 0.0 {
                    return Err(ConsolidateError::InvalidCount {
                        value: val.to_string(),
                        row,
                        col,
                    });
                }
            }
        }
        Ok(())
    }

    /// Fail with `DuplicateFeature` if any feature id occurs twice.
    pub fn ensure_unique_feature_ids(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.features.len());
        for feature in &self.features {
            if !seen.insert(feature.feature_id.as_str()) {
                return Err(ConsolidateError::DuplicateFeature(feature.feature_id.clone()));
            }
        }
        Ok(())
    }

    /// Load a featureCounts-style table from a tab-delimited file.
    ///
    /// Expected format:
    /// - Lines starting with `#` are skipped
    /// - Header: feature id column first, then any of Chr/Start/End/Strand/Length,
    ///   optionally symbol and category columns; every other column is a sample
    /// - Counts must be non-negative numbers
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .has_headers(true)
            .from_path(path)?;

        let headers = reader.headers()?.clone();
        if headers.is_empty() {
            return Err(ConsolidateError::EmptyData("Empty feature table".to_string()));
        }
        let first = headers.get(0).unwrap_or_default().trim().to_ascii_lowercase();
        if !ID_HEADERS.contains(&first.as_str()) {
            log::warn!("First column '{}' is not a recognized id header; treating it as the feature id", first);
        }

        let mut roles = Vec::with_capacity(headers.len().saturating_sub(1));
        let mut sample_ids = Vec::new();
        for name in headers.iter().skip(1) {
            match classify_header(name) {
                Some(role) => roles.push(role),
                None => {
                    roles.push(ColumnRole::Sample(sample_ids.len()));
                    sample_ids.push(clean_sample_name(name));
                }
            }
        }
        if sample_ids.is_empty() {
            return Err(ConsolidateError::MissingColumn {
                stage: "from_tsv",
                column: Column::Samples,
            });
        }
        let has_symbol_col = roles.contains(&ColumnRole::Symbol);
        let has_category_col = roles.contains(&ColumnRole::Category);

        let n_samples = sample_ids.len();
        let mut features = Vec::new();
        let mut triplets: Vec<(usize, usize, f64)> = Vec::new();

        for (row_idx, record) in reader.records().enumerate() {
            let record = record?;
            let mut feature = FeatureRecord::new(record.get(0).unwrap_or_default().trim());
            for (role, value) in roles.iter().zip(record.iter().skip(1)) {
                match role {
                    ColumnRole::Chromosome => feature.chromosome = value.to_string(),
                    ColumnRole::Start => feature.start = value.to_string(),
                    ColumnRole::End => feature.end = value.to_string(),
                    ColumnRole::Strand => feature.strand = value.to_string(),
                    ColumnRole::Length => {
                        feature.length = value.trim().parse().map_err(|_| {
                            ConsolidateError::InvalidParameter(format!(
                                "Invalid length '{}' at row {}",
                                value, row_idx
                            ))
                        })?;
                    }
                    ColumnRole::Symbol => feature.symbol = Symbol::from_lookup(Some(value)),
                    ColumnRole::Category => {
                        let v = value.trim();
                        if !v.is_empty() && v != "NA" {
                            feature.category = Some(v.to_string());
                        }
                    }
                    ColumnRole::Sample(col) => {
                        let count: f64 = value.trim().parse().map_err(|_| ConsolidateError::InvalidCount {
                            value: value.to_string(),
                            row: row_idx,
                            col: *col,
                        })?;
                        if !count.is_finite() || count < 0.0 {
                            return Err(ConsolidateError::InvalidCount {
                                value: value.to_string(),
                                row: row_idx,
                                col: *col,
                            });
                        }
                        if count != 0.0 {
                            triplets.push((row_idx, *col, count));
                        }
                    }
                }
            }
            features.push(feature);
        }

        if features.is_empty() {
            return Err(ConsolidateError::EmptyData("No features in table".to_string()));
        }

        let mut tri_mat = TriMat::new((features.len(), n_samples));
        for (row, col, val) in triplets {
            tri_mat.add_triplet(row, col, val);
        }

        let mut table = Self::new(tri_mat.to_csr(), features, sample_ids)?;
        table.has_symbols |= has_symbol_col;
        table.has_categories |= has_category_col;
        table.ensure_unique_feature_ids()?;
        Ok(table)
    }

    /// Write the table to a tab-delimited file.
    ///
    /// Symbol and category columns are written only when present.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;

        let mut header: Vec<&str> = vec!["feature_id"];
        if self.has_symbols {
            header.push("symbol");
        }
        if self.has_categories {
            header.push("category");
        }
        header.extend(["chromosome", "start", "end", "strand", "length"]);
        header.extend(self.sample_ids.iter().map(String::as_str));
        writer.write_record(&header)?;

        for (row, feature) in self.features.iter().enumerate() {
            let mut fields: Vec<String> = Vec::with_capacity(header.len());
            fields.push(feature.feature_id.clone());
            if self.has_symbols {
                fields.push(feature.symbol.as_str().unwrap_or("NA").to_string());
            }
            if self.has_categories {
                fields.push(feature.category.clone().unwrap_or_else(|| "NA".to_string()));
            }
            fields.push(feature.chromosome.clone());
            fields.push(feature.start.clone());
            fields.push(feature.end.clone());
            fields.push(feature.strand.clone());
            fields.push(feature.length.to_string());
            fields.extend(self.row_dense(row).into_iter().map(format_count));
            writer.write_record(&fields)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Get the count at (row, col), returning 0 for missing entries.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data.get(row, col).copied().unwrap_or(0.0)
    }

    /// Number of features (rows).
    #[inline]
    pub fn n_features(&self) -> usize {
        self.features.len()
    }

    /// Number of samples (columns).
    #[inline]
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    #[inline]
    pub fn features(&self) -> &[FeatureRecord] {
        &self.features
    }

    #[inline]
    pub fn feature(&self, row: usize) -> Option<&FeatureRecord> {
        self.features.get(row)
    }

    /// Feature identifiers in row order.
    pub fn feature_ids(&self) -> Vec<&str> {
        self.features.iter().map(|f| f.feature_id.as_str()).collect()
    }

    /// Symbols in row order, `None` for unresolved rows.
    pub fn symbols(&self) -> Vec<Option<&str>> {
        self.features.iter().map(|f| f.symbol.as_str()).collect()
    }

    /// Sample identifiers.
    #[inline]
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    #[inline]
    pub fn has_symbols(&self) -> bool {
        self.has_symbols
    }

    #[inline]
    pub fn has_categories(&self) -> bool {
        self.has_categories
    }

    /// Get the underlying sparse matrix.
    #[inline]
    pub fn data(&self) -> &CsMat<f64> {
        &self.data
    }

    /// Get a dense vector of counts for a specific row (feature).
    pub fn row_dense(&self, row: usize) -> Vec<f64> {
        let mut dense = vec![0.0; self.n_samples()];
        if let Some(row_vec) = self.data.outer_view(row) {
            for (col, &val) in row_vec.iter() {
                dense[col] = val;
            }
        }
        dense
    }

    /// Mean count of a row across all samples.
    pub fn row_mean(&self, row: usize) -> f64 {
        if self.n_samples() == 0 {
            return 0.0;
        }
        let sum: f64 = self
            .data
            .outer_view(row)
            .map(|v| v.iter().map(|(_, &val)| val).sum())
            .unwrap_or(0.0);
        sum / self.n_samples() as f64
    }

    /// Compute row means (mean count per feature).
    pub fn row_means(&self) -> Vec<f64> {
        (0..self.n_features())
            .into_par_iter()
            .map(|row| self.row_mean(row))
            .collect()
    }

    /// Compute column sums (library sizes per sample).
    pub fn col_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.n_samples()];
        for row_vec in self.data.outer_iterator() {
            for (col, &val) in row_vec.iter() {
                sums[col] += val;
            }
        }
        sums
    }

    /// Get a dense vector for a specific column (sample).
    pub fn col_dense(&self, col: usize) -> Vec<f64> {
        (0..self.n_features()).map(|row| self.get(row, col)).collect()
    }

    /// Subset the table to the specified rows, in the given order.
    pub fn subset_features(&self, indices: &[usize]) -> Result<Self> {
        let n_features = indices.len();
        let n_samples = self.n_samples();

        let mut tri_mat = TriMat::new((n_features, n_samples));
        let mut new_features = Vec::with_capacity(n_features);

        for (new_row, &old_row) in indices.iter().enumerate() {
            let feature = self.features.get(old_row).ok_or_else(|| {
                ConsolidateError::InvalidParameter(format!("Feature index {} out of bounds", old_row))
            })?;
            new_features.push(feature.clone());

            if let Some(row_vec) = self.data.outer_view(old_row) {
                for (col, &val) in row_vec.iter() {
                    tri_mat.add_triplet(new_row, col, val);
                }
            }
        }

        Ok(Self {
            data: tri_mat.to_csr(),
            features: new_features,
            sample_ids: self.sample_ids.clone(),
            has_symbols: self.has_symbols,
            has_categories: self.has_categories,
        })
    }

    /// Build a table sharing this table's samples and column flags from explicit rows.
    pub(crate) fn rebuild(&self, features: Vec<FeatureRecord>, rows: Vec<Vec<f64>>) -> Result<Self> {
        let mut table = Self::from_rows(features, rows, self.sample_ids.clone())?;
        table.has_symbols |= self.has_symbols;
        table.has_categories |= self.has_categories;
        Ok(table)
    }

    /// Convert the counts to a dense matrix.
    pub fn to_dense(&self) -> nalgebra::DMatrix<f64> {
        let mut dense = nalgebra::DMatrix::zeros(self.n_features(), self.n_samples());
        for (row, row_vec) in self.data.outer_iterator().enumerate() {
            for (col, &val) in row_vec.iter() {
                dense[(row, col)] = val;
            }
        }
        dense
    }
}
