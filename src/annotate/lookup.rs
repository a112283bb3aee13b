//! Annotation lookup collaborators.
//!
//! The mapper never talks to an annotation database directly: it is handed an
//! [`AnnotationLookup`] and sends it batch requests. [`TableLookup`] serves
//! requests from a tab-delimited export (one column per namespace).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Common namespace names, following the BioMart attribute names.
pub mod namespace {
    pub const ENSEMBL_GENE_ID: &str = "ensembl_gene_id";
    pub const ENTREZ_GENE_ID: &str = "entrezgene_id";
    pub const GENE_SYMBOL: &str = "external_gene_name";
    pub const GENE_BIOTYPE: &str = "gene_biotype";
}

/// Failure reported by an annotation collaborator.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LookupError {
    #[error("annotation service unreachable: {0}")]
    Unreachable(String),

    #[error("dataset '{0}' is not available")]
    DatasetMissing(String),

    #[error("namespace '{namespace}' is not available in dataset '{dataset}'")]
    UnknownNamespace { dataset: String, namespace: String },

    #[error("lookup did not answer within {0:?}")]
    TimedOut(Duration),
}

/// One batch lookup: map every id in `ids` from `source` to `target` within `dataset`.
#[derive(Debug, Clone)]
pub struct LookupRequest<'a> {
    pub ids: &'a [String],
    pub source: &'a str,
    pub target: &'a str,
    pub dataset: &'a str,
    /// Caller deadline; collaborators doing I/O should give up after this long.
    pub timeout: Option<Duration>,
}

/// Candidate values per requested id, in collaborator order.
///
/// Ids without a match may be absent or map to an empty list.
pub type LookupMapping = HashMap<String, Vec<String>>;

/// A batch identifier resolver.
///
/// Implementations that block on I/O must honour `request.timeout` and
/// return [`LookupError::TimedOut`] once it passes. The mapper cannot
/// interrupt a call in progress; it only rejects replies that arrive late.
/// [`TableLookup`] answers from memory and never waits.
pub trait AnnotationLookup {
    fn resolve(&self, request: &LookupRequest<'_>) -> Result<LookupMapping, LookupError>;
}

impl<T: AnnotationLookup + ?Sized> AnnotationLookup for &T {
    fn resolve(&self, request: &LookupRequest<'_>) -> Result<LookupMapping, LookupError> {
        (**self).resolve(request)
    }
}

impl<T: AnnotationLookup + ?Sized> AnnotationLookup for Box<T> {
    fn resolve(&self, request: &LookupRequest<'_>) -> Result<LookupMapping, LookupError> {
        (**self).resolve(request)
    }
}

/// In-memory annotation table bound to one organism dataset.
///
/// Each column is a namespace; each row links the values of one gene across
/// namespaces. A source id appearing on several rows yields several candidates,
/// in row order.
#[derive(Debug, Clone)]
pub struct TableLookup {
    dataset: String,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TableLookup {
    /// Create from explicit columns and rows.
    pub fn new(dataset: &str, columns: Vec<String>, rows: Vec<Vec<String>>) -> crate::error::Result<Self> {
        for row in &rows {
            if row.len() != columns.len() {
                return Err(crate::error::ConsolidateError::DimensionMismatch {
                    expected: columns.len(),
                    actual: row.len(),
                });
            }
        }
        Ok(Self {
            dataset: dataset.to_string(),
            columns,
            rows,
        })
    }

    /// Load from a tab-delimited file whose header names the namespaces.
    pub fn from_tsv<P: AsRef<Path>>(path: P, dataset: &str) -> crate::error::Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .has_headers(true)
            .from_path(path)?;
        let columns: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(|v| v.trim().to_string()).collect());
        }
        Self::new(dataset, columns, rows)
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_index(&self, namespace: &str) -> Result<usize, LookupError> {
        self.columns
            .iter()
            .position(|c| c == namespace)
            .ok_or_else(|| LookupError::UnknownNamespace {
                dataset: self.dataset.clone(),
                namespace: namespace.to_string(),
            })
    }
}

impl AnnotationLookup for TableLookup {
    fn resolve(&self, request: &LookupRequest<'_>) -> Result<LookupMapping, LookupError> {
        if request.dataset != self.dataset {
            return Err(LookupError::DatasetMissing(request.dataset.to_string()));
        }
        let source = self.column_index(request.source)?;
        let target = self.column_index(request.target)?;

        let mut index: HashMap<&str, Vec<&str>> = HashMap::new();
        for row in &self.rows {
            let value = row[target].as_str();
            if value.is_empty() {
                continue;
            }
            let candidates = index.entry(row[source].as_str()).or_default();
            if !candidates.contains(&value) {
                candidates.push(value);
            }
        }

        Ok(request
            .ids
            .iter()
            .filter_map(|id| {
                index
                    .get(id.as_str())
                    .map(|c| (id.clone(), c.iter().map(|v| v.to_string()).collect()))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_lookup() -> TableLookup {
        let columns = vec![
            namespace::ENSEMBL_GENE_ID.to_string(),
            namespace::GENE_SYMBOL.to_string(),
            namespace::GENE_BIOTYPE.to_string(),
        ];
        let rows = vec![
            vec!["ENSG1".to_string(), "G1".to_string(), "protein_coding".to_string()],
            vec!["ENSG2".to_string(), "G2".to_string(), "lncRNA".to_string()],
            vec!["ENSG2".to_string(), "G2B".to_string(), "lncRNA".to_string()],
            vec!["ENSG3".to_string(), "".to_string(), "".to_string()],
        ];
        TableLookup::new("hsapiens_gene_ensembl", columns, rows).unwrap()
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_keeps_candidate_order() {
        let lookup = create_lookup();
        let ids = ids(&["ENSG2", "ENSG1", "ENSG3", "ENSG9"]);
        let mapping = lookup
            .resolve(&LookupRequest {
                ids: &ids,
                source: namespace::ENSEMBL_GENE_ID,
                target: namespace::GENE_SYMBOL,
                dataset: "hsapiens_gene_ensembl",
                timeout: None,
            })
            .unwrap();
        assert_eq!(mapping["ENSG2"], vec!["G2", "G2B"]);
        assert_eq!(mapping["ENSG1"], vec!["G1"]);
        assert!(!mapping.contains_key("ENSG3"));
        assert!(!mapping.contains_key("ENSG9"));
    }

    #[test]
    fn test_missing_dataset() {
        let lookup = create_lookup();
        let ids = ids(&["ENSG1"]);
        let err = lookup
            .resolve(&LookupRequest {
                ids: &ids,
                source: namespace::ENSEMBL_GENE_ID,
                target: namespace::GENE_SYMBOL,
                dataset: "mmusculus_gene_ensembl",
                timeout: None,
            })
            .unwrap_err();
        assert_eq!(err, LookupError::DatasetMissing("mmusculus_gene_ensembl".to_string()));
    }

    #[test]
    fn test_unknown_namespace() {
        let lookup = create_lookup();
        let ids = ids(&["ENSG1"]);
        let err = lookup
            .resolve(&LookupRequest {
                ids: &ids,
                source: namespace::ENTREZ_GENE_ID,
                target: namespace::GENE_SYMBOL,
                dataset: "hsapiens_gene_ensembl",
                timeout: None,
            })
            .unwrap_err();
        assert!(matches!(err, LookupError::UnknownNamespace { .. }));
    }

    #[test]
    fn test_from_tsv() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "ensembl_gene_id\texternal_gene_name\tgene_biotype").unwrap();
        writeln!(file, "ENSG1\tG1\tprotein_coding").unwrap();
        writeln!(file, "ENSG2\tG2\tlncRNA").unwrap();
        file.flush().unwrap();

        let lookup = TableLookup::from_tsv(file.path(), "hsapiens_gene_ensembl").unwrap();
        assert_eq!(lookup.len(), 2);
        assert_eq!(lookup.columns().len(), 3);
        assert_eq!(lookup.dataset(), "hsapiens_gene_ensembl");
    }
}
