//! Feature records: per-row metadata of an expression table.

use serde::{Deserialize, Serialize};

/// Resolution state of a feature's gene symbol.
///
/// An unresolved feature never groups with anything, including other
/// unresolved features.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbol {
    /// Symbol returned by the annotation lookup.
    Resolved(String),
    /// No symbol matched.
    Unresolved,
}

impl Symbol {
    /// Build from an optional lookup result, treating blank values as unresolved.
    pub fn from_lookup(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() && v != "NA" => Symbol::Resolved(v.to_string()),
            _ => Symbol::Unresolved,
        }
    }

    /// The resolved symbol, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Symbol::Resolved(s) => Some(s),
            Symbol::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Symbol::Resolved(_))
    }
}

/// Metadata for one genomic feature (a row of the table).
///
/// Positional fields are carried through unchanged; multi-exon features
/// keep their `;`-joined coordinate lists verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Stable external identifier (e.g. an Ensembl gene id).
    pub feature_id: String,
    pub chromosome: String,
    pub start: String,
    pub end: String,
    pub strand: String,
    pub length: u64,
    /// Resolved gene symbol; `Unresolved` until annotated.
    pub symbol: Symbol,
    /// Gene category; `None` until annotated or when no category matched.
    pub category: Option<String>,
}

impl FeatureRecord {
    /// Create a record with only an identifier and empty positional metadata.
    pub fn new(feature_id: &str) -> Self {
        Self {
            feature_id: feature_id.to_string(),
            chromosome: String::new(),
            start: String::new(),
            end: String::new(),
            strand: String::new(),
            length: 0,
            symbol: Symbol::Unresolved,
            category: None,
        }
    }

    /// Set the positional metadata.
    pub fn with_position(mut self, chromosome: &str, start: &str, end: &str, strand: &str, length: u64) -> Self {
        self.chromosome = chromosome.to_string();
        self.start = start.to_string();
        self.end = end.to_string();
        self.strand = strand.to_string();
        self.length = length;
        self
    }

    /// Set a resolved symbol.
    pub fn with_symbol(mut self, symbol: &str) -> Self {
        self.symbol = Symbol::Resolved(symbol.to_string());
        self
    }

    /// Set a category.
    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    /// Feature id with any trailing `.N` version suffix removed.
    pub fn unversioned_id(&self) -> &str {
        strip_version(&self.feature_id)
    }
}

/// Remove an Ensembl-style version suffix (`ENSG00000141510.17` -> `ENSG00000141510`).
///
/// Only a purely numeric suffix after the last `.` is removed.
pub fn strip_version(id: &str) -> &str {
    match id.rsplit_once('.') {
        Some((base, version))
            if !base.is_empty() && !version.is_empty() && version.bytes().all(|b| b.is_ascii_digit()) =>
        {
            base
        }
        _ => id,
    }
}
