//! Attach gene symbols and categories to features through an annotation lookup.

use crate::annotate::lookup::{namespace, AnnotationLookup, LookupError, LookupMapping, LookupRequest};
use crate::data::{ExpressionTable, Symbol};
use crate::error::{Column, ConsolidateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Options shared by the symbol and category annotation steps.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotateOptions {
    /// Organism dataset to query (e.g. `hsapiens_gene_ensembl`).
    pub dataset: String,
    /// Namespace of the table's feature ids.
    pub id_namespace: String,
    /// Namespace holding gene symbols.
    pub symbol_namespace: String,
    /// Namespace holding gene categories.
    pub category_namespace: String,
    /// Drop rows left without a symbol.
    pub discard_unmatched: bool,
    /// Remove `.N` version suffixes from feature ids before lookup.
    pub strip_version: bool,
    /// Upper bound on a single lookup call.
    pub timeout: Option<Duration>,
}

impl Default for AnnotateOptions {
    fn default() -> Self {
        Self {
            dataset: "hsapiens_gene_ensembl".to_string(),
            id_namespace: namespace::ENSEMBL_GENE_ID.to_string(),
            symbol_namespace: namespace::GENE_SYMBOL.to_string(),
            category_namespace: namespace::GENE_BIOTYPE.to_string(),
            discard_unmatched: false,
            strip_version: false,
            timeout: None,
        }
    }
}

impl AnnotateOptions {
    pub fn new(dataset: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            ..Self::default()
        }
    }

    pub fn with_id_namespace(mut self, namespace: &str) -> Self {
        self.id_namespace = namespace.to_string();
        self
    }

    pub fn with_discard_unmatched(mut self, discard: bool) -> Self {
        self.discard_unmatched = discard;
        self
    }

    pub fn with_strip_version(mut self, strip: bool) -> Self {
        self.strip_version = strip;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Match statistics of one annotation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    /// Rows considered.
    pub n_total: usize,
    /// Rows that received a value.
    pub n_matched: usize,
    /// Rows left without a value.
    pub n_unmatched: usize,
    /// Matched rows whose lookup returned more than one candidate.
    pub n_ambiguous: usize,
    /// Rows removed because they did not match.
    pub n_discarded: usize,
    /// n_matched / n_total (0 for an empty table).
    pub match_rate: f64,
}

impl MatchReport {
    fn new(n_total: usize, n_matched: usize, n_ambiguous: usize) -> Self {
        Self {
            n_total,
            n_matched,
            n_unmatched: n_total - n_matched,
            n_ambiguous,
            n_discarded: 0,
            match_rate: if n_total > 0 {
                n_matched as f64 / n_total as f64
            } else {
                0.0
            },
        }
    }
}

impl std::fmt::Display for MatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Annotation Match")?;
        writeln!(f, "  Total:     {}", self.n_total)?;
        writeln!(f, "  Matched:   {}", self.n_matched)?;
        writeln!(f, "  Unmatched: {}", self.n_unmatched)?;
        writeln!(f, "  Ambiguous: {}", self.n_ambiguous)?;
        writeln!(f, "  Discarded: {}", self.n_discarded)?;
        writeln!(f, "  Rate:      {:.1}%", self.match_rate * 100.0)?;
        Ok(())
    }
}

/// Send one request to the collaborator, enforcing the caller's timeout.
fn run_lookup<L: AnnotationLookup + ?Sized>(
    lookup: &L,
    stage: &'static str,
    request: &LookupRequest<'_>,
) -> Result<LookupMapping> {
    let started = Instant::now();
    let mapping = lookup
        .resolve(request)
        .map_err(|source| ConsolidateError::LookupUnavailable { stage, source })?;
    if let Some(timeout) = request.timeout {
        if started.elapsed() > timeout {
            return Err(ConsolidateError::LookupUnavailable {
                stage,
                source: LookupError::TimedOut(timeout),
            });
        }
    }
    Ok(mapping)
}

/// First usable candidate for `key`, and whether there was more than one.
fn first_candidate<'a>(mapping: &'a LookupMapping, key: &str) -> (Option<&'a str>, bool) {
    let Some(candidates) = mapping.get(key) else {
        return (None, false);
    };
    let mut usable = candidates
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty() && *c != "NA");
    let first = usable.next();
    (first, first.is_some() && usable.next().is_some())
}

/// Unique keys in first-seen order.
fn unique_ids<'a>(keys: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.filter(|k| seen.insert(*k)).map(String::from).collect()
}

/// Resolve each feature id to a gene symbol.
///
/// Ambiguous ids take the collaborator's first candidate. Existing symbols
/// are replaced. With `discard_unmatched` set, unresolved rows are dropped.
///
/// # Errors
/// `LookupUnavailable` if the collaborator fails or exceeds the timeout;
/// `DuplicateFeature` if the table's feature ids are not unique.
pub fn annotate_symbols<L: AnnotationLookup + ?Sized>(
    table: &ExpressionTable,
    lookup: &L,
    options: &AnnotateOptions,
) -> Result<(ExpressionTable, MatchReport)> {
    const STAGE: &str = "annotate_symbols";
    table.validate(STAGE)?;
    table.ensure_unique_feature_ids()?;

    let key_of = |id: &str| -> String {
        if options.strip_version {
            crate::data::strip_version(id).to_string()
        } else {
            id.to_string()
        }
    };
    let keys: Vec<String> = table.features().iter().map(|f| key_of(&f.feature_id)).collect();
    let ids = unique_ids(keys.iter().map(String::as_str));

    let mapping = run_lookup(
        lookup,
        STAGE,
        &LookupRequest {
            ids: &ids,
            source: &options.id_namespace,
            target: &options.symbol_namespace,
            dataset: &options.dataset,
            timeout: options.timeout,
        },
    )?;

    let mut n_matched = 0;
    let mut n_ambiguous = 0;
    let mut features = table.features().to_vec();
    for (feature, key) in features.iter_mut().zip(&keys) {
        let (symbol, ambiguous) = first_candidate(&mapping, key);
        feature.symbol = Symbol::from_lookup(symbol);
        if feature.symbol.is_resolved() {
            n_matched += 1;
            if ambiguous {
                n_ambiguous += 1;
            }
        }
    }

    let mut report = MatchReport::new(table.n_features(), n_matched, n_ambiguous);
    let mut annotated = table.with_features(features)?.with_symbol_column();

    log::info!(
        "Symbol annotation: {} of {} features matched ({:.1}%), {} unmatched, {} ambiguous",
        report.n_matched,
        report.n_total,
        report.match_rate * 100.0,
        report.n_unmatched,
        report.n_ambiguous
    );
    if report.n_total > 0 && report.match_rate < 0.5 {
        log::warn!(
            "Low symbol match rate ({:.1}%); check that '{}' matches the feature ids",
            report.match_rate * 100.0,
            options.id_namespace
        );
    }

    if options.discard_unmatched && report.n_unmatched > 0 {
        let keep: Vec<usize> = annotated
            .features()
            .iter()
            .enumerate()
            .filter(|(_, f)| f.symbol.is_resolved())
            .map(|(i, _)| i)
            .collect();
        annotated = annotated.subset_features(&keep)?;
        report.n_discarded = report.n_unmatched;
        log::info!("Discarded {} features without a symbol", report.n_discarded);
    }

    Ok((annotated, report))
}

/// Resolve each feature's symbol to a gene category.
///
/// Rows without a symbol, or whose symbol has no category, get none.
///
/// # Errors
/// `MissingColumn(Symbol)` if symbols were never annotated;
/// `LookupUnavailable` if the collaborator fails or exceeds the timeout.
pub fn annotate_categories<L: AnnotationLookup + ?Sized>(
    table: &ExpressionTable,
    lookup: &L,
    options: &AnnotateOptions,
) -> Result<(ExpressionTable, MatchReport)> {
    const STAGE: &str = "annotate_categories";
    table.validate(STAGE)?;
    if !table.has_symbols() {
        return Err(ConsolidateError::MissingColumn {
            stage: STAGE,
            column: Column::Symbol,
        });
    }

    let symbols = unique_ids(table.features().iter().filter_map(|f| f.symbol.as_str()));
    let mapping = run_lookup(
        lookup,
        STAGE,
        &LookupRequest {
            ids: &symbols,
            source: &options.symbol_namespace,
            target: &options.category_namespace,
            dataset: &options.dataset,
            timeout: options.timeout,
        },
    )?;

    let mut n_matched = 0;
    let mut n_ambiguous = 0;
    let mut features = table.features().to_vec();
    for feature in features.iter_mut() {
        feature.category = match feature.symbol.as_str() {
            Some(symbol) => {
                let (category, ambiguous) = first_candidate(&mapping, symbol);
                if category.is_some() {
                    n_matched += 1;
                    if ambiguous {
                        n_ambiguous += 1;
                    }
                }
                category.map(String::from)
            }
            None => None,
        };
    }

    let report = MatchReport::new(table.n_features(), n_matched, n_ambiguous);
    log::info!(
        "Category annotation: {} of {} features matched ({:.1}%)",
        report.n_matched,
        report.n_total,
        report.match_rate * 100.0
    );

    let annotated = table.with_features(features)?.with_category_column();
    Ok((annotated, report))
}
