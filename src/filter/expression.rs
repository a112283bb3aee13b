//! Expression-based filtering of feature rows.

use crate::data::ExpressionTable;
use crate::error::{ConsolidateError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Thresholds for [`filter_expression`].
///
/// `min_mean` keeps rows whose mean count is strictly above it.
/// `min_count` and `min_samples` go together: keep rows with at least
/// `min_samples` samples whose count is strictly above `min_count`.
/// When both predicates are set the mean filter runs first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpressionPredicate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_count: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_samples: Option<usize>,
}

impl ExpressionPredicate {
    /// Mean-threshold predicate.
    pub fn mean(min_mean: f64) -> Self {
        Self {
            min_mean: Some(min_mean),
            ..Self::default()
        }
    }

    /// Count-in-samples predicate.
    pub fn count_in_samples(min_count: f64, min_samples: usize) -> Self {
        Self {
            min_count: Some(min_count),
            min_samples: Some(min_samples),
            ..Self::default()
        }
    }

    /// Both predicates, mean first.
    pub fn both(min_mean: f64, min_count: f64, min_samples: usize) -> Self {
        Self {
            min_mean: Some(min_mean),
            min_count: Some(min_count),
            min_samples: Some(min_samples),
        }
    }

    /// Check the thresholds before any row is touched.
    pub fn validate(&self) -> Result<()> {
        match (self.min_count, self.min_samples) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(ConsolidateError::IncompletePredicate {
                    min_count: self.min_count,
                    min_samples: self.min_samples,
                });
            }
            _ => {}
        }
        if self.min_mean.is_none() && self.min_count.is_none() {
            return Err(ConsolidateError::InvalidParameter(
                "expression filter needs min_mean or min_count with min_samples".to_string(),
            ));
        }
        if let Some(min_mean) = self.min_mean {
            check_threshold("min_mean", min_mean)?;
        }
        if let Some(min_count) = self.min_count {
            check_threshold("min_count", min_count)?;
        }
        Ok(())
    }
}

fn check_threshold(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConsolidateError::InvalidParameter(format!(
            "{} must be a non-negative number, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Rows kept and dropped by a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterResult {
    /// Number of features before filtering.
    pub n_before: usize,
    /// Number of features after filtering.
    pub n_after: usize,
    /// Number of features removed.
    pub n_removed: usize,
    /// Proportion of features retained.
    pub retention_rate: f64,
}

impl FilterResult {
    pub fn new(n_before: usize, n_after: usize) -> Self {
        Self {
            n_before,
            n_after,
            n_removed: n_before - n_after,
            retention_rate: if n_before > 0 {
                n_after as f64 / n_before as f64
            } else {
                1.0
            },
        }
    }
}

impl std::fmt::Display for FilterResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Filter Result")?;
        writeln!(f, "  Before:    {} features", self.n_before)?;
        writeln!(f, "  After:     {} features", self.n_after)?;
        writeln!(f, "  Removed:   {} features", self.n_removed)?;
        writeln!(f, "  Retained:  {:.1}%", self.retention_rate * 100.0)?;
        Ok(())
    }
}

/// Keep rows whose mean count across samples is strictly greater than `min_mean`.
pub fn filter_mean_expression(table: &ExpressionTable, min_mean: f64) -> Result<ExpressionTable> {
    table.validate("filter_mean_expression")?;
    check_threshold("min_mean", min_mean)?;

    let keep_indices: Vec<usize> = (0..table.n_features())
        .into_par_iter()
        .filter(|&row| table.row_mean(row) > min_mean)
        .collect();

    log_removed("mean", table.n_features(), keep_indices.len());
    table.subset_features(&keep_indices)
}

/// Keep rows where at least `min_samples` samples have a count strictly greater than `min_count`.
pub fn filter_count_in_samples(
    table: &ExpressionTable,
    min_count: f64,
    min_samples: usize,
) -> Result<ExpressionTable> {
    table.validate("filter_count_in_samples")?;
    check_threshold("min_count", min_count)?;
    if min_samples > table.n_samples() {
        log::warn!(
            "min_samples ({}) exceeds the number of samples ({}); every row will be removed",
            min_samples,
            table.n_samples()
        );
    }

    // min_count >= 0, so unstored zeros never pass
    let keep_indices: Vec<usize> = (0..table.n_features())
        .into_par_iter()
        .filter(|&row| {
            let passing = table
                .data()
                .outer_view(row)
                .map(|v| v.iter().filter(|(_, &val)| val > min_count).count())
                .unwrap_or(0);
            passing >= min_samples
        })
        .collect();

    log_removed("count-in-samples", table.n_features(), keep_indices.len());
    table.subset_features(&keep_indices)
}

fn log_removed(name: &str, n_before: usize, n_after: usize) {
    let result = FilterResult::new(n_before, n_after);
    log::info!(
        "Expression filter ({}): removed {} of {} features, {:.1}% retained",
        name,
        result.n_removed,
        result.n_before,
        result.retention_rate * 100.0
    );
    if n_after == 0 && n_before > 0 {
        log::warn!("Expression filter ({}) removed every feature", name);
    }
}

/// Apply the mean and/or count-in-samples predicates.
///
/// # Errors
/// `IncompletePredicate` if only one of `min_count`/`min_samples` is set;
/// `InvalidParameter` if no predicate is set or a threshold is negative.
pub fn filter_expression(
    table: &ExpressionTable,
    predicate: &ExpressionPredicate,
) -> Result<(ExpressionTable, FilterResult)> {
    predicate.validate()?;
    table.validate("filter_expression")?;

    let n_before = table.n_features();
    let mut filtered = match predicate.min_mean {
        Some(min_mean) => filter_mean_expression(table, min_mean)?,
        None => table.clone(),
    };
    if let (Some(min_count), Some(min_samples)) = (predicate.min_count, predicate.min_samples) {
        filtered = filter_count_in_samples(&filtered, min_count, min_samples)?;
    }

    let result = FilterResult::new(n_before, filtered.n_features());
    Ok((filtered, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FeatureRecord;

    fn create_test_table() -> ExpressionTable {
        // mean: 10, 5, 5.0001, 17/3, 0
        let rows = vec![
            vec![10.0, 10.0, 10.0],
            vec![5.0, 5.0, 5.0],
            vec![5.0001, 5.0001, 5.0001],
            vec![4.0, 6.0, 7.0],
            vec![0.0, 0.0, 0.0],
        ];
        let features = (0..rows.len()).map(|i| FeatureRecord::new(&format!("feat_{}", i))).collect();
        let samples = vec!["S1".to_string(), "S2".to_string(), "S3".to_string()];
        ExpressionTable::from_rows(features, rows, samples).unwrap()
    }

    #[test]
    fn test_mean_threshold_is_strict() {
        let table = create_test_table();
        let filtered = filter_mean_expression(&table, 5.0).unwrap();
        assert_eq!(filtered.feature_ids(), vec!["feat_0", "feat_2", "feat_3"]);
    }

    #[test]
    fn test_count_in_samples() {
        let table = create_test_table();
        // feat_3 has [4, 6, 7]: two samples exceed 5
        let filtered = filter_count_in_samples(&table, 5.0, 2).unwrap();
        assert!(filtered.feature_ids().contains(&"feat_3"));
        assert!(!filtered.feature_ids().contains(&"feat_1"));

        let filtered = filter_count_in_samples(&table, 5.0, 3).unwrap();
        assert!(!filtered.feature_ids().contains(&"feat_3"));
        assert_eq!(filtered.feature_ids(), vec!["feat_0", "feat_2"]);
    }

    #[test]
    fn test_both_predicates_compose() {
        let table = create_test_table();
        let (filtered, result) = filter_expression(&table, &ExpressionPredicate::both(5.5, 5.0, 3)).unwrap();
        // mean filter keeps feat_0 and feat_3; count filter then drops feat_3
        assert_eq!(filtered.feature_ids(), vec!["feat_0"]);
        assert_eq!(result.n_before, 5);
        assert_eq!(result.n_after, 1);
        assert_eq!(result.n_removed, 4);
    }

    #[test]
    fn test_incomplete_predicate() {
        let table = create_test_table();
        let only_count = ExpressionPredicate {
            min_count: Some(5.0),
            ..ExpressionPredicate::default()
        };
        assert!(matches!(
            filter_expression(&table, &only_count),
            Err(ConsolidateError::IncompletePredicate { .. })
        ));

        let only_samples = ExpressionPredicate {
            min_mean: Some(1.0),
            min_samples: Some(2),
            ..ExpressionPredicate::default()
        };
        assert!(matches!(
            filter_expression(&table, &only_samples),
            Err(ConsolidateError::IncompletePredicate { .. })
        ));
    }

    #[test]
    fn test_empty_predicate_and_negative_threshold() {
        let table = create_test_table();
        assert!(matches!(
            filter_expression(&table, &ExpressionPredicate::default()),
            Err(ConsolidateError::InvalidParameter(_))
        ));
        assert!(filter_mean_expression(&table, -1.0).is_err());
        assert!(filter_count_in_samples(&table, f64::NAN, 1).is_err());
    }

    #[test]
    fn test_filter_never_grows_or_mutates() {
        let table = create_test_table();
        let (filtered, result) = filter_expression(&table, &ExpressionPredicate::mean(0.0)).unwrap();
        assert!(filtered.n_features() <= table.n_features());
        assert_eq!(result.n_after, 4);
        for (row, feature) in filtered.features().iter().enumerate() {
            let original = table.feature_ids().iter().position(|id| *id == feature.feature_id).unwrap();
            assert_eq!(filtered.row_dense(row), table.row_dense(original));
        }
    }

    #[test]
    fn test_filter_to_empty_is_allowed() {
        let table = create_test_table();
        let (filtered, result) = filter_expression(&table, &ExpressionPredicate::mean(1000.0)).unwrap();
        assert!(filtered.is_empty());
        assert_eq!(filtered.n_samples(), 3);
        assert!((result.retention_rate - 0.0).abs() < 1e-12);
    }
}
