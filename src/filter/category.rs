//! Category-based filtering of feature rows.

use crate::data::ExpressionTable;
use crate::error::{Column, ConsolidateError, Result};
use crate::filter::expression::FilterResult;
use std::collections::HashSet;

/// Keep rows whose category is one of `allowed`.
///
/// Rows without a category are removed. Categories must already be annotated;
/// this filter never looks them up.
///
/// # Errors
/// `MissingColumn(Category)` if the table has no category column;
/// `InvalidParameter` if `allowed` is empty.
pub fn filter_by_category<S: AsRef<str>>(
    table: &ExpressionTable,
    allowed: &[S],
) -> Result<(ExpressionTable, FilterResult)> {
    const STAGE: &str = "filter_by_category";
    table.validate(STAGE)?;
    if !table.has_categories() {
        return Err(ConsolidateError::MissingColumn {
            stage: STAGE,
            column: Column::Category,
        });
    }
    if allowed.is_empty() {
        return Err(ConsolidateError::InvalidParameter(
            "at least one allowed category is required".to_string(),
        ));
    }

    let allowed: HashSet<&str> = allowed.iter().map(|c| c.as_ref()).collect();
    let keep_indices: Vec<usize> = table
        .features()
        .iter()
        .enumerate()
        .filter(|(_, f)| f.category.as_deref().is_some_and(|c| allowed.contains(c)))
        .map(|(i, _)| i)
        .collect();

    let filtered = table.subset_features(&keep_indices)?;
    let result = FilterResult::new(table.n_features(), filtered.n_features());
    log::info!(
        "Category filter: kept {} of {} features ({:.1}%)",
        result.n_after,
        result.n_before,
        result.retention_rate * 100.0
    );
    Ok((filtered, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FeatureRecord;

    fn create_test_table() -> ExpressionTable {
        let features = vec![
            FeatureRecord::new("E1").with_symbol("A").with_category("protein_coding"),
            FeatureRecord::new("E2").with_symbol("B").with_category("lncRNA"),
            FeatureRecord::new("E3").with_symbol("C"),
            FeatureRecord::new("E4").with_symbol("D").with_category("miRNA"),
        ];
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0], vec![7.0, 8.0]];
        ExpressionTable::from_rows(features, rows, vec!["S1".to_string(), "S2".to_string()]).unwrap()
    }

    #[test]
    fn test_filter_by_category() {
        let table = create_test_table();
        let (filtered, result) = filter_by_category(&table, &["protein_coding", "miRNA"]).unwrap();
        assert_eq!(filtered.feature_ids(), vec!["E1", "E4"]);
        assert_eq!(filtered.row_dense(1), vec![7.0, 8.0]);
        assert_eq!(result.n_removed, 2);
    }

    #[test]
    fn test_missing_category_column() {
        let table = ExpressionTable::from_rows(
            vec![FeatureRecord::new("E1").with_symbol("A")],
            vec![vec![1.0]],
            vec!["S1".to_string()],
        )
        .unwrap();
        let err = filter_by_category(&table, &["protein_coding"]).unwrap_err();
        assert!(err.is_missing(Column::Category));
    }

    #[test]
    fn test_empty_allowed_set() {
        let table = create_test_table();
        let allowed: Vec<String> = Vec::new();
        assert!(matches!(
            filter_by_category(&table, &allowed),
            Err(ConsolidateError::InvalidParameter(_))
        ));
    }
}
