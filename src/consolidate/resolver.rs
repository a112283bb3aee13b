//! Collapse features sharing a gene symbol into one row per symbol.

use crate::consolidate::method::MergeMethod;
use crate::consolidate::rng::SimpleRng;
use crate::data::ExpressionTable;
use crate::error::{Column, ConsolidateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Features sharing one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub symbol: String,
    /// Row indices in table order.
    pub rows: Vec<usize>,
}

/// Output position in first-appearance order.
enum Slot {
    /// Index into the group list.
    Group(usize),
    /// A row without a symbol; passes through as-is.
    Unresolved(usize),
}

/// Partition rows by symbol, preserving first-appearance order.
///
/// Unresolved rows never join a group.
fn group_rows(table: &ExpressionTable) -> (Vec<Slot>, Vec<DuplicateGroup>) {
    let mut slots = Vec::with_capacity(table.n_features());
    let mut groups: Vec<DuplicateGroup> = Vec::new();
    let mut by_symbol: HashMap<&str, usize> = HashMap::new();

    for (row, feature) in table.features().iter().enumerate() {
        match feature.symbol.as_str() {
            Some(symbol) => match by_symbol.get(symbol) {
                Some(&g) => groups[g].rows.push(row),
                None => {
                    by_symbol.insert(symbol, groups.len());
                    slots.push(Slot::Group(groups.len()));
                    groups.push(DuplicateGroup {
                        symbol: symbol.to_string(),
                        rows: vec![row],
                    });
                }
            },
            None => slots.push(Slot::Unresolved(row)),
        }
    }

    (slots, groups)
}

/// Symbols carried by more than one row, in order of first appearance.
pub fn find_duplicates(table: &ExpressionTable) -> Vec<DuplicateGroup> {
    let (_, groups) = group_rows(table);
    groups.into_iter().filter(|g| g.rows.len() > 1).collect()
}

/// Statistics of a duplicate resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub method: MergeMethod,
    /// Rows before merging.
    pub n_rows: usize,
    /// Rows without a symbol (passed through).
    pub n_unresolved: usize,
    /// Distinct symbols.
    pub n_unique_symbols: usize,
    /// Symbols carried by more than one row.
    pub n_duplicated_symbols: usize,
    /// Rows beyond the first for each symbol.
    pub n_duplicate_entries: usize,
    /// Rows after merging.
    pub n_after: usize,
}

impl std::fmt::Display for DuplicateReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Duplicate Resolution ({})", self.method)?;
        writeln!(f, "  Rows:               {}", self.n_rows)?;
        writeln!(f, "  Unique symbols:     {}", self.n_unique_symbols)?;
        writeln!(f, "  Duplicated symbols: {}", self.n_duplicated_symbols)?;
        writeln!(f, "  Duplicate entries:  {}", self.n_duplicate_entries)?;
        writeln!(f, "  Unresolved rows:    {}", self.n_unresolved)?;
        writeln!(f, "  Rows after:         {}", self.n_after)?;
        Ok(())
    }
}

/// Index of the row with the largest mean count; the earliest row wins ties.
fn highest_mean(table: &ExpressionTable, rows: &[usize]) -> usize {
    let mut best = rows[0];
    let mut best_mean = table.row_mean(best);
    for &row in &rows[1..] {
        let mean = table.row_mean(row);
        if mean > best_mean {
            best = row;
            best_mean = mean;
        }
    }
    best
}

/// Per-sample mean of the given rows.
fn average_counts(table: &ExpressionTable, rows: &[usize]) -> Vec<f64> {
    let mut sums = vec![0.0; table.n_samples()];
    for &row in rows {
        if let Some(row_vec) = table.data().outer_view(row) {
            for (col, &val) in row_vec.iter() {
                sums[col] += val;
            }
        }
    }
    let n = rows.len() as f64;
    sums.into_iter().map(|s| s / n).collect()
}

/// Merge rows sharing a symbol so every symbol appears exactly once.
///
/// Output keeps the order in which each symbol (or unresolved row) first
/// appears. `seed` drives the `Random` policy only; the generator draws once
/// per duplicated symbol in that order, so equal seeds give equal tables.
/// A table without repeated symbols comes back unchanged.
///
/// # Errors
/// `MissingColumn(Symbol)` if the table was never annotated with symbols.
pub fn resolve_duplicates(
    table: &ExpressionTable,
    method: MergeMethod,
    seed: u64,
) -> Result<(ExpressionTable, DuplicateReport)> {
    const STAGE: &str = "resolve_duplicates";
    table.validate(STAGE)?;
    if !table.has_symbols() {
        return Err(ConsolidateError::MissingColumn {
            stage: STAGE,
            column: Column::Symbol,
        });
    }

    let (slots, groups) = group_rows(table);
    let n_unresolved = slots.iter().filter(|s| matches!(s, Slot::Unresolved(_))).count();
    let n_duplicated_symbols = groups.iter().filter(|g| g.rows.len() > 1).count();
    let n_resolved = table.n_features() - n_unresolved;

    let mut report = DuplicateReport {
        method,
        n_rows: table.n_features(),
        n_unresolved,
        n_unique_symbols: groups.len(),
        n_duplicated_symbols,
        n_duplicate_entries: n_resolved - groups.len(),
        n_after: slots.len(),
    };

    log::info!(
        "Duplicate resolution: {} rows, {} unique symbols, {} duplicate entries across {} symbols, {} unresolved",
        report.n_rows,
        report.n_unique_symbols,
        report.n_duplicate_entries,
        report.n_duplicated_symbols,
        report.n_unresolved
    );

    if n_duplicated_symbols == 0 {
        report.n_after = table.n_features();
        return Ok((table.clone(), report));
    }

    let merged = match method {
        MergeMethod::Average => {
            let mut features = Vec::with_capacity(slots.len());
            let mut rows = Vec::with_capacity(slots.len());
            for slot in &slots {
                let (first, members) = match slot {
                    Slot::Group(g) => (groups[*g].rows[0], groups[*g].rows.as_slice()),
                    Slot::Unresolved(row) => (*row, std::slice::from_ref(row)),
                };
                features.push(table.features()[first].clone());
                rows.push(if members.len() == 1 {
                    table.row_dense(first)
                } else {
                    average_counts(table, members)
                });
            }
            table.rebuild(features, rows)?
        }
        MergeMethod::First | MergeMethod::Random | MergeMethod::Highest => {
            let mut rng = SimpleRng::new(seed);
            let keep: Vec<usize> = slots
                .iter()
                .map(|slot| match slot {
                    Slot::Unresolved(row) => *row,
                    Slot::Group(g) => {
                        let rows = &groups[*g].rows;
                        if rows.len() == 1 {
                            return rows[0];
                        }
                        match method {
                            MergeMethod::Random => rows[rng.next_index(rows.len())],
                            MergeMethod::Highest => highest_mean(table, rows),
                            _ => rows[0],
                        }
                    }
                })
                .collect();
            table.subset_features(&keep)?
        }
    };

    log::info!(
        "Merged {} rows into {} using '{}'",
        report.n_rows,
        merged.n_features(),
        method
    );
    report.n_after = merged.n_features();
    Ok((merged, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FeatureRecord;
    use approx::assert_relative_eq;
    use std::collections::HashSet;

    fn samples(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("S{}", i)).collect()
    }

    fn table_of(entries: &[(&str, Option<&str>, Vec<f64>)]) -> ExpressionTable {
        let features = entries
            .iter()
            .map(|(id, symbol, _)| {
                let rec = FeatureRecord::new(id).with_position("chr1", "1", "10", "+", 10);
                match symbol {
                    Some(s) => rec.with_symbol(s),
                    None => rec,
                }
            })
            .collect();
        let n = entries.first().map(|e| e.2.len()).unwrap_or(0);
        let rows = entries.iter().map(|e| e.2.clone()).collect();
        ExpressionTable::from_rows(features, rows, samples(n))
            .unwrap()
            .with_symbol_column()
    }

    fn g1_pair() -> ExpressionTable {
        table_of(&[
            ("ENSG_A", Some("G1"), vec![100.0, 110.0]),
            ("ENSG_B", Some("G1"), vec![150.0, 160.0]),
        ])
    }

    fn mixed_table() -> ExpressionTable {
        table_of(&[
            ("E1", Some("A"), vec![1.0, 2.0, 3.0]),
            ("E2", None, vec![0.0, 0.0, 9.0]),
            ("E3", Some("B"), vec![5.0, 5.0, 5.0]),
            ("E4", Some("A"), vec![7.0, 8.0, 9.0]),
            ("E5", None, vec![4.0, 4.0, 4.0]),
            ("E6", Some("C"), vec![2.0, 2.0, 2.0]),
            ("E7", Some("B"), vec![5.0, 5.0, 5.0]),
            ("E8", Some("A"), vec![3.0, 3.0, 3.0]),
        ])
    }

    #[test]
    fn test_average_policy() {
        let (merged, report) = resolve_duplicates(&g1_pair(), MergeMethod::Average, 0).unwrap();
        assert_eq!(merged.n_features(), 1);
        let counts = merged.row_dense(0);
        assert_relative_eq!(counts[0], 125.0);
        assert_relative_eq!(counts[1], 135.0);
        assert_eq!(merged.features()[0].feature_id, "ENSG_A");
        assert_eq!(report.n_duplicate_entries, 1);
        assert_eq!(report.n_after, 1);
    }

    #[test]
    fn test_highest_policy() {
        let (merged, _) = resolve_duplicates(&g1_pair(), MergeMethod::Highest, 0).unwrap();
        assert_eq!(merged.n_features(), 1);
        assert_eq!(merged.row_dense(0), vec![150.0, 160.0]);
        assert_eq!(merged.features()[0].feature_id, "ENSG_B");
    }

    #[test]
    fn test_highest_tie_goes_to_earliest() {
        let table = mixed_table();
        let (merged, _) = resolve_duplicates(&table, MergeMethod::Highest, 0).unwrap();
        // B: E3 and E7 tie
        let ids = merged.feature_ids();
        assert!(ids.contains(&"E3"));
        assert!(!ids.contains(&"E7"));
        // A: E4 has the highest mean
        assert!(ids.contains(&"E4"));
    }

    #[test]
    fn test_first_policy_preserves_first_appearance_order() {
        let (merged, report) = resolve_duplicates(&mixed_table(), MergeMethod::First, 0).unwrap();
        assert_eq!(merged.feature_ids(), vec!["E1", "E2", "E3", "E5", "E6"]);
        assert_eq!(merged.symbols(), vec![Some("A"), None, Some("B"), None, Some("C")]);
        assert_eq!(report.n_rows, 8);
        assert_eq!(report.n_unresolved, 2);
        assert_eq!(report.n_unique_symbols, 3);
        assert_eq!(report.n_duplicated_symbols, 2);
        assert_eq!(report.n_duplicate_entries, 3);
        assert_eq!(report.n_after, 5);
    }

    #[test]
    fn test_average_keeps_first_metadata_and_passes_unresolved() {
        let mut table = mixed_table();
        let mut features = table.features().to_vec();
        features[0].category = Some("protein_coding".to_string());
        features[3].category = Some("lncRNA".to_string());
        table = table.with_features(features).unwrap();

        let (merged, _) = resolve_duplicates(&table, MergeMethod::Average, 0).unwrap();
        assert_eq!(merged.feature_ids(), vec!["E1", "E2", "E3", "E5", "E6"]);
        assert_eq!(merged.features()[0].category.as_deref(), Some("protein_coding"));
        assert_eq!(merged.row_dense(0), vec![11.0 / 3.0, 13.0 / 3.0, 5.0]);
        assert_eq!(merged.row_dense(1), vec![0.0, 0.0, 9.0]);
        assert_eq!(merged.row_dense(2), vec![5.0, 5.0, 5.0]);
        assert!(merged.has_categories());
    }

    #[test]
    fn test_symbols_unique_after_every_method() {
        let table = mixed_table();
        for method in [MergeMethod::First, MergeMethod::Random, MergeMethod::Average, MergeMethod::Highest] {
            let (merged, _) = resolve_duplicates(&table, method, 11).unwrap();
            let symbols: Vec<&str> = merged.symbols().into_iter().flatten().collect();
            let unique: HashSet<&str> = symbols.iter().copied().collect();
            assert_eq!(symbols.len(), unique.len(), "method {}", method);
            assert!(merged.n_features() < table.n_features());
            assert_eq!(merged.sample_ids(), table.sample_ids());
        }
    }

    #[test]
    fn test_no_duplicates_is_noop_for_every_method() {
        let table = table_of(&[
            ("E1", Some("Z"), vec![1.0, 0.0]),
            ("E2", None, vec![3.0, 4.0]),
            ("E3", Some("A"), vec![5.0, 6.0]),
            ("E4", None, vec![7.0, 8.0]),
        ]);
        for method in [MergeMethod::First, MergeMethod::Random, MergeMethod::Average, MergeMethod::Highest] {
            let (merged, report) = resolve_duplicates(&table, method, 3).unwrap();
            assert_eq!(merged, table);
            assert_eq!(report.n_duplicate_entries, 0);
            assert_eq!(report.n_after, 4);
        }
    }

    #[test]
    fn test_random_is_deterministic_per_seed() {
        let table = mixed_table();
        let (a, _) = resolve_duplicates(&table, MergeMethod::Random, 1234).unwrap();
        let (b, _) = resolve_duplicates(&table, MergeMethod::Random, 1234).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.feature_ids(), b.feature_ids());
    }

    #[test]
    fn test_random_picks_group_members() {
        let table = mixed_table();
        for seed in 0..25 {
            let (merged, _) = resolve_duplicates(&table, MergeMethod::Random, seed).unwrap();
            let ids = merged.feature_ids();
            assert!(["E1", "E4", "E8"].contains(&ids[0]));
            assert_eq!(ids[1], "E2");
            assert!(["E3", "E7"].contains(&ids[2]));
            assert_eq!(ids[3], "E5");
            assert_eq!(ids[4], "E6");
        }
    }

    #[test]
    fn test_missing_symbol_column() {
        let table = ExpressionTable::from_rows(
            vec![FeatureRecord::new("E1")],
            vec![vec![1.0]],
            samples(1),
        )
        .unwrap();
        let err = resolve_duplicates(&table, MergeMethod::First, 0).unwrap_err();
        assert!(err.is_missing(Column::Symbol));
    }

    #[test]
    fn test_find_duplicates() {
        let groups = find_duplicates(&mixed_table());
        assert_eq!(
            groups,
            vec![
                DuplicateGroup {
                    symbol: "A".to_string(),
                    rows: vec![0, 3, 7],
                },
                DuplicateGroup {
                    symbol: "B".to_string(),
                    rows: vec![2, 6],
                },
            ]
        );
    }
}
