//! Which cells were missing in the unimputed input.
//!
//! Derived once from the original dataset and never mutated afterwards: filling
//! a cell in a working copy does not change whether it was originally missing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::Dataset;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingnessMatrix {
    n_rows: usize,
    n_cols: usize,
    /// Row-major: `cells[row * n_cols + col]` is true when missing.
    cells: Vec<bool>,
    missing_by_col: Vec<Vec<usize>>,
}

/// One distinct row pattern of missingness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingPattern {
    /// `true` where the variable is missing.
    pub missing: Vec<bool>,
    /// Number of rows with this pattern.
    pub count: usize,
}

impl MissingPattern {
    pub fn n_missing(&self) -> usize {
        self.missing.iter().filter(|&&m| m).count()
    }
}

impl MissingnessMatrix {
    pub fn from_dataset(dataset: &Dataset) -> Self {
        let n_rows = dataset.n_rows();
        let n_cols = dataset.n_cols();
        let mut cells = vec![false; n_rows * n_cols];
        let mut missing_by_col = vec![Vec::new(); n_cols];

        for (col, rows) in missing_by_col.iter_mut().enumerate() {
            for (row, value) in dataset.values(col).iter().enumerate() {
                if value.is_missing() {
                    cells[row * n_cols + col] = true;
                    rows.push(row);
                }
            }
        }

        Self {
            n_rows,
            n_cols,
            cells,
            missing_by_col,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn is_missing(&self, row: usize, col: usize) -> bool {
        self.cells[row * self.n_cols + col]
    }

    /// Rows where `col` was missing, ascending.
    pub fn missing_rows(&self, col: usize) -> &[usize] {
        &self.missing_by_col[col]
    }

    /// Rows where `col` was observed, ascending.
    pub fn observed_rows(&self, col: usize) -> Vec<usize> {
        (0..self.n_rows)
            .filter(|&row| !self.is_missing(row, col))
            .collect()
    }

    pub fn missing_count(&self, col: usize) -> usize {
        self.missing_by_col[col].len()
    }

    pub fn total_missing(&self) -> usize {
        self.missing_by_col.iter().map(Vec::len).sum()
    }

    /// Columns with at least one missing cell, in declaration order.
    pub fn incomplete_columns(&self) -> Vec<usize> {
        (0..self.n_cols)
            .filter(|&col| self.missing_count(col) > 0)
            .collect()
    }

    /// Distinct row patterns with frequencies.
    ///
    /// The complete pattern (if present) comes first, then patterns with more
    /// missing cells; ties keep a stable column-wise order.
    pub fn pattern(&self) -> Vec<MissingPattern> {
        let mut counts: BTreeMap<Vec<bool>, usize> = BTreeMap::new();
        for row in 0..self.n_rows {
            let start = row * self.n_cols;
            let key = self.cells[start..start + self.n_cols].to_vec();
            *counts.entry(key).or_insert(0) += 1;
        }

        let mut patterns: Vec<MissingPattern> = counts
            .into_iter()
            .map(|(missing, count)| MissingPattern { missing, count })
            .collect();
        patterns.sort_by(|a, b| {
            a.n_missing()
                .cmp(&b.n_missing())
                .then_with(|| a.missing.cmp(&b.missing))
        });
        patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Column;

    fn dataset() -> Dataset {
        Dataset::new(vec![
            Column::continuous("a", vec![Some(1.0), None, Some(3.0), None]),
            Column::continuous("b", vec![Some(1.0), Some(2.0), Some(3.0), None]),
            Column::categorical(
                "c",
                vec!["x".into(), "y".into()],
                vec![Some(0), Some(1), None, Some(0)],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn marks_missing_cells() {
        let m = MissingnessMatrix::from_dataset(&dataset());
        assert!(m.is_missing(1, 0));
        assert!(!m.is_missing(0, 0));
        assert_eq!(m.missing_rows(0), &[1, 3]);
        assert_eq!(m.observed_rows(2), vec![0, 1, 3]);
        assert_eq!(m.total_missing(), 4);
        assert_eq!(m.incomplete_columns(), vec![0, 1, 2]);
    }

    #[test]
    fn filling_a_copy_does_not_change_the_matrix() {
        let original = dataset();
        let m = MissingnessMatrix::from_dataset(&original);
        let mut filled = original.clone();
        filled.set(1, 0, crate::domain::Value::Real(2.0)).unwrap();
        assert!(m.is_missing(1, 0));
        assert_ne!(MissingnessMatrix::from_dataset(&filled), m);
    }

    #[test]
    fn pattern_counts_cover_every_row() {
        let m = MissingnessMatrix::from_dataset(&dataset());
        let patterns = m.pattern();
        assert_eq!(patterns.iter().map(|p| p.count).sum::<usize>(), 4);
        assert_eq!(patterns[0].n_missing(), 0);
        assert_eq!(patterns.last().unwrap().n_missing(), 2);
    }
}
