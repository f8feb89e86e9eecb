//! Reporting utilities: imputed-cell listings and formatted terminal output.

pub mod format;

pub use format::{
    format_chain_trace, format_imputed_values, format_pattern, format_pooled, format_run_summary,
};

use crate::domain::{Dataset, Value};
use crate::mice::ImputationCollection;

/// One originally-missing cell and its value in each completed dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct ImputedCell {
    pub row: usize,
    pub column: usize,
    /// One value per completed dataset, in imputation order.
    pub values: Vec<Value>,
}

/// Collect every originally-missing cell, column-major.
pub fn imputed_cells(collection: &ImputationCollection) -> Vec<ImputedCell> {
    let missingness = collection.missingness();
    let completed: Vec<&Dataset> = collection.imputations().iter().map(|i| &i.data).collect();

    let mut out = Vec::with_capacity(missingness.total_missing());
    for column in missingness.incomplete_columns() {
        for &row in missingness.missing_rows(column) {
            out.push(ImputedCell {
                row,
                column,
                values: completed.iter().map(|d| d.get(row, column)).collect(),
            });
        }
    }
    out
}

/// Render one cell value the way it appears in reports and exports.
pub fn render_value(data: &Dataset, column: usize, value: Value) -> String {
    match value {
        Value::Missing => "NA".to_string(),
        Value::Real(x) => format!("{x:.2}"),
        Value::Level(l) => data
            .column(column)
            .levels
            .get(l as usize)
            .cloned()
            .unwrap_or_else(|| l.to_string()),
    }
}
