//! Export completed datasets to CSV and pooled results to JSON.
//!
//! The CSV is in long format: the original data (`.imp = 0`, missing cells as
//! `NA`) followed by each completed dataset, with `.imp` and `.id` (1-based
//! row) leading every record. Factors are written by level label.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Dataset, PooledResult};
use crate::error::AppError;
use crate::mice::ImputationCollection;

/// Pooled-result JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolFile {
    pub tool: String,
    pub generated_at: DateTime<Utc>,
    pub response: String,
    pub m: usize,
    pub iterations: usize,
    pub seed: u64,
    pub pooled: PooledResult,
}

/// Write the original and every completed dataset to one long-format CSV.
pub fn write_imputations_csv(path: &Path, collection: &ImputationCollection) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create export CSV '{}': {e}", path.display())))?;
    let mut out = BufWriter::new(file);
    write_long_csv(&mut out, collection)
        .and_then(|()| out.flush())
        .map_err(|e| AppError::new(2, format!("Failed to write export CSV: {e}")))
}

/// Write the pooled table plus run metadata as pretty JSON.
pub fn write_pool_json(
    path: &Path,
    collection: &ImputationCollection,
    response: &str,
    pooled: &PooledResult,
) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create pool JSON '{}': {e}", path.display())))?;
    let config = collection.config();
    let doc = PoolFile {
        tool: "mice".to_string(),
        generated_at: Utc::now(),
        response: response.to_string(),
        m: collection.m(),
        iterations: config.iterations,
        seed: config.seed,
        pooled: pooled.clone(),
    };
    serde_json::to_writer_pretty(file, &doc)
        .map_err(|e| AppError::new(2, format!("Failed to write pool JSON: {e}")))?;
    Ok(())
}

fn write_long_csv<W: Write>(out: &mut W, collection: &ImputationCollection) -> std::io::Result<()> {
    let original = collection.original();
    let header: Vec<String> = [".imp".to_string(), ".id".to_string()]
        .into_iter()
        .chain(original.names().map(csv_field))
        .collect();
    writeln!(out, "{}", header.join(","))?;

    write_rows(out, 0, original)?;
    for imp in collection.imputations() {
        write_rows(out, imp.index, &imp.data)?;
    }
    Ok(())
}

fn write_rows<W: Write>(out: &mut W, index: usize, data: &Dataset) -> std::io::Result<()> {
    for row in 0..data.n_rows() {
        write!(out, "{index},{}", row + 1)?;
        for col in 0..data.n_cols() {
            let cell = match data.get(row, col) {
                crate::domain::Value::Missing => "NA".to_string(),
                crate::domain::Value::Real(x) => format!("{x}"),
                crate::domain::Value::Level(l) => data
                    .column(col)
                    .levels
                    .get(l as usize)
                    .map(|s| csv_field(s))
                    .unwrap_or_else(|| l.to_string()),
            };
            write!(out, ",{cell}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Quote a field when it contains a separator, quote or newline.
fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Column, ImputeConfig};
    use crate::mice::generate;

    fn collection() -> ImputationCollection {
        let n = 20;
        let ds = Dataset::new(vec![
            Column::continuous("x", (0..n).map(|i| Some(i as f64)).collect()),
            Column::categorical(
                "g",
                vec!["lo".into(), "hi, very".into()],
                (0..n)
                    .map(|i| if i == 3 { None } else { Some((i % 2) as u32) })
                    .collect(),
            ),
        ])
        .unwrap();
        let config = ImputeConfig {
            m: 2,
            iterations: 1,
            ..ImputeConfig::default()
        };
        generate(&ds, None, &config).unwrap()
    }

    #[test]
    fn long_csv_stacks_original_and_imputations() {
        let imp = collection();
        let mut buf = Vec::new();
        write_long_csv(&mut buf, &imp).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], ".imp,.id,x,g");
        assert_eq!(lines.len(), 1 + 3 * 20);
        assert_eq!(lines[4], "0,4,3,NA");
        assert!(lines[1 + 20 + 3].starts_with("1,4,3,"));
        assert!(!lines[1 + 20 + 3].ends_with("NA"));
        assert!(lines[2].ends_with("\"hi, very\""));
    }

    #[test]
    fn csv_field_quotes_when_needed() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"x\""), "\"say \"\"x\"\"\"");
    }
}
