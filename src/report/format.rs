//! Formatted terminal output.
//!
//! Formatting lives here so the engine code stays free of presentation and
//! output changes stay local.

use crate::domain::{Dataset, PooledResult};
use crate::mice::{ImputationCollection, MissingnessMatrix};
use crate::report::{imputed_cells, render_value};

/// Run header plus the per-variable method table.
pub fn format_run_summary(collection: &ImputationCollection) -> String {
    let data = collection.original();
    let config = collection.config();
    let graph = collection.graph();
    let missingness = collection.missingness();
    let mut out = String::new();

    out.push_str("=== mice - Multivariate Imputation by Chained Equations ===\n");
    out.push_str(&format!(
        "Data: rows={} | variables={} | missing cells={}\n",
        data.n_rows(),
        data.n_cols(),
        missingness.total_missing()
    ));
    out.push_str(&format!(
        "Run: m={} | iterations={} | seed={} | donors={}\n",
        config.m, config.iterations, config.seed, config.donors
    ));
    if !collection.failures().is_empty() {
        out.push_str(&format!(
            "Failed imputations: {}\n",
            collection
                .failures()
                .iter()
                .map(|f| format!("#{} ({})", f.index, f.error))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    out.push_str("\nMethods:\n");
    push_row(
        &mut out,
        &format!("{:<16} {:<12} {:>8} {:<8} {}", "variable", "kind", "missing", "method", "predictors"),
    );
    push_row(&mut out, &format!("{:-<16} {:-<12} {:-<8} {:-<8} {:-<10}", "", "", "", "", ""));
    for (c, column) in data.columns().iter().enumerate() {
        let method = match (missingness.missing_count(c), graph.method_of(c)) {
            (0, _) | (_, None) => "-".to_string(),
            (_, Some(m)) => m.to_string(),
        };
        let predictors: Vec<&str> = graph
            .predictors_of(c)
            .into_iter()
            .map(|p| data.column(p).name.as_str())
            .collect();
        let predictors = if missingness.missing_count(c) == 0 {
            String::new()
        } else {
            predictors.join(", ")
        };
        push_row(
            &mut out,
            &format!(
                "{:<16} {:<12} {:>8} {:<8} {}",
                truncate(&column.name, 16),
                column.kind.to_string(),
                missingness.missing_count(c),
                method,
                predictors
            ),
        );
    }
    out.push('\n');
    out
}

/// Missing-data pattern table: one line per distinct pattern.
///
/// `1` marks observed and `0` missing. The first column is the number of rows
/// with the pattern, the last the number of missing variables in it; the
/// footer counts missing cells per variable.
pub fn format_pattern(data: &Dataset, missingness: &MissingnessMatrix) -> String {
    let widths: Vec<usize> = data.names().map(|n| n.chars().count().max(3)).collect();
    let mut out = String::new();

    let mut header = format!("{:>6}", "rows");
    for (name, w) in data.names().zip(widths.iter().copied()) {
        header.push_str(&format!(" {name:>w$}"));
    }
    header.push_str(&format!(" {:>8}", "missing"));
    push_row(&mut out, &header);

    for pattern in missingness.pattern() {
        let mut line = format!("{:>6}", pattern.count);
        for (missing, w) in pattern.missing.iter().zip(widths.iter().copied()) {
            let mark = if *missing { "0" } else { "1" };
            line.push_str(&format!(" {mark:>w$}"));
        }
        line.push_str(&format!(" {:>8}", pattern.n_missing()));
        push_row(&mut out, &line);
    }

    let mut footer = format!("{:>6}", "");
    for (c, w) in widths.iter().copied().enumerate() {
        footer.push_str(&format!(" {:>w$}", missingness.missing_count(c)));
    }
    footer.push_str(&format!(" {:>8}", missingness.total_missing()));
    push_row(&mut out, &footer);
    out
}

/// Pooled coefficient table.
pub fn format_pooled(pooled: &PooledResult) -> String {
    let mut out = String::new();
    let pct = pooled.conf_level * 100.0;
    out.push_str(&format!(
        "Pooled estimates (m={}, df={}, {pct:.0}% CI):\n",
        pooled.m,
        match pooled.df_method {
            crate::domain::DfMethod::BarnardRubin => "Barnard-Rubin",
            crate::domain::DfMethod::Rubin => "Rubin",
        }
    ));
    push_row(
        &mut out,
        &format!(
            "{:<20} {:>10} {:>10} {:>8} {:>8} {:>8} {:>10} {:>10} {:>6}",
            "term", "estimate", "std.error", "t", "df", "p", "low", "high", "fmi"
        ),
    );
    push_row(
        &mut out,
        &format!(
            "{:-<20} {:-<10} {:-<10} {:-<8} {:-<8} {:-<8} {:-<10} {:-<10} {:-<6}",
            "", "", "", "", "", "", "", "", ""
        ),
    );
    for t in &pooled.terms {
        push_row(
            &mut out,
            &format!(
                "{:<20} {:>10.4} {:>10.4} {:>8.3} {:>8.1} {:>8.4} {:>10.4} {:>10.4} {:>6.3}",
                truncate(&t.term, 20),
                t.estimate,
                t.std_error,
                t.statistic,
                t.df,
                t.p_value,
                t.conf_low,
                t.conf_high,
                t.fmi
            ),
        );
    }
    out
}

/// Imputed values of the first `max_cells` missing cells, one column per
/// completed dataset.
pub fn format_imputed_values(collection: &ImputationCollection, max_cells: usize) -> String {
    let data = collection.original();
    let cells = imputed_cells(collection);
    let mut out = String::new();

    out.push_str(&format!(
        "Imputed values (showing {} of {} cells):\n",
        cells.len().min(max_cells),
        cells.len()
    ));
    let mut header = format!("{:<16} {:>6}", "variable", "row");
    for imp in collection.imputations() {
        header.push_str(&format!(" {:>10}", format!("#{}", imp.index)));
    }
    push_row(&mut out, &header);

    for cell in cells.iter().take(max_cells) {
        let mut line = format!(
            "{:<16} {:>6}",
            truncate(&data.column(cell.column).name, 16),
            cell.row + 1
        );
        for &v in &cell.values {
            line.push_str(&format!(" {:>10}", truncate(&render_value(data, cell.column, v), 10)));
        }
        push_row(&mut out, &line);
    }
    out
}

/// Chain means per iteration, averaged over imputations, with their spread.
///
/// Chains that mix well show spreads of similar size across iterations and no
/// trend in the mean.
pub fn format_chain_trace(collection: &ImputationCollection) -> String {
    let data = collection.original();
    let iterations = collection.config().iterations;
    let mut out = String::new();
    out.push_str("Chain trace (mean of imputed cells; across-chain sd):\n");
    if iterations == 0 || collection.m() == 0 {
        out.push_str("  (no iterations run)\n");
        return out;
    }

    let mut header = format!("{:<16}", "variable");
    for it in 1..=iterations {
        header.push_str(&format!(" {:>15}", format!("iter {it}")));
    }
    push_row(&mut out, &header);

    for column in collection.missingness().incomplete_columns() {
        let mut line = format!("{:<16}", truncate(&data.column(column).name, 16));
        for it in 1..=iterations {
            let means: Vec<f64> = collection
                .imputations()
                .iter()
                .flat_map(|imp| imp.trace.stats_for(column))
                .filter(|s| s.iteration == it)
                .map(|s| s.mean)
                .collect();
            let cell = if means.is_empty() {
                "-".to_string()
            } else {
                let (mean, sd) = mean_sd(&means);
                format!("{mean:.3} ({sd:.3})")
            };
            line.push_str(&format!(" {cell:>15}"));
        }
        push_row(&mut out, &line);
    }
    out
}

fn mean_sd(xs: &[f64]) -> (f64, f64) {
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    if xs.len() < 2 {
        return (mean, 0.0);
    }
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

fn push_row(out: &mut String, row: &str) {
    out.push_str(row.trim_end());
    out.push('\n');
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
