//! Command-line parsing for the `mice` demo binary.
//!
//! Argument parsing and command dispatch stay separate from the engine; this
//! module only turns argv (and `MICE_*` environment variables) into typed
//! arguments.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::domain::{DfMethod, Method};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "mice",
    version,
    about = "Multivariate imputation by chained equations"
)]
pub struct Cli {
    /// Log more (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Impute an amputed synthetic sample, fit a linear model on each
    /// completed dataset and pool the estimates.
    Demo(DemoArgs),
    /// Print the missing-data pattern of the amputed sample.
    Pattern(SampleArgs),
}

/// Sample generation and amputation.
#[derive(Debug, Args, Clone)]
pub struct SampleArgs {
    /// Rows in the synthetic sample.
    #[arg(long, env = "MICE_ROWS", default_value_t = 150)]
    pub rows: usize,

    /// Continuous cells to blank.
    #[arg(long, env = "MICE_MISSING_CONTINUOUS", default_value_t = 7)]
    pub missing_continuous: usize,

    /// Species cells to blank.
    #[arg(long, env = "MICE_MISSING_CATEGORICAL", default_value_t = 7)]
    pub missing_categorical: usize,

    /// Continuous column to blank cells in, or `all` to spread them over
    /// every measurement.
    #[arg(long, env = "MICE_AMPUTE_CONTINUOUS", default_value = "sepal_width")]
    pub ampute_continuous: String,

    /// Factor column to blank cells in, or `all`.
    #[arg(long, env = "MICE_AMPUTE_CATEGORICAL", default_value = "species")]
    pub ampute_categorical: String,

    /// Base random seed (sample, amputation and imputations).
    #[arg(long, env = "MICE_SEED", default_value_t = 42)]
    pub seed: u64,
}

/// Options for the full demo run.
#[derive(Debug, Args, Clone)]
pub struct DemoArgs {
    #[command(flatten)]
    pub sample: SampleArgs,

    /// Number of imputed datasets.
    #[arg(long, env = "MICE_M", default_value_t = 5)]
    pub m: usize,

    /// Chained-equations iterations per imputation.
    #[arg(long, env = "MICE_ITERATIONS", default_value_t = 5)]
    pub iterations: usize,

    /// Donor pool size for predictive mean matching.
    #[arg(long, env = "MICE_DONORS", default_value_t = 5)]
    pub donors: usize,

    /// Worker threads (defaults to one per core).
    #[arg(long, env = "MICE_THREADS")]
    pub threads: Option<usize>,

    /// Wall-clock budget for all imputations, in seconds.
    #[arg(long, env = "MICE_TIMEOUT_SECS")]
    pub timeout_secs: Option<f64>,

    /// Method for one variable, e.g. `sepal_width=norm` (repeatable).
    #[arg(long = "method", value_name = "VAR=METHOD", value_parser = parse_method_override)]
    pub methods: Vec<(String, Method)>,

    /// Never use this variable as a predictor (repeatable).
    #[arg(long = "exclude", value_name = "VAR")]
    pub exclude: Vec<String>,

    /// Remove one predictor edge, e.g. `species:petal_width` (repeatable).
    #[arg(long = "drop-predictor", value_name = "TARGET:SOURCE", value_parser = parse_edge)]
    pub drop_predictors: Vec<(String, String)>,

    /// Keep only predictors with at least this absolute correlation.
    #[arg(long)]
    pub min_correlation: Option<f64>,

    /// Predictor graph JSON to use instead of the default graph.
    #[arg(long, value_name = "JSON")]
    pub graph: Option<PathBuf>,

    /// Response of the linear model fitted to each completed dataset.
    #[arg(long, env = "MICE_RESPONSE", default_value = "sepal_length")]
    pub response: String,

    /// Degrees-of-freedom formula for pooling.
    #[arg(long, value_enum, default_value_t = DfMethod::BarnardRubin)]
    pub df: DfMethod,

    /// Confidence level of pooled intervals.
    #[arg(long, env = "MICE_CONF_LEVEL", default_value_t = 0.95)]
    pub conf_level: f64,

    /// Keep successful imputations when one fails.
    #[arg(long)]
    pub continue_on_error: bool,

    /// Print per-iteration chain means.
    #[arg(long)]
    pub trace: bool,

    /// Imputed cells to list.
    #[arg(long, default_value_t = 10)]
    pub show: usize,

    /// Export the original and completed datasets (long CSV).
    #[arg(long = "export-imputations", value_name = "CSV")]
    pub export_imputations: Option<PathBuf>,

    /// Export pooled estimates to JSON.
    #[arg(long = "export-pool", value_name = "JSON")]
    pub export_pool: Option<PathBuf>,

    /// Write the predictor graph actually used to JSON.
    #[arg(long = "write-graph", value_name = "JSON")]
    pub write_graph: Option<PathBuf>,
}

fn parse_method_override(s: &str) -> Result<(String, Method), String> {
    let (var, method) = s
        .split_once('=')
        .ok_or_else(|| format!("expected VAR=METHOD, got '{s}'"))?;
    let method: Method = method.parse().map_err(|e| format!("{e}"))?;
    Ok((var.trim().to_string(), method))
}

fn parse_edge(s: &str) -> Result<(String, String), String> {
    let (target, source) = s
        .split_once(':')
        .ok_or_else(|| format!("expected TARGET:SOURCE, got '{s}'"))?;
    Ok((target.trim().to_string(), source.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_demo_overrides() {
        let cli = Cli::try_parse_from([
            "mice",
            "demo",
            "--m",
            "20",
            "--method",
            "sepal_width=norm",
            "--drop-predictor",
            "species:petal_width",
            "--df",
            "rubin",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Demo(args) = cli.command else {
            panic!("expected demo");
        };
        assert_eq!(args.m, 20);
        assert_eq!(args.methods, vec![("sepal_width".to_string(), Method::Norm)]);
        assert_eq!(
            args.drop_predictors,
            vec![("species".to_string(), "petal_width".to_string())]
        );
        assert_eq!(args.df, DfMethod::Rubin);
    }

    #[test]
    fn bad_override_is_rejected() {
        assert!(parse_method_override("sepal_width").is_err());
        assert!(parse_method_override("x=magic").is_err());
        assert!(parse_edge("a-b").is_err());
    }
}
