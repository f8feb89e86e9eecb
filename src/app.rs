//! Top-level application orchestration.
//!
//! `src/main.rs` stays tiny; this module is the real main:
//! - loads `.env` and parses CLI arguments
//! - sets up logging
//! - runs the demo workflow
//! - prints reports and writes optional exports

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::analysis::{Analysis, LinearModel};
use crate::cli::{Command, DemoArgs, SampleArgs};
use crate::error::AppError;
use crate::mice::MissingnessMatrix;

pub mod pipeline;

/// Entry point for the `mice` binary.
pub fn run() -> Result<(), AppError> {
    // A missing .env is normal.
    dotenvy::dotenv().ok();

    // `mice` and `mice --m 20` behave like `mice demo ...`. Clap needs the
    // subcommand name, so argv is rewritten before parsing.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);
    init_logging(cli.verbose);

    match cli.command {
        Command::Demo(args) => handle_demo(&args),
        Command::Pattern(args) => handle_pattern(&args),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .ok();
}

fn handle_demo(args: &DemoArgs) -> Result<(), AppError> {
    let run = pipeline::run_demo(args)?;
    let collection = &run.collection;

    println!("{}", crate::report::format_run_summary(collection));
    println!(
        "{}",
        crate::report::format_pattern(collection.original(), collection.missingness())
    );
    println!("{}", crate::report::format_imputed_values(collection, args.show));
    if args.trace {
        println!("{}", crate::report::format_chain_trace(collection));
    }

    println!("{}", crate::report::format_pooled(&run.pooled));

    // Reference fit on the data before amputation.
    let reference = LinearModel::new(args.response.clone()).analyze(&run.complete)?;
    println!("Complete-data estimates (before amputation):");
    for (term, estimate) in reference.terms.iter().zip(&reference.estimates) {
        println!("  {term:<20} {estimate:>10.4}");
    }

    if let Some(path) = &args.export_imputations {
        crate::io::write_imputations_csv(path, collection)?;
    }
    if let Some(path) = &args.export_pool {
        crate::io::write_pool_json(path, collection, &args.response, &run.pooled)?;
    }
    if let Some(path) = &args.write_graph {
        crate::io::write_graph_json(path, collection.graph())?;
    }

    Ok(())
}

fn handle_pattern(args: &SampleArgs) -> Result<(), AppError> {
    let (_, amputed) = pipeline::prepare_sample(args)?;
    let missingness = MissingnessMatrix::from_dataset(&amputed);
    println!(
        "Missing-data pattern ({} rows, {} missing cells):",
        amputed.n_rows(),
        missingness.total_missing()
    );
    println!("{}", crate::report::format_pattern(&amputed, &missingness));
    Ok(())
}

/// Rewrite argv so `mice` defaults to `mice demo`.
///
/// Rules:
/// - `mice`                      -> `mice demo`
/// - `mice --m 20 ...`           -> `mice demo --m 20 ...`
/// - `mice --help/--version/-h`  -> unchanged (top-level help/version)
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(arg1) = argv.get(1).cloned() else {
        argv.push("demo".to_string());
        return argv;
    };

    let is_top_level_help_or_version = matches!(
        arg1.as_str(),
        "-h" | "--help" | "-V" | "--version" | "help"
    );
    if is_top_level_help_or_version {
        return argv;
    }

    if matches!(arg1.as_str(), "demo" | "pattern") {
        return argv;
    }

    if arg1.starts_with('-') {
        argv.insert(1, "demo".to_string());
    }
    argv
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bare_invocation_runs_demo() {
        assert_eq!(rewrite_args(args(&["mice"])), args(&["mice", "demo"]));
        assert_eq!(
            rewrite_args(args(&["mice", "--m", "20"])),
            args(&["mice", "demo", "--m", "20"])
        );
    }

    #[test]
    fn explicit_subcommands_and_help_are_untouched() {
        assert_eq!(
            rewrite_args(args(&["mice", "pattern", "--rows", "30"])),
            args(&["mice", "pattern", "--rows", "30"])
        );
        assert_eq!(rewrite_args(args(&["mice", "--help"])), args(&["mice", "--help"]));
    }
}
