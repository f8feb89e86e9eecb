//! The demo workflow shared by the `demo` and `pattern` commands:
//! sample generation -> amputation -> predictor graph -> imputation ->
//! per-dataset analysis -> pooling.
//!
//! The command handlers only print what this returns.

use std::time::Duration;

use tracing::info;

use crate::analysis::LinearModel;
use crate::cli::{DemoArgs, SampleArgs};
use crate::data::{AmputeConfig, SampleConfig, ampute, generate_sample};
use crate::domain::{AnalysisResult, Dataset, ErrorPolicy, ImputeConfig, PoolOptions, PooledResult};
use crate::error::AppError;
use crate::mice::{ImputationCollection, MissingnessMatrix, PredictorGraph, generate, pool};

/// All computed outputs of one `mice demo` run.
#[derive(Debug, Clone)]
pub struct DemoRun {
    pub complete: Dataset,
    pub collection: ImputationCollection,
    pub analyses: Vec<AnalysisResult>,
    pub pooled: PooledResult,
}

/// Generate the complete sample and its amputed copy.
pub fn prepare_sample(args: &SampleArgs) -> Result<(Dataset, Dataset), AppError> {
    let complete = generate_sample(&SampleConfig {
        rows: args.rows,
        seed: args.seed,
    })?;
    let amputed = ampute(
        &complete,
        &AmputeConfig {
            continuous: args.missing_continuous,
            categorical: args.missing_categorical,
            continuous_column: ampute_target(&args.ampute_continuous),
            categorical_column: ampute_target(&args.ampute_categorical),
        },
        args.seed,
    )?;
    Ok((complete, amputed))
}

/// `all` spreads the blanks over every column of the kind.
fn ampute_target(name: &str) -> Option<String> {
    (!name.eq_ignore_ascii_case("all")).then(|| name.to_string())
}

pub fn impute_config_from_args(args: &DemoArgs) -> Result<ImputeConfig, AppError> {
    let timeout = args
        .timeout_secs
        .map(|secs| {
            Duration::try_from_secs_f64(secs)
                .map_err(|e| AppError::new(2, format!("Invalid timeout '{secs}': {e}")))
        })
        .transpose()?;
    Ok(ImputeConfig {
        m: args.m,
        iterations: args.iterations,
        seed: args.sample.seed,
        donors: args.donors,
        threads: args.threads,
        timeout,
        error_policy: if args.continue_on_error {
            ErrorPolicy::Continue
        } else {
            ErrorPolicy::Abort
        },
    })
}

/// Load or build the predictor graph, then apply the command-line overrides
/// in order: methods, exclusions, dropped edges, correlation screen.
pub fn build_graph(args: &DemoArgs, amputed: &Dataset) -> Result<PredictorGraph, AppError> {
    let missingness = MissingnessMatrix::from_dataset(amputed);
    let mut graph = match &args.graph {
        Some(path) => crate::io::read_graph_json(path)?,
        None => PredictorGraph::default_for(amputed, &missingness),
    };

    for (var, method) in &args.methods {
        graph.set_method(var, *method)?;
    }
    for var in &args.exclude {
        graph.exclude_everywhere(var)?;
    }
    for (target, source) in &args.drop_predictors {
        graph.set_predictor(target, source, false)?;
    }
    if let Some(min) = args.min_correlation {
        graph = graph.with_min_correlation(amputed, &missingness, min)?;
    }
    Ok(graph)
}

/// Execute the full demo workflow.
pub fn run_demo(args: &DemoArgs) -> Result<DemoRun, AppError> {
    let (complete, amputed) = prepare_sample(&args.sample)?;
    let graph = build_graph(args, &amputed)?;
    let config = impute_config_from_args(args)?;

    let collection = generate(&amputed, Some(graph), &config)?;

    let model = LinearModel::new(args.response.clone());
    let analyses = collection.analyze(&model)?;

    let options = PoolOptions {
        conf_level: args.conf_level,
        df_method: args.df,
    };
    let pooled = pool(&analyses, &options)?;
    info!(
        imputations = collection.m(),
        terms = pooled.terms.len(),
        "demo finished"
    );

    Ok(DemoRun {
        complete,
        collection,
        analyses,
        pooled,
    })
}
