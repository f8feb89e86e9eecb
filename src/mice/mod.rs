//! Imputation engine: missingness bookkeeping, predictor graph, per-variable
//! models, the chained-equations iterator, the multiple-imputation driver and
//! pooling.

pub mod chain;
pub mod driver;
pub mod missingness;
pub mod model;
pub mod pool;
pub mod predictors;

pub use chain::{ChainOutput, ChainStat, ChainTrace, ChainedEquations, ModelRecord, StopSignal};
pub use driver::{
    Imputation, ImputationCollection, ImputationFailure, generate, generate_with_stop,
};
pub use missingness::{MissingPattern, MissingnessMatrix};
pub use model::{ImputedColumn, ModelOptions, impute};
pub use pool::pool;
pub use predictors::PredictorGraph;
