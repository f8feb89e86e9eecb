//! Domain types used throughout the engine.
//!
//! This module defines:
//!
//! - the typed dataset (`Dataset`, `Column`, `Value`, `VarKind`)
//! - imputation settings (`Method`, `ImputeConfig`, `ErrorPolicy`)
//! - analysis and pooling outputs (`AnalysisResult`, `PooledResult`, etc.)

pub mod types;

pub use types::*;
