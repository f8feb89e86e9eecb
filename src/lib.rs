//! `mice-engine` library crate: multivariate imputation by chained equations.
//!
//! The binary (`mice`) is a thin wrapper around this library so that:
//!
//! - the engine is testable without spawning processes
//! - callers can embed imputation and pooling in their own analyses
//!
//! Typical use: build a `Dataset`, call `mice::generate`, run an `Analysis`
//! on every completed dataset with `ImputationCollection::analyze`, then
//! combine the results with `mice::pool`.

pub mod analysis;
pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod io;
pub mod math;
pub mod mice;
pub mod report;
