//! Numerical utilities: least squares, logistic fits and distribution functions.

pub mod dist;
pub mod logistic;
pub mod ols;

pub use dist::*;
pub use logistic::*;
pub use ols::*;
