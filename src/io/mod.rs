//! Input/output helpers.
//!
//! - completed-data and pooled-result exports (CSV/JSON) (`export`)
//! - predictor graph JSON read/write (`graph`)

pub mod export;
pub mod graph;

pub use export::*;
pub use graph::*;
