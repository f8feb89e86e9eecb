//! Read/write predictor graph JSON files.
//!
//! A graph file is the portable form of an imputation setup: variable names
//! and kinds, the predictor matrix and the method per variable. It is checked
//! against the dataset when the driver validates it, not when it is read.

use std::fs::File;
use std::path::Path;

use crate::error::AppError;
use crate::mice::PredictorGraph;

/// Write a predictor graph JSON file.
pub fn write_graph_json(path: &Path, graph: &PredictorGraph) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create graph JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, graph)
        .map_err(|e| AppError::new(2, format!("Failed to write graph JSON: {e}")))?;
    Ok(())
}

/// Read a predictor graph JSON file.
pub fn read_graph_json(path: &Path) -> Result<PredictorGraph, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open graph JSON '{}': {e}", path.display())))?;
    let graph: PredictorGraph =
        serde_json::from_reader(file).map_err(|e| AppError::new(2, format!("Invalid graph JSON: {e}")))?;
    Ok(graph)
}
