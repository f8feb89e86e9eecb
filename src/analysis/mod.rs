//! Complete-data analyses applied to each imputed dataset before pooling.

pub mod linear;

pub use linear::LinearModel;

use crate::domain::{AnalysisResult, Dataset};
use crate::error::Result;

/// An analysis run on one completed dataset.
///
/// Implementations must be deterministic in the dataset: the same completed
/// data yields the same estimates.
pub trait Analysis {
    fn analyze(&self, data: &Dataset) -> Result<AnalysisResult>;
}

impl<F> Analysis for F
where
    F: Fn(&Dataset) -> Result<AnalysisResult>,
{
    fn analyze(&self, data: &Dataset) -> Result<AnalysisResult> {
        self(data)
    }
}
