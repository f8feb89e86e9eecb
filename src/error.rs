//! Error types.
//!
//! - `MiceError` is the library error. Every variant names the variable or the
//!   cause so callers can fix their input.
//! - `AppError` is the binary-facing error: a message plus a process exit code.

use thiserror::Error;

/// Coarse classification of a `MiceError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid predictor graph or engine settings.
    Configuration,
    /// The dataset cannot support the requested imputation.
    Data,
    /// Model fitting or pooling is statistically undefined.
    Statistical,
    /// Cancellation, timeouts and thread-pool failures.
    Runtime,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MiceError {
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("variable '{0}' cannot predict itself")]
    SelfPredictor(String),

    #[error("method '{method}' is not supported for {kind} variable '{variable}'")]
    UnsupportedMethod {
        variable: String,
        method: String,
        kind: String,
    },

    #[error("variable '{0}' has missing values but no imputation method")]
    MissingMethod(String),

    #[error("variable '{variable}' has no predictors and method '{method}' requires at least one")]
    EmptyPredictors { variable: String, method: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("predictor graph does not match dataset: {0}")]
    GraphMismatch(String),

    #[error("variable '{variable}' has {observed} observed rows; at least {required} are required")]
    InsufficientData {
        variable: String,
        observed: usize,
        required: usize,
    },

    #[error("variable '{variable}' has {levels} levels; method '{method}' supports at most {max}")]
    TooManyLevels {
        variable: String,
        method: String,
        levels: usize,
        max: usize,
    },

    #[error("column '{variable}' has {actual} rows, expected {expected}")]
    ShapeMismatch {
        variable: String,
        expected: usize,
        actual: usize,
    },

    #[error("value of wrong type for {kind} variable '{variable}'")]
    TypeMismatch { variable: String, kind: String },

    #[error("level {level} out of range for variable '{variable}' ({levels} levels)")]
    InvalidLevel {
        variable: String,
        level: u32,
        levels: usize,
    },

    #[error("duplicate variable '{0}'")]
    DuplicateVariable(String),

    #[error("pooling needs at least 2 imputations, got {0}")]
    InsufficientImputations(usize),

    #[error("model fit for '{variable}' is singular or non-finite")]
    SingularFit { variable: String },

    #[error("analysis results disagree on terms: {0}")]
    MismatchedTerms(String),

    #[error("non-finite estimate: {0}")]
    NonFiniteEstimate(String),

    #[error("imputation run cancelled")]
    Cancelled,

    #[error("imputation exceeded the time budget of {0:.1}s")]
    Timeout(f64),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

impl MiceError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            MiceError::UnknownVariable(_)
            | MiceError::SelfPredictor(_)
            | MiceError::UnsupportedMethod { .. }
            | MiceError::MissingMethod(_)
            | MiceError::EmptyPredictors { .. }
            | MiceError::InvalidConfig(_)
            | MiceError::GraphMismatch(_) => ErrorCategory::Configuration,
            MiceError::InsufficientData { .. }
            | MiceError::TooManyLevels { .. }
            | MiceError::ShapeMismatch { .. }
            | MiceError::TypeMismatch { .. }
            | MiceError::InvalidLevel { .. }
            | MiceError::DuplicateVariable(_) => ErrorCategory::Data,
            MiceError::InsufficientImputations(_)
            | MiceError::SingularFit { .. }
            | MiceError::MismatchedTerms(_)
            | MiceError::NonFiniteEstimate(_) => ErrorCategory::Statistical,
            MiceError::Cancelled | MiceError::Timeout(_) | MiceError::ThreadPool(_) => {
                ErrorCategory::Runtime
            }
        }
    }
}

pub type Result<T, E = MiceError> = std::result::Result<T, E>;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<MiceError> for AppError {
    fn from(err: MiceError) -> Self {
        let exit_code = match err.category() {
            ErrorCategory::Configuration => 2,
            ErrorCategory::Data => 3,
            ErrorCategory::Statistical | ErrorCategory::Runtime => 4,
        };
        AppError::new(exit_code, err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_category() {
        let config: AppError = MiceError::MissingMethod("x".into()).into();
        let data: AppError = MiceError::InsufficientData {
            variable: "x".into(),
            observed: 1,
            required: 2,
        }
        .into();
        let stats: AppError = MiceError::InsufficientImputations(1).into();
        assert_eq!(config.exit_code(), 2);
        assert_eq!(data.exit_code(), 3);
        assert_eq!(stats.exit_code(), 4);
    }

    #[test]
    fn messages_name_the_variable() {
        let err = MiceError::EmptyPredictors {
            variable: "species".into(),
            method: "polyreg".into(),
        };
        assert!(err.to_string().contains("species"));
    }
}
