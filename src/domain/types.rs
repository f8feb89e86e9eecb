//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during imputation
//! - exported to JSON/CSV
//! - handed to caller-supplied analysis code

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{MiceError, Result};

/// Declared semantic type of a variable. Fixed for the dataset's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarKind {
    Continuous,
    /// Two-level factor.
    Binary,
    /// Factor with two or more levels.
    Categorical,
}

impl VarKind {
    pub fn is_categorical(self) -> bool {
        matches!(self, VarKind::Binary | VarKind::Categorical)
    }
}

impl fmt::Display for VarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VarKind::Continuous => "continuous",
            VarKind::Binary => "binary",
            VarKind::Categorical => "categorical",
        };
        f.write_str(s)
    }
}

/// A single cell.
///
/// Categorical cells hold the index of their level in `Column::levels`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    Missing,
    Real(f64),
    Level(u32),
}

impl Value {
    pub fn is_missing(self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Numeric view of the cell: the real value, or the level code.
    pub fn as_f64(self) -> Option<f64> {
        match self {
            Value::Missing => None,
            Value::Real(x) => Some(x),
            Value::Level(l) => Some(l as f64),
        }
    }

    pub fn as_level(self) -> Option<u32> {
        match self {
            Value::Level(l) => Some(l),
            _ => None,
        }
    }
}

/// One typed column of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: VarKind,
    /// Level labels (empty for continuous columns).
    pub levels: Vec<String>,
    pub values: Vec<Value>,
}

impl Column {
    /// Continuous column; `None` and non-finite inputs become `Value::Missing`.
    pub fn continuous(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        let values = values
            .into_iter()
            .map(|v| match v {
                Some(x) if x.is_finite() => Value::Real(x),
                _ => Value::Missing,
            })
            .collect();
        Self {
            name: name.into(),
            kind: VarKind::Continuous,
            levels: Vec::new(),
            values,
        }
    }

    /// Factor column. Two levels make it `Binary`, more make it `Categorical`.
    pub fn categorical(
        name: impl Into<String>,
        levels: Vec<String>,
        codes: Vec<Option<u32>>,
    ) -> Self {
        let kind = if levels.len() == 2 {
            VarKind::Binary
        } else {
            VarKind::Categorical
        };
        Self {
            name: name.into(),
            kind,
            levels,
            values: codes
                .into_iter()
                .map(|c| c.map(Value::Level).unwrap_or(Value::Missing))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Check that `value` has the shape this column's kind requires.
    pub fn check_value(&self, value: Value) -> Result<()> {
        match (self.kind, value) {
            (_, Value::Missing) => Ok(()),
            (VarKind::Continuous, Value::Real(x)) if x.is_finite() => Ok(()),
            (VarKind::Binary | VarKind::Categorical, Value::Level(l)) => {
                if (l as usize) < self.levels.len() {
                    Ok(())
                } else {
                    Err(MiceError::InvalidLevel {
                        variable: self.name.clone(),
                        level: l,
                        levels: self.levels.len(),
                    })
                }
            }
            _ => Err(MiceError::TypeMismatch {
                variable: self.name.clone(),
                kind: self.kind.to_string(),
            }),
        }
    }

    fn validate(&self) -> Result<()> {
        match self.kind {
            VarKind::Continuous => {
                if !self.levels.is_empty() {
                    return Err(MiceError::TypeMismatch {
                        variable: self.name.clone(),
                        kind: self.kind.to_string(),
                    });
                }
            }
            VarKind::Binary => {
                if self.levels.len() != 2 {
                    return Err(MiceError::InvalidConfig(format!(
                        "binary variable '{}' must declare exactly 2 levels, got {}",
                        self.name,
                        self.levels.len()
                    )));
                }
            }
            VarKind::Categorical => {
                if self.levels.len() < 2 {
                    return Err(MiceError::InvalidConfig(format!(
                        "categorical variable '{}' must declare at least 2 levels",
                        self.name
                    )));
                }
            }
        }
        self.values.iter().try_for_each(|&v| self.check_value(v))
    }
}

/// Columnar, typed dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<Column>,
    n_rows: usize,
}

impl Dataset {
    /// Build a dataset, validating names, lengths and cell types.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let n_rows = columns.first().map(Column::len).unwrap_or(0);
        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(MiceError::DuplicateVariable(col.name.clone()));
            }
            if col.len() != n_rows {
                return Err(MiceError::ShapeMismatch {
                    variable: col.name.clone(),
                    expected: n_rows,
                    actual: col.len(),
                });
            }
            col.validate()?;
        }
        Ok(Self { columns, n_rows })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, col: usize) -> &Column {
        &self.columns[col]
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| MiceError::UnknownVariable(name.to_string()))
    }

    pub fn kind(&self, col: usize) -> VarKind {
        self.columns[col].kind
    }

    pub fn get(&self, row: usize, col: usize) -> Value {
        self.columns[col].values[row]
    }

    /// Overwrite one cell. The value must match the column's declared kind.
    pub fn set(&mut self, row: usize, col: usize, value: Value) -> Result<()> {
        self.columns[col].check_value(value)?;
        self.columns[col].values[row] = value;
        Ok(())
    }

    pub fn values(&self, col: usize) -> &[Value] {
        &self.columns[col].values
    }

    /// Number of missing cells across the whole dataset.
    pub fn count_missing(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.values.iter().filter(|v| v.is_missing()).count())
            .sum()
    }
}

/// Per-variable imputation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Predictive mean matching (continuous).
    Pmm,
    /// Bayesian linear regression draw (continuous).
    Norm,
    /// Logistic regression draw (two levels).
    Logreg,
    /// Multinomial logistic regression draw (two or more levels).
    Polyreg,
    /// Unconditional observed mean (continuous).
    Mean,
    /// Random draw from the observed values (any kind).
    Sample,
}

impl Method {
    /// Default method for a variable of the given kind.
    pub fn default_for(kind: VarKind) -> Method {
        match kind {
            VarKind::Continuous => Method::Pmm,
            VarKind::Binary => Method::Logreg,
            VarKind::Categorical => Method::Polyreg,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Method::Pmm => "pmm",
            Method::Norm => "norm",
            Method::Logreg => "logreg",
            Method::Polyreg => "polyreg",
            Method::Mean => "mean",
            Method::Sample => "sample",
        }
    }

    /// Whether the method can be assigned to a variable of `kind`.
    ///
    /// `Logreg` is accepted for any factor here; the level count is checked
    /// against `max_levels` at validation time.
    pub fn supports(self, kind: VarKind) -> bool {
        match self {
            Method::Pmm | Method::Norm | Method::Mean => kind == VarKind::Continuous,
            Method::Logreg | Method::Polyreg => kind.is_categorical(),
            Method::Sample => true,
        }
    }

    /// Maximum number of factor levels the method can model.
    pub fn max_levels(self) -> Option<usize> {
        match self {
            Method::Logreg => Some(2),
            _ => None,
        }
    }

    /// Whether the method can run with an empty predictor set.
    pub fn tolerates_no_predictors(self) -> bool {
        matches!(self, Method::Mean | Method::Sample)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = MiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pmm" => Ok(Method::Pmm),
            "norm" => Ok(Method::Norm),
            "logreg" => Ok(Method::Logreg),
            "polyreg" => Ok(Method::Polyreg),
            "mean" => Ok(Method::Mean),
            "sample" => Ok(Method::Sample),
            other => Err(MiceError::InvalidConfig(format!("unknown method '{other}'"))),
        }
    }
}

/// What the driver does when one imputation run fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop the remaining runs and return the first error.
    #[default]
    Abort,
    /// Record the failure and keep the successful imputations.
    Continue,
}

/// Engine settings for one call to the multiple-imputation driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputeConfig {
    /// Number of imputed datasets.
    pub m: usize,
    /// Chained-equations passes per imputation.
    pub iterations: usize,
    /// Base seed; imputation `i` uses `seed + i`.
    pub seed: u64,
    /// Donor pool size for predictive mean matching.
    pub donors: usize,
    /// Worker threads (`None` uses the global rayon pool).
    pub threads: Option<usize>,
    /// Wall-clock budget across all runs.
    pub timeout: Option<Duration>,
    pub error_policy: ErrorPolicy,
}

impl Default for ImputeConfig {
    fn default() -> Self {
        Self {
            m: 5,
            iterations: 5,
            seed: 42,
            donors: 5,
            threads: None,
            timeout: None,
            error_policy: ErrorPolicy::Abort,
        }
    }
}

impl ImputeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.m == 0 {
            return Err(MiceError::InvalidConfig("m must be >= 1".into()));
        }
        if self.donors == 0 {
            return Err(MiceError::InvalidConfig("donors must be >= 1".into()));
        }
        if self.threads == Some(0) {
            return Err(MiceError::InvalidConfig("threads must be >= 1".into()));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(MiceError::InvalidConfig("timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Output of a caller-supplied analysis on one completed dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub terms: Vec<String>,
    pub estimates: Vec<f64>,
    /// Sampling variance of each estimate (squared standard error).
    pub variances: Vec<f64>,
    /// Complete-data residual degrees of freedom, if the model has one.
    pub df_complete: Option<f64>,
}

/// Degrees-of-freedom formula used when pooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DfMethod {
    /// Barnard–Rubin (1999) small-sample correction.
    #[default]
    BarnardRubin,
    /// Rubin (1987) large-sample formula.
    Rubin,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolOptions {
    pub conf_level: f64,
    pub df_method: DfMethod,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            conf_level: 0.95,
            df_method: DfMethod::BarnardRubin,
        }
    }
}

/// Pooled inference for one coefficient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PooledTerm {
    pub term: String,
    pub estimate: f64,
    /// Mean within-imputation variance.
    pub ubar: f64,
    /// Between-imputation variance.
    pub b: f64,
    /// Total variance `ubar + b + b/m`.
    pub t: f64,
    /// Relative increase in variance due to nonresponse.
    pub riv: f64,
    /// Proportion of total variance attributable to missingness.
    pub lambda: f64,
    /// Fraction of missing information.
    pub fmi: f64,
    pub df: f64,
    pub std_error: f64,
    pub statistic: f64,
    pub p_value: f64,
    pub conf_low: f64,
    pub conf_high: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PooledResult {
    pub m: usize,
    pub df_method: DfMethod,
    pub conf_level: f64,
    pub terms: Vec<PooledTerm>,
}

impl PooledResult {
    pub fn term(&self, name: &str) -> Option<&PooledTerm> {
        self.terms.iter().find(|t| t.term == name)
    }
}
