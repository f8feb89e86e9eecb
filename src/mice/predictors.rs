//! Predictor graph: which variables predict which, and by what method.
//!
//! Stored as a dense `target × source` boolean matrix (the diagonal is always
//! false) plus an optional method per variable. Variable kinds are captured at
//! derivation so method assignments can be checked eagerly.

use serde::{Deserialize, Serialize};

use crate::domain::{Dataset, Method, VarKind};
use crate::error::{MiceError, Result};
use crate::mice::missingness::MissingnessMatrix;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorGraph {
    variables: Vec<String>,
    kinds: Vec<VarKind>,
    /// `matrix[target][source]`.
    matrix: Vec<Vec<bool>>,
    methods: Vec<Option<Method>>,
}

impl PredictorGraph {
    /// Every incomplete variable is predicted by all others, with the default
    /// method for its kind. Complete variables get no method.
    pub fn default_for(dataset: &Dataset, missingness: &MissingnessMatrix) -> Self {
        let n = dataset.n_cols();
        let variables: Vec<String> = dataset.names().map(str::to_string).collect();
        let kinds: Vec<VarKind> = (0..n).map(|c| dataset.kind(c)).collect();

        let mut matrix = vec![vec![false; n]; n];
        let mut methods = vec![None; n];
        for target in missingness.incomplete_columns() {
            for (source, cell) in matrix[target].iter_mut().enumerate() {
                *cell = source != target;
            }
            methods[target] = Some(Method::default_for(kinds[target]));
        }

        Self {
            variables,
            kinds,
            matrix,
            methods,
        }
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.variables
            .iter()
            .position(|v| v == name)
            .ok_or_else(|| MiceError::UnknownVariable(name.to_string()))
    }

    /// Include or exclude `source` as a predictor of `target`.
    pub fn set_predictor(&mut self, target: &str, source: &str, enabled: bool) -> Result<()> {
        let t = self.index_of(target)?;
        let s = self.index_of(source)?;
        if t == s {
            if enabled {
                return Err(MiceError::SelfPredictor(target.to_string()));
            }
            return Ok(());
        }
        self.matrix[t][s] = enabled;
        Ok(())
    }

    /// Remove `source` from every predictor set.
    pub fn exclude_everywhere(&mut self, source: &str) -> Result<()> {
        let s = self.index_of(source)?;
        for row in &mut self.matrix {
            row[s] = false;
        }
        Ok(())
    }

    /// Assign the imputation method for `target`.
    ///
    /// Rejects methods that cannot model the variable's declared kind.
    pub fn set_method(&mut self, target: &str, method: Method) -> Result<()> {
        let t = self.index_of(target)?;
        if !method.supports(self.kinds[t]) {
            return Err(MiceError::UnsupportedMethod {
                variable: target.to_string(),
                method: method.to_string(),
                kind: self.kinds[t].to_string(),
            });
        }
        self.methods[t] = Some(method);
        Ok(())
    }

    /// Remove the method assigned to `target`.
    ///
    /// An incomplete variable without a method fails `validate`.
    pub fn clear_method(&mut self, target: &str) -> Result<()> {
        let t = self.index_of(target)?;
        self.methods[t] = None;
        Ok(())
    }

    pub fn method_of(&self, target: usize) -> Option<Method> {
        self.methods[target]
    }

    pub fn is_predictor(&self, target: usize, source: usize) -> bool {
        self.matrix[target][source]
    }

    /// Predictor columns of `target`, in declaration order.
    pub fn predictors_of(&self, target: usize) -> Vec<usize> {
        self.matrix[target]
            .iter()
            .enumerate()
            .filter_map(|(s, &on)| on.then_some(s))
            .collect()
    }

    /// Incomplete variables that will be re-imputed, in declaration order.
    pub fn visit_sequence(&self, missingness: &MissingnessMatrix) -> Vec<usize> {
        missingness
            .incomplete_columns()
            .into_iter()
            .filter(|&c| self.methods[c].is_some())
            .collect()
    }

    /// Keep only predictors correlated with the target.
    ///
    /// A source stays when the absolute pairwise-complete correlation between it
    /// and either the target or the target's response indicator is at least
    /// `min_correlation`. Factors enter by their level codes.
    pub fn with_min_correlation(
        mut self,
        dataset: &Dataset,
        missingness: &MissingnessMatrix,
        min_correlation: f64,
    ) -> Result<Self> {
        if !(min_correlation.is_finite() && (0.0..=1.0).contains(&min_correlation)) {
            return Err(MiceError::InvalidConfig(format!(
                "min correlation must lie in [0, 1], got {min_correlation}"
            )));
        }
        self.check_shape(dataset)?;

        let n = dataset.n_cols();
        for target in 0..n {
            if missingness.missing_count(target) == 0 {
                continue;
            }
            let target_values: Vec<Option<f64>> =
                dataset.values(target).iter().map(|v| v.as_f64()).collect();
            let indicator: Vec<Option<f64>> = (0..dataset.n_rows())
                .map(|r| Some(if missingness.is_missing(r, target) { 1.0 } else { 0.0 }))
                .collect();

            for source in 0..n {
                if source == target || !self.matrix[target][source] {
                    continue;
                }
                let source_values: Vec<Option<f64>> =
                    dataset.values(source).iter().map(|v| v.as_f64()).collect();
                let r_value = pairwise_correlation(&target_values, &source_values).abs();
                let r_response = pairwise_correlation(&indicator, &source_values).abs();
                self.matrix[target][source] =
                    r_value >= min_correlation || r_response >= min_correlation;
            }
        }
        Ok(self)
    }

    /// Check the graph against a dataset before any imputation runs.
    pub fn validate(&self, dataset: &Dataset, missingness: &MissingnessMatrix) -> Result<()> {
        self.check_shape(dataset)?;

        for (t, name) in self.variables.iter().enumerate() {
            if self.matrix[t][t] {
                return Err(MiceError::SelfPredictor(name.clone()));
            }

            let kind = self.kinds[t];
            let incomplete = missingness.missing_count(t) > 0;
            let Some(method) = self.methods[t] else {
                if incomplete {
                    return Err(MiceError::MissingMethod(name.clone()));
                }
                continue;
            };

            if !method.supports(kind) {
                return Err(MiceError::UnsupportedMethod {
                    variable: name.clone(),
                    method: method.to_string(),
                    kind: kind.to_string(),
                });
            }
            if let Some(max) = method.max_levels() {
                let levels = dataset.column(t).levels.len();
                if levels > max {
                    return Err(MiceError::TooManyLevels {
                        variable: name.clone(),
                        method: method.to_string(),
                        levels,
                        max,
                    });
                }
            }
            if incomplete && !method.tolerates_no_predictors() && self.predictors_of(t).is_empty()
            {
                return Err(MiceError::EmptyPredictors {
                    variable: name.clone(),
                    method: method.to_string(),
                });
            }
        }
        Ok(())
    }

    fn check_shape(&self, dataset: &Dataset) -> Result<()> {
        let n = self.variables.len();
        if dataset.n_cols() != n {
            return Err(MiceError::GraphMismatch(format!(
                "graph has {n} variables, dataset has {}",
                dataset.n_cols()
            )));
        }
        if self.kinds.len() != n
            || self.methods.len() != n
            || self.matrix.len() != n
            || self.matrix.iter().any(|row| row.len() != n)
        {
            return Err(MiceError::GraphMismatch("graph tables are not square".into()));
        }
        for (c, (name, kind)) in self.variables.iter().zip(&self.kinds).enumerate() {
            let column = dataset.column(c);
            if &column.name != name {
                return Err(MiceError::GraphMismatch(format!(
                    "position {c}: graph has '{name}', dataset has '{}'",
                    column.name
                )));
            }
            if column.kind != *kind {
                return Err(MiceError::GraphMismatch(format!(
                    "variable '{name}' is {kind} in the graph but {} in the dataset",
                    column.kind
                )));
            }
        }
        Ok(())
    }
}

/// Pearson correlation over rows where both values are present (0 if undefined).
fn pairwise_correlation(a: &[Option<f64>], b: &[Option<f64>]) -> f64 {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if pairs.len() < 2 {
        return 0.0;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (x, y) in &pairs {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx) * (x - mx);
        syy += (y - my) * (y - my);
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return 0.0;
    }
    sxy / (sxx * syy).sqrt()
}
