//! Ordinary least squares on a completed dataset.

use nalgebra::{DMatrix, DVector};

use crate::analysis::Analysis;
use crate::domain::{AnalysisResult, Dataset, VarKind};
use crate::error::{MiceError, Result};
use crate::math::fit_linear;

pub const INTERCEPT: &str = "(Intercept)";

/// `response ~ predictors` with an intercept.
///
/// Factors are treatment coded against their first level; their terms are
/// named `name[level]`. Coefficient variances come from `σ²(X'X)⁻¹` with
/// `σ² = RSS / (n - p)`, which is also the reported complete-data df.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearModel {
    response: String,
    predictors: Option<Vec<String>>,
}

impl LinearModel {
    /// Regress `response` on every other column.
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            predictors: None,
        }
    }

    pub fn with_predictors<I, S>(mut self, predictors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.predictors = Some(predictors.into_iter().map(Into::into).collect());
        self
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    fn predictor_columns(&self, data: &Dataset, response: usize) -> Result<Vec<usize>> {
        match &self.predictors {
            Some(names) => names
                .iter()
                .map(|name| {
                    let c = data.column_index(name)?;
                    if c == response {
                        return Err(MiceError::SelfPredictor(name.clone()));
                    }
                    Ok(c)
                })
                .collect(),
            None => Ok((0..data.n_cols()).filter(|&c| c != response).collect()),
        }
    }
}

impl Analysis for LinearModel {
    fn analyze(&self, data: &Dataset) -> Result<AnalysisResult> {
        let response = data.column_index(&self.response)?;
        if data.kind(response) != VarKind::Continuous {
            return Err(MiceError::TypeMismatch {
                variable: self.response.clone(),
                kind: data.kind(response).to_string(),
            });
        }
        let predictors = self.predictor_columns(data, response)?;

        let n = data.n_rows();
        for &c in std::iter::once(&response).chain(&predictors) {
            let missing = data.values(c).iter().filter(|v| v.is_missing()).count();
            if missing > 0 {
                return Err(MiceError::InsufficientData {
                    variable: data.column(c).name.clone(),
                    observed: n - missing,
                    required: n,
                });
            }
        }

        let mut terms = vec![INTERCEPT.to_string()];
        let mut columns: Vec<Vec<f64>> = vec![vec![1.0; n]];
        for &c in &predictors {
            let column = data.column(c);
            match column.kind {
                VarKind::Continuous => {
                    terms.push(column.name.clone());
                    columns.push(data.values(c).iter().filter_map(|v| v.as_f64()).collect());
                }
                VarKind::Binary | VarKind::Categorical => {
                    for (level, label) in column.levels.iter().enumerate().skip(1) {
                        terms.push(format!("{}[{label}]", column.name));
                        columns.push(
                            data.values(c)
                                .iter()
                                .map(|v| f64::from(v.as_level() == Some(level as u32)))
                                .collect(),
                        );
                    }
                }
            }
        }

        let p = columns.len();
        if n <= p {
            return Err(MiceError::InsufficientData {
                variable: self.response.clone(),
                observed: n,
                required: p + 1,
            });
        }

        let x = DMatrix::from_fn(n, p, |r, j| columns[j][r]);
        let y = DVector::from_iterator(
            n,
            data.values(response).iter().filter_map(|v| v.as_f64()),
        );
        let singular = || MiceError::SingularFit {
            variable: self.response.clone(),
        };

        let fit = fit_linear(&x, &y, 0.0).ok_or_else(singular)?;
        let df = (n - p) as f64;
        let sigma2 = fit.rss / df;

        Ok(AnalysisResult {
            terms,
            estimates: fit.beta.iter().copied().collect(),
            variances: (0..p).map(|j| sigma2 * fit.xtx_inv[(j, j)]).collect(),
            df_complete: Some(df),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Column;

    fn dataset() -> Dataset {
        // y = 1 + 2x + 3·[g = b] + noise orthogonal to the intercept, x and g.
        let n = 24;
        let x: Vec<f64> = (0..n).map(|i| i as f64 / 2.0).collect();
        let g: Vec<u32> = (0..n).map(|i| (i % 2) as u32).collect();
        let noise = [0.1, -0.1, -0.1, 0.1];
        let y: Vec<Option<f64>> = (0..n)
            .map(|i| Some(1.0 + 2.0 * x[i] + 3.0 * g[i] as f64 + noise[(i / 2) % 4]))
            .collect();
        Dataset::new(vec![
            Column::continuous("y", y),
            Column::continuous("x", x.into_iter().map(Some).collect()),
            Column::categorical(
                "g",
                vec!["a".into(), "b".into()],
                g.into_iter().map(Some).collect(),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn recovers_coefficients_with_dummy_terms() {
        let r = LinearModel::new("y").analyze(&dataset()).unwrap();
        assert_eq!(r.terms, vec!["(Intercept)", "x", "g[b]"]);
        assert!((r.estimates[0] - 1.0).abs() < 1e-9);
        assert!((r.estimates[1] - 2.0).abs() < 1e-9);
        assert!((r.estimates[2] - 3.0).abs() < 1e-9);
        assert_eq!(r.df_complete, Some(21.0));
        assert!(r.variances.iter().all(|v| *v > 0.0 && v.is_finite()));
    }

    #[test]
    fn explicit_predictor_subset() {
        let r = LinearModel::new("y")
            .with_predictors(["x"])
            .analyze(&dataset())
            .unwrap();
        assert_eq!(r.terms, vec!["(Intercept)", "x"]);
        assert_eq!(r.df_complete, Some(22.0));
    }

    #[test]
    fn rejects_incomplete_and_factor_response() {
        let mut ds = dataset();
        ds.set(3, 1, crate::domain::Value::Missing).unwrap();
        assert!(matches!(
            LinearModel::new("y").analyze(&ds),
            Err(MiceError::InsufficientData { .. })
        ));
        assert!(matches!(
            LinearModel::new("g").analyze(&dataset()),
            Err(MiceError::TypeMismatch { .. })
        ));
        assert!(matches!(
            LinearModel::new("nope").analyze(&dataset()),
            Err(MiceError::UnknownVariable(_))
        ));
    }
}
