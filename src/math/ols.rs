//! Least squares via ridge-stabilised normal equations.
//!
//! `fit_linear` returns the coefficients together with the `(X'X)^-1` factor
//! needed for coefficient variances and Bayesian parameter draws.
//!
//! Design matrices here are small (intercept + a handful of predictors and
//! dummies), so forming `X'X` explicitly is cheap.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

/// Result of a (ridge-stabilised) linear least squares fit.
#[derive(Debug, Clone)]
pub struct LinearFit {
    pub beta: DVector<f64>,
    /// `(X'X + ridge * diag(X'X))^-1`.
    pub xtx_inv: DMatrix<f64>,
    /// Cholesky factor of `xtx_inv` (lower triangular).
    pub xtx_inv_chol: DMatrix<f64>,
    /// Residual sum of squares.
    pub rss: f64,
    pub n: usize,
    pub p: usize,
}

impl LinearFit {
    /// Residual degrees of freedom, floored at 1.
    pub fn df_resid(&self) -> usize {
        self.n.saturating_sub(self.p).max(1)
    }

    pub fn predict(&self, x: &DMatrix<f64>) -> DVector<f64> {
        x * &self.beta
    }
}

/// Fit `y ~ X` via normal equations with a relative ridge penalty.
///
/// `ridge` scales the diagonal of `X'X` (0 gives plain OLS). Returns `None`
/// when the system is singular or the solution is not finite.
pub fn fit_linear(x: &DMatrix<f64>, y: &DVector<f64>, ridge: f64) -> Option<LinearFit> {
    let n = x.nrows();
    let p = x.ncols();
    if n == 0 || p == 0 || y.len() != n {
        return None;
    }

    let mut xtx = x.transpose() * x;
    if ridge > 0.0 {
        for j in 0..p {
            let d = xtx[(j, j)];
            xtx[(j, j)] = d + ridge * d.max(1e-12);
        }
    }

    let chol = Cholesky::<f64, Dyn>::new(xtx)?;
    let xtx_inv = chol.inverse();
    let beta = &xtx_inv * (x.transpose() * y);
    if !beta.iter().all(|v| v.is_finite()) {
        return None;
    }

    let inv_chol = Cholesky::<f64, Dyn>::new(xtx_inv.clone())?;
    let xtx_inv_chol = inv_chol.l();

    let residuals = y - x * &beta;
    let rss = residuals.norm_squared();
    if !rss.is_finite() {
        return None;
    }

    Some(LinearFit {
        beta,
        xtx_inv,
        xtx_inv_chol,
        rss,
        n,
        p,
    })
}
