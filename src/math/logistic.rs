//! Logistic and multinomial logistic regression by penalised Newton steps.
//!
//! Every fit carries an L2 penalty on all coefficients, so the Hessian stays
//! positive definite and the coefficients finite even under separation.
//! Predictors should be standardised so the penalty acts on a common scale.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

const MAX_ITER: usize = 50;
const TOL: f64 = 1e-8;
const MAX_HALVINGS: usize = 20;

/// Fitted binary logistic model.
#[derive(Debug, Clone)]
pub struct LogisticFit {
    pub beta: DVector<f64>,
    /// Lower Cholesky factor of the inverse penalised Hessian at `beta`.
    pub cov_chol: DMatrix<f64>,
}

/// Fitted multinomial model with class 0 as the baseline.
///
/// `coef` is `p × (k - 1)`; column `c` holds the coefficients of class `c + 1`.
#[derive(Debug, Clone)]
pub struct MultinomialFit {
    pub coef: DMatrix<f64>,
    pub n_classes: usize,
}

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Fit `P(y = 1 | x)`; `y` entries must be 0 or 1.
pub fn fit_logistic(x: &DMatrix<f64>, y: &[f64], ridge: f64) -> Option<LogisticFit> {
    let n = x.nrows();
    let p = x.ncols();
    if n == 0 || p == 0 || y.len() != n {
        return None;
    }

    let mut beta = DVector::<f64>::zeros(p);
    let mut ll = logistic_objective(x, y, &beta, ridge);

    for _ in 0..MAX_ITER {
        let (grad, hess) = logistic_grad_hess(x, y, &beta, ridge);
        let chol = Cholesky::<f64, Dyn>::new(hess)?;
        let step = chol.solve(&grad);

        let (next, next_ll) = backtrack(&beta, &step, ll, |b| logistic_objective(x, y, b, ridge))?;
        let moved = (&next - &beta).amax();
        beta = next;
        ll = next_ll;
        if moved < TOL {
            break;
        }
    }

    let (_, hess) = logistic_grad_hess(x, y, &beta, ridge);
    let cov = Cholesky::<f64, Dyn>::new(hess)?.inverse();
    let cov_chol = Cholesky::<f64, Dyn>::new(cov)?.l();

    if beta.iter().all(|b| b.is_finite()) {
        Some(LogisticFit { beta, cov_chol })
    } else {
        None
    }
}

/// Fit a baseline-category multinomial model; `y` holds class indices `< k`.
pub fn fit_multinomial(
    x: &DMatrix<f64>,
    y: &[usize],
    k: usize,
    ridge: f64,
) -> Option<MultinomialFit> {
    let n = x.nrows();
    let p = x.ncols();
    if n == 0 || p == 0 || y.len() != n || k < 2 || y.iter().any(|&c| c >= k) {
        return None;
    }

    let q = k - 1;
    // Coefficients are stacked class-major: theta[c * p + j].
    let mut theta = DVector::<f64>::zeros(p * q);
    let mut ll = multinomial_objective(x, y, &theta, k, ridge);

    for _ in 0..MAX_ITER {
        let (grad, hess) = multinomial_grad_hess(x, y, &theta, k, ridge);
        let chol = Cholesky::<f64, Dyn>::new(hess)?;
        let step = chol.solve(&grad);

        let (next, next_ll) =
            backtrack(&theta, &step, ll, |t| multinomial_objective(x, y, t, k, ridge))?;
        let moved = (&next - &theta).amax();
        theta = next;
        ll = next_ll;
        if moved < TOL {
            break;
        }
    }

    if !theta.iter().all(|v| v.is_finite()) {
        return None;
    }

    let mut coef = DMatrix::<f64>::zeros(p, q);
    for c in 0..q {
        for j in 0..p {
            coef[(j, c)] = theta[c * p + j];
        }
    }
    Some(MultinomialFit { coef, n_classes: k })
}

impl MultinomialFit {
    /// Class probabilities for one design row.
    pub fn probabilities(&self, row: &[f64]) -> Vec<f64> {
        let q = self.n_classes - 1;
        let mut eta = vec![0.0; self.n_classes];
        for c in 0..q {
            eta[c + 1] = row
                .iter()
                .enumerate()
                .map(|(j, &xj)| xj * self.coef[(j, c)])
                .sum();
        }
        softmax(&eta)
    }
}

pub fn softmax(eta: &[f64]) -> Vec<f64> {
    let max = eta.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = eta.iter().map(|e| (e - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Take the full Newton step, halving it until the objective does not decrease.
fn backtrack<F>(
    current: &DVector<f64>,
    step: &DVector<f64>,
    current_obj: f64,
    objective: F,
) -> Option<(DVector<f64>, f64)>
where
    F: Fn(&DVector<f64>) -> f64,
{
    let mut scale = 1.0;
    for _ in 0..MAX_HALVINGS {
        let candidate = current + step * scale;
        let obj = objective(&candidate);
        if obj.is_finite() && obj >= current_obj - 1e-12 {
            return Some((candidate, obj));
        }
        scale *= 0.5;
    }
    // No ascent direction left: we are at the optimum up to numerical noise.
    current_obj.is_finite().then(|| (current.clone(), current_obj))
}

fn penalty(values: &DVector<f64>, ridge: f64) -> f64 {
    0.5 * ridge * values.norm_squared()
}

fn logistic_objective(x: &DMatrix<f64>, y: &[f64], beta: &DVector<f64>, ridge: f64) -> f64 {
    let eta = x * beta;
    let mut ll = 0.0;
    for (i, &e) in eta.iter().enumerate() {
        // log(1 + exp(e)) computed without overflow.
        let log1pexp = if e > 0.0 { e + (-e).exp().ln_1p() } else { e.exp().ln_1p() };
        ll += y[i] * e - log1pexp;
    }
    ll - penalty(beta, ridge)
}

fn logistic_grad_hess(
    x: &DMatrix<f64>,
    y: &[f64],
    beta: &DVector<f64>,
    ridge: f64,
) -> (DVector<f64>, DMatrix<f64>) {
    let p = x.ncols();
    let eta = x * beta;
    let mut grad = DVector::<f64>::zeros(p);
    let mut hess = DMatrix::<f64>::zeros(p, p);

    for i in 0..x.nrows() {
        let mu = sigmoid(eta[i]);
        let w = (mu * (1.0 - mu)).max(1e-10);
        let r = y[i] - mu;
        for a in 0..p {
            let xa = x[(i, a)];
            grad[a] += xa * r;
            for b in 0..=a {
                hess[(a, b)] += w * xa * x[(i, b)];
            }
        }
    }
    for a in 0..p {
        for b in 0..a {
            hess[(b, a)] = hess[(a, b)];
        }
    }
    for j in 0..p {
        grad[j] -= ridge * beta[j];
        hess[(j, j)] += ridge;
    }
    (grad, hess)
}

fn class_probabilities(x: &DMatrix<f64>, theta: &DVector<f64>, k: usize) -> DMatrix<f64> {
    let n = x.nrows();
    let p = x.ncols();
    let mut probs = DMatrix::<f64>::zeros(n, k);
    let mut eta = vec![0.0; k];
    for i in 0..n {
        eta[0] = 0.0;
        for c in 1..k {
            let offset = (c - 1) * p;
            eta[c] = (0..p).map(|j| x[(i, j)] * theta[offset + j]).sum();
        }
        for (c, pr) in softmax(&eta).into_iter().enumerate() {
            probs[(i, c)] = pr;
        }
    }
    probs
}

fn multinomial_objective(
    x: &DMatrix<f64>,
    y: &[usize],
    theta: &DVector<f64>,
    k: usize,
    ridge: f64,
) -> f64 {
    let probs = class_probabilities(x, theta, k);
    let ll: f64 = y
        .iter()
        .enumerate()
        .map(|(i, &c)| probs[(i, c)].max(1e-300).ln())
        .sum();
    ll - penalty(theta, ridge)
}

fn multinomial_grad_hess(
    x: &DMatrix<f64>,
    y: &[usize],
    theta: &DVector<f64>,
    k: usize,
    ridge: f64,
) -> (DVector<f64>, DMatrix<f64>) {
    let n = x.nrows();
    let p = x.ncols();
    let q = k - 1;
    let dim = p * q;
    let probs = class_probabilities(x, theta, k);

    let mut grad = DVector::<f64>::zeros(dim);
    let mut hess = DMatrix::<f64>::zeros(dim, dim);

    for i in 0..n {
        for c in 0..q {
            let pc = probs[(i, c + 1)];
            let indicator = if y[i] == c + 1 { 1.0 } else { 0.0 };
            let r = indicator - pc;
            for j in 0..p {
                grad[c * p + j] += x[(i, j)] * r;
            }
            for d in 0..q {
                let pd = probs[(i, d + 1)];
                let w = if c == d { pc * (1.0 - pc) } else { -pc * pd };
                if w == 0.0 {
                    continue;
                }
                for a in 0..p {
                    let xa = x[(i, a)] * w;
                    for b in 0..p {
                        hess[(c * p + a, d * p + b)] += xa * x[(i, b)];
                    }
                }
            }
        }
    }

    for idx in 0..dim {
        grad[idx] -= ridge * theta[idx];
        hess[(idx, idx)] += ridge;
    }
    (grad, hess)
}
