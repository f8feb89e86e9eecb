//! Per-variable imputation model.
//!
//! `impute` fits one target on its configured predictors using the rows where
//! the target was originally observed, then draws replacements for the rows
//! where it was missing. Predictors are read from the working copy, which the
//! chained-equations iterator keeps fully populated.
//!
//! Design matrix: intercept, continuous predictors as-is, factors as
//! treatment-coded dummies (first level is the reference). Columns that are
//! constant over the observed rows are dropped, the rest are standardised with
//! observed-row statistics so the logistic penalty acts on a common scale.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand::seq::SliceRandom;
use rand_distr::{ChiSquared, Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::domain::{Dataset, Method, Value, VarKind};
use crate::error::{MiceError, Result};
use crate::math::{fit_linear, fit_logistic, fit_multinomial, sigmoid};
use crate::mice::missingness::MissingnessMatrix;
use crate::mice::predictors::PredictorGraph;

/// Fewest observed rows any method will fit on.
pub const MIN_OBSERVED_ROWS: usize = 2;

/// Relative ridge applied to `X'X` in linear fits.
const LINEAR_RIDGE: f64 = 1e-5;

/// L2 penalty on standardised coefficients in logistic fits.
const LOGISTIC_RIDGE: f64 = 1e-2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOptions {
    /// Donor pool size for predictive mean matching.
    pub donors: usize,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self { donors: 5 }
    }
}

/// Draws for one target's missing rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ImputedColumn {
    pub target: usize,
    pub method: Method,
    /// Predictor columns the model was fitted on.
    pub predictors: Vec<usize>,
    /// Originally-missing rows, ascending.
    pub rows: Vec<usize>,
    /// One drawn value per entry of `rows`.
    pub values: Vec<Value>,
}

/// Fit the model for `target` and draw values for its missing rows.
pub fn impute<R: Rng + ?Sized>(
    target: usize,
    working: &Dataset,
    graph: &PredictorGraph,
    missingness: &MissingnessMatrix,
    rng: &mut R,
    opts: &ModelOptions,
) -> Result<ImputedColumn> {
    let column = working.column(target);
    let method = graph
        .method_of(target)
        .ok_or_else(|| MiceError::MissingMethod(column.name.clone()))?;
    let predictors = graph.predictors_of(target);
    let mis_rows = missingness.missing_rows(target).to_vec();
    let obs_rows = missingness.observed_rows(target);

    if mis_rows.is_empty() {
        return Ok(ImputedColumn {
            target,
            method,
            predictors,
            rows: mis_rows,
            values: Vec::new(),
        });
    }
    if obs_rows.len() < MIN_OBSERVED_ROWS {
        return Err(MiceError::InsufficientData {
            variable: column.name.clone(),
            observed: obs_rows.len(),
            required: MIN_OBSERVED_ROWS,
        });
    }

    let values = match method {
        Method::Mean => draw_mean(working, target, &obs_rows, mis_rows.len())?,
        Method::Sample => draw_sample(working, target, &obs_rows, mis_rows.len(), rng),
        Method::Pmm | Method::Norm | Method::Logreg | Method::Polyreg => {
            let (x_obs, x_mis) = build_design(working, &predictors, &obs_rows, &mis_rows)?;
            let required = x_obs.ncols() + 1;
            if obs_rows.len() < required {
                return Err(MiceError::InsufficientData {
                    variable: column.name.clone(),
                    observed: obs_rows.len(),
                    required,
                });
            }
            match method {
                Method::Pmm => draw_pmm(working, target, &obs_rows, &x_obs, &x_mis, opts.donors, rng)?,
                Method::Norm => draw_norm(working, target, &obs_rows, &x_obs, &x_mis, rng)?,
                Method::Logreg => draw_logreg(working, target, &obs_rows, &x_obs, &x_mis, rng)?,
                _ => draw_polyreg(working, target, &obs_rows, &x_obs, &x_mis, rng)?,
            }
        }
    };

    Ok(ImputedColumn {
        target,
        method,
        predictors,
        rows: mis_rows,
        values,
    })
}

/// Build observed/missing design matrices for the given predictors.
fn build_design(
    working: &Dataset,
    predictors: &[usize],
    obs_rows: &[usize],
    mis_rows: &[usize],
) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
    // Feature extractors: (source column, Some(level) for a dummy / None for numeric).
    let mut features: Vec<(usize, Option<u32>)> = Vec::new();
    for &src in predictors {
        let col = working.column(src);
        match col.kind {
            VarKind::Continuous => features.push((src, None)),
            VarKind::Binary | VarKind::Categorical => {
                for level in 1..col.levels.len() as u32 {
                    features.push((src, Some(level)));
                }
            }
        }
    }

    let fill = |rows: &[usize]| -> Result<DMatrix<f64>> {
        let mut x = DMatrix::<f64>::zeros(rows.len(), features.len() + 1);
        for (i, &row) in rows.iter().enumerate() {
            x[(i, 0)] = 1.0;
            for (j, &(src, level)) in features.iter().enumerate() {
                let value = working.get(row, src);
                x[(i, j + 1)] = match (value, level) {
                    (Value::Real(v), None) => v,
                    (Value::Level(l), Some(want)) => {
                        if l == want {
                            1.0
                        } else {
                            0.0
                        }
                    }
                    _ => {
                        return Err(MiceError::InvalidConfig(format!(
                            "predictor '{}' has an unfilled cell at row {row}",
                            working.column(src).name
                        )));
                    }
                };
            }
        }
        Ok(x)
    };

    let x_obs = fill(obs_rows)?;
    let x_mis = fill(mis_rows)?;

    // Drop columns that carry no information on the observed rows.
    let keep: Vec<usize> = (0..x_obs.ncols())
        .filter(|&j| j == 0 || !is_constant(x_obs.column(j).iter().copied()))
        .collect();
    let (mut x_obs, mut x_mis) = if keep.len() == x_obs.ncols() {
        (x_obs, x_mis)
    } else {
        (x_obs.select_columns(&keep), x_mis.select_columns(&keep))
    };

    let n = x_obs.nrows() as f64;
    for j in 1..x_obs.ncols() {
        let mean = x_obs.column(j).sum() / n;
        let var = x_obs.column(j).iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let sd = var.sqrt().max(1e-12);
        x_obs.column_mut(j).apply(|v| *v = (*v - mean) / sd);
        x_mis.column_mut(j).apply(|v| *v = (*v - mean) / sd);
    }
    Ok((x_obs, x_mis))
}

fn is_constant(mut values: impl Iterator<Item = f64>) -> bool {
    let Some(first) = values.next() else {
        return true;
    };
    values.all(|v| (v - first).abs() < 1e-12)
}

fn observed_reals(working: &Dataset, target: usize, obs_rows: &[usize]) -> Result<Vec<f64>> {
    obs_rows
        .iter()
        .map(|&r| match working.get(r, target) {
            Value::Real(v) => Ok(v),
            _ => Err(MiceError::TypeMismatch {
                variable: working.column(target).name.clone(),
                kind: working.kind(target).to_string(),
            }),
        })
        .collect()
}

fn observed_levels(working: &Dataset, target: usize, obs_rows: &[usize]) -> Result<Vec<usize>> {
    obs_rows
        .iter()
        .map(|&r| match working.get(r, target) {
            Value::Level(l) => Ok(l as usize),
            _ => Err(MiceError::TypeMismatch {
                variable: working.column(target).name.clone(),
                kind: working.kind(target).to_string(),
            }),
        })
        .collect()
}

fn singular(working: &Dataset, target: usize) -> MiceError {
    MiceError::SingularFit {
        variable: working.column(target).name.clone(),
    }
}

/// Bayesian linear regression parameter draw.
///
/// Returns `(beta_hat, beta_star, sigma_star)`: σ* from the scaled inverse χ²
/// posterior and β* ~ N(β̂, σ*² (X'X)^-1).
fn draw_linear_params<R: Rng + ?Sized>(
    working: &Dataset,
    target: usize,
    x_obs: &DMatrix<f64>,
    y_obs: &[f64],
    rng: &mut R,
) -> Result<(DVector<f64>, DVector<f64>, f64)> {
    let y = DVector::from_row_slice(y_obs);
    let fit = fit_linear(x_obs, &y, LINEAR_RIDGE).ok_or_else(|| singular(working, target))?;

    let chi = ChiSquared::new(fit.df_resid() as f64).map_err(|_| singular(working, target))?;
    let sigma_star = (fit.rss / chi.sample(rng)).sqrt();
    if !sigma_star.is_finite() {
        return Err(singular(working, target));
    }

    let z = DVector::<f64>::from_fn(fit.p, |_, _| rng.sample(StandardNormal));
    let beta_star = &fit.beta + (&fit.xtx_inv_chol * z) * sigma_star;
    Ok((fit.beta, beta_star, sigma_star))
}

fn draw_pmm<R: Rng + ?Sized>(
    working: &Dataset,
    target: usize,
    obs_rows: &[usize],
    x_obs: &DMatrix<f64>,
    x_mis: &DMatrix<f64>,
    donors: usize,
    rng: &mut R,
) -> Result<Vec<Value>> {
    let y_obs = observed_reals(working, target, obs_rows)?;
    let (beta_hat, beta_star, _) = draw_linear_params(working, target, x_obs, &y_obs, rng)?;

    // Type-1 matching: observed rows use β̂, missing rows use the drawn β*.
    let yhat_obs = x_obs * beta_hat;
    let yhat_mis = x_mis * beta_star;
    let k = donors.clamp(1, y_obs.len());

    let mut order: Vec<usize> = (0..y_obs.len()).collect();
    let mut out = Vec::with_capacity(yhat_mis.len());
    for &target_hat in yhat_mis.iter() {
        // Shuffled before a stable sort: donors tied on distance come out in
        // random order instead of row order.
        order.shuffle(rng);
        order.sort_by(|&a, &b| {
            let da = (yhat_obs[a] - target_hat).abs();
            let db = (yhat_obs[b] - target_hat).abs();
            da.total_cmp(&db)
        });
        let donor = order[rng.gen_range(0..k)];
        out.push(Value::Real(y_obs[donor]));
    }
    Ok(out)
}

fn draw_norm<R: Rng + ?Sized>(
    working: &Dataset,
    target: usize,
    obs_rows: &[usize],
    x_obs: &DMatrix<f64>,
    x_mis: &DMatrix<f64>,
    rng: &mut R,
) -> Result<Vec<Value>> {
    let y_obs = observed_reals(working, target, obs_rows)?;
    let (_, beta_star, sigma_star) = draw_linear_params(working, target, x_obs, &y_obs, rng)?;
    let mean = x_mis * beta_star;

    let mut out = Vec::with_capacity(mean.len());
    for &mu in mean.iter() {
        let noise: f64 = rng.sample(StandardNormal);
        let v = mu + sigma_star * noise;
        if !v.is_finite() {
            return Err(singular(working, target));
        }
        out.push(Value::Real(v));
    }
    Ok(out)
}

fn draw_logreg<R: Rng + ?Sized>(
    working: &Dataset,
    target: usize,
    obs_rows: &[usize],
    x_obs: &DMatrix<f64>,
    x_mis: &DMatrix<f64>,
    rng: &mut R,
) -> Result<Vec<Value>> {
    let levels = observed_levels(working, target, obs_rows)?;
    let n_levels = working.column(target).levels.len();
    if n_levels > 2 {
        return Err(MiceError::TooManyLevels {
            variable: working.column(target).name.clone(),
            method: Method::Logreg.to_string(),
            levels: n_levels,
            max: 2,
        });
    }
    let y: Vec<f64> = levels.iter().map(|&l| l as f64).collect();
    let fit = fit_logistic(x_obs, &y, LOGISTIC_RIDGE).ok_or_else(|| singular(working, target))?;

    // Parameter draw so the imputations carry model uncertainty.
    let z = DVector::<f64>::from_fn(fit.beta.len(), |_, _| rng.sample(StandardNormal));
    let beta_star = &fit.beta + &fit.cov_chol * z;
    let eta = x_mis * beta_star;

    Ok(eta
        .iter()
        .map(|&e| {
            let p = sigmoid(e);
            let u: f64 = rng.r#gen();
            Value::Level(if u < p { 1 } else { 0 })
        })
        .collect())
}

fn draw_polyreg<R: Rng + ?Sized>(
    working: &Dataset,
    target: usize,
    obs_rows: &[usize],
    x_obs: &DMatrix<f64>,
    x_mis: &DMatrix<f64>,
    rng: &mut R,
) -> Result<Vec<Value>> {
    let y = observed_levels(working, target, obs_rows)?;
    let k = working.column(target).levels.len();
    let fit =
        fit_multinomial(x_obs, &y, k, LOGISTIC_RIDGE).ok_or_else(|| singular(working, target))?;

    let mut out = Vec::with_capacity(x_mis.nrows());
    let mut row = vec![0.0; x_mis.ncols()];
    for i in 0..x_mis.nrows() {
        for (j, slot) in row.iter_mut().enumerate() {
            *slot = x_mis[(i, j)];
        }
        let probs = fit.probabilities(&row);
        out.push(Value::Level(draw_category(&probs, rng) as u32));
    }
    Ok(out)
}

/// Draw an index with the given probabilities (never the argmax shortcut).
fn draw_category<R: Rng + ?Sized>(probs: &[f64], rng: &mut R) -> usize {
    let u: f64 = rng.r#gen();
    let mut acc = 0.0;
    for (c, &p) in probs.iter().enumerate() {
        acc += p;
        if u < acc {
            return c;
        }
    }
    probs.len() - 1
}

fn draw_mean(
    working: &Dataset,
    target: usize,
    obs_rows: &[usize],
    n_missing: usize,
) -> Result<Vec<Value>> {
    let y = observed_reals(working, target, obs_rows)?;
    let mean = y.iter().sum::<f64>() / y.len() as f64;
    Ok(vec![Value::Real(mean); n_missing])
}

fn draw_sample<R: Rng + ?Sized>(
    working: &Dataset,
    target: usize,
    obs_rows: &[usize],
    n_missing: usize,
    rng: &mut R,
) -> Vec<Value> {
    (0..n_missing)
        .map(|_| {
            let donor = obs_rows[rng.gen_range(0..obs_rows.len())];
            working.get(donor, target)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Column;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// y = 2x + noise with a few y values missing; x fully observed.
    fn linear_dataset() -> Dataset {
        let n = 40;
        let xs: Vec<Option<f64>> = (0..n).map(|i| Some(i as f64 / 4.0)).collect();
        let ys: Vec<Option<f64>> = (0..n)
            .map(|i| {
                if i % 8 == 3 {
                    None
                } else {
                    Some(2.0 * i as f64 / 4.0 + ((i * 7) % 5) as f64 * 0.1)
                }
            })
            .collect();
        let group: Vec<Option<u32>> = (0..n).map(|i| Some((i % 3) as u32)).collect();
        Dataset::new(vec![
            Column::continuous("x", xs),
            Column::continuous("y", ys),
            Column::categorical("g", vec!["a".into(), "b".into(), "c".into()], group),
        ])
        .unwrap()
    }

    /// Replace missing cells by column means so the dataset is fully populated.
    fn populated(ds: &Dataset) -> Dataset {
        let mut out = ds.clone();
        for c in 0..ds.n_cols() {
            let obs: Vec<f64> = ds.values(c).iter().filter_map(|v| v.as_f64()).collect();
            let mean = obs.iter().sum::<f64>() / obs.len() as f64;
            for r in 0..ds.n_rows() {
                if ds.get(r, c).is_missing() {
                    let v = match ds.kind(c) {
                        VarKind::Continuous => Value::Real(mean),
                        _ => Value::Level(0),
                    };
                    out.set(r, c, v).unwrap();
                }
            }
        }
        out
    }

    #[test]
    fn pmm_draws_only_observed_values() {
        let ds = linear_dataset();
        let m = MissingnessMatrix::from_dataset(&ds);
        let g = PredictorGraph::default_for(&ds, &m);
        let working = populated(&ds);
        let mut rng = StdRng::seed_from_u64(7);

        let out = impute(1, &working, &g, &m, &mut rng, &ModelOptions::default()).unwrap();
        assert_eq!(out.rows, m.missing_rows(1));
        assert_eq!(out.predictors, vec![0, 2]);

        let observed: Vec<f64> = m
            .observed_rows(1)
            .iter()
            .filter_map(|&r| ds.get(r, 1).as_f64())
            .collect();
        for v in &out.values {
            let Value::Real(x) = v else {
                panic!("expected a real value, got {v:?}");
            };
            assert!(observed.contains(x));
        }
    }

    #[test]
    fn pmm_donors_track_the_predictor() {
        let ds = linear_dataset();
        let m = MissingnessMatrix::from_dataset(&ds);
        let mut g = PredictorGraph::default_for(&ds, &m);
        g.set_predictor("y", "g", false).unwrap();
        let working = populated(&ds);
        let mut rng = StdRng::seed_from_u64(11);

        let out = impute(1, &working, &g, &m, &mut rng, &ModelOptions { donors: 3 }).unwrap();
        for (&row, value) in out.rows.iter().zip(&out.values) {
            let x = ds.get(row, 0).as_f64().unwrap();
            let y = value.as_f64().unwrap();
            // Neighbours of 2x within a couple of grid steps.
            assert!((y - 2.0 * x).abs() < 2.5, "row {row}: x={x} y={y}");
        }
    }

    #[test]
    fn pmm_tied_donors_cover_the_whole_group() {
        // A binary predictor gives two distinct fitted values, so every
        // observed row in a group ties with the others.
        let n = 200;
        let ys: Vec<Option<f64>> = (0..n)
            .map(|i| if i % 5 == 0 { None } else { Some(i as f64) })
            .collect();
        let groups: Vec<Option<u32>> = (0..n).map(|i| Some((i % 2) as u32)).collect();
        let ds = Dataset::new(vec![
            Column::continuous("y", ys),
            Column::categorical("g", vec!["a".into(), "b".into()], groups),
        ])
        .unwrap();
        let m = MissingnessMatrix::from_dataset(&ds);
        let g = PredictorGraph::default_for(&ds, &m);
        let working = populated(&ds);
        let mut rng = StdRng::seed_from_u64(17);

        let mut drawn = std::collections::HashSet::new();
        let mut max = f64::MIN;
        for _ in 0..20 {
            let out = impute(0, &working, &g, &m, &mut rng, &ModelOptions::default()).unwrap();
            for v in &out.values {
                let y = v.as_f64().unwrap();
                max = max.max(y);
                drawn.insert(y.to_bits());
            }
        }
        assert!(drawn.len() > 40, "only {} distinct donors", drawn.len());
        assert!(max > 150.0, "largest donor {max}");
    }

    #[test]
    fn polyreg_and_logreg_draw_valid_levels() {
        let n = 60;
        let xs: Vec<Option<f64>> = (0..n).map(|i| Some(i as f64)).collect();
        let cls: Vec<Option<u32>> = (0..n)
            .map(|i| if i % 9 == 4 { None } else { Some((i / 20) as u32) })
            .collect();
        let flag: Vec<Option<u32>> = (0..n)
            .map(|i| if i % 10 == 5 { None } else { Some(u32::from(i >= 30)) })
            .collect();
        let ds = Dataset::new(vec![
            Column::continuous("x", xs),
            Column::categorical("c", vec!["a".into(), "b".into(), "c".into()], cls),
            Column::categorical("f", vec!["no".into(), "yes".into()], flag),
        ])
        .unwrap();
        let m = MissingnessMatrix::from_dataset(&ds);
        let g = PredictorGraph::default_for(&ds, &m);
        let working = populated(&ds);
        let mut rng = StdRng::seed_from_u64(3);

        let poly = impute(1, &working, &g, &m, &mut rng, &ModelOptions::default()).unwrap();
        assert_eq!(poly.method, Method::Polyreg);
        assert!(poly.values.iter().all(|v| matches!(v, Value::Level(l) if *l < 3)));

        let logit = impute(2, &working, &g, &m, &mut rng, &ModelOptions::default()).unwrap();
        assert_eq!(logit.method, Method::Logreg);
        assert!(logit.values.iter().all(|v| matches!(v, Value::Level(l) if *l < 2)));
    }

    #[test]
    fn too_few_observed_rows_is_insufficient_data() {
        let ds = Dataset::new(vec![
            Column::continuous("x", vec![Some(1.0), Some(2.0), Some(3.0)]),
            Column::continuous("y", vec![Some(1.0), None, None]),
        ])
        .unwrap();
        let m = MissingnessMatrix::from_dataset(&ds);
        let g = PredictorGraph::default_for(&ds, &m);
        let working = populated(&ds);
        let mut rng = StdRng::seed_from_u64(1);

        let err = impute(1, &working, &g, &m, &mut rng, &ModelOptions::default()).unwrap_err();
        assert_eq!(
            err,
            MiceError::InsufficientData {
                variable: "y".into(),
                observed: 1,
                required: MIN_OBSERVED_ROWS
            }
        );
    }

    #[test]
    fn sample_and_mean_work_without_predictors() {
        let ds = linear_dataset();
        let m = MissingnessMatrix::from_dataset(&ds);
        let mut g = PredictorGraph::default_for(&ds, &m);
        g.exclude_everywhere("x").unwrap();
        g.exclude_everywhere("g").unwrap();
        let working = populated(&ds);
        let mut rng = StdRng::seed_from_u64(5);

        g.set_method("y", Method::Mean).unwrap();
        let mean = impute(1, &working, &g, &m, &mut rng, &ModelOptions::default()).unwrap();
        assert!(mean.predictors.is_empty());
        let first = mean.values[0];
        assert!(mean.values.iter().all(|v| *v == first));

        g.set_method("y", Method::Sample).unwrap();
        let sample = impute(1, &working, &g, &m, &mut rng, &ModelOptions::default()).unwrap();
        assert_eq!(sample.values.len(), m.missing_count(1));
    }

    #[test]
    fn norm_draws_are_finite() {
        let ds = linear_dataset();
        let m = MissingnessMatrix::from_dataset(&ds);
        let mut g = PredictorGraph::default_for(&ds, &m);
        g.set_method("y", Method::Norm).unwrap();
        let working = populated(&ds);
        let mut rng = StdRng::seed_from_u64(9);
        let out = impute(1, &working, &g, &m, &mut rng, &ModelOptions::default()).unwrap();
        assert!(out.values.iter().all(|v| v.as_f64().is_some_and(f64::is_finite)));
    }

    #[test]
    fn draw_category_respects_degenerate_probabilities() {
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..50 {
            assert_eq!(draw_category(&[0.0, 1.0, 0.0], &mut rng), 1);
        }
    }
}
