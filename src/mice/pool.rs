//! Rubin's rules.
//!
//! For each term, with `m` estimates `q_i` and sampling variances `u_i`:
//!
//! - `q̄ = mean(q)`, `ū = mean(u)`, `b = var(q)` (denominator `m - 1`)
//! - `t = ū + (1 + 1/m) b`
//! - `λ = (1 + 1/m) b / t`, floored at 1e-4 before it enters a df formula
//! - Rubin (1987): `ν_old = (m - 1) / λ²`
//! - Barnard–Rubin (1999): `ν_obs = (ν_com + 1)/(ν_com + 3) · ν_com · (1 - λ)`,
//!   `ν = ν_old ν_obs / (ν_old + ν_obs)`

use tracing::debug;

use crate::domain::{AnalysisResult, DfMethod, PoolOptions, PooledResult, PooledTerm};
use crate::error::{MiceError, Result};
use crate::math::{t_quantile, t_two_sided_p};

const LAMBDA_FLOOR: f64 = 1e-4;

/// Combine per-imputation analysis results.
///
/// `DfMethod::BarnardRubin` needs every result to carry `df_complete`; when
/// one does not, the Rubin formula is used and reported in the result.
///
/// A term whose within-imputation variance is zero has no defined total
/// variance or df and fails with `NonFiniteEstimate`.
pub fn pool(results: &[AnalysisResult], options: &PoolOptions) -> Result<PooledResult> {
    let m = results.len();
    if m < 2 {
        return Err(MiceError::InsufficientImputations(m));
    }
    if !(options.conf_level > 0.0 && options.conf_level < 1.0) {
        return Err(MiceError::InvalidConfig(format!(
            "confidence level must lie in (0, 1), got {}",
            options.conf_level
        )));
    }
    check_results(results)?;

    let df_complete = complete_data_df(results);
    let df_method = match (options.df_method, df_complete) {
        (DfMethod::BarnardRubin, Some(_)) => DfMethod::BarnardRubin,
        _ => DfMethod::Rubin,
    };

    let mf = m as f64;
    let alpha = 1.0 - options.conf_level;
    let terms = results[0]
        .terms
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let q: Vec<f64> = results.iter().map(|r| r.estimates[j]).collect();
            let u: Vec<f64> = results.iter().map(|r| r.variances[j]).collect();

            let qbar = q.iter().sum::<f64>() / mf;
            let ubar = u.iter().sum::<f64>() / mf;
            let b = q.iter().map(|x| (x - qbar).powi(2)).sum::<f64>() / (mf - 1.0);
            if ubar <= 0.0 {
                return Err(MiceError::NonFiniteEstimate(format!(
                    "term '{name}' has zero within-imputation variance"
                )));
            }
            let between = (1.0 + 1.0 / mf) * b;
            let t = ubar + between;

            let riv = between / ubar;
            let lambda = between / t;
            let df = match (df_method, df_complete) {
                (DfMethod::BarnardRubin, Some(dfcom)) => barnard_rubin_df(m, lambda, dfcom),
                _ => rubin_df(m, lambda),
            };
            let fmi = (riv + 2.0 / (df + 3.0)) / (riv + 1.0);

            let std_error = t.sqrt();
            let statistic = qbar / std_error;
            let crit = t_quantile(1.0 - alpha / 2.0, df);
            debug!(term = %name, estimate = qbar, ubar, b, df, "pooled term");

            Ok(PooledTerm {
                term: name.clone(),
                estimate: qbar,
                ubar,
                b,
                t,
                riv,
                lambda,
                fmi,
                df,
                std_error,
                statistic,
                p_value: t_two_sided_p(statistic, df),
                conf_low: qbar - crit * std_error,
                conf_high: qbar + crit * std_error,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PooledResult {
        m,
        df_method,
        conf_level: options.conf_level,
        terms,
    })
}

/// Rubin's large-sample degrees of freedom.
pub fn rubin_df(m: usize, lambda: f64) -> f64 {
    let lambda = lambda.max(LAMBDA_FLOOR);
    (m as f64 - 1.0) / (lambda * lambda)
}

/// Barnard–Rubin small-sample degrees of freedom; never exceeds `df_complete`.
pub fn barnard_rubin_df(m: usize, lambda: f64, df_complete: f64) -> f64 {
    let df_old = rubin_df(m, lambda);
    if df_complete.is_infinite() {
        return df_old;
    }
    let lambda = lambda.max(LAMBDA_FLOOR);
    let df_obs = (df_complete + 1.0) / (df_complete + 3.0) * df_complete * (1.0 - lambda);
    df_old * df_obs / (df_old + df_obs)
}

fn check_results(results: &[AnalysisResult]) -> Result<()> {
    let reference = &results[0].terms;
    for (i, r) in results.iter().enumerate() {
        if &r.terms != reference {
            return Err(MiceError::MismatchedTerms(format!(
                "result {} has terms [{}], result 1 has [{}]",
                i + 1,
                r.terms.join(", "),
                reference.join(", ")
            )));
        }
        if r.estimates.len() != r.terms.len() || r.variances.len() != r.terms.len() {
            return Err(MiceError::MismatchedTerms(format!(
                "result {} has {} terms, {} estimates and {} variances",
                i + 1,
                r.terms.len(),
                r.estimates.len(),
                r.variances.len()
            )));
        }
        for (j, term) in r.terms.iter().enumerate() {
            let (q, u) = (r.estimates[j], r.variances[j]);
            if !q.is_finite() || !u.is_finite() || u < 0.0 {
                return Err(MiceError::NonFiniteEstimate(format!(
                    "term '{term}' in result {}: estimate {q}, variance {u}",
                    i + 1
                )));
            }
        }
    }
    Ok(())
}

/// Smallest complete-data df across results, if all of them report one.
fn complete_data_df(results: &[AnalysisResult]) -> Option<f64> {
    results
        .iter()
        .map(|r| r.df_complete.filter(|df| *df > 0.0))
        .try_fold(f64::INFINITY, |acc, df| df.map(|d| acc.min(d)))
}
