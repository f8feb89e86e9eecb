//! Synthetic flower-measurement sample and MCAR amputation.
//!
//! The sample mimics the classic iris layout: three species in equal blocks,
//! four positively correlated measurements per flower, rounded to 0.1 cm.
//! Within a species the measurements share one latent size factor.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand::seq::index;
use rand_distr::Normal;
use tracing::debug;

use crate::domain::{Column, Dataset, Value};
use crate::error::{MiceError, Result};

pub const MEASUREMENTS: [&str; 4] = ["sepal_length", "sepal_width", "petal_length", "petal_width"];
pub const SPECIES: [&str; 3] = ["setosa", "versicolor", "virginica"];

/// Per-species means, same order as `MEASUREMENTS`.
const MEANS: [[f64; 4]; 3] = [
    [5.01, 3.43, 1.46, 0.25],
    [5.94, 2.77, 4.26, 1.33],
    [6.59, 2.97, 5.55, 2.03],
];

/// Per-species standard deviations.
const SDS: [[f64; 4]; 3] = [
    [0.35, 0.38, 0.17, 0.11],
    [0.52, 0.31, 0.47, 0.20],
    [0.64, 0.32, 0.55, 0.27],
];

/// Loading of each measurement on the shared size factor.
const SIZE_LOADING: f64 = 0.7;

/// Amputation stream offset, so the missing cells do not reuse the draws that
/// generated the values.
const AMPUTE_STREAM: u64 = 0x5EED_A11C;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleConfig {
    pub rows: usize,
    pub seed: u64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self { rows: 150, seed: 42 }
    }
}

/// How many cells to blank, by variable kind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AmputeConfig {
    pub continuous: usize,
    pub categorical: usize,
    /// Blank continuous cells in this column only (default: all continuous).
    pub continuous_column: Option<String>,
    /// Blank factor cells in this column only (default: all factors).
    pub categorical_column: Option<String>,
}

/// Generate a complete sample of `config.rows` flowers.
pub fn generate_sample(config: &SampleConfig) -> Result<Dataset> {
    if config.rows < SPECIES.len() {
        return Err(MiceError::InvalidConfig(format!(
            "sample needs at least {} rows, got {}",
            SPECIES.len(),
            config.rows
        )));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| MiceError::InvalidConfig(format!("noise distribution: {e}")))?;
    let unique = (1.0 - SIZE_LOADING * SIZE_LOADING).sqrt();

    let mut measurements = vec![Vec::with_capacity(config.rows); MEASUREMENTS.len()];
    let mut species = Vec::with_capacity(config.rows);
    for row in 0..config.rows {
        let s = row * SPECIES.len() / config.rows;
        let size: f64 = normal.sample(&mut rng);
        for (j, values) in measurements.iter_mut().enumerate() {
            let z = SIZE_LOADING * size + unique * normal.sample(&mut rng);
            let raw = MEANS[s][j] + SDS[s][j] * z;
            values.push(Some(((raw * 10.0).round() / 10.0).max(0.1)));
        }
        species.push(Some(s as u32));
    }

    let mut columns: Vec<Column> = MEASUREMENTS
        .iter()
        .zip(measurements)
        .map(|(name, values)| Column::continuous(*name, values))
        .collect();
    columns.push(Column::categorical(
        "species",
        SPECIES.iter().map(|s| s.to_string()).collect(),
        species,
    ));
    Dataset::new(columns)
}

/// Blank randomly chosen cells, completely at random within each kind.
///
/// Cells are drawn without replacement from the continuous cells and from the
/// factor cells separately, restricted to one column per kind when
/// `continuous_column` / `categorical_column` name one.
pub fn ampute(dataset: &Dataset, config: &AmputeConfig, seed: u64) -> Result<Dataset> {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(AMPUTE_STREAM));
    let mut out = dataset.clone();

    let continuous = ampute_columns(dataset, config.continuous_column.as_deref(), false)?;
    let factors = ampute_columns(dataset, config.categorical_column.as_deref(), true)?;

    for (cols, amount, label) in [
        (&continuous, config.continuous, "continuous"),
        (&factors, config.categorical, "categorical"),
    ] {
        let cells = cols.len() * dataset.n_rows();
        if amount > cells {
            return Err(MiceError::InvalidConfig(format!(
                "cannot blank {amount} {label} cells; only {cells} exist"
            )));
        }
        for cell in index::sample(&mut rng, cells, amount) {
            let col = cols[cell / dataset.n_rows()];
            let row = cell % dataset.n_rows();
            out.set(row, col, Value::Missing)?;
        }
        debug!(kind = label, cells = amount, "amputed");
    }
    Ok(out)
}

fn ampute_columns(dataset: &Dataset, target: Option<&str>, factor: bool) -> Result<Vec<usize>> {
    let Some(name) = target else {
        return Ok((0..dataset.n_cols())
            .filter(|&c| dataset.kind(c).is_categorical() == factor)
            .collect());
    };
    let c = dataset.column_index(name)?;
    if dataset.kind(c).is_categorical() != factor {
        return Err(MiceError::TypeMismatch {
            variable: name.to_string(),
            kind: dataset.kind(c).to_string(),
        });
    }
    Ok(vec![c])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VarKind;

    #[test]
    fn sample_is_complete_and_blocked_by_species() {
        let ds = generate_sample(&SampleConfig::default()).unwrap();
        assert_eq!(ds.n_rows(), 150);
        assert_eq!(ds.n_cols(), 5);
        assert_eq!(ds.count_missing(), 0);
        assert_eq!(ds.get(0, 4), Value::Level(0));
        assert_eq!(ds.get(75, 4), Value::Level(1));
        assert_eq!(ds.get(149, 4), Value::Level(2));
        assert_eq!(ds.kind(4), VarKind::Categorical);
    }

    #[test]
    fn species_separate_on_petal_length() {
        let ds = generate_sample(&SampleConfig::default()).unwrap();
        let mean = |range: std::ops::Range<usize>| {
            let n = range.len() as f64;
            range.map(|r| ds.get(r, 2).as_f64().unwrap()).sum::<f64>() / n
        };
        assert!(mean(0..50) < 2.0);
        assert!(mean(100..150) > 5.0);
    }

    #[test]
    fn same_seed_same_sample() {
        let a = generate_sample(&SampleConfig::default()).unwrap();
        let b = generate_sample(&SampleConfig::default()).unwrap();
        let c = generate_sample(&SampleConfig { rows: 150, seed: 7 }).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn ampute_blanks_the_requested_cells() {
        let ds = generate_sample(&SampleConfig::default()).unwrap();
        let cfg = AmputeConfig {
            continuous: 7,
            categorical: 7,
            ..AmputeConfig::default()
        };
        let amputed = ampute(&ds, &cfg, 42).unwrap();
        let continuous_missing: usize = (0..4)
            .map(|c| amputed.values(c).iter().filter(|v| v.is_missing()).count())
            .sum();
        let species_missing = amputed.values(4).iter().filter(|v| v.is_missing()).count();
        assert_eq!(continuous_missing, 7);
        assert_eq!(species_missing, 7);
        assert_eq!(ampute(&ds, &cfg, 42).unwrap(), amputed);
    }

    #[test]
    fn ampute_rejects_too_many_cells() {
        let ds = generate_sample(&SampleConfig { rows: 3, seed: 1 }).unwrap();
        let cfg = AmputeConfig {
            continuous: 0,
            categorical: 4,
            ..AmputeConfig::default()
        };
        assert!(matches!(ampute(&ds, &cfg, 1), Err(MiceError::InvalidConfig(_))));
    }

    #[test]
    fn ampute_can_target_one_column_per_kind() {
        let ds = generate_sample(&SampleConfig::default()).unwrap();
        let cfg = AmputeConfig {
            continuous: 7,
            categorical: 7,
            continuous_column: Some("sepal_width".into()),
            categorical_column: Some("species".into()),
        };
        let amputed = ampute(&ds, &cfg, 42).unwrap();
        let missing = |c: usize| amputed.values(c).iter().filter(|v| v.is_missing()).count();
        assert_eq!(missing(1), 7);
        assert_eq!(missing(4), 7);
        assert_eq!(missing(0) + missing(2) + missing(3), 0);

        let wrong_kind = AmputeConfig {
            continuous_column: Some("species".into()),
            ..cfg
        };
        assert!(matches!(
            ampute(&ds, &wrong_kind, 42),
            Err(MiceError::TypeMismatch { .. })
        ));
    }
}
