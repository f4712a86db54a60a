use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::learners::{FittedModel, ProbabilityModel, TrainingData, logistic};
use crate::split::stratified_folds;

pub const MIN_CV_FOLDS: usize = 3;
pub const DEFAULT_CV_FOLDS: usize = 3;
pub const RELIABILITY_BINS: usize = 10;

/// Each held-out fold needs this many of both classes to fit a sigmoid.
const MIN_CLASS_PER_FOLD: usize = 2;
const NEWTON_MAX_ITER: usize = 100;
const NEWTON_MIN_STEP: f64 = 1e-10;
const NEWTON_SIGMA: f64 = 1e-12;
const NEWTON_EPS: f64 = 1e-5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    #[default]
    Sigmoid,
    None,
}

impl CalibrationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sigmoid => "sigmoid",
            Self::None => "none",
        }
    }
}

impl fmt::Display for CalibrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalibrationMethod {
    type Err = PipelineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sigmoid" | "platt" => Ok(Self::Sigmoid),
            "none" | "raw" => Ok(Self::None),
            other => Err(PipelineError::Config(format!(
                "unknown calibration method `{other}` (expected sigmoid or none)"
            ))),
        }
    }
}

/// Logistic map from a raw score to a probability: `1 / (1 + exp(a * s + b))`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattScaler {
    pub a: f64,
    pub b: f64,
}

impl PlattScaler {
    /// Newton's method with backtracking on Platt's regularized targets
    /// (Lin, Lin and Weng's formulation).
    pub fn fit(scores: &[f64], labels: &[u8]) -> Self {
        let prior1 = labels.iter().filter(|y| **y == 1).count() as f64;
        let prior0 = labels.len() as f64 - prior1;
        let hi = (prior1 + 1.0) / (prior1 + 2.0);
        let lo = 1.0 / (prior0 + 2.0);
        let targets = labels
            .iter()
            .map(|&y| if y == 1 { hi } else { lo })
            .collect::<Vec<_>>();

        let objective = |a: f64, b: f64| -> f64 {
            scores
                .iter()
                .zip(&targets)
                .map(|(&f, &t)| {
                    let z = f * a + b;
                    if z >= 0.0 {
                        t * z + (-z).exp().ln_1p()
                    } else {
                        (t - 1.0) * z + z.exp().ln_1p()
                    }
                })
                .sum()
        };

        let mut a = 0.0_f64;
        let mut b = ((prior0 + 1.0) / (prior1 + 1.0)).ln();
        let mut fval = objective(a, b);

        for _ in 0..NEWTON_MAX_ITER {
            let (mut h11, mut h22, mut h21) = (NEWTON_SIGMA, NEWTON_SIGMA, 0.0_f64);
            let (mut g1, mut g2) = (0.0_f64, 0.0_f64);
            for (&f, &t) in scores.iter().zip(&targets) {
                let p = logistic(-(f * a + b));
                let q = 1.0 - p;
                let d2 = p * q;
                h11 += f * f * d2;
                h22 += d2;
                h21 += f * d2;
                let d1 = t - p;
                g1 += f * d1;
                g2 += d1;
            }
            if g1.abs() < NEWTON_EPS && g2.abs() < NEWTON_EPS {
                break;
            }

            let det = h11 * h22 - h21 * h21;
            let da = -(h22 * g1 - h21 * g2) / det;
            let db = -(-h21 * g1 + h11 * g2) / det;
            let gd = g1 * da + g2 * db;

            let mut step = 1.0_f64;
            while step >= NEWTON_MIN_STEP {
                let (na, nb) = (a + step * da, b + step * db);
                let nf = objective(na, nb);
                if nf < fval + 1e-4 * step * gd {
                    a = na;
                    b = nb;
                    fval = nf;
                    break;
                }
                step /= 2.0;
            }
            if step < NEWTON_MIN_STEP {
                break;
            }
        }

        Self { a, b }
    }

    pub fn apply(&self, score: f64) -> f64 {
        logistic(-(self.a * score + self.b)).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CalibrationStatus {
    Sigmoid { folds: usize },
    Disabled,
    Fallback { reason: String },
}

impl CalibrationStatus {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Sigmoid { .. } => "sigmoid",
            Self::Disabled => "none",
            Self::Fallback { .. } => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedMember {
    pub base: FittedModel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaler: Option<PlattScaler>,
}

impl CalibratedMember {
    fn predict_proba(&self, row: &[f64]) -> f64 {
        let raw = self.base.predict_proba(row);
        match &self.scaler {
            Some(scaler) => scaler.apply(raw),
            None => raw.clamp(0.0, 1.0),
        }
    }
}

/// Mean of the per-fold calibrated probabilities, or a single raw base model
/// when calibration is disabled or could not be fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedModel {
    pub status: CalibrationStatus,
    pub members: Vec<CalibratedMember>,
}

impl CalibratedModel {
    /// Base model importances averaged over members.
    pub fn importances(&self) -> Vec<f64> {
        let width = self.n_features();
        let mut out = vec![0.0; width];
        for member in &self.members {
            for (acc, v) in out.iter_mut().zip(member.base.importances()) {
                *acc += v;
            }
        }
        if !self.members.is_empty() {
            for v in &mut out {
                *v /= self.members.len() as f64;
            }
        }
        out
    }
}

impl ProbabilityModel for CalibratedModel {
    fn predict_proba(&self, row: &[f64]) -> f64 {
        if self.members.is_empty() {
            return 0.5;
        }
        let sum: f64 = self.members.iter().map(|m| m.predict_proba(row)).sum();
        (sum / self.members.len() as f64).clamp(0.0, 1.0)
    }

    fn n_features(&self) -> usize {
        self.members.first().map(|m| m.base.n_features()).unwrap_or(0)
    }
}

/// Fits a calibrated learner on the training split only.
///
/// With `Sigmoid`, the training rows are cut into `cv_folds` stratified,
/// unshuffled folds; each fold's complement trains a base model via `fit` and
/// the held-out part fits its Platt scaler. If any fold cannot support that,
/// a single base model is fit on every row and the status records why.
pub fn calibrate<F>(
    data: &TrainingData<'_>,
    method: CalibrationMethod,
    cv_folds: usize,
    fit: F,
) -> PipelineResult<CalibratedModel>
where
    F: Fn(&TrainingData<'_>) -> PipelineResult<FittedModel>,
{
    if cv_folds < MIN_CV_FOLDS {
        return Err(PipelineError::Config(format!(
            "cv_folds must be at least {MIN_CV_FOLDS}, got {cv_folds}"
        )));
    }

    let raw = |status: CalibrationStatus| -> PipelineResult<CalibratedModel> {
        Ok(CalibratedModel {
            status,
            members: vec![CalibratedMember {
                base: fit(data)?,
                scaler: None,
            }],
        })
    };

    if method == CalibrationMethod::None {
        return raw(CalibrationStatus::Disabled);
    }

    let folds = stratified_folds(data.y, cv_folds);
    if let Some(reason) = unusable_fold(data.y, &folds) {
        return raw(CalibrationStatus::Fallback { reason });
    }

    let mut members = Vec::with_capacity(folds.len());
    for held in &folds {
        let mut in_fold = vec![false; data.y.len()];
        for &i in held {
            in_fold[i] = true;
        }
        let (mut x_fit, mut y_fit) = (Vec::new(), Vec::new());
        for (i, flag) in in_fold.iter().enumerate() {
            if !flag {
                x_fit.push(data.x[i].clone());
                y_fit.push(data.y[i]);
            }
        }
        let base = fit(&TrainingData {
            target: data.target,
            x: &x_fit,
            y: &y_fit,
        })?;

        let scores = held
            .iter()
            .map(|&i| base.predict_proba(&data.x[i]))
            .collect::<Vec<_>>();
        let labels = held.iter().map(|&i| data.y[i]).collect::<Vec<_>>();
        members.push(CalibratedMember {
            base,
            scaler: Some(PlattScaler::fit(&scores, &labels)),
        });
    }

    Ok(CalibratedModel {
        status: CalibrationStatus::Sigmoid { folds: folds.len() },
        members,
    })
}

fn unusable_fold(labels: &[u8], folds: &[Vec<usize>]) -> Option<String> {
    let total_pos = labels.iter().filter(|y| **y == 1).count();
    let total_neg = labels.len() - total_pos;
    for (j, held) in folds.iter().enumerate() {
        let pos = held.iter().filter(|&&i| labels[i] == 1).count();
        let neg = held.len() - pos;
        if pos < MIN_CLASS_PER_FOLD || neg < MIN_CLASS_PER_FOLD {
            return Some(format!(
                "fold {j} holds {pos} positive and {neg} negative rows; need {MIN_CLASS_PER_FOLD} of each"
            ));
        }
        if total_pos == pos || total_neg == neg {
            return Some(format!("fold {j} leaves a single class for base training"));
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

pub fn calibration_bins(probs: &[f64], labels: &[u8], bins: usize) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (&p, &y) in probs.iter().zip(labels) {
        let p = p.clamp(0.0, 1.0);
        let idx = ((p * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += p;
        actual_sum[idx] += f64::from(y);
    }

    (0..bins)
        .map(|i| {
            let count = counts[i];
            let (avg_pred, actual_rate) = if count > 0 {
                (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
            } else {
                (0.0, 0.0)
            };
            CalibrationBin {
                bucket_start: i as f64 / bins as f64,
                bucket_end: (i + 1) as f64 / bins as f64,
                count,
                avg_pred,
                actual_rate,
            }
        })
        .collect()
}

/// Count-weighted mean gap between predicted and observed rates.
pub fn expected_calibration_error(bins: &[CalibrationBin]) -> f64 {
    let total: usize = bins.iter().map(|b| b.count).sum();
    if total == 0 {
        return 0.0;
    }
    bins.iter()
        .map(|b| b.count as f64 / total as f64 * (b.avg_pred - b.actual_rate).abs())
        .sum()
}
