use std::collections::{BTreeMap, HashSet};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifact::{ARTIFACT_VERSION, FeatureImportance, LearnerSummary, ModelArtifact, ModelMetadata};
use crate::calibration::{
    CalibrationMethod, CalibrationStatus, DEFAULT_CV_FOLDS, MIN_CV_FOLDS, RELIABILITY_BINS, calibrate,
    calibration_bins, expected_calibration_error,
};
use crate::ensemble::EnsembleModel;
use crate::error::{PipelineError, PipelineResult, PipelineWarning};
use crate::leakage::{Denylist, LeakageReport, guard_columns};
use crate::learners::{DEFAULT_SEED, LearnerConfig, LearnerRegistry, ProbabilityModel, TrainingData, default_learners};
use crate::metrics::{EvalMetrics, Undefined};
use crate::report::{ENSEMBLE_ROW, ReportRow, TargetFailure};
use crate::sample::{FeatureTable, Sample, feature_matrix, label_vector};
use crate::split::{DEFAULT_TEST_FRACTION, rolling_origin_folds, temporal_split, validate_test_fraction};

pub const DEFAULT_MIN_SAMPLES: usize = 30;
const TOP_FEATURES: usize = 10;

/// Everything one training run needs besides the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub test_fraction: f64,
    pub min_samples: usize,
    pub calibration: CalibrationMethod,
    pub cv_folds: usize,
    pub learners: Vec<LearnerConfig>,
    #[serde(default)]
    pub extra_denylist: Vec<String>,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            test_fraction: DEFAULT_TEST_FRACTION,
            min_samples: DEFAULT_MIN_SAMPLES,
            calibration: CalibrationMethod::Sigmoid,
            cv_folds: DEFAULT_CV_FOLDS,
            learners: default_learners(),
            extra_denylist: Vec::new(),
            seed: DEFAULT_SEED,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        validate_test_fraction(self.test_fraction)?;
        if self.cv_folds < MIN_CV_FOLDS {
            return Err(PipelineError::Config(format!(
                "cv_folds must be at least {MIN_CV_FOLDS}, got {}",
                self.cv_folds
            )));
        }
        if self.learners.is_empty() {
            return Err(PipelineError::Config("no learners configured".to_string()));
        }
        let mut names = HashSet::new();
        for learner in &self.learners {
            if learner.name.trim().is_empty() || learner.name == ENSEMBLE_ROW {
                return Err(PipelineError::Config(format!(
                    "learner name `{}` is reserved or blank",
                    learner.name
                )));
            }
            if !names.insert(learner.name.as_str()) {
                return Err(PipelineError::Config(format!(
                    "learner name `{}` is used twice",
                    learner.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: String,
    pub train_samples: usize,
    pub test_samples: usize,
    pub leakage: LeakageReport,
    pub rows: Vec<ReportRow>,
    pub warnings: Vec<PipelineWarning>,
}

impl TargetReport {
    pub fn ensemble_row(&self) -> Option<&ReportRow> {
        self.rows.iter().find(|r| r.learner == ENSEMBLE_ROW)
    }

    pub fn learner_row(&self, name: &str) -> Option<&ReportRow> {
        self.rows
            .iter()
            .find(|r| r.learner == name && r.learner != ENSEMBLE_ROW)
    }
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub artifact: ModelArtifact,
    pub report: TargetReport,
}

/// Result of a multi-target run: the targets that trained and the ones that did not.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: String,
    pub config: TrainConfig,
    pub outcomes: Vec<TrainOutcome>,
    pub failures: Vec<TargetFailure>,
}

/// Serializable view of a `RunReport` (no model blobs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: String,
    pub config: TrainConfig,
    pub targets: Vec<TargetReport>,
    pub failures: Vec<TargetFailure>,
}

impl RunReport {
    pub fn rows(&self) -> Vec<ReportRow> {
        self.outcomes
            .iter()
            .flat_map(|o| o.report.rows.iter().cloned())
            .collect()
    }

    pub fn warnings(&self) -> Vec<PipelineWarning> {
        self.outcomes
            .iter()
            .flat_map(|o| o.report.warnings.iter().cloned())
            .collect()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            started_at: self.started_at.clone(),
            config: self.config.clone(),
            targets: self.outcomes.iter().map(|o| o.report.clone()).collect(),
            failures: self.failures.clone(),
        }
    }
}

/// Single training entry point: leakage guard, temporal split, per-learner
/// fit and calibration, AUC-weighted blend, evaluation on the held-out tail.
pub fn train(
    table: &FeatureTable,
    target: &str,
    config: &TrainConfig,
    registry: &LearnerRegistry,
) -> PipelineResult<TrainOutcome> {
    config.validate()?;
    let labelled = labelled_rows(table, target, config.min_samples)?;
    let (train_rows, test_rows) = temporal_split(&labelled, config.test_fraction)?;
    fit_target(table, target, train_rows, test_rows, config, registry)
}

/// Trains each target independently. Only an invalid `config` fails the whole
/// run; anything target-specific lands in `failures`.
pub fn train_targets(
    table: &FeatureTable,
    targets: &[String],
    config: &TrainConfig,
    registry: &LearnerRegistry,
) -> PipelineResult<RunReport> {
    config.validate()?;
    for learner in &config.learners {
        registry.resolve(learner, config.seed)?;
    }

    let mut report = RunReport {
        started_at: Utc::now().to_rfc3339(),
        config: config.clone(),
        outcomes: Vec::new(),
        failures: Vec::new(),
    };
    for target in targets {
        match train(table, target, config, registry) {
            Ok(outcome) => report.outcomes.push(outcome),
            Err(err) => {
                warn!(target_name = %target, kind = err.kind(), error = %err, "target skipped");
                report.failures.push(TargetFailure {
                    target: target.clone(),
                    kind: err.kind().to_string(),
                    error: err.to_string(),
                });
            }
        }
    }
    info!(
        trained = report.outcomes.len(),
        failed = report.failures.len(),
        "training run finished"
    );
    Ok(report)
}

fn labelled_rows<'a>(table: &'a FeatureTable, target: &str, min_samples: usize) -> PipelineResult<Vec<&'a Sample>> {
    let labelled = table.labelled_for(target);
    if labelled.len() < min_samples.max(2) {
        return Err(PipelineError::insufficient(
            target,
            format!(
                "{} labelled samples, at least {} required",
                labelled.len(),
                min_samples.max(2)
            ),
        ));
    }
    Ok(labelled)
}

fn date_range(rows: &[&Sample]) -> Option<(NaiveDate, NaiveDate)> {
    Some((rows.first()?.date, rows.last()?.date))
}

fn undefined_warnings(target: &str, learner: &str, undefined: &[Undefined]) -> Vec<PipelineWarning> {
    undefined
        .iter()
        .map(|u| {
            warn!(target_name = target, learner, metric = u.metric, sentinel = u.sentinel, "metric undefined on test split");
            PipelineWarning::MetricUndefined {
                target: target.to_string(),
                learner: learner.to_string(),
                metric: u.metric.to_string(),
                sentinel: u.sentinel,
            }
        })
        .collect()
}

fn fit_target(
    table: &FeatureTable,
    target: &str,
    train_rows: &[&Sample],
    test_rows: &[&Sample],
    config: &TrainConfig,
    registry: &LearnerRegistry,
) -> PipelineResult<TrainOutcome> {
    if train_rows.is_empty() || test_rows.is_empty() {
        return Err(PipelineError::insufficient(
            target,
            format!(
                "split produced {} train and {} test samples",
                train_rows.len(),
                test_rows.len()
            ),
        ));
    }

    let mut warnings = Vec::new();
    let mut denylist = Denylist::new(&config.extra_denylist);
    denylist.extend(table.target_names());
    let leakage = guard_columns(table.columns(), &denylist);
    if leakage.has_leakage() {
        warn!(target_name = target, columns = ?leakage.leaked, "target-derived columns removed from features");
        warnings.push(PipelineWarning::LeakageDetected {
            target: target.to_string(),
            columns: leakage.leaked.clone(),
        });
    }
    let columns = leakage.features.clone();
    if columns.is_empty() {
        return Err(PipelineError::insufficient(
            target,
            "no feature columns remain after the leakage guard",
        ));
    }

    let x_train = feature_matrix(train_rows, &columns);
    let y_train = label_vector(train_rows, target);
    let x_test = feature_matrix(test_rows, &columns);
    let y_test = label_vector(test_rows, target);
    let data = TrainingData {
        target,
        x: &x_train,
        y: &y_train,
    };
    data.require_two_classes()?;

    info!(
        target_name = target,
        train = train_rows.len(),
        test = test_rows.len(),
        features = columns.len(),
        positives = data.positives(),
        "training target"
    );

    let mut scored = Vec::with_capacity(config.learners.len());
    let mut summaries = Vec::with_capacity(config.learners.len());
    for learner in &config.learners {
        let params = registry.resolve(learner, config.seed)?;
        let model = calibrate(&data, config.calibration, config.cv_folds, |d| {
            registry.fit(learner, d, config.seed)
        })?;
        if let CalibrationStatus::Fallback { reason } = &model.status {
            warn!(target_name = target, learner = %learner.name, reason = %reason, "calibration fell back to raw probabilities");
            warnings.push(PipelineWarning::CalibrationFailure {
                target: target.to_string(),
                learner: learner.name.clone(),
                reason: reason.clone(),
            });
        }

        let train_probs = x_train.iter().map(|r| model.predict_proba(r)).collect::<Vec<_>>();
        let test_probs = x_test.iter().map(|r| model.predict_proba(r)).collect::<Vec<_>>();
        let (train_metrics, _) = EvalMetrics::compute(&train_probs, &y_train);
        let (test_metrics, undefined) = EvalMetrics::compute(&test_probs, &y_test);
        warnings.extend(undefined_warnings(target, &learner.name, &undefined));
        debug!(
            target_name = target,
            learner = %learner.name,
            auc = test_metrics.roc_auc,
            brier = test_metrics.brier,
            "learner evaluated"
        );

        summaries.push(LearnerSummary {
            name: learner.name.clone(),
            kind: learner.kind.clone(),
            weight: 0.0,
            params: params.values().clone(),
            calibration: model.status.clone(),
            train: train_metrics,
            test: test_metrics,
        });
        scored.push((learner.name.clone(), learner.kind.clone(), test_metrics.roc_auc, model));
    }

    let ensemble = EnsembleModel::from_scored(target, scored);
    for (summary, member) in summaries.iter_mut().zip(&ensemble.members) {
        summary.weight = member.weight;
    }

    let ens_train = x_train.iter().map(|r| ensemble.predict_proba(r)).collect::<Vec<_>>();
    let ens_test = x_test.iter().map(|r| ensemble.predict_proba(r)).collect::<Vec<_>>();
    let (ens_train_metrics, _) = EvalMetrics::compute(&ens_train, &y_train);
    let (ens_test_metrics, undefined) = EvalMetrics::compute(&ens_test, &y_test);
    warnings.extend(undefined_warnings(target, ENSEMBLE_ROW, &undefined));
    let reliability = calibration_bins(&ens_test, &y_test, RELIABILITY_BINS);
    let ece = expected_calibration_error(&reliability);

    let mut rows = summaries
        .iter()
        .map(|s| ReportRow {
            target: target.to_string(),
            learner: s.name.clone(),
            kind: s.kind.clone(),
            calibration: s.calibration.label().to_string(),
            train: s.train,
            test: s.test,
        })
        .collect::<Vec<_>>();
    rows.push(ReportRow {
        target: target.to_string(),
        learner: ENSEMBLE_ROW.to_string(),
        kind: ENSEMBLE_ROW.to_string(),
        calibration: config.calibration.as_str().to_string(),
        train: ens_train_metrics,
        test: ens_test_metrics,
    });

    let metadata = ModelMetadata {
        version: ARTIFACT_VERSION,
        target: target.to_string(),
        trained_at: Utc::now().to_rfc3339(),
        train_samples: train_rows.len(),
        test_samples: test_rows.len(),
        train_dates: date_range(train_rows),
        test_dates: date_range(test_rows),
        test_fraction: test_rows.len() as f64 / (train_rows.len() + test_rows.len()) as f64,
        seed: config.seed,
        feature_columns: columns.clone(),
        learners: summaries,
        ensemble: ens_test_metrics,
        leakage_removed: leakage.leaked.clone(),
        identifiers_removed: leakage.identifiers.clone(),
        top_features: top_features(&ensemble, &columns),
        reliability,
        expected_calibration_error: ece,
        model_sha256: String::new(),
    };
    let artifact = ModelArtifact::new(ensemble, columns, metadata)?;

    info!(
        target_name = target,
        auc = ens_test_metrics.roc_auc,
        brier = ens_test_metrics.brier,
        accuracy = ens_test_metrics.accuracy,
        ece,
        "ensemble evaluated"
    );

    Ok(TrainOutcome {
        artifact,
        report: TargetReport {
            target: target.to_string(),
            train_samples: train_rows.len(),
            test_samples: test_rows.len(),
            leakage,
            rows,
            warnings,
        },
    })
}

/// Ensemble-weighted importances, largest first.
fn top_features(ensemble: &EnsembleModel, columns: &[String]) -> Vec<FeatureImportance> {
    let mut combined = vec![0.0_f64; columns.len()];
    for member in &ensemble.members {
        for (acc, v) in combined.iter_mut().zip(member.model.importances()) {
            *acc += member.weight * v;
        }
    }
    let mut ranked = columns
        .iter()
        .cloned()
        .zip(combined)
        .filter(|(_, v)| *v > 0.0)
        .map(|(column, importance)| FeatureImportance { column, importance })
        .collect::<Vec<_>>();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked.truncate(TOP_FEATURES);
    ranked
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestFold {
    pub fold: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub test_dates: Option<(NaiveDate, NaiveDate)>,
    pub metrics: Option<EvalMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub target: String,
    pub folds: Vec<BacktestFold>,
    /// Test-size-weighted means over the folds that trained.
    pub aggregate: BTreeMap<String, f64>,
}

/// Retrains the full chain on expanding-window folds and scores each
/// following block. A fold that cannot train is recorded, not fatal.
pub fn backtest_target(
    table: &FeatureTable,
    target: &str,
    config: &TrainConfig,
    registry: &LearnerRegistry,
    n_splits: usize,
) -> PipelineResult<BacktestReport> {
    config.validate()?;
    let labelled = labelled_rows(table, target, config.min_samples)?;
    let folds = rolling_origin_folds(labelled.len(), n_splits)?;

    let mut out = Vec::with_capacity(folds.len());
    for (i, fold) in folds.iter().enumerate() {
        let train_rows = &labelled[fold.train.clone()];
        let test_rows = &labelled[fold.test.clone()];
        let result = fit_target(table, target, train_rows, test_rows, config, registry);
        let (metrics, error) = match result {
            Ok(outcome) => (Some(outcome.artifact.metadata.ensemble), None),
            Err(err) => {
                warn!(target_name = target, fold = i, error = %err, "backtest fold skipped");
                (None, Some(err.to_string()))
            }
        };
        info!(target_name = target, fold = i, train = train_rows.len(), test = test_rows.len(), "backtest fold done");
        out.push(BacktestFold {
            fold: i,
            train_samples: train_rows.len(),
            test_samples: test_rows.len(),
            test_dates: date_range(test_rows),
            metrics,
            error,
        });
    }

    Ok(BacktestReport {
        target: target.to_string(),
        aggregate: aggregate_folds(&out),
        folds: out,
    })
}

fn aggregate_folds(folds: &[BacktestFold]) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<String, f64> = BTreeMap::new();
    let mut weight = 0.0_f64;
    for fold in folds {
        let Some(m) = &fold.metrics else {
            continue;
        };
        let w = fold.test_samples as f64;
        weight += w;
        for (name, value) in [
            ("accuracy", m.accuracy),
            ("roc_auc", m.roc_auc),
            ("brier", m.brier),
            ("log_loss", m.log_loss),
        ] {
            *sums.entry(name.to_string()).or_insert(0.0) += w * value;
        }
    }
    if weight > 0.0 {
        for value in sums.values_mut() {
            *value /= weight;
        }
    }
    sums
}
