use chrono::{Duration, NaiveDate};

use goalcast::calibration::{CalibrationMethod, CalibrationStatus};
use goalcast::learners::{GRADIENT_BOOSTING, LearnerConfig, LearnerRegistry, RANDOM_FOREST};
use goalcast::pipeline::{TrainConfig, backtest_target, train, train_targets};
use goalcast::report::ENSEMBLE_ROW;
use goalcast::sample::{FeatureTable, Sample};
use goalcast::{PipelineError, PipelineWarning};

fn synthetic_samples(n: usize) -> Vec<Sample> {
    let start = NaiveDate::from_ymd_opt(2023, 8, 1).unwrap();
    (0..n)
        .map(|i| {
            let strength = ((i * 37) % 100) as f64 / 50.0 - 1.0;
            let noise = ((i * 11) % 7) as f64 / 7.0;
            let goals = (i % 5) as f64;
            Sample::new(format!("m{i:03}"), start + Duration::days(i as i64))
                .with_feature("elo_diff", strength * 200.0)
                .with_feature("form", noise)
                .with_feature("total_goals", goals)
                .with_target("home_win", u8::from(strength + 0.3 * (noise - 0.5) > 0.0))
                .with_target("over_2_5", u8::from(goals > 2.0))
        })
        .collect()
}

fn small_config() -> TrainConfig {
    TrainConfig {
        learners: vec![
            LearnerConfig::new(RANDOM_FOREST).with_param("n_trees", 15.0),
            LearnerConfig::new(GRADIENT_BOOSTING).with_param("n_stages", 15.0),
        ],
        ..TrainConfig::default()
    }
}

#[test]
fn hundred_samples_split_eighty_twenty_in_date_order() {
    let table = FeatureTable::new(synthetic_samples(100)).unwrap();
    let outcome = train(&table, "home_win", &small_config(), &LearnerRegistry::with_defaults()).unwrap();

    assert_eq!(outcome.report.train_samples, 80);
    assert_eq!(outcome.report.test_samples, 20);
    let meta = &outcome.artifact.metadata;
    let (_, last_train) = meta.train_dates.unwrap();
    let (first_test, _) = meta.test_dates.unwrap();
    assert!(last_train < first_test);

    let ensemble = outcome.report.ensemble_row().unwrap();
    assert_eq!(ensemble.test.samples, 20);
    assert!((0.0..=1.0).contains(&ensemble.test.roc_auc));
    assert!(outcome.report.learner_row(RANDOM_FOREST).is_some());
    assert!(outcome.report.learner_row(GRADIENT_BOOSTING).is_some());

    let weights: f64 = outcome.artifact.model.weights().values().sum();
    assert!((weights - 1.0).abs() < 1e-9);
}

#[test]
fn total_goals_is_removed_as_leakage() {
    let table = FeatureTable::new(synthetic_samples(100)).unwrap();
    let outcome = train(&table, "over_2_5", &small_config(), &LearnerRegistry::with_defaults()).unwrap();

    assert_eq!(outcome.report.leakage.leaked, vec!["total_goals".to_string()]);
    assert_eq!(
        outcome.artifact.feature_columns,
        vec!["elo_diff".to_string(), "form".to_string()]
    );
    assert!(outcome.report.warnings.iter().any(|w| matches!(
        w,
        PipelineWarning::LeakageDetected { columns, .. } if columns.contains(&"total_goals".to_string())
    )));
}

#[test]
fn same_inputs_and_seed_give_identical_models() {
    let table = FeatureTable::new(synthetic_samples(100)).unwrap();
    let registry = LearnerRegistry::with_defaults();
    let config = small_config();
    let a = train(&table, "home_win", &config, &registry).unwrap();
    let b = train(&table, "home_win", &config, &registry).unwrap();

    assert_eq!(a.artifact.model, b.artifact.model);
    assert_eq!(a.report.rows, b.report.rows);
    assert_eq!(a.artifact.metadata.model_sha256, b.artifact.metadata.model_sha256);
}

#[test]
fn zero_test_fraction_is_rejected() {
    let table = FeatureTable::new(synthetic_samples(100)).unwrap();
    let config = TrainConfig {
        test_fraction: 0.0,
        ..small_config()
    };
    let err = train(&table, "home_win", &config, &LearnerRegistry::with_defaults()).unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
}

#[test]
fn cv_folds_below_three_is_rejected() {
    let table = FeatureTable::new(synthetic_samples(100)).unwrap();
    let config = TrainConfig {
        cv_folds: 2,
        ..small_config()
    };
    let err = train(&table, "home_win", &config, &LearnerRegistry::with_defaults()).unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
}

#[test]
fn one_bad_target_does_not_stop_the_others() {
    let mut samples = synthetic_samples(100);
    for (i, s) in samples.iter_mut().enumerate() {
        s.targets.insert("never".to_string(), 0);
        if i % 10 == 0 {
            s.targets.insert("sparse".to_string(), u8::from(i % 20 == 0));
        }
    }
    let table = FeatureTable::new(samples).unwrap();
    let targets = ["home_win", "never", "sparse", "over_2_5"]
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>();

    let run = train_targets(&table, &targets, &small_config(), &LearnerRegistry::with_defaults()).unwrap();

    let trained = run.outcomes.iter().map(|o| o.report.target.as_str()).collect::<Vec<_>>();
    assert_eq!(trained, vec!["home_win", "over_2_5"]);
    let failed = run.failures.iter().map(|f| f.target.as_str()).collect::<Vec<_>>();
    assert_eq!(failed, vec!["never", "sparse"]);
    assert!(run.failures.iter().all(|f| f.kind == "data_insufficient"));

    let rows = run.rows();
    assert_eq!(rows.len(), 2 * 3);
    assert_eq!(rows.iter().filter(|r| r.learner == ENSEMBLE_ROW).count(), 2);
}

#[test]
fn unknown_learner_fails_the_whole_run() {
    let table = FeatureTable::new(synthetic_samples(100)).unwrap();
    let config = TrainConfig {
        learners: vec![LearnerConfig::new("svm")],
        ..TrainConfig::default()
    };
    let err = train_targets(
        &table,
        &["home_win".to_string()],
        &config,
        &LearnerRegistry::with_defaults(),
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::UnknownLearner(kind) if kind == "svm"));
}

#[test]
fn disabled_calibration_trains_raw_models() {
    let table = FeatureTable::new(synthetic_samples(100)).unwrap();
    let config = TrainConfig {
        calibration: CalibrationMethod::None,
        ..small_config()
    };
    let outcome = train(&table, "home_win", &config, &LearnerRegistry::with_defaults()).unwrap();
    for member in &outcome.artifact.model.members {
        assert_eq!(member.model.members.len(), 1);
        assert!(member.model.members[0].scaler.is_none());
    }
    assert!(
        outcome
            .report
            .rows
            .iter()
            .all(|r| r.calibration == "none")
    );
}

#[test]
fn backtest_scores_every_rolling_fold() {
    let table = FeatureTable::new(synthetic_samples(150)).unwrap();
    let report = backtest_target(
        &table,
        "over_2_5",
        &small_config(),
        &LearnerRegistry::with_defaults(),
        2,
    )
    .unwrap();

    assert_eq!(report.folds.len(), 2);
    assert_eq!(report.folds[0].train_samples, 50);
    assert_eq!(report.folds[1].train_samples, 100);
    assert!(report.folds.iter().all(|f| f.test_samples == 50 && f.metrics.is_some()));
    assert!(report.aggregate.contains_key("roc_auc"));
    assert!(report.aggregate.contains_key("log_loss"));
}

#[test]
fn sparse_positives_fall_back_to_raw_probabilities() {
    let mut samples = synthetic_samples(100);
    for (i, s) in samples.iter_mut().enumerate() {
        s.targets
            .insert("red_card".to_string(), u8::from([5, 25, 45, 65, 85, 95].contains(&i)));
    }
    let table = FeatureTable::new(samples).unwrap();
    let outcome = train(&table, "red_card", &small_config(), &LearnerRegistry::with_defaults()).unwrap();

    let meta = &outcome.artifact.metadata;
    assert_eq!(meta.learners.len(), 2);
    for learner in &meta.learners {
        assert!(
            matches!(&learner.calibration, CalibrationStatus::Fallback { reason } if reason.contains("need 2 of each")),
            "{}: {:?}",
            learner.name,
            learner.calibration
        );
    }
    let fallbacks = outcome
        .report
        .warnings
        .iter()
        .filter_map(|w| match w {
            PipelineWarning::CalibrationFailure { learner, .. } => Some(learner.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(fallbacks, vec![RANDOM_FOREST, GRADIENT_BOOSTING]);
    assert!(
        outcome
            .report
            .rows
            .iter()
            .filter(|r| r.learner != ENSEMBLE_ROW)
            .all(|r| r.calibration == "fallback")
    );
}

#[test]
fn single_class_test_split_reports_sentinels_and_equal_weights() {
    let mut samples = synthetic_samples(100);
    for (i, s) in samples.iter_mut().enumerate() {
        let label = i < 80 && s.features["elo_diff"] > 0.0;
        s.targets.insert("late_goal".to_string(), u8::from(label));
    }
    let table = FeatureTable::new(samples).unwrap();
    let outcome = train(&table, "late_goal", &small_config(), &LearnerRegistry::with_defaults()).unwrap();

    for row in &outcome.report.rows {
        assert_eq!(row.test.roc_auc, 0.5, "{}", row.learner);
        assert_eq!(row.test.pr_auc, 0.0, "{}", row.learner);
    }
    let weights = outcome.artifact.model.weights();
    assert_eq!(weights[RANDOM_FOREST], 0.5);
    assert_eq!(weights[GRADIENT_BOOSTING], 0.5);

    let undefined_auc = outcome
        .report
        .warnings
        .iter()
        .filter_map(|w| match w {
            PipelineWarning::MetricUndefined { learner, metric, sentinel, .. } if metric == "roc_auc" => {
                assert_eq!(*sentinel, 0.5);
                Some(learner.as_str())
            }
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(undefined_auc, vec![RANDOM_FOREST, GRADIENT_BOOSTING, ENSEMBLE_ROW]);
    assert!(outcome.report.warnings.iter().any(|w| matches!(
        w,
        PipelineWarning::MetricUndefined { metric, .. } if metric == "pr_auc"
    )));
}
