use goalcast::calibration::{CalibrationMethod, calibrate};
use goalcast::ensemble::{ConfidenceBucket, EnsembleModel, compute_weights};
use goalcast::learners::{
    GRADIENT_BOOSTING, LearnerConfig, LearnerRegistry, ProbabilityModel, RANDOM_FOREST, TrainingData,
};

fn toy_rows() -> (Vec<Vec<f64>>, Vec<u8>) {
    let x = (0..60)
        .map(|i| vec![((i * 7) % 60) as f64, (i % 3) as f64])
        .collect::<Vec<_>>();
    let y = x.iter().map(|r| u8::from(r[0] >= 30.0)).collect();
    (x, y)
}

#[test]
fn weights_are_proportional_to_auc() {
    let w = compute_weights(&[0.6, 0.8]);
    assert!((w[0] - 0.428_571).abs() < 1e-4);
    assert!((w[1] - 0.571_429).abs() < 1e-4);
    assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
}

#[test]
fn degenerate_scores_fall_back_to_equal_weights() {
    assert_eq!(compute_weights(&[0.0, 0.0]), vec![0.5, 0.5]);
    assert_eq!(compute_weights(&[f64::NAN, 0.7]), vec![0.0, 1.0]);
    assert!(compute_weights(&[]).is_empty());
}

#[test]
fn single_learner_ensemble_is_that_learner() {
    let (x, y) = toy_rows();
    let data = TrainingData {
        target: "home_win",
        x: &x,
        y: &y,
    };
    let registry = LearnerRegistry::with_defaults();
    let config = LearnerConfig::new(RANDOM_FOREST).with_param("n_trees", 8.0);
    let model = calibrate(&data, CalibrationMethod::None, 3, |d| registry.fit(&config, d, 42)).unwrap();
    let expected = x.iter().map(|r| model.predict_proba(r)).collect::<Vec<_>>();

    let ensemble = EnsembleModel::from_scored(
        "home_win",
        vec![("rf".to_string(), RANDOM_FOREST.to_string(), 0.73, model)],
    );
    assert_eq!(ensemble.weights()["rf"], 1.0);
    for (row, p) in x.iter().zip(expected) {
        let out = ensemble.blend(row);
        assert_eq!(out.ensemble_probability, p);
        assert_eq!(out.per_learner_probabilities["rf"], p);
    }
}

#[test]
fn blend_is_the_weighted_sum_of_calibrated_members() {
    let (x, y) = toy_rows();
    let data = TrainingData {
        target: "home_win",
        x: &x,
        y: &y,
    };
    let registry = LearnerRegistry::with_defaults();
    let forest = LearnerConfig::new(RANDOM_FOREST).with_param("n_trees", 8.0);
    let boost = LearnerConfig::new(GRADIENT_BOOSTING).with_param("n_stages", 10.0);
    let rf = calibrate(&data, CalibrationMethod::Sigmoid, 3, |d| registry.fit(&forest, d, 42)).unwrap();
    let gb = calibrate(&data, CalibrationMethod::Sigmoid, 3, |d| registry.fit(&boost, d, 42)).unwrap();

    let ensemble = EnsembleModel::from_scored(
        "home_win",
        vec![
            ("rf".to_string(), RANDOM_FOREST.to_string(), 0.6, rf.clone()),
            ("gb".to_string(), GRADIENT_BOOSTING.to_string(), 0.8, gb.clone()),
        ],
    );
    let weights = ensemble.weights();
    assert!((weights["rf"] - 0.428_571).abs() < 1e-4);
    assert!((weights["gb"] - 0.571_429).abs() < 1e-4);

    for row in [vec![5.0, 0.0], vec![29.0, 1.0], vec![31.0, 2.0], vec![55.0, 1.0]] {
        let out = ensemble.blend(&row);
        let manual = weights["rf"] * rf.predict_proba(&row) + weights["gb"] * gb.predict_proba(&row);
        assert!((out.ensemble_probability - manual).abs() < 1e-12);
        assert_eq!(out.per_learner_probabilities["rf"], rf.predict_proba(&row));
        assert_eq!(out.per_learner_probabilities["gb"], gb.predict_proba(&row));
    }
}

#[test]
fn confidence_tiers_follow_distance_from_half() {
    assert_eq!(ConfidenceBucket::from_probability(0.8), ConfidenceBucket::High);
    assert_eq!(ConfidenceBucket::from_probability(0.2), ConfidenceBucket::High);
    assert_eq!(ConfidenceBucket::from_probability(0.7), ConfidenceBucket::Medium);
    assert_eq!(ConfidenceBucket::from_probability(0.55), ConfidenceBucket::Low);
    assert_eq!(ConfidenceBucket::from_probability(0.6), ConfidenceBucket::Low);
}
