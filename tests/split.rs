use goalcast::PipelineError;
use goalcast::split::{rolling_origin_folds, stratified_folds, temporal_split, train_len};

#[test]
fn temporal_split_takes_the_tail_as_test() {
    let rows = (0..100).collect::<Vec<_>>();
    let (train, test) = temporal_split(&rows, 0.2).unwrap();
    assert_eq!(train.len(), 80);
    assert_eq!(test.len(), 20);
    assert_eq!(train.last(), Some(&79));
    assert_eq!(test.first(), Some(&80));
}

#[test]
fn train_length_rounds_down() {
    assert_eq!(train_len(10, 0.25), 7);
    assert_eq!(train_len(3, 0.5), 1);
    assert_eq!(train_len(0, 0.2), 0);
}

#[test]
fn fractions_outside_the_open_interval_are_config_errors() {
    let rows = [1, 2, 3, 4];
    for bad in [0.0, 1.0, -0.1, 1.5, f64::NAN] {
        assert!(matches!(temporal_split(&rows, bad), Err(PipelineError::Config(_))));
    }
}

#[test]
fn rolling_folds_expand_the_training_window() {
    let folds = rolling_origin_folds(100, 4).unwrap();
    assert_eq!(folds.len(), 4);
    for (i, fold) in folds.iter().enumerate() {
        assert_eq!(fold.train, 0..20 * (i + 1));
        assert_eq!(fold.test, 20 * (i + 1)..20 * (i + 2));
    }
    assert!(rolling_origin_folds(3, 5).is_err());
    assert!(rolling_origin_folds(10, 0).is_err());
}

#[test]
fn stratified_folds_cover_every_row_once_and_balance_classes() {
    let labels = (0..30).map(|i| u8::from(i % 3 == 0)).collect::<Vec<_>>();
    let folds = stratified_folds(&labels, 3);
    assert_eq!(folds.len(), 3);

    let mut seen = folds.iter().flatten().copied().collect::<Vec<_>>();
    seen.sort_unstable();
    assert_eq!(seen, (0..30).collect::<Vec<_>>());
    let positives = folds
        .iter()
        .map(|f| f.iter().filter(|&&i| labels[i] == 1).count())
        .collect::<Vec<_>>();
    assert_eq!(positives, vec![4, 3, 3]);
    let sizes = folds.iter().map(Vec::len).collect::<Vec<_>>();
    assert_eq!(sizes, vec![11, 10, 9]);
    assert!(folds.iter().all(|f| f.windows(2).all(|w| w[0] < w[1])));
}
