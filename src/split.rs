use std::ops::Range;

use crate::error::{PipelineError, PipelineResult};

pub const DEFAULT_TEST_FRACTION: f64 = 0.2;

pub fn validate_test_fraction(test_fraction: f64) -> PipelineResult<()> {
    if !test_fraction.is_finite() || test_fraction <= 0.0 || test_fraction >= 1.0 {
        return Err(PipelineError::Config(format!(
            "test_fraction must lie strictly between 0 and 1, got {test_fraction}"
        )));
    }
    Ok(())
}

/// Number of leading rows that go to training: `floor(n * (1 - test_fraction))`.
pub fn train_len(n: usize, test_fraction: f64) -> usize {
    ((n as f64) * (1.0 - test_fraction)).floor() as usize
}

/// Chronological cut of date-ordered rows. No shuffling: every training row
/// precedes every test row in the input order. Rows sharing the cut date may
/// land on either side.
pub fn temporal_split<T>(rows: &[T], test_fraction: f64) -> PipelineResult<(&[T], &[T])> {
    validate_test_fraction(test_fraction)?;
    let cut = train_len(rows.len(), test_fraction).min(rows.len());
    Ok(rows.split_at(cut))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Range<usize>,
    pub test: Range<usize>,
}

/// Expanding-window folds over `n` date-ordered rows: fold `i` trains on
/// everything before its test block, test blocks are `n / (n_splits + 1)` long.
pub fn rolling_origin_folds(n: usize, n_splits: usize) -> PipelineResult<Vec<Fold>> {
    if n_splits == 0 {
        return Err(PipelineError::Config(
            "rolling backtest needs at least one split".to_string(),
        ));
    }
    let test_size = n / (n_splits + 1);
    if test_size == 0 {
        return Err(PipelineError::Config(format!(
            "{n} rows are too few for {n_splits} rolling splits"
        )));
    }

    Ok((0..n_splits)
        .map(|i| {
            let train_end = n - (n_splits - i) * test_size;
            Fold {
                train: 0..train_end,
                test: train_end..train_end + test_size,
            }
        })
        .collect())
}

/// Held-out index sets for stratified, unshuffled k-fold cross-validation.
///
/// Each class's indices are cut into `k` contiguous chunks in input order and
/// fold `j` holds chunk `j` of every class.
pub fn stratified_folds(labels: &[u8], k: usize) -> Vec<Vec<usize>> {
    let k = k.max(1);
    let mut folds = vec![Vec::new(); k];
    for class in [0u8, 1u8] {
        let members = labels
            .iter()
            .enumerate()
            .filter(|(_, y)| **y == class)
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        let base = members.len() / k;
        let extra = members.len() % k;
        let mut start = 0usize;
        for (j, fold) in folds.iter_mut().enumerate() {
            let len = base + usize::from(j < extra);
            fold.extend_from_slice(&members[start..start + len]);
            start += len;
        }
    }
    for fold in &mut folds {
        fold.sort_unstable();
    }
    folds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_keeps_order_and_sizes() {
        let rows = (0..10).collect::<Vec<_>>();
        let (train, test) = temporal_split(&rows, 0.3).unwrap();
        assert_eq!(train.len() + test.len(), 10);
        assert!(train.iter().all(|a| test.iter().all(|b| a < b)));
    }

    #[test]
    fn zero_fraction_is_a_config_error() {
        let rows = [1, 2, 3];
        assert!(matches!(
            temporal_split(&rows, 0.0),
            Err(PipelineError::Config(_))
        ));
        assert!(temporal_split(&rows, 1.0).is_err());
        assert!(temporal_split(&rows, f64::NAN).is_err());
    }

    #[test]
    fn rolling_folds_expand_training_window() {
        let folds = rolling_origin_folds(100, 4).unwrap();
        assert_eq!(folds.len(), 4);
        assert_eq!(folds[0].train, 0..20);
        assert_eq!(folds[0].test, 20..40);
        assert_eq!(folds[3].test, 80..100);
        assert!(rolling_origin_folds(3, 4).is_err());
    }

    #[test]
    fn stratified_folds_cover_every_index_once() {
        let labels = [1, 0, 1, 1, 0, 0, 1, 0, 1, 1];
        let folds = stratified_folds(&labels, 3);
        let mut all = folds.concat();
        all.sort_unstable();
        assert_eq!(all, (0..labels.len()).collect::<Vec<_>>());
        for fold in &folds {
            assert!(fold.iter().any(|i| labels[*i] == 1));
            assert!(fold.iter().any(|i| labels[*i] == 0));
        }
    }
}
