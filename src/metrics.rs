use serde::{Deserialize, Serialize};

/// Reported when ROC-AUC is undefined: no discrimination.
pub const AUC_SENTINEL: f64 = 0.5;
/// Reported when average precision is undefined (no positives).
pub const PR_AUC_SENTINEL: f64 = 0.0;

const LOG_LOSS_EPS: f64 = 1e-15;

/// The single decision rule used everywhere: probability >= 0.5 means label 1.
pub fn predicted_label(probability: f64) -> u8 {
    u8::from(probability >= 0.5)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub samples: usize,
    pub accuracy: f64,
    pub roc_auc: f64,
    pub pr_auc: f64,
    pub brier: f64,
    pub log_loss: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// A metric that could not be computed and the sentinel reported in its place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Undefined {
    pub metric: &'static str,
    pub sentinel: f64,
}

impl EvalMetrics {
    pub fn compute(probs: &[f64], labels: &[u8]) -> (Self, Vec<Undefined>) {
        let mut undefined = Vec::new();
        let roc_auc = roc_auc(probs, labels).unwrap_or_else(|| {
            undefined.push(Undefined {
                metric: "roc_auc",
                sentinel: AUC_SENTINEL,
            });
            AUC_SENTINEL
        });
        let pr_auc = average_precision(probs, labels).unwrap_or_else(|| {
            undefined.push(Undefined {
                metric: "pr_auc",
                sentinel: PR_AUC_SENTINEL,
            });
            PR_AUC_SENTINEL
        });
        let counts = Confusion::from_probs(probs, labels);
        let metrics = Self {
            samples: probs.len().min(labels.len()),
            accuracy: accuracy(probs, labels),
            roc_auc,
            pr_auc,
            brier: brier(probs, labels),
            log_loss: log_loss(probs, labels),
            precision: counts.precision(),
            recall: counts.recall(),
            f1: counts.f1(),
        };
        (metrics, undefined)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Confusion {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    pub fn_: usize,
}

impl Confusion {
    pub fn from_probs(probs: &[f64], labels: &[u8]) -> Self {
        let mut c = Self::default();
        for (&p, &y) in probs.iter().zip(labels) {
            match (predicted_label(p), y) {
                (1, 1) => c.tp += 1,
                (1, _) => c.fp += 1,
                (_, 1) => c.fn_ += 1,
                _ => c.tn += 1,
            }
        }
        c
    }

    /// Zero when nothing was predicted positive.
    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    /// Zero when there are no positives.
    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    pub fn f1(&self) -> f64 {
        ratio(2 * self.tp, 2 * self.tp + self.fp + self.fn_)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

pub fn accuracy(probs: &[f64], labels: &[u8]) -> f64 {
    let n = probs.len().min(labels.len());
    if n == 0 {
        return 0.0;
    }
    let correct = probs
        .iter()
        .zip(labels)
        .filter(|(p, y)| predicted_label(**p) == **y)
        .count();
    correct as f64 / n as f64
}

pub fn brier(probs: &[f64], labels: &[u8]) -> f64 {
    let n = probs.len().min(labels.len());
    if n == 0 {
        return 0.0;
    }
    probs
        .iter()
        .zip(labels)
        .map(|(p, y)| (p - f64::from(*y)).powi(2))
        .sum::<f64>()
        / n as f64
}

pub fn log_loss(probs: &[f64], labels: &[u8]) -> f64 {
    let n = probs.len().min(labels.len());
    if n == 0 {
        return 0.0;
    }
    probs
        .iter()
        .zip(labels)
        .map(|(p, y)| {
            let p = p.clamp(LOG_LOSS_EPS, 1.0 - LOG_LOSS_EPS);
            if *y == 1 { -p.ln() } else { -(1.0 - p).ln() }
        })
        .sum::<f64>()
        / n as f64
}

/// Mann-Whitney ROC-AUC with tied scores sharing their average rank.
/// `None` unless both classes are present.
pub fn roc_auc(probs: &[f64], labels: &[u8]) -> Option<f64> {
    let n = probs.len().min(labels.len());
    let pos = labels[..n].iter().filter(|y| **y == 1).count();
    let neg = n - pos;
    if pos == 0 || neg == 0 {
        return None;
    }

    let mut order = (0..n).collect::<Vec<_>>();
    order.sort_by(|&a, &b| probs[a].total_cmp(&probs[b]));

    let mut rank_sum_pos = 0.0_f64;
    let mut start = 0usize;
    while start < n {
        let mut end = start + 1;
        while end < n && probs[order[end]] == probs[order[start]] {
            end += 1;
        }
        // ranks start..end (1-based start+1..=end) share their mean
        let avg_rank = (start + 1 + end) as f64 / 2.0;
        for &i in &order[start..end] {
            if labels[i] == 1 {
                rank_sum_pos += avg_rank;
            }
        }
        start = end;
    }

    let pos_f = pos as f64;
    Some((rank_sum_pos - pos_f * (pos_f + 1.0) / 2.0) / (pos_f * neg as f64))
}

/// Step-wise average precision: sum over score thresholds of
/// `(recall_k - recall_{k-1}) * precision_k`. `None` without positives.
pub fn average_precision(probs: &[f64], labels: &[u8]) -> Option<f64> {
    let n = probs.len().min(labels.len());
    let pos = labels[..n].iter().filter(|y| **y == 1).count();
    if pos == 0 {
        return None;
    }

    let mut order = (0..n).collect::<Vec<_>>();
    order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    let (mut tp, mut fp) = (0usize, 0usize);
    let mut prev_recall = 0.0_f64;
    let mut ap = 0.0_f64;
    let mut start = 0usize;
    while start < n {
        let mut end = start;
        while end < n && probs[order[end]] == probs[order[start]] {
            if labels[order[end]] == 1 {
                tp += 1;
            } else {
                fp += 1;
            }
            end += 1;
        }
        let recall = tp as f64 / pos as f64;
        let precision = tp as f64 / (tp + fp) as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
        start = end;
    }
    Some(ap)
}
