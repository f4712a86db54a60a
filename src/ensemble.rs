use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::calibration::CalibratedModel;
use crate::learners::ProbabilityModel;
use crate::metrics::predicted_label;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBucket {
    High,
    Medium,
    Low,
}

impl ConfidenceBucket {
    /// Tier by distance from the 0.5 decision boundary.
    pub fn from_probability(probability: f64) -> Self {
        let distance = (probability - 0.5).abs();
        if distance > 0.25 {
            Self::High
        } else if distance > 0.15 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// `auc_i / sum(auc)`. Non-finite or negative scores count as zero; if nothing
/// positive remains every learner gets the same weight.
pub fn compute_weights(aucs: &[f64]) -> Vec<f64> {
    if aucs.is_empty() {
        return Vec::new();
    }
    let cleaned = aucs
        .iter()
        .map(|a| if a.is_finite() { a.max(0.0) } else { 0.0 })
        .collect::<Vec<_>>();
    let total: f64 = cleaned.iter().sum();
    if total <= 0.0 {
        return vec![1.0 / aucs.len() as f64; aucs.len()];
    }
    cleaned.iter().map(|a| a / total).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleMember {
    pub name: String,
    pub kind: String,
    pub weight: f64,
    pub auc: f64,
    pub model: CalibratedModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendOutput {
    pub ensemble_probability: f64,
    pub per_learner_probabilities: BTreeMap<String, f64>,
    pub predicted_label: u8,
    pub confidence_bucket: ConfidenceBucket,
}

/// AUC-weighted mean of calibrated member probabilities for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleModel {
    pub target: String,
    pub members: Vec<EnsembleMember>,
}

impl EnsembleModel {
    /// Weights are derived here from each member's AUC.
    pub fn from_scored(target: &str, scored: Vec<(String, String, f64, CalibratedModel)>) -> Self {
        let weights = compute_weights(&scored.iter().map(|s| s.2).collect::<Vec<_>>());
        let members = scored
            .into_iter()
            .zip(weights)
            .map(|((name, kind, auc, model), weight)| EnsembleMember {
                name,
                kind,
                weight,
                auc,
                model,
            })
            .collect();
        Self {
            target: target.to_string(),
            members,
        }
    }

    pub fn weights(&self) -> BTreeMap<String, f64> {
        self.members
            .iter()
            .map(|m| (m.name.clone(), m.weight))
            .collect()
    }

    pub fn blend(&self, row: &[f64]) -> BlendOutput {
        let mut per_learner = BTreeMap::new();
        let mut blended = 0.0_f64;
        for member in &self.members {
            let p = member.model.predict_proba(row);
            blended += member.weight * p;
            per_learner.insert(member.name.clone(), p);
        }
        let probability = blended.clamp(0.0, 1.0);
        BlendOutput {
            ensemble_probability: probability,
            per_learner_probabilities: per_learner,
            predicted_label: predicted_label(probability),
            confidence_bucket: ConfidenceBucket::from_probability(probability),
        }
    }
}

impl ProbabilityModel for EnsembleModel {
    fn predict_proba(&self, row: &[f64]) -> f64 {
        self.blend(row).ensemble_probability
    }

    fn n_features(&self) -> usize {
        self.members
            .first()
            .map(|m| m.model.n_features())
            .unwrap_or(0)
    }
}
