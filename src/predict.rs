use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::artifact::ModelArtifact;
use crate::ensemble::ConfidenceBucket;
use crate::error::PipelineResult;
use crate::sample::Sample;

/// Named feature lookup for a single inference request.
pub trait FeatureRow {
    fn feature(&self, name: &str) -> Option<f64>;
}

impl<S: BuildHasher> FeatureRow for HashMap<String, f64, S> {
    fn feature(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl FeatureRow for BTreeMap<String, f64> {
    fn feature(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl FeatureRow for Sample {
    fn feature(&self, name: &str) -> Option<f64> {
        self.features.get(name).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub target: String,
    pub probability: f64,
    pub predicted_label: u8,
    pub confidence_bucket: ConfidenceBucket,
    pub per_learner_probabilities: BTreeMap<String, f64>,
    /// Expected columns absent from the request (scored as 0).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_columns: Vec<String>,
}

pub fn predict<R: FeatureRow + ?Sized>(artifact: &ModelArtifact, row: &R) -> PipelineResult<Prediction> {
    predict_for(artifact, row, None)
}

/// Scores one request against an already loaded artifact.
///
/// Column order comes from the artifact, never from the caller. Extra request
/// columns are ignored; missing or non-finite ones are scored as 0 and each
/// one logs a warning carrying the column and `sample_id`.
pub fn predict_for<R: FeatureRow + ?Sized>(
    artifact: &ModelArtifact,
    row: &R,
    sample_id: Option<&str>,
) -> PipelineResult<Prediction> {
    artifact.validate()?;
    let target = artifact.target();
    let sample_id = sample_id.unwrap_or("-");

    let mut missing = Vec::new();
    let values = artifact
        .feature_columns
        .iter()
        .map(|column| match row.feature(column) {
            Some(v) if v.is_finite() => v,
            Some(v) => {
                warn!(target_name = target, column = %column, sample_id, value = v, "non-finite feature scored as 0");
                0.0
            }
            None => {
                warn!(target_name = target, column = %column, sample_id, "feature missing from request, scored as 0");
                missing.push(column.clone());
                0.0
            }
        })
        .collect::<Vec<_>>();

    let blended = artifact.model.blend(&values);
    let probability = blended.ensemble_probability.clamp(0.0, 1.0);
    Ok(Prediction {
        target: target.to_string(),
        probability,
        predicted_label: blended.predicted_label,
        confidence_bucket: blended.confidence_bucket,
        per_learner_probabilities: blended.per_learner_probabilities,
        missing_columns: missing,
    })
}
