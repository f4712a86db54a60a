use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the training and inference core.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("insufficient data for target `{target}`: {reason}")]
    DataInsufficient { target: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown learner kind `{0}`")]
    UnknownLearner(String),

    #[error("invalid parameter `{param}` for learner `{learner}`: {reason}")]
    InvalidParam {
        learner: String,
        param: String,
        reason: String,
    },

    #[error("sample `{sample}` has label {value} for target `{target}` (expected 0 or 1)")]
    InvalidLabel {
        sample: String,
        target: String,
        value: u8,
    },

    #[error("model artifact does not match its metadata: {0}")]
    ArtifactLoadMismatch(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PipelineError {
    pub fn insufficient(target: &str, reason: impl Into<String>) -> Self {
        Self::DataInsufficient {
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable kind used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataInsufficient { .. } => "data_insufficient",
            Self::Config(_) => "config",
            Self::UnknownLearner(_) => "unknown_learner",
            Self::InvalidParam { .. } => "invalid_param",
            Self::InvalidLabel { .. } => "invalid_label",
            Self::ArtifactLoadMismatch(_) => "artifact_load_mismatch",
            Self::Io { .. } => "io",
            Self::Json { .. } => "json",
        }
    }
}

/// Non-fatal conditions collected into the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineWarning {
    LeakageDetected {
        target: String,
        columns: Vec<String>,
    },
    CalibrationFailure {
        target: String,
        learner: String,
        reason: String,
    },
    MetricUndefined {
        target: String,
        learner: String,
        metric: String,
        sentinel: f64,
    },
}

impl PipelineWarning {
    pub fn target(&self) -> &str {
        match self {
            Self::LeakageDetected { target, .. }
            | Self::CalibrationFailure { target, .. }
            | Self::MetricUndefined { target, .. } => target,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::LeakageDetected { .. } => "leakage_detected",
            Self::CalibrationFailure { .. } => "calibration_failure",
            Self::MetricUndefined { .. } => "metric_undefined",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Self::LeakageDetected { columns, .. } => format!("removed {}", columns.join(";")),
            Self::CalibrationFailure {
                learner, reason, ..
            } => format!("{learner}: {reason}"),
            Self::MetricUndefined {
                learner,
                metric,
                sentinel,
                ..
            } => format!("{learner}: {metric} undefined, reported as {sentinel}"),
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
