use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::calibration::{CalibrationBin, CalibrationStatus};
use crate::ensemble::EnsembleModel;
use crate::error::{PipelineError, PipelineResult};
use crate::learners::ProbabilityModel;
use crate::metrics::EvalMetrics;

pub const ARTIFACT_VERSION: u32 = 1;
pub const MODEL_FILE: &str = "model.json";
pub const COLUMNS_FILE: &str = "feature_columns.json";
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub column: String,
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerSummary {
    pub name: String,
    pub kind: String,
    pub weight: f64,
    pub params: BTreeMap<String, f64>,
    pub calibration: CalibrationStatus,
    pub train: EvalMetrics,
    pub test: EvalMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub version: u32,
    pub target: String,
    /// RFC 3339, UTC.
    pub trained_at: String,
    pub train_samples: usize,
    pub test_samples: usize,
    pub train_dates: Option<(NaiveDate, NaiveDate)>,
    pub test_dates: Option<(NaiveDate, NaiveDate)>,
    pub test_fraction: f64,
    pub seed: u64,
    pub feature_columns: Vec<String>,
    pub learners: Vec<LearnerSummary>,
    pub ensemble: EvalMetrics,
    #[serde(default)]
    pub leakage_removed: Vec<String>,
    #[serde(default)]
    pub identifiers_removed: Vec<String>,
    #[serde(default)]
    pub top_features: Vec<FeatureImportance>,
    #[serde(default)]
    pub reliability: Vec<CalibrationBin>,
    pub expected_calibration_error: f64,
    /// Hex SHA-256 of the serialized model blob.
    pub model_sha256: String,
}

/// The three co-located blobs of a trained target. Immutable once built; a new
/// training run produces a new artifact rather than editing this one.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifact {
    pub model: EnsembleModel,
    pub feature_columns: Vec<String>,
    pub metadata: ModelMetadata,
}

impl ModelArtifact {
    /// Stamps the model digest into `metadata` and checks consistency.
    pub fn new(
        model: EnsembleModel,
        feature_columns: Vec<String>,
        mut metadata: ModelMetadata,
    ) -> PipelineResult<Self> {
        let blob = serde_json::to_vec(&model).map_err(|source| PipelineError::Json {
            path: PathBuf::from(MODEL_FILE),
            source,
        })?;
        metadata.model_sha256 = sha256_hex(&blob);
        let artifact = Self {
            model,
            feature_columns,
            metadata,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn target(&self) -> &str {
        &self.metadata.target
    }

    /// Column list sanity plus agreement between the three blobs.
    pub fn validate(&self) -> PipelineResult<()> {
        validate_columns(&self.feature_columns)?;
        if self.feature_columns != self.metadata.feature_columns {
            return Err(PipelineError::ArtifactLoadMismatch(format!(
                "feature column list ({} columns) differs from the metadata copy ({} columns)",
                self.feature_columns.len(),
                self.metadata.feature_columns.len()
            )));
        }
        if self.model.members.is_empty() {
            return Err(PipelineError::ArtifactLoadMismatch(
                "model has no ensemble members".to_string(),
            ));
        }
        for member in &self.model.members {
            let width = member.model.n_features();
            if width != self.feature_columns.len() {
                return Err(PipelineError::ArtifactLoadMismatch(format!(
                    "learner `{}` expects {width} features but {} columns are recorded",
                    member.name,
                    self.feature_columns.len()
                )));
            }
        }
        Ok(())
    }
}

/// Non-empty, no blank names, no duplicates.
pub fn validate_columns(columns: &[String]) -> PipelineResult<()> {
    if columns.is_empty() {
        return Err(PipelineError::ArtifactLoadMismatch(
            "feature column list is empty".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for column in columns {
        if column.trim().is_empty() {
            return Err(PipelineError::ArtifactLoadMismatch(
                "feature column list contains a blank name".to_string(),
            ));
        }
        if !seen.insert(column.as_str()) {
            return Err(PipelineError::ArtifactLoadMismatch(format!(
                "feature column `{column}` appears twice"
            )));
        }
    }
    Ok(())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn target_dir(models_dir: &Path, target: &str) -> PipelineResult<PathBuf> {
    let clean = !target.is_empty()
        && target
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        && target != "."
        && target != "..";
    if !clean {
        return Err(PipelineError::Config(format!(
            "target name `{target}` cannot be used as a directory name"
        )));
    }
    Ok(models_dir.join(target))
}

/// Writes `<models_dir>/<target>/{model,feature_columns,metadata}.json`, each
/// through a temp file and rename. Returns the target directory.
pub fn save_artifact(models_dir: &Path, artifact: &ModelArtifact) -> PipelineResult<PathBuf> {
    artifact.validate()?;
    let dir = target_dir(models_dir, artifact.target())?;
    fs::create_dir_all(&dir).map_err(|source| PipelineError::Io {
        path: dir.clone(),
        source,
    })?;

    let model_path = dir.join(MODEL_FILE);
    let blob = serde_json::to_vec(&artifact.model).map_err(|source| PipelineError::Json {
        path: model_path.clone(),
        source,
    })?;
    if sha256_hex(&blob) != artifact.metadata.model_sha256 {
        return Err(PipelineError::ArtifactLoadMismatch(
            "model digest changed after the artifact was built".to_string(),
        ));
    }
    write_atomic(&model_path, &blob)?;
    write_json(&dir.join(COLUMNS_FILE), &artifact.feature_columns)?;
    write_json(&dir.join(METADATA_FILE), &artifact.metadata)?;
    Ok(dir)
}

pub fn load_model(dir: &Path) -> PipelineResult<EnsembleModel> {
    read_json(&dir.join(MODEL_FILE))
}

pub fn load_feature_columns(dir: &Path) -> PipelineResult<Vec<String>> {
    read_json(&dir.join(COLUMNS_FILE))
}

pub fn load_metadata(dir: &Path) -> PipelineResult<ModelMetadata> {
    read_json(&dir.join(METADATA_FILE))
}

/// Loads all three blobs and refuses anything inconsistent.
pub fn load_artifact(dir: &Path) -> PipelineResult<ModelArtifact> {
    let model_path = dir.join(MODEL_FILE);
    let blob = fs::read(&model_path).map_err(|source| PipelineError::Io {
        path: model_path.clone(),
        source,
    })?;
    let feature_columns = load_feature_columns(dir)?;
    let metadata = load_metadata(dir)?;

    if metadata.version != ARTIFACT_VERSION {
        return Err(PipelineError::ArtifactLoadMismatch(format!(
            "artifact version {} is not supported (expected {ARTIFACT_VERSION})",
            metadata.version
        )));
    }
    let digest = sha256_hex(&blob);
    if digest != metadata.model_sha256 {
        return Err(PipelineError::ArtifactLoadMismatch(format!(
            "{} digest {digest} does not match metadata {}",
            model_path.display(),
            metadata.model_sha256
        )));
    }
    let model: EnsembleModel =
        serde_json::from_slice(&blob).map_err(|source| PipelineError::Json {
            path: model_path,
            source,
        })?;

    let artifact = ModelArtifact {
        model,
        feature_columns,
        metadata,
    };
    artifact.validate()?;
    Ok(artifact)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> PipelineResult<T> {
    let raw = fs::read(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| PipelineError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> PipelineResult<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|source| PipelineError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &json)
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> PipelineResult<()> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir).map_err(|source| PipelineError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(|source| PipelineError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_validation_rejects_bad_lists() {
        assert!(validate_columns(&[]).is_err());
        assert!(validate_columns(&["a".to_string(), " ".to_string()]).is_err());
        assert!(validate_columns(&["a".to_string(), "a".to_string()]).is_err());
        assert!(validate_columns(&["a".to_string(), "b".to_string()]).is_ok());
    }

    #[test]
    fn target_names_must_be_plain() {
        let base = Path::new("models");
        assert_eq!(target_dir(base, "over_2_5").unwrap(), base.join("over_2_5"));
        assert!(target_dir(base, "../etc").is_err());
        assert!(target_dir(base, "").is_err());
    }

    #[test]
    fn digest_is_hex_sha256() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
