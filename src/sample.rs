use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// One historical match: its date, numeric features and 0/1 target labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub features: BTreeMap<String, f64>,
    #[serde(default)]
    pub targets: BTreeMap<String, u8>,
}

impl Sample {
    pub fn new(id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            id: id.into(),
            date,
            features: BTreeMap::new(),
            targets: BTreeMap::new(),
        }
    }

    pub fn with_feature(mut self, name: &str, value: f64) -> Self {
        self.features.insert(name.to_string(), value);
        self
    }

    pub fn with_target(mut self, name: &str, label: u8) -> Self {
        self.targets.insert(name.to_string(), label);
        self
    }

    pub fn target(&self, name: &str) -> Option<u8> {
        self.targets.get(name).copied()
    }
}

/// Date-ordered samples sharing one column set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureTable {
    samples: Vec<Sample>,
    columns: Vec<String>,
    filled_values: usize,
}

impl FeatureTable {
    /// Sorts by date (stable, so same-day samples keep input order) and
    /// zero-fills missing or non-finite feature values.
    pub fn new(mut samples: Vec<Sample>) -> PipelineResult<Self> {
        for sample in &samples {
            for (target, value) in &sample.targets {
                if *value > 1 {
                    return Err(PipelineError::InvalidLabel {
                        sample: sample.id.clone(),
                        target: target.clone(),
                        value: *value,
                    });
                }
            }
        }

        samples.sort_by_key(|s| s.date);

        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for sample in &samples {
            for name in sample.features.keys() {
                if seen.insert(name.as_str()) {
                    columns.push(name.clone());
                }
            }
        }

        let mut filled_values = 0usize;
        for sample in &mut samples {
            for name in &columns {
                let value = sample.features.entry(name.clone()).or_insert(f64::NAN);
                if !value.is_finite() {
                    *value = 0.0;
                    filled_values += 1;
                }
            }
        }

        Ok(Self {
            samples,
            columns,
            filled_values,
        })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of feature cells that were absent or non-finite and set to zero.
    pub fn filled_values(&self) -> usize {
        self.filled_values
    }

    /// Every target name that appears on at least one sample, sorted.
    pub fn target_names(&self) -> Vec<String> {
        let mut names = self
            .samples
            .iter()
            .flat_map(|s| s.targets.keys().cloned())
            .collect::<Vec<_>>();
        names.sort();
        names.dedup();
        names
    }

    pub fn matrix(&self, columns: &[String]) -> Vec<Vec<f64>> {
        let rows = self.samples.iter().collect::<Vec<_>>();
        feature_matrix(&rows, columns)
    }

    /// Samples labelled for `target`, still in date order.
    pub fn labelled_for(&self, target: &str) -> Vec<&Sample> {
        self.samples
            .iter()
            .filter(|s| s.targets.contains_key(target))
            .collect()
    }
}

/// Row-major feature matrix in the given column order; absent columns read as zero.
pub fn feature_matrix(samples: &[&Sample], columns: &[String]) -> Vec<Vec<f64>> {
    samples
        .iter()
        .map(|s| {
            columns
                .iter()
                .map(|c| s.features.get(c).copied().filter(|v| v.is_finite()).unwrap_or(0.0))
                .collect()
        })
        .collect()
}

/// Labels for `target`; samples without the label read as 0, so callers filter first.
pub fn label_vector(samples: &[&Sample], target: &str) -> Vec<u8> {
    samples
        .iter()
        .map(|s| s.target(target).unwrap_or(0))
        .collect()
}
