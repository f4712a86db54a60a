use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use tracing::{debug, warn};

use crate::artifact::write_json;
use crate::sample::{FeatureTable, Sample};

const DATE_COLUMN: &str = "date";
const ID_COLUMNS: [&str; 2] = ["match_id", "id"];

/// Reads a feature table from `.json` (array of samples) or `.parquet`
/// (flat columns). For parquet, `targets` names the label columns.
pub fn load_table(path: &Path, targets: &[String]) -> Result<FeatureTable> {
    let samples = match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") => read_parquet_samples(path, targets)?,
        _ => load_samples_json(path)?,
    };
    FeatureTable::new(samples).with_context(|| format!("build feature table from {}", path.display()))
}

pub fn load_samples_json(path: &Path) -> Result<Vec<Sample>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse samples from {}", path.display()))
}

/// Pretty JSON written through a temp file and rename.
pub fn save_samples_json(path: &Path, samples: &[Sample]) -> Result<()> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    write_json(path, samples)?;
    Ok(())
}

/// One sample per parquet row. Rows without a usable `date` are skipped;
/// label columns must hold 0/1 (null means unlabelled).
pub fn read_parquet_samples(path: &Path, targets: &[String]) -> Result<Vec<Sample>> {
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = SerializedFileReader::new(file).context("open parquet reader feature table")?;
    let iter = reader.get_row_iter(None).context("iterate feature table rows")?;

    let mut out = Vec::new();
    let mut skipped = 0usize;
    for (idx, row) in iter.enumerate() {
        let row = row.with_context(|| format!("decode parquet row {idx}"))?;

        let mut id = None;
        let mut date = None;
        let mut features = BTreeMap::new();
        let mut labels = BTreeMap::new();
        for (name, field) in row.get_column_iter() {
            if name == DATE_COLUMN {
                date = field_date(field);
            } else if ID_COLUMNS.contains(&name.as_str()) {
                id = id.or_else(|| field_text(field));
            } else if targets.iter().any(|t| t == name) {
                if let Some(value) = field_number(field) {
                    labels.insert(name.clone(), label_from(value, name, idx)?);
                }
            } else if let Some(value) = field_number(field) {
                features.insert(name.clone(), value);
            }
        }

        let Some(date) = date else {
            skipped += 1;
            continue;
        };
        out.push(Sample {
            id: id.unwrap_or_else(|| format!("row-{idx}")),
            date,
            features,
            targets: labels,
        });
    }

    if skipped > 0 {
        warn!(path = %path.display(), skipped, "parquet rows without a date were skipped");
    }
    debug!(path = %path.display(), rows = out.len(), "parquet feature table loaded");
    Ok(out)
}

fn label_from(value: f64, column: &str, row: usize) -> Result<u8> {
    if value == 0.0 {
        Ok(0)
    } else if value == 1.0 {
        Ok(1)
    } else {
        Err(anyhow!("row {row}: label column `{column}` holds {value}, expected 0 or 1"))
    }
}

fn field_number(field: &Field) -> Option<f64> {
    match field {
        Field::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
        Field::Byte(v) => Some(f64::from(*v)),
        Field::Short(v) => Some(f64::from(*v)),
        Field::Int(v) => Some(f64::from(*v)),
        Field::Long(v) => Some(*v as f64),
        Field::UByte(v) => Some(f64::from(*v)),
        Field::UShort(v) => Some(f64::from(*v)),
        Field::UInt(v) => Some(f64::from(*v)),
        Field::ULong(v) => Some(*v as f64),
        Field::Float(v) => Some(f64::from(*v)),
        Field::Double(v) => Some(*v),
        _ => None,
    }
}

fn field_text(field: &Field) -> Option<String> {
    match field {
        Field::Str(s) => Some(s.clone()),
        Field::Int(v) => Some(v.to_string()),
        Field::Long(v) => Some(v.to_string()),
        Field::UInt(v) => Some(v.to_string()),
        Field::ULong(v) => Some(v.to_string()),
        _ => None,
    }
}

fn field_date(field: &Field) -> Option<NaiveDate> {
    match field {
        Field::Date(days) => {
            NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(chrono::Duration::days(i64::from(*days)))
        }
        Field::TimestampMillis(ms) => DateTime::from_timestamp_millis(*ms).map(|t| t.date_naive()),
        Field::TimestampMicros(us) => DateTime::from_timestamp_micros(*us).map(|t| t.date_naive()),
        Field::Str(s) => s
            .get(..10)
            .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_fields_decode_from_several_encodings() {
        let expected = NaiveDate::from_ymd_opt(2024, 8, 17);
        assert_eq!(field_date(&Field::Str("2024-08-17T15:00:00Z".to_string())), expected);
        assert_eq!(field_date(&Field::Date(19952)), expected);
        assert_eq!(field_date(&Field::Str("17/08/2024".to_string())), None);
    }

    #[test]
    fn labels_must_be_binary() {
        assert_eq!(label_from(1.0, "btts", 0).unwrap(), 1);
        assert!(label_from(2.0, "btts", 0).is_err());
    }
}
