use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use goalcast::artifact::{load_artifact, target_dir};
use goalcast::config::{CliArgs, default_models_dir, load_dotenv};
use goalcast::logging::init_logging;
use goalcast::predict::predict_for;

/// Scores one feature row (a JSON object of column -> number) with a saved
/// target model and prints the prediction as JSON.
fn main() -> Result<()> {
    load_dotenv();
    init_logging();

    let args = CliArgs::from_env();
    let target = args.value("--target").ok_or_else(|| anyhow!("missing --target"))?;
    let models_dir = args
        .value("--models-dir")
        .or_else(|| std::env::var(goalcast::config::ENV_MODELS_DIR).ok())
        .map(PathBuf::from)
        .unwrap_or_else(default_models_dir);
    let row_path = args
        .positionals()
        .first()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("missing feature row path"))?;

    let raw = fs::read_to_string(&row_path).with_context(|| format!("read {}", row_path.display()))?;
    let row: HashMap<String, f64> =
        serde_json::from_str(&raw).with_context(|| format!("parse feature row {}", row_path.display()))?;

    let artifact = load_artifact(&target_dir(&models_dir, &target)?)?;
    let sample_id = args.value("--id");
    let prediction = predict_for(&artifact, &row, sample_id.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&prediction)?);
    Ok(())
}
