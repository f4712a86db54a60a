use std::path::PathBuf;

use anyhow::{Context, Result};

use goalcast::config::{CliArgs, ENV_DB_PATH, load_dotenv};
use goalcast::features::{FootballFeatureConfig, build_football_features, build_tennis_features};
use goalcast::historical_dataset;
use goalcast::learners::DEFAULT_SEED;
use goalcast::logging::init_logging;
use goalcast::table_io::save_samples_json;

fn main() -> Result<()> {
    load_dotenv();
    init_logging();

    let args = CliArgs::from_env();
    let db_path = args
        .value("--db")
        .map(PathBuf::from)
        .or_else(|| std::env::var(ENV_DB_PATH).ok().map(PathBuf::from))
        .or_else(historical_dataset::default_db_path)
        .context("unable to resolve sqlite path")?;
    let out_path = args
        .value("--out")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("features.json"));
    let seed = match args.value("--seed") {
        Some(raw) => raw.parse::<u64>().with_context(|| format!("invalid --seed `{raw}`"))?,
        None => DEFAULT_SEED,
    };

    let conn = historical_dataset::open_db(&db_path)?;
    let samples = if args.has_flag("--tennis") {
        let matches = historical_dataset::load_tennis_matches(&conn)?;
        build_tennis_features(&matches, seed)
    } else {
        let league = args.value("--league");
        let matches = historical_dataset::load_finished_matches(&conn, league.as_deref())?;
        build_football_features(&matches, FootballFeatureConfig::default())
    };
    save_samples_json(&out_path, &samples)?;

    println!("Feature build complete");
    println!("DB: {}", db_path.display());
    println!("Samples: {}", samples.len());
    println!("Out: {}", out_path.display());
    Ok(())
}
