use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use goalcast::artifact::save_artifact;
use goalcast::config::{AppConfig, CliArgs, load_dotenv};
use goalcast::learners::LearnerRegistry;
use goalcast::logging::init_logging;
use goalcast::pipeline::{RunReport, backtest_target, train_targets};
use goalcast::report::{CSV_REPORT_FILE, RUN_JSON_FILE, XLSX_REPORT_FILE, write_report_csv, write_report_xlsx};
use goalcast::table_io::load_table;

const DEFAULT_BACKTEST_SPLITS: usize = 5;

const USAGE: &str = "usage:
  goalcast train <table.json|table.parquet> [--targets a,b] [--models-dir DIR] [--report-dir DIR]
                 [--test-fraction F] [--min-samples N] [--cv-folds K] [--calibration sigmoid|none]
                 [--seed S] [--learners learners.json] [--deny col1,col2]
  goalcast backtest <table> --target NAME [--splits N]";

fn main() -> Result<()> {
    load_dotenv();
    init_logging();

    let args = CliArgs::from_env();
    if args.has_flag("--help") {
        println!("{USAGE}");
        return Ok(());
    }
    let positionals = args.positionals();
    let (Some(command), Some(table_path)) = (positionals.first(), positionals.get(1)) else {
        return Err(anyhow!("missing command or table path\n{USAGE}"));
    };
    let table_path = PathBuf::from(table_path);
    let config = AppConfig::from_env(&args)?;

    match *command {
        "train" => run_train(&args, &config, &table_path),
        "backtest" => run_backtest(&args, &config, &table_path),
        other => Err(anyhow!("unknown command `{other}`\n{USAGE}")),
    }
}

fn requested_targets(args: &CliArgs) -> Vec<String> {
    args.value("--targets")
        .or_else(|| args.value("--target"))
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn run_train(args: &CliArgs, config: &AppConfig, table_path: &Path) -> Result<()> {
    let mut targets = requested_targets(args);
    let table = load_table(table_path, &targets)?;
    if targets.is_empty() {
        targets = table.target_names();
    }
    if targets.is_empty() {
        return Err(anyhow!("no targets found in {}", table_path.display()));
    }
    info!(
        samples = table.len(),
        columns = table.columns().len(),
        filled = table.filled_values(),
        targets = targets.len(),
        "feature table loaded"
    );

    let registry = LearnerRegistry::with_defaults();
    let run = train_targets(&table, &targets, &config.train, &registry)?;
    for outcome in &run.outcomes {
        let dir = save_artifact(&config.models_dir, &outcome.artifact)?;
        info!(target_name = %outcome.report.target, dir = %dir.display(), "artifact saved");
    }
    write_reports(&config.report_dir, &run)?;

    println!("Training complete");
    println!("Models: {}", config.models_dir.display());
    println!("Trained: {}/{}", run.outcomes.len(), targets.len());
    for outcome in &run.outcomes {
        if let Some(row) = outcome.report.ensemble_row() {
            println!(
                "  {}: acc={:.3} auc={:.3} brier={:.4} (train {} / test {})",
                row.target,
                row.test.accuracy,
                row.test.roc_auc,
                row.test.brier,
                outcome.report.train_samples,
                outcome.report.test_samples
            );
        }
    }
    for failure in &run.failures {
        println!("  {}: skipped ({}) {}", failure.target, failure.kind, failure.error);
    }
    Ok(())
}

fn write_reports(dir: &Path, run: &RunReport) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let rows = run.rows();
    write_report_csv(&dir.join(CSV_REPORT_FILE), &rows)?;
    write_report_xlsx(&dir.join(XLSX_REPORT_FILE), &rows, &run.warnings(), &run.failures)?;
    let summary = serde_json::to_vec_pretty(&run.summary()).context("serialize run summary")?;
    let json_path = dir.join(RUN_JSON_FILE);
    fs::write(&json_path, summary).with_context(|| format!("write {}", json_path.display()))?;
    Ok(())
}

fn run_backtest(args: &CliArgs, config: &AppConfig, table_path: &Path) -> Result<()> {
    let targets = requested_targets(args);
    let [target] = targets.as_slice() else {
        return Err(anyhow!("backtest needs exactly one --target"));
    };
    let splits = match args.value("--splits") {
        Some(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("invalid --splits `{raw}`"))?,
        None => DEFAULT_BACKTEST_SPLITS,
    };

    let table = load_table(table_path, &targets)?;
    let registry = LearnerRegistry::with_defaults();
    let report = backtest_target(&table, target, &config.train, &registry, splits)?;

    for fold in &report.folds {
        match (&fold.metrics, &fold.error) {
            (Some(m), _) => println!(
                "fold {}: train={} test={} acc={:.3} auc={:.3} brier={:.4} logloss={:.4}",
                fold.fold, fold.train_samples, fold.test_samples, m.accuracy, m.roc_auc, m.brier, m.log_loss
            ),
            (None, err) => println!(
                "fold {}: skipped {}",
                fold.fold,
                err.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    for (name, value) in &report.aggregate {
        println!("{name}: {value:.4}");
    }

    fs::create_dir_all(&config.report_dir)
        .with_context(|| format!("create {}", config.report_dir.display()))?;
    let path = config.report_dir.join(format!("backtest_{target}.json"));
    let json = serde_json::to_vec_pretty(&report).context("serialize backtest report")?;
    fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
