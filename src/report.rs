use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::{Workbook, Worksheet};
use serde::{Deserialize, Serialize};

use crate::error::PipelineWarning;
use crate::metrics::EvalMetrics;

pub const CSV_REPORT_FILE: &str = "training_report.csv";
pub const XLSX_REPORT_FILE: &str = "training_report.xlsx";
pub const RUN_JSON_FILE: &str = "training_run.json";

/// Learner name used for the blended row of each target.
pub const ENSEMBLE_ROW: &str = "ensemble";

const CSV_HEADER: [&str; 9] = [
    "target",
    "learner",
    "accuracy_train",
    "accuracy_test",
    "roc_auc_test",
    "brier_test",
    "precision",
    "recall",
    "f1",
];

const FULL_HEADER: [&str; 17] = [
    "target",
    "learner",
    "kind",
    "calibration",
    "train_samples",
    "test_samples",
    "accuracy_train",
    "accuracy_test",
    "roc_auc_train",
    "roc_auc_test",
    "brier_train",
    "brier_test",
    "pr_auc_test",
    "log_loss_test",
    "precision",
    "recall",
    "f1",
];

/// One learner (or the ensemble) for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub target: String,
    pub learner: String,
    pub kind: String,
    pub calibration: String,
    pub train: EvalMetrics,
    pub test: EvalMetrics,
}

impl ReportRow {
    fn csv_cells(&self) -> Vec<String> {
        vec![
            self.target.clone(),
            self.learner.clone(),
            fmt_metric(self.train.accuracy),
            fmt_metric(self.test.accuracy),
            fmt_metric(self.test.roc_auc),
            fmt_metric(self.test.brier),
            fmt_metric(self.test.precision),
            fmt_metric(self.test.recall),
            fmt_metric(self.test.f1),
        ]
    }

    fn numeric_cells(&self) -> [f64; 13] {
        [
            self.train.samples as f64,
            self.test.samples as f64,
            self.train.accuracy,
            self.test.accuracy,
            self.train.roc_auc,
            self.test.roc_auc,
            self.train.brier,
            self.test.brier,
            self.test.pr_auc,
            self.test.log_loss,
            self.test.precision,
            self.test.recall,
            self.test.f1,
        ]
    }
}

/// A target that produced no model, with the error kind that stopped it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetFailure {
    pub target: String,
    pub kind: String,
    pub error: String,
}

fn fmt_metric(value: f64) -> String {
    format!("{value:.6}")
}

fn write_csv_rows<W: io::Write>(writer: &mut csv::Writer<W>, rows: &[ReportRow]) -> Result<()> {
    writer.write_record(CSV_HEADER).context("write csv header")?;
    for row in rows {
        writer
            .write_record(row.csv_cells())
            .with_context(|| format!("write csv row {}/{}", row.target, row.learner))?;
    }
    writer.flush().context("flush csv")?;
    Ok(())
}

/// Flat report: one line per learner per target, fixed column set.
pub fn render_csv(rows: &[ReportRow]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    write_csv_rows(&mut writer, rows)?;
    let bytes = writer.into_inner().context("finish csv buffer")?;
    String::from_utf8(bytes).context("csv report is not utf-8")
}

pub fn write_report_csv(path: &Path, rows: &[ReportRow]) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("open {}", path.display()))?;
    write_csv_rows(&mut writer, rows)
}

pub fn write_report_xlsx(
    path: &Path,
    rows: &[ReportRow],
    warnings: &[PipelineWarning],
    failures: &[TargetFailure],
) -> Result<()> {
    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Report")?;
        write_header(sheet, &FULL_HEADER)?;
        for (i, row) in rows.iter().enumerate() {
            let r = (i + 1) as u32;
            let text = [&row.target, &row.learner, &row.kind, &row.calibration];
            for (c, value) in text.iter().enumerate() {
                sheet
                    .write_string(r, c as u16, value.as_str())
                    .with_context(|| format!("write cell ({r},{c})"))?;
            }
            for (offset, value) in row.numeric_cells().iter().enumerate() {
                let c = (text.len() + offset) as u16;
                sheet
                    .write_number(r, c, *value)
                    .with_context(|| format!("write cell ({r},{c})"))?;
            }
        }
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Warnings")?;
        let mut table = vec![vec!["target".to_string(), "kind".to_string(), "detail".to_string()]];
        table.extend(
            warnings
                .iter()
                .map(|w| vec![w.target().to_string(), w.kind().to_string(), w.detail()]),
        );
        write_rows(sheet, &table)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Failures")?;
        let mut table = vec![vec!["target".to_string(), "kind".to_string(), "error".to_string()]];
        table.extend(
            failures
                .iter()
                .map(|f| vec![f.target.clone(), f.kind.clone(), f.error.clone()]),
        );
        write_rows(sheet, &table)?;
    }

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;
    Ok(())
}

fn write_header(worksheet: &mut Worksheet, header: &[&str]) -> Result<()> {
    for (col_idx, value) in header.iter().enumerate() {
        worksheet
            .write_string(0, col_idx as u16, *value)
            .with_context(|| format!("write header ({col_idx})"))?;
    }
    Ok(())
}

fn write_rows(worksheet: &mut Worksheet, rows: &[Vec<String>]) -> Result<()> {
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            worksheet
                .write_string(row_idx as u32, col_idx as u16, value)
                .with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
        }
    }
    Ok(())
}
