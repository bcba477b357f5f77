//! Schema validation of the raw CSV.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;

use crate::{
    config::{ColumnType, DataValidationConfig},
    frame::{is_missing, sniff_delimiter},
    telemetry::PipelineTelemetry,
};

/// A cell that does not parse as its declared dtype.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeViolation {
    /// 1-based data row.
    pub row: usize,
    /// Column name.
    pub column: String,
    /// Declared dtype.
    pub expected: ColumnType,
    /// Raw cell text.
    pub value: String,
}

/// Outcome of one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Overall verdict written to the status file.
    pub status: bool,
    /// Columns present in the CSV but not declared.
    pub unknown_columns: Vec<String>,
    /// Declared columns absent from the CSV.
    pub missing_columns: Vec<String>,
    /// Cells failing their dtype (capped at [`MAX_VIOLATIONS`]).
    pub type_violations: Vec<TypeViolation>,
    /// Data rows read.
    pub rows: usize,
}

/// Type violations kept in a report.
pub const MAX_VIOLATIONS: usize = 50;

/// Validation stage component.
#[derive(Debug, Clone)]
pub struct DataValidation {
    config: DataValidationConfig,
    telemetry: PipelineTelemetry,
}

impl DataValidation {
    /// Creates the component.
    #[must_use]
    pub const fn new(config: DataValidationConfig, telemetry: PipelineTelemetry) -> Self {
        Self { config, telemetry }
    }

    /// Checks columns and dtypes, then writes `Validation status: <bool>`.
    pub fn validate_all_columns(&self) -> Result<ValidationReport> {
        let cfg = &self.config;
        let report = check_csv(&cfg.unzip_data_dir, cfg)?;
        if let Some(parent) = cfg.status_file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        fs::write(&cfg.status_file, format!("Validation status: {}", report.status))
            .with_context(|| format!("writing {}", cfg.status_file.display()))?;
        self.telemetry.info(
            "validation finished",
            json!({
                "status": report.status,
                "unknown_columns": report.unknown_columns,
                "missing_columns": report.missing_columns,
                "type_violations": report.type_violations.len(),
            }),
        );
        Ok(report)
    }
}

fn check_csv(path: &Path, cfg: &DataValidationConfig) -> Result<ValidationReport> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(raw.lines().next().unwrap_or_default()))
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(raw.as_bytes());
    let headers: Vec<String> = reader.headers()?.iter().map(ToOwned::to_owned).collect();

    let mut report = ValidationReport {
        unknown_columns: headers
            .iter()
            .filter(|column| !cfg.all_schema.contains_key(*column))
            .cloned()
            .collect(),
        missing_columns: cfg
            .all_schema
            .keys()
            .filter(|column| !headers.contains(*column))
            .cloned()
            .collect(),
        ..ValidationReport::default()
    };
    let mut violations = 0;
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        report.rows += 1;
        for (cell, column) in record.iter().zip(&headers) {
            let Some(expected) = cfg.all_schema.get(column) else {
                continue;
            };
            if cell_matches(cell, *expected) {
                continue;
            }
            violations += 1;
            if report.type_violations.len() < MAX_VIOLATIONS {
                report.type_violations.push(TypeViolation {
                    row: idx + 1,
                    column: column.clone(),
                    expected: *expected,
                    value: cell.to_owned(),
                });
            }
        }
    }
    report.status =
        report.unknown_columns.is_empty() && report.missing_columns.is_empty() && violations == 0;
    Ok(report)
}

fn cell_matches(cell: &str, expected: ColumnType) -> bool {
    if is_missing(cell) {
        return true;
    }
    match (cell.parse::<f64>(), expected) {
        (Ok(value), ColumnType::Float64) => !value.is_infinite(),
        (Ok(value), ColumnType::Int64) => value.is_finite() && value.fract() == 0.0,
        (Err(_), _) => false,
    }
}
