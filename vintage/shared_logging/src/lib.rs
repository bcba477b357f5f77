#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! JSON-lines logging shared by the pipeline stages, the CLI and the web server.
//!
//! Every record is appended to a log file and mirrored to `tracing` so that
//! console output and the durable log stay in step.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Log severity level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Debug information.
    Debug,
    /// Informational events.
    Info,
    /// Warning indicator.
    Warn,
    /// Error indicator.
    Error,
}

/// Structured log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Timestamp in ISO8601.
    pub timestamp: DateTime<Utc>,
    /// Component emitting the log (e.g. `data_transformation`).
    pub module: String,
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// Shapes, paths, metrics and other fields attached to the message.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl LogRecord {
    /// Creates a record with the provided info.
    #[must_use]
    pub fn new(module: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            module: module.into(),
            level,
            message: message.into(),
            metadata: Map::new(),
        }
    }

    /// Attaches the fields of a JSON object; non-object values land under `data`.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        match metadata {
            Value::Object(map) => self.metadata = map,
            Value::Null => {}
            other => {
                self.metadata.insert("data".into(), other);
            }
        }
        self
    }

    fn mirror(&self) {
        let fields = Value::Object(self.metadata.clone());
        match self.level {
            LogLevel::Debug => {
                tracing::debug!(module = %self.module, %fields, "{}", self.message);
            }
            LogLevel::Info => {
                tracing::info!(module = %self.module, %fields, "{}", self.message);
            }
            LogLevel::Warn => {
                tracing::warn!(module = %self.module, %fields, "{}", self.message);
            }
            LogLevel::Error => {
                tracing::error!(module = %self.module, %fields, "{}", self.message);
            }
        }
    }
}

/// Lifecycle marker written around every pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMarker {
    /// The stage is about to run.
    Started,
    /// The stage finished without error.
    Completed,
    /// The stage returned an error.
    Failed,
}

impl StageMarker {
    /// Renders the banner line for a stage, e.g. `>>>>>> stage Data Transformation started <<<<<<`.
    #[must_use]
    pub fn banner(self, stage: &str) -> String {
        let verb = match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        format!(">>>>>> stage {stage} {verb} <<<<<<")
    }

    /// Severity used when the marker is logged.
    #[must_use]
    pub const fn level(self) -> LogLevel {
        match self {
            Self::Started | Self::Completed => LogLevel::Info,
            Self::Failed => LogLevel::Error,
        }
    }
}

/// Thread-safe JSON logger with append-only semantics.
#[derive(Debug)]
pub struct JsonLogger {
    path: PathBuf,
    writer: Mutex<File>,
}

impl JsonLogger {
    /// Creates or opens a logger at the desired path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    /// Writes a log record as JSON line and mirrors it to `tracing`.
    pub fn log(&self, record: &LogRecord) -> Result<()> {
        record.mirror();
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Writes a stage lifecycle banner.
    pub fn stage(
        &self,
        module: &str,
        stage: &str,
        marker: StageMarker,
        metadata: Value,
    ) -> Result<()> {
        let record =
            LogRecord::new(module, marker.level(), marker.banner(stage)).with_metadata(metadata);
        self.log(&record)
    }

    /// Returns the underlying file path (useful for tests).
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
