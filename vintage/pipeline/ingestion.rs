//! Data ingestion: fetch the source archive (HTTP or local) and unpack it.

use std::{
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde_json::json;
use tokio::runtime::{Handle, Runtime};
use vintage_logging::LogLevel;

use crate::{common::get_size, config::DataIngestionConfig, telemetry::PipelineTelemetry};

const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";

/// Files produced by one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionOutcome {
    /// The fetched source file.
    pub local_data_file: PathBuf,
    /// Whether the fetch was skipped because the file already existed.
    pub reused: bool,
    /// Files placed under `unzip_dir`.
    pub extracted: Vec<PathBuf>,
}

/// Ingestion stage component.
#[derive(Debug, Clone)]
pub struct DataIngestion {
    config: DataIngestionConfig,
    telemetry: PipelineTelemetry,
}

impl DataIngestion {
    /// Creates the component.
    #[must_use]
    pub const fn new(config: DataIngestionConfig, telemetry: PipelineTelemetry) -> Self {
        Self { config, telemetry }
    }

    /// Fetches `source_url` into `local_data_file` unless it is already there.
    ///
    /// Returns `true` when an existing file was reused.
    pub async fn download_file(&self) -> Result<bool> {
        let cfg = &self.config;
        let target = &cfg.local_data_file;
        if target.exists() {
            self.log(
                LogLevel::Info,
                "file already exists",
                json!({ "path": target, "size": get_size(target)? }),
            );
            return Ok(true);
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let source = cfg.source_url.as_str();
        if source.starts_with("http://") || source.starts_with("https://") {
            let response = reqwest::get(source)
                .await
                .with_context(|| format!("requesting {source}"))?
                .error_for_status()
                .with_context(|| format!("downloading {source}"))?;
            let bytes = response.bytes().await?;
            tokio::fs::write(target, &bytes)
                .await
                .with_context(|| format!("writing {}", target.display()))?;
        } else {
            let path = source.strip_prefix("file://").unwrap_or(source);
            tokio::fs::copy(path, target)
                .await
                .with_context(|| format!("copying {path} to {}", target.display()))?;
        }
        self.log(
            LogLevel::Info,
            "file downloaded",
            json!({ "source": source, "path": target, "size": get_size(target)? }),
        );
        Ok(false)
    }

    /// Unpacks `local_data_file` into `unzip_dir`; non-archives are copied there.
    pub fn extract_zip_file(&self) -> Result<Vec<PathBuf>> {
        let cfg = &self.config;
        fs::create_dir_all(&cfg.unzip_dir)
            .with_context(|| format!("creating directory {}", cfg.unzip_dir.display()))?;
        let extracted = if is_zip(&cfg.local_data_file)? {
            unzip(&cfg.local_data_file, &cfg.unzip_dir)?
        } else {
            let name = cfg
                .local_data_file
                .file_name()
                .context("local data file has no file name")?;
            let destination = cfg.unzip_dir.join(name);
            if destination != cfg.local_data_file {
                fs::copy(&cfg.local_data_file, &destination).with_context(|| {
                    format!(
                        "copying {} into {}",
                        cfg.local_data_file.display(),
                        cfg.unzip_dir.display()
                    )
                })?;
            }
            vec![destination]
        };
        self.log(
            LogLevel::Info,
            "data extracted",
            json!({ "unzip_dir": cfg.unzip_dir, "files": extracted }),
        );
        Ok(extracted)
    }

    /// Async fetch followed by extraction.
    pub async fn run_async(&self) -> Result<IngestionOutcome> {
        let reused = self.download_file().await?;
        let extracted = self.extract_zip_file()?;
        Ok(IngestionOutcome {
            local_data_file: self.config.local_data_file.clone(),
            reused,
            extracted,
        })
    }

    /// Blocking variant of [`DataIngestion::run_async`].
    pub fn run(&self) -> Result<IngestionOutcome> {
        anyhow::ensure!(
            Handle::try_current().is_err(),
            "blocking ingestion called inside an async runtime; use run_async"
        );
        Runtime::new()?.block_on(self.run_async())
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        if let Err(err) = self.telemetry.log(level, message, metadata) {
            tracing::warn!(error = %err, "ingestion log failed");
        }
    }
}

fn is_zip(path: &Path) -> Result<bool> {
    let mut magic = [0u8; 4];
    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == ZIP_MAGIC),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn unzip(archive_path: &Path, destination: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(archive_path)
        .with_context(|| format!("opening {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("reading archive {}", archive_path.display()))?;
    let mut extracted = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        // entries escaping the destination are skipped
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let out_path = destination.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)
            .with_context(|| format!("creating {}", out_path.display()))?;
        io::copy(&mut entry, &mut out)?;
        extracted.push(out_path);
    }
    Ok(extracted)
}
