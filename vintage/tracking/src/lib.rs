#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Experiment-tracking abstractions: one [`RunRecord`] per evaluation run,
//! delivered to whichever [`ExperimentTracker`] the caller hands in.

/// HTTP tracker posting runs to a remote tracking service.
pub mod http;

use std::{
    collections::{BTreeMap, VecDeque},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::broadcast};
use uuid::Uuid;

pub use http::HttpTracker;

/// Artifact attached to a run (e.g. the fitted model file).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    /// Logical artifact name (`model`).
    pub name: String,
    /// Location of the artifact on disk.
    pub path: PathBuf,
    /// Name under which the artifact is registered as a model, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_model_name: Option<String>,
}

/// A single tracked run: parameters, metrics and artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// Experiment the run belongs to.
    pub experiment: String,
    /// Run start.
    pub started_at: DateTime<Utc>,
    /// Run end, set by [`RunRecord::finish`].
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Hyperparameters logged for the run.
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    /// Scalar metrics logged for the run.
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// Artifacts logged for the run.
    #[serde(default)]
    pub artifacts: Vec<ArtifactRecord>,
}

impl RunRecord {
    /// Starts a new run for the experiment.
    #[must_use]
    pub fn new(experiment: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            experiment: experiment.into(),
            started_at: Utc::now(),
            finished_at: None,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            artifacts: Vec::new(),
        }
    }

    /// Logs one parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Logs every field of a JSON object as a parameter.
    #[must_use]
    pub fn params(mut self, params: &Value) -> Self {
        if let Some(map) = params.as_object() {
            for (key, value) in map {
                self.params.insert(key.clone(), value.clone());
            }
        }
        self
    }

    /// Logs one metric.
    #[must_use]
    pub fn metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    /// Logs an artifact, optionally registering it as a named model.
    #[must_use]
    pub fn artifact(
        mut self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        registered_model_name: Option<String>,
    ) -> Self {
        self.artifacts.push(ArtifactRecord {
            name: name.into(),
            path: path.into(),
            registered_model_name,
        });
        self
    }

    /// Marks the run as finished now.
    #[must_use]
    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }
}

/// Tracking client interface.
#[async_trait]
pub trait ExperimentTracker: Send + Sync {
    /// Records a completed run.
    async fn log_run(&self, run: RunRecord) -> Result<()>;
}

/// In-memory tracker (for local development and tests).
#[derive(Debug, Clone)]
pub struct MemoryTracker {
    sender: broadcast::Sender<RunRecord>,
    backlog: Arc<Mutex<VecDeque<RunRecord>>>,
    capacity: usize,
}

impl MemoryTracker {
    /// Creates a tracker retaining at most `capacity` runs.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Snapshot of retained runs, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RunRecord> {
        self.backlog.lock().iter().cloned().collect()
    }

    /// Subscribes to runs logged after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RunRecord> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl ExperimentTracker for MemoryTracker {
    async fn log_run(&self, run: RunRecord) -> Result<()> {
        {
            let mut backlog = self.backlog.lock();
            if backlog.len() == self.capacity {
                backlog.pop_front();
            }
            backlog.push_back(run.clone());
        }
        let _ = self.sender.send(run);
        Ok(())
    }
}

/// File-backed tracker appending one JSON line per run.
#[derive(Debug, Clone)]
pub struct FileTracker {
    path: PathBuf,
}

impl FileTracker {
    /// Creates a tracker that appends to the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Returns the runs file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads back every run recorded so far.
    pub fn read_runs(&self) -> Result<Vec<RunRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str::<RunRecord>(line).map_err(anyhow::Error::from))
            .collect()
    }
}

#[async_trait]
impl ExperimentTracker for FileTracker {
    async fn log_run(&self, run: RunRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let data = serde_json::to_vec(&run)?;
        file.write_all(&data).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}
