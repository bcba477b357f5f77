use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::runtime::{Handle, Runtime};
use vintage_logging::{JsonLogger, LogLevel, LogRecord, StageMarker};
use vintage_tracking::{ExperimentTracker, RunRecord};

/// Builder configuring telemetry for pipeline stages.
pub struct PipelineTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    tracker: Option<Arc<dyn ExperimentTracker>>,
}

impl PipelineTelemetryBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            tracker: None,
        }
    }

    /// Sets the JSON log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Assigns the experiment tracker.
    #[must_use]
    pub fn tracker(mut self, tracker: Arc<dyn ExperimentTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Finalizes the builder.
    pub fn build(self) -> Result<PipelineTelemetry> {
        let logger = self
            .log_path
            .map(JsonLogger::new)
            .transpose()?
            .map(Arc::new);
        Ok(PipelineTelemetry {
            module: self.module,
            inner: Arc::new(TelemetryInner {
                logger,
                tracker: self.tracker,
            }),
        })
    }
}

/// Logging and tracking handle passed explicitly into every component.
///
/// Clones share the same log file and tracker; [`PipelineTelemetry::scoped`]
/// only changes the module name stamped on records.
#[derive(Clone)]
pub struct PipelineTelemetry {
    module: String,
    inner: Arc<TelemetryInner>,
}

struct TelemetryInner {
    logger: Option<Arc<JsonLogger>>,
    tracker: Option<Arc<dyn ExperimentTracker>>,
}

impl fmt::Debug for PipelineTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTelemetry")
            .field("module", &self.module)
            .field("logger", &self.inner.logger.as_ref().map(|logger| logger.path()))
            .field("tracker", &self.inner.tracker.is_some())
            .finish()
    }
}

impl PipelineTelemetry {
    /// Returns a builder for this telemetry helper.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> PipelineTelemetryBuilder {
        PipelineTelemetryBuilder::new(module)
    }

    /// Telemetry with no log file and no tracker; records only reach `tracing`.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            module: "vintage".into(),
            inner: Arc::new(TelemetryInner {
                logger: None,
                tracker: None,
            }),
        }
    }

    /// Same sinks, different module name.
    #[must_use]
    pub fn scoped(&self, module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            inner: Arc::clone(&self.inner),
        }
    }

    /// Same log file and module, with `tracker` replacing any attached tracker.
    #[must_use]
    pub fn with_tracker(&self, tracker: Arc<dyn ExperimentTracker>) -> Self {
        Self {
            module: self.module.clone(),
            inner: Arc::new(TelemetryInner {
                logger: self.inner.logger.clone(),
                tracker: Some(tracker),
            }),
        }
    }

    /// Module name stamped on records.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Logs a structured record.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        let record = LogRecord::new(&self.module, level, message).with_metadata(metadata);
        match &self.inner.logger {
            Some(logger) => logger.log(&record),
            None => {
                tracing::debug!(module = %self.module, "{message}");
                Ok(())
            }
        }
    }

    /// Logs an informational record, ignoring sink failures.
    pub fn info(&self, message: &str, metadata: Value) {
        if let Err(err) = self.log(LogLevel::Info, message, metadata) {
            eprintln!("telemetry log failed: {err:?}");
        }
    }

    /// Logs a stage lifecycle banner.
    pub fn stage(&self, stage: &str, marker: StageMarker, metadata: Value) -> Result<()> {
        match &self.inner.logger {
            Some(logger) => logger.stage(&self.module, stage, marker, metadata),
            None => self.log(marker.level(), &marker.banner(stage), metadata),
        }
    }

    /// Whether a tracker is attached.
    #[must_use]
    pub fn has_tracker(&self) -> bool {
        self.inner.tracker.is_some()
    }

    /// Sends a run to the attached tracker; fails when none is attached.
    pub async fn track_async(&self, run: RunRecord) -> Result<()> {
        let Some(tracker) = &self.inner.tracker else {
            anyhow::bail!("no experiment tracker attached; run {} not recorded", run.run_id);
        };
        let run_id = run.run_id;
        tracker
            .log_run(run)
            .await
            .with_context(|| format!("tracking run {run_id}"))?;
        self.log(LogLevel::Info, "run tracked", json!({ "run_id": run_id }))
    }

    /// Blocking variant of [`PipelineTelemetry::track_async`] for synchronous callers.
    pub fn track(&self, run: RunRecord) -> Result<()> {
        anyhow::ensure!(
            Handle::try_current().is_err(),
            "blocking track called inside an async runtime; use track_async"
        );
        Runtime::new()?.block_on(self.track_async(run))
    }
}
