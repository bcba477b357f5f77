#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Vintage wine-quality pipeline: ingestion, schema validation, data
//! transformation, elastic-net training, evaluation and prediction.

/// YAML configuration and per-stage config structs.
#[path = "../config.rs"]
pub mod config;

/// Dense numeric table with CSV I/O.
#[path = "../frame.rs"]
pub mod frame;

/// Filesystem and JSON helpers.
#[path = "../common.rs"]
pub mod common;

/// Logging/tracking handle passed to every component.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Raw data download and extraction.
#[path = "../ingestion.rs"]
pub mod ingestion;

/// Schema validation.
#[path = "../validation.rs"]
pub mod validation;

/// Cleaning, splitting, outlier capping, skew correction and balancing.
#[path = "../transformation/main.rs"]
pub mod transformation;

/// Elastic-net training and model artifacts.
#[path = "../training/main.rs"]
pub mod training;

/// Metrics and tracked evaluation runs.
#[path = "../evaluation.rs"]
pub mod evaluation;

/// Single-row prediction.
#[path = "../prediction.rs"]
pub mod prediction;

/// Stage runners and the ordered pipeline run.
#[path = "../main.rs"]
pub mod stages;

pub use config::{ConfigError, ConfigurationManager};
pub use evaluation::{build_tracker, EvaluationMetrics, ModelEvaluation};
pub use frame::{Frame, FrameError};
pub use ingestion::DataIngestion;
pub use prediction::PredictionPipeline;
pub use stages::{
    run_all, run_stage, DataIngestionStage, DataTransformationStage, DataValidationStage,
    ModelEvaluationStage, ModelTrainingStage, PipelineStage, PipelineSummary,
};
pub use telemetry::{PipelineTelemetry, PipelineTelemetryBuilder};
pub use training::{artifact::ModelArtifact, ModelError, ModelTraining};
pub use transformation::{DataTransformation, TransformError, TransformSteps};
pub use validation::{DataValidation, ValidationReport};
