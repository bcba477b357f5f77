//! Stage runners tying configuration, telemetry and the pipeline components
//! together, plus the ordered end-to-end run.

use std::fs;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use vintage_logging::StageMarker;

use crate::{
    config::ConfigurationManager,
    evaluation::{build_tracker, EvaluationMetrics, ModelEvaluation},
    ingestion::{DataIngestion, IngestionOutcome},
    telemetry::PipelineTelemetry,
    training::{ModelTraining, TrainingOutcome},
    transformation::{DataTransformation, TransformReport},
    validation::{DataValidation, ValidationReport},
};

/// One step of the batch pipeline.
pub trait PipelineStage {
    /// Value handed back on success.
    type Output;

    /// Display name used in the stage banners.
    fn name(&self) -> &'static str;

    /// Runs the stage against loaded configuration.
    fn execute(
        &self,
        manager: &ConfigurationManager,
        telemetry: &PipelineTelemetry,
    ) -> Result<Self::Output>;
}

/// Runs `stage` between `started` and `completed` banners.
///
/// Failures are logged with a `failed` banner and returned unchanged.
pub fn run_stage<S: PipelineStage>(
    stage: &S,
    manager: &ConfigurationManager,
    telemetry: &PipelineTelemetry,
) -> Result<S::Output> {
    let name = stage.name();
    telemetry.stage(name, StageMarker::Started, Value::Null)?;
    match stage.execute(manager, telemetry) {
        Ok(output) => {
            telemetry.stage(name, StageMarker::Completed, Value::Null)?;
            Ok(output)
        }
        Err(err) => {
            if let Err(log_err) =
                telemetry.stage(name, StageMarker::Failed, json!({ "error": format!("{err:#}") }))
            {
                tracing::error!(error = %log_err, "stage failure could not be logged");
            }
            Err(err)
        }
    }
}

/// Fetch and unpack the raw data.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataIngestionStage;

impl PipelineStage for DataIngestionStage {
    type Output = IngestionOutcome;

    fn name(&self) -> &'static str {
        "Data Ingestion"
    }

    fn execute(
        &self,
        manager: &ConfigurationManager,
        telemetry: &PipelineTelemetry,
    ) -> Result<IngestionOutcome> {
        let config = manager.data_ingestion_config()?;
        DataIngestion::new(config, telemetry.scoped("data_ingestion")).run()
    }
}

/// Check the raw CSV against the schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataValidationStage;

impl PipelineStage for DataValidationStage {
    type Output = ValidationReport;

    fn name(&self) -> &'static str {
        "Data Validation"
    }

    fn execute(
        &self,
        manager: &ConfigurationManager,
        telemetry: &PipelineTelemetry,
    ) -> Result<ValidationReport> {
        let config = manager.data_validation_config()?;
        DataValidation::new(config, telemetry.scoped("data_validation")).validate_all_columns()
    }
}

/// Clean, split, cap, normalize, balance and write train/test.
///
/// Refuses to run when a validation status file says the data is invalid.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataTransformationStage;

impl PipelineStage for DataTransformationStage {
    type Output = TransformReport;

    fn name(&self) -> &'static str {
        "Data Transformation"
    }

    fn execute(
        &self,
        manager: &ConfigurationManager,
        telemetry: &PipelineTelemetry,
    ) -> Result<TransformReport> {
        let status_file = manager.data_validation_config()?.status_file;
        if status_file.exists() {
            let status = fs::read_to_string(&status_file)
                .with_context(|| format!("reading {}", status_file.display()))?;
            anyhow::ensure!(
                status.trim().ends_with("true"),
                "data schema is not valid ({})",
                status.trim()
            );
        }
        let config = manager.data_transformation_config()?;
        let output = DataTransformation::new(config, telemetry.scoped("data_transformation"))
            .run_from_config()?;
        Ok(output.report)
    }
}

/// Fit and persist the elastic net.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelTrainingStage;

impl PipelineStage for ModelTrainingStage {
    type Output = TrainingOutcome;

    fn name(&self) -> &'static str {
        "Model Training"
    }

    fn execute(
        &self,
        manager: &ConfigurationManager,
        telemetry: &PipelineTelemetry,
    ) -> Result<TrainingOutcome> {
        let config = manager.model_training_config()?;
        Ok(ModelTraining::new(config, telemetry.scoped("model_training")).train()?)
    }
}

/// Score the model and record the run.
///
/// Uses the tracker attached to the telemetry, or builds one from the
/// `model_evaluation.tracking` block.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelEvaluationStage;

impl PipelineStage for ModelEvaluationStage {
    type Output = EvaluationMetrics;

    fn name(&self) -> &'static str {
        "Model Evaluation"
    }

    fn execute(
        &self,
        manager: &ConfigurationManager,
        telemetry: &PipelineTelemetry,
    ) -> Result<EvaluationMetrics> {
        let config = manager.model_evaluation_config()?;
        let telemetry = if telemetry.has_tracker() {
            telemetry.scoped("model_evaluation")
        } else {
            telemetry
                .with_tracker(build_tracker(&config.tracking)?)
                .scoped("model_evaluation")
        };
        ModelEvaluation::new(config, telemetry).log_into_tracker()
    }
}

/// Outputs of a full run.
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    /// Ingestion result.
    pub ingestion: IngestionOutcome,
    /// Validation result.
    pub validation: ValidationReport,
    /// Transformation report.
    pub transformation: TransformReport,
    /// Training result.
    pub training: TrainingOutcome,
    /// Evaluation metrics.
    pub metrics: EvaluationMetrics,
}

/// Runs every stage in order, stopping at the first failure.
pub fn run_all(
    manager: &ConfigurationManager,
    telemetry: &PipelineTelemetry,
) -> Result<PipelineSummary> {
    Ok(PipelineSummary {
        ingestion: run_stage(&DataIngestionStage, manager, telemetry)?,
        validation: run_stage(&DataValidationStage, manager, telemetry)?,
        transformation: run_stage(&DataTransformationStage, manager, telemetry)?,
        training: run_stage(&ModelTrainingStage, manager, telemetry)?,
        metrics: run_stage(&ModelEvaluationStage, manager, telemetry)?,
    })
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write, path::Path, sync::Arc};

    use super::*;
    use crate::{
        config::tests::{write_config_set, PARAMS},
        frame::Frame,
        prediction::PredictionPipeline,
        training::{artifact::ModelArtifact, ModelError},
        transformation::tests::wine_frame,
    };
    use tempfile::tempdir;
    use vintage_tracking::{FileTracker, MemoryTracker};
    use zip::write::SimpleFileOptions;

    fn manager(dir: &Path) -> ConfigurationManager {
        let (config, params, schema) = write_config_set(dir, PARAMS);
        ConfigurationManager::new(&config, &params, &schema).unwrap()
    }

    fn publish_source(manager: &ConfigurationManager, raw: &Frame) {
        let source = manager.data_ingestion_config().unwrap().source_url;
        let source = Path::new(&source);
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        let mut csv = Vec::new();
        raw.to_writer(&mut csv).unwrap();
        let mut writer = zip::ZipWriter::new(File::create(source).unwrap());
        writer
            .start_file("winequality-red.csv", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(&csv).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn end_to_end_run_trains_a_usable_model() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        let raw = wine_frame();
        let (withheld, rest) = {
            let all: Vec<usize> = (0..raw.nrows()).collect();
            (raw.select_rows(&all[..1]), raw.select_rows(&all[1..]))
        };
        publish_source(&manager, &rest);

        let log_path = dir.path().join("logs/running.log");
        let telemetry = PipelineTelemetry::builder("pipeline")
            .log_path(&log_path)
            .build()
            .unwrap();
        let summary = run_all(&manager, &telemetry).unwrap();

        assert!(summary.validation.status);
        assert_eq!(summary.transformation.raw_shape, (1598, 12));
        let balance = summary.transformation.balance.as_ref().unwrap();
        let majority = balance.before.values().max().copied().unwrap();
        assert!(balance.after.values().all(|count| *count == majority));
        assert!(summary.metrics.rmse.is_finite());
        assert!(summary.metrics.mae.is_finite());

        let train =
            Frame::read_csv(dir.path().join("artifacts/data_transformation/train.csv")).unwrap();
        assert_eq!(train.columns(), raw.columns());
        assert!(train.data().iter().all(|v| v.is_finite()));

        let model_path = manager.prediction_config().model_path;
        let artifact = ModelArtifact::load(&model_path).unwrap();
        assert_eq!(artifact.preprocessing.columns, summary.transformation.skewed);

        let pipeline = PredictionPipeline::new(&model_path).unwrap();
        let (features, _) = withheld.split_target("quality").unwrap();
        let prediction = pipeline.predict(features.data().row(0).to_slice().unwrap()).unwrap();
        assert!(prediction.is_finite());

        let runs = FileTracker::new(dir.path().join("artifacts/model_evaluation/runs.jsonl"))
            .unwrap()
            .read_runs()
            .unwrap();
        assert_eq!(runs.len(), 1);

        let log = fs::read_to_string(log_path).unwrap();
        for stage in [
            "Data Ingestion",
            "Data Validation",
            "Data Transformation",
            "Model Training",
            "Model Evaluation",
        ] {
            assert!(
                log.contains(&format!(">>>>>> stage {stage} completed <<<<<<")),
                "{stage}"
            );
        }
    }

    #[test]
    fn failing_stage_logs_and_reraises() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        let log_path = dir.path().join("running.log");
        let telemetry = PipelineTelemetry::builder("pipeline")
            .log_path(&log_path)
            .build()
            .unwrap();
        let err = run_stage(&ModelTrainingStage, &manager, &telemetry).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ModelError>(),
            Some(ModelError::Frame(_))
        ));
        let log = fs::read_to_string(log_path).unwrap();
        assert!(log.contains(">>>>>> stage Model Training started <<<<<<"));
        assert!(log.contains(">>>>>> stage Model Training failed <<<<<<"));
        assert!(!log.contains("completed"));
    }

    #[test]
    fn invalid_status_blocks_transformation() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        let status = manager.data_validation_config().unwrap().status_file;
        fs::write(status, "Validation status: false").unwrap();
        let err = run_stage(&DataTransformationStage, &manager, &PipelineTelemetry::disabled())
            .unwrap_err();
        assert!(err.to_string().contains("not valid"));
    }

    #[test]
    fn evaluation_prefers_the_attached_tracker() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path());
        let raw = wine_frame();
        publish_source(&manager, &raw);
        let tracker = Arc::new(MemoryTracker::new(4));
        let telemetry = PipelineTelemetry::builder("pipeline")
            .tracker(tracker.clone())
            .build()
            .unwrap();
        run_all(&manager, &telemetry).unwrap();
        let runs = tracker.snapshot();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].experiment, "wine-quality");
        assert!(!dir.path().join("artifacts/model_evaluation/runs.jsonl").exists());
    }
}
