//! Model evaluation: regression metrics on the test split, a metrics JSON
//! file, and one tracked run per evaluation.

use std::sync::Arc;

use anyhow::{Context, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use serde_json::json;
use vintage_tracking::{ExperimentTracker, FileTracker, HttpTracker, MemoryTracker, RunRecord};

use crate::{
    common::save_json,
    config::{ModelEvaluationConfig, TrackingBackend, TrackingSettings},
    frame::Frame,
    telemetry::PipelineTelemetry,
    training::{artifact::ModelArtifact, ModelError},
};

/// Name the evaluated model is registered under.
pub const REGISTERED_MODEL_NAME: &str = "ElasticNetModel";

/// Root mean squared error.
#[must_use]
pub fn rmse(actual: &Array1<f64>, predicted: &Array1<f64>) -> f64 {
    let n = actual.len().max(1);
    #[allow(clippy::cast_precision_loss)]
    let mse = (actual - predicted).mapv(|e| e * e).sum() / n as f64;
    mse.sqrt()
}

/// Mean absolute error.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mae(actual: &Array1<f64>, predicted: &Array1<f64>) -> f64 {
    let n = actual.len().max(1);
    (actual - predicted).mapv(f64::abs).sum() / n as f64
}

/// Coefficient of determination.
///
/// With a constant target, 1 for a perfect fit and 0 otherwise.
#[must_use]
pub fn r2(actual: &Array1<f64>, predicted: &Array1<f64>) -> f64 {
    let mean = actual.mean().unwrap_or(0.0);
    let ss_res = (actual - predicted).mapv(|e| e * e).sum();
    let ss_tot = actual.mapv(|v| (v - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        if ss_res == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    }
}

/// Metrics written per evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    /// Root mean squared error.
    pub rmse: f64,
    /// Mean absolute error.
    pub mae: f64,
    /// Coefficient of determination.
    pub r2: f64,
}

impl EvaluationMetrics {
    /// Computes all three metrics.
    #[must_use]
    pub fn compute(actual: &Array1<f64>, predicted: &Array1<f64>) -> Self {
        Self {
            rmse: rmse(actual, predicted),
            mae: mae(actual, predicted),
            r2: r2(actual, predicted),
        }
    }
}

/// Builds the tracker selected by a tracking block.
///
/// For the HTTP backend the bearer token is read from `token_env` when that
/// variable is set.
pub fn build_tracker(settings: &TrackingSettings) -> Result<Arc<dyn ExperimentTracker>> {
    Ok(match &settings.backend {
        TrackingBackend::Memory => Arc::new(MemoryTracker::new(64)),
        TrackingBackend::File { path } => Arc::new(
            FileTracker::new(path)
                .with_context(|| format!("opening runs file {}", path.display()))?,
        ),
        TrackingBackend::Http { uri, token_env } => {
            let tracker = HttpTracker::new(uri);
            match token_env.as_deref().and_then(|var| std::env::var(var).ok()) {
                Some(token) => Arc::new(tracker.with_token(token)),
                None => Arc::new(tracker),
            }
        }
    })
}

/// Evaluation stage component.
#[derive(Debug, Clone)]
pub struct ModelEvaluation {
    config: ModelEvaluationConfig,
    telemetry: PipelineTelemetry,
}

impl ModelEvaluation {
    /// Creates the component; runs go to the tracker attached to `telemetry`.
    #[must_use]
    pub const fn new(config: ModelEvaluationConfig, telemetry: PipelineTelemetry) -> Self {
        Self { config, telemetry }
    }

    /// Scores the persisted model on the test CSV.
    pub fn evaluate(&self) -> Result<EvaluationMetrics> {
        let cfg = &self.config;
        let test = Frame::read_csv(&cfg.data_test_path)
            .with_context(|| format!("reading test data {}", cfg.data_test_path.display()))?;
        let model = ModelArtifact::load(&cfg.model_path)
            .with_context(|| format!("loading model {}", cfg.model_path.display()))?;
        let (features, actual) = test.split_target(&cfg.target_column)?;
        if features.columns() != model.feature_names.as_slice() {
            return Err(ModelError::ShapeMismatch {
                expected: model.n_features(),
                found: features.ncols(),
            })
            .context("test columns differ from the model's training columns");
        }
        let predicted = features
            .data()
            .rows()
            .into_iter()
            .map(|row| model.predict_prepared_row(&row.to_vec()))
            .collect::<Result<Array1<f64>, _>>()?;
        Ok(EvaluationMetrics::compute(&actual, &predicted))
    }

    /// Evaluates, writes the metrics file and records the run.
    ///
    /// Fails before scoring when the telemetry carries no tracker.
    pub fn log_into_tracker(&self) -> Result<EvaluationMetrics> {
        let cfg = &self.config;
        anyhow::ensure!(
            self.telemetry.has_tracker(),
            "no experiment tracker attached for model evaluation"
        );
        let metrics = self.evaluate()?;
        save_json(&cfg.metric_file, &metrics, &self.telemetry)?;
        let run = RunRecord::new(&cfg.tracking.experiment)
            .params(&serde_json::to_value(cfg.all_params)?)
            .metric("rmse", metrics.rmse)
            .metric("mae", metrics.mae)
            .metric("r2", metrics.r2)
            .artifact(
                "model",
                &cfg.model_path,
                Some(REGISTERED_MODEL_NAME.to_owned()),
            )
            .finish();
        self.telemetry.track(run).context("recording evaluation run")?;
        self.telemetry.info(
            "model evaluated",
            json!({ "metrics": metrics, "metric_file": cfg.metric_file }),
        );
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ElasticNetParams,
        training::elastic_net::{ElasticNet, FittedElasticNet},
    };
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn metrics_match_hand_computed_values() {
        let actual = array![3.0, 5.0, 7.0];
        let predicted = array![4.0, 5.0, 5.0];
        let m = EvaluationMetrics::compute(&actual, &predicted);
        assert!((m.rmse - (5.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!((m.mae - 1.0).abs() < 1e-12);
        assert!((m.r2 - (1.0 - 5.0 / 8.0)).abs() < 1e-12);
    }

    #[test]
    fn r2_with_constant_target() {
        let actual = array![5.0, 5.0];
        assert_eq!(r2(&actual, &array![5.0, 5.0]), 1.0);
        assert_eq!(r2(&actual, &array![4.0, 6.0]), 0.0);
    }

    #[test]
    fn evaluation_writes_metrics_and_registers_model() {
        let dir = tempdir().unwrap();
        let test_path = dir.path().join("test.csv");
        Frame::from_rows(
            vec!["alcohol".into(), "quality".into()],
            &[vec![1.0, 3.0], vec![2.0, 5.0], vec![3.0, 7.0]],
        )
        .unwrap()
        .write_csv(&test_path)
        .unwrap();
        let model_path = dir.path().join("model.json");
        ModelArtifact::elastic_net(
            ElasticNet::new(0.2, 0.1),
            FittedElasticNet {
                coefficients: vec![2.0],
                intercept: 1.0,
                n_iter: 3,
                converged: true,
            },
            vec!["alcohol".into()],
            "quality",
        )
        .save(&model_path)
        .unwrap();

        let tracker = Arc::new(MemoryTracker::new(4));
        let telemetry = PipelineTelemetry::builder("model_evaluation")
            .tracker(tracker.clone())
            .build()
            .unwrap();
        let config = ModelEvaluationConfig {
            root_dir: dir.path().to_path_buf(),
            data_test_path: test_path,
            model_path: model_path.clone(),
            metric_file: dir.path().join("metrics.json"),
            all_params: ElasticNetParams {
                alpha: 0.2,
                l1_ratio: 0.1,
            },
            target_column: "quality".into(),
            tracking: TrackingSettings {
                experiment: "wine-quality".into(),
                backend: TrackingBackend::Memory,
            },
        };
        let metrics = ModelEvaluation::new(config.clone(), telemetry)
            .log_into_tracker()
            .unwrap();
        assert!(metrics.rmse.abs() < 1e-12);
        assert!((metrics.r2 - 1.0).abs() < 1e-12);

        let written: EvaluationMetrics =
            serde_json::from_str(&std::fs::read_to_string(&config.metric_file).unwrap()).unwrap();
        assert_eq!(written, metrics);

        let runs = tracker.snapshot();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].params["alpha"], 0.2);
        assert_eq!(runs[0].metrics["mae"], metrics.mae);
        assert_eq!(
            runs[0].artifacts[0].registered_model_name.as_deref(),
            Some(REGISTERED_MODEL_NAME)
        );
        assert_eq!(runs[0].artifacts[0].path, model_path);
    }

    #[test]
    fn evaluation_without_tracker_fails_before_writing_metrics() {
        let dir = tempdir().unwrap();
        let config = ModelEvaluationConfig {
            root_dir: dir.path().to_path_buf(),
            data_test_path: dir.path().join("test.csv"),
            model_path: dir.path().join("model.json"),
            metric_file: dir.path().join("metrics.json"),
            all_params: ElasticNetParams {
                alpha: 0.2,
                l1_ratio: 0.1,
            },
            target_column: "quality".into(),
            tracking: TrackingSettings {
                experiment: "wine-quality".into(),
                backend: TrackingBackend::Memory,
            },
        };
        let err = ModelEvaluation::new(config.clone(), PipelineTelemetry::disabled())
            .log_into_tracker()
            .unwrap_err();
        assert!(err.to_string().contains("no experiment tracker"));
        assert!(!config.metric_file.exists());
    }

    #[test]
    fn builds_file_tracker_from_settings() {
        let dir = tempdir().unwrap();
        let settings = TrackingSettings {
            experiment: "x".into(),
            backend: TrackingBackend::File {
                path: dir.path().join("runs/runs.jsonl"),
            },
        };
        build_tracker(&settings).unwrap();
        assert!(dir.path().join("runs").is_dir());
    }
}
