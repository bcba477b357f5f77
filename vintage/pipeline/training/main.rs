//! Model training: fits an elastic net on the transformed train split and
//! persists it as a versioned artifact.

/// Versioned model file.
pub mod artifact;
/// Coordinate-descent solver.
pub mod elastic_net;

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde_json::json;
use thiserror::Error;
use vintage_logging::LogLevel;

use crate::{
    config::ModelTrainingConfig, evaluation::rmse, frame::Frame, frame::FrameError,
    telemetry::PipelineTelemetry, transformation::skewness::PowerTransformer,
};
use artifact::ModelArtifact;
use elastic_net::ElasticNet;

/// Errors raised while fitting, saving or loading models.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Reading the training tables failed.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// No rows or no feature columns.
    #[error("training data is empty")]
    Empty,
    /// A feature or target value is `NaN` or infinite.
    #[error("row {row} holds a non-finite value")]
    NonFinite {
        /// 0-based row.
        row: usize,
    },
    /// Input width or length does not match.
    #[error("expected {expected} values, found {found}")]
    ShapeMismatch {
        /// Expected count.
        expected: usize,
        /// Count received.
        found: usize,
    },
    /// Penalty settings out of range.
    #[error("invalid elastic-net parameters: alpha {alpha}, l1_ratio {l1_ratio}")]
    InvalidParams {
        /// Penalty strength.
        alpha: f64,
        /// L1 share.
        l1_ratio: f64,
    },
    /// Filesystem failure on a model file.
    #[error("io error on {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Model JSON could not be encoded or decoded.
    #[error("model serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    /// The file is not a model artifact.
    #[error("unknown model format `{0}`")]
    UnknownFormat(String),
    /// The artifact was written by an incompatible version.
    #[error("unsupported model version {0}")]
    UnsupportedVersion(u32),
}

/// Result of one training run.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    /// Persisted model.
    pub artifact: ModelArtifact,
    /// Where it was written.
    pub model_path: PathBuf,
    /// RMSE on the training rows.
    pub train_rmse: f64,
    /// RMSE on the held-out rows.
    pub test_rmse: f64,
}

/// Training stage component.
#[derive(Debug, Clone)]
pub struct ModelTraining {
    config: ModelTrainingConfig,
    telemetry: PipelineTelemetry,
}

impl ModelTraining {
    /// Creates the component.
    #[must_use]
    pub const fn new(config: ModelTrainingConfig, telemetry: PipelineTelemetry) -> Self {
        Self { config, telemetry }
    }

    /// Fits on the configured train CSV, scores both splits and saves the model.
    pub fn train(&self) -> Result<TrainingOutcome, ModelError> {
        let cfg = &self.config;
        let train = Frame::read_csv(&cfg.data_train_path)?;
        let test = Frame::read_csv(&cfg.data_test_path)?;
        let (train_x, train_y) = train.split_target(&cfg.target_column)?;
        let (test_x, test_y) = test.split_target(&cfg.target_column)?;
        if test_x.columns() != train_x.columns() {
            return Err(ModelError::ShapeMismatch {
                expected: train_x.ncols(),
                found: test_x.ncols(),
            });
        }

        let solver = ElasticNet::new(cfg.alpha, cfg.l1_ratio);
        let fitted = solver.fit(train_x.data(), &train_y)?;
        if !fitted.converged {
            self.log(
                LogLevel::Warn,
                "coordinate descent stopped at max_iter",
                json!({ "max_iter": solver.max_iter }),
            );
        }
        let train_rmse = rmse(&train_y, &fitted.predict(train_x.data()));
        let test_rmse = rmse(&test_y, &fitted.predict(test_x.data()));

        let (feature_names, _) = train_x.into_parts();
        let mut artifact =
            ModelArtifact::elastic_net(solver, fitted, feature_names, cfg.target_column.clone());
        if let Some(path) = &cfg.preprocessor_path {
            artifact = artifact.with_preprocessing(load_preprocessor(path)?)?;
        }
        let model_path = cfg.model_path();
        artifact.save(&model_path)?;
        self.log(
            LogLevel::Info,
            "model trained and saved",
            json!({
                "path": model_path,
                "alpha": cfg.alpha,
                "l1_ratio": cfg.l1_ratio,
                "train_rmse": train_rmse,
                "test_rmse": test_rmse,
            }),
        );
        Ok(TrainingOutcome {
            artifact,
            model_path,
            train_rmse,
            test_rmse,
        })
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        if let Err(err) = self.telemetry.log(level, message, metadata) {
            tracing::warn!(error = %err, "training log failed");
        }
    }
}

fn load_preprocessor(path: &Path) -> Result<PowerTransformer, ModelError> {
    let raw = fs::read_to_string(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformation::skewness::{SkewedColumn, YeoJohnson};
    use ndarray::Array2;
    use tempfile::tempdir;

    fn table(rows: usize, offset: usize) -> Frame {
        let data = Array2::from_shape_fn((rows, 3), |(r, c)| {
            let r = f64::from(u32::try_from(r + offset).unwrap());
            match c {
                0 => r / 10.0,
                1 => (r * 0.3).cos(),
                _ => (0.5f64.mul_add(r / 10.0, 3.0) - (r * 0.3).cos()).round(),
            }
        });
        Frame::new(vec!["alcohol".into(), "pH".into(), "quality".into()], data).unwrap()
    }

    #[test]
    fn trains_and_persists_model() {
        let dir = tempdir().unwrap();
        let train_path = dir.path().join("train.csv");
        let test_path = dir.path().join("test.csv");
        table(80, 0).write_csv(&train_path).unwrap();
        table(20, 80).write_csv(&test_path).unwrap();
        let config = ModelTrainingConfig {
            root_dir: dir.path().join("model_training"),
            data_train_path: train_path,
            data_test_path: test_path,
            model_name: "model.json".into(),
            alpha: 0.01,
            l1_ratio: 0.1,
            target_column: "quality".into(),
            preprocessor_path: None,
        };
        let outcome = ModelTraining::new(config.clone(), PipelineTelemetry::disabled())
            .train()
            .unwrap();
        assert_eq!(outcome.model_path, config.model_path());
        assert!(outcome.train_rmse < 1.0);
        assert!(outcome.test_rmse.is_finite());
        let loaded = ModelArtifact::load(&outcome.model_path).unwrap();
        assert_eq!(loaded.feature_names, vec!["alcohol", "pH"]);
        assert_eq!(loaded.target, "quality");
        assert_eq!(loaded, outcome.artifact);
    }

    #[test]
    fn saved_skew_transforms_travel_with_the_model() {
        let dir = tempdir().unwrap();
        let train_path = dir.path().join("train.csv");
        let test_path = dir.path().join("test.csv");
        table(40, 0).write_csv(&train_path).unwrap();
        table(10, 40).write_csv(&test_path).unwrap();
        let transformer = PowerTransformer {
            columns: vec![SkewedColumn {
                column: "alcohol".into(),
                skew: 1.4,
                transform: YeoJohnson {
                    lambda: 0.5,
                    mean: 1.2,
                    std: 0.8,
                },
            }],
        };
        let preprocessor = dir.path().join("preprocessor.json");
        fs::write(&preprocessor, serde_json::to_string(&transformer).unwrap()).unwrap();
        let mut config = ModelTrainingConfig {
            root_dir: dir.path().join("model_training"),
            data_train_path: train_path,
            data_test_path: test_path,
            model_name: "model.json".into(),
            alpha: 0.01,
            l1_ratio: 0.1,
            target_column: "quality".into(),
            preprocessor_path: Some(preprocessor),
        };
        let outcome = ModelTraining::new(config.clone(), PipelineTelemetry::disabled())
            .train()
            .unwrap();
        let loaded = ModelArtifact::load(&outcome.model_path).unwrap();
        assert_eq!(loaded.preprocessing, transformer);

        config.preprocessor_path = Some(dir.path().join("absent.json"));
        assert!(matches!(
            ModelTraining::new(config, PipelineTelemetry::disabled()).train(),
            Err(ModelError::Io { .. })
        ));
    }

    #[test]
    fn missing_target_column_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("train.csv");
        table(10, 0).write_csv(&path).unwrap();
        let config = ModelTrainingConfig {
            root_dir: dir.path().to_path_buf(),
            data_train_path: path.clone(),
            data_test_path: path,
            model_name: "model.json".into(),
            alpha: 0.1,
            l1_ratio: 0.5,
            target_column: "rating".into(),
            preprocessor_path: None,
        };
        assert!(matches!(
            ModelTraining::new(config, PipelineTelemetry::disabled()).train(),
            Err(ModelError::Frame(FrameError::MissingColumn(_)))
        ));
    }
}
