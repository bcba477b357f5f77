use std::{fs, path::Path};

use chrono::{DateTime, Utc};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use super::{
    elastic_net::{ElasticNet, FittedElasticNet},
    ModelError,
};
use crate::transformation::skewness::PowerTransformer;

/// Format tag stamped on every model file.
pub const MODEL_FORMAT: &str = "vintage.model";
/// Current artifact schema version.
///
/// Version 2 added `preprocessing`; version 1 files load with none.
pub const MODEL_VERSION: u32 = 2;
const OLDEST_READABLE_VERSION: u32 = 1;

/// Model payload, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelKind {
    /// Elastic-net linear regression.
    ElasticNet {
        /// Solver settings used for the fit.
        params: ElasticNet,
        /// Fitted weights.
        #[serde(flatten)]
        fitted: FittedElasticNet,
    },
}

/// Versioned on-disk model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Always [`MODEL_FORMAT`].
    pub format: String,
    /// Schema version, see [`MODEL_VERSION`].
    pub version: u32,
    /// Model kind and weights.
    #[serde(flatten)]
    pub model: ModelKind,
    /// Feature columns in training order.
    pub feature_names: Vec<String>,
    /// Target column.
    pub target: String,
    /// Skew transforms applied to raw rows before the model.
    #[serde(default, skip_serializing_if = "PowerTransformer::is_empty")]
    pub preprocessing: PowerTransformer,
    /// Fit time.
    pub trained_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct Header {
    format: String,
    version: u32,
}

impl ModelArtifact {
    /// Wraps a fitted elastic net.
    #[must_use]
    pub fn elastic_net(
        params: ElasticNet,
        fitted: FittedElasticNet,
        feature_names: Vec<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            format: MODEL_FORMAT.into(),
            version: MODEL_VERSION,
            model: ModelKind::ElasticNet { params, fitted },
            feature_names,
            target: target.into(),
            preprocessing: PowerTransformer::default(),
            trained_at: Utc::now(),
        }
    }

    /// Attaches the skew transforms the training data went through.
    pub fn with_preprocessing(
        mut self,
        preprocessing: PowerTransformer,
    ) -> Result<Self, ModelError> {
        preprocessing.check_columns(&self.feature_names)?;
        self.preprocessing = preprocessing;
        Ok(self)
    }

    /// Number of input features.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Predicts one raw row given in training column order.
    ///
    /// The stored skew transforms are applied first.
    pub fn predict_row(&self, row: &[f64]) -> Result<f64, ModelError> {
        self.check_width(row)?;
        let mut prepared = row.to_vec();
        self.preprocessing
            .transform_row(&self.feature_names, &mut prepared)?;
        self.predict_prepared_row(&prepared)
    }

    /// Predicts one row that is already in the transformed training space,
    /// such as a row of the written `test.csv`.
    pub fn predict_prepared_row(&self, row: &[f64]) -> Result<f64, ModelError> {
        self.check_width(row)?;
        match &self.model {
            ModelKind::ElasticNet { fitted, .. } => Ok(fitted.predict_row(ArrayView1::from(row))),
        }
    }

    fn check_width(&self, row: &[f64]) -> Result<(), ModelError> {
        if row.len() == self.n_features() {
            Ok(())
        } else {
            Err(ModelError::ShapeMismatch {
                expected: self.n_features(),
                found: row.len(),
            })
        }
    }

    /// Writes the artifact as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ModelError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let body = serde_json::to_string_pretty(self)?;
        fs::write(path, body).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads an artifact, rejecting foreign formats and unsupported versions.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let raw = fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let header: Header = serde_json::from_str(&raw)?;
        if header.format != MODEL_FORMAT {
            return Err(ModelError::UnknownFormat(header.format));
        }
        if !(OLDEST_READABLE_VERSION..=MODEL_VERSION).contains(&header.version) {
            return Err(ModelError::UnsupportedVersion(header.version));
        }
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frame::FrameError,
        transformation::skewness::{SkewedColumn, YeoJohnson},
    };
    use serde_json::Value;
    use tempfile::tempdir;

    fn artifact() -> ModelArtifact {
        ModelArtifact::elastic_net(
            ElasticNet::new(0.2, 0.1),
            FittedElasticNet {
                coefficients: vec![0.5, -1.0],
                intercept: 2.0,
                n_iter: 12,
                converged: true,
            },
            vec!["alcohol".into(), "pH".into()],
            "quality",
        )
    }

    #[test]
    fn artifact_round_trips_with_tags() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model/model.json");
        let model = artifact();
        model.save(&path).unwrap();
        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["format"], MODEL_FORMAT);
        assert_eq!(raw["version"], MODEL_VERSION);
        assert_eq!(raw["kind"], "elastic_net");
        assert_eq!(raw["params"]["random_state"], 42);
        assert_eq!(ModelArtifact::load(&path).unwrap(), model);
    }

    #[test]
    fn rejects_foreign_or_newer_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        let mut raw = serde_json::to_value(artifact()).unwrap();
        raw["version"] = 99.into();
        fs::write(&path, raw.to_string()).unwrap();
        assert!(matches!(
            ModelArtifact::load(&path),
            Err(ModelError::UnsupportedVersion(99))
        ));
        raw["format"] = "pickle".into();
        fs::write(&path, raw.to_string()).unwrap();
        assert!(matches!(
            ModelArtifact::load(&path),
            Err(ModelError::UnknownFormat(_))
        ));
    }

    #[test]
    fn version_one_files_load_without_preprocessing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        let mut raw = serde_json::to_value(artifact()).unwrap();
        raw["version"] = 1.into();
        assert!(raw.get("preprocessing").is_none());
        fs::write(&path, raw.to_string()).unwrap();
        let loaded = ModelArtifact::load(&path).unwrap();
        assert!(loaded.preprocessing.is_empty());
        assert_eq!(loaded.version, 1);
    }

    #[test]
    fn raw_rows_go_through_the_stored_transforms() {
        let transform = YeoJohnson {
            lambda: 1.0,
            mean: 1.0,
            std: 2.0,
        };
        let model = artifact()
            .with_preprocessing(PowerTransformer {
                columns: vec![SkewedColumn {
                    column: "pH".into(),
                    skew: 2.5,
                    transform,
                }],
            })
            .unwrap();
        // pH 5.0 becomes (5 - 1) / 2 = 2 before the weights see it
        let raw = model.predict_row(&[2.0, 5.0]).unwrap();
        let prepared = model.predict_prepared_row(&[2.0, 2.0]).unwrap();
        assert!((raw - prepared).abs() < 1e-12);
        assert!((raw - 1.0).abs() < 1e-12);

        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        model.save(&path).unwrap();
        assert_eq!(ModelArtifact::load(&path).unwrap().preprocessing, model.preprocessing);

        let unknown = PowerTransformer {
            columns: vec![SkewedColumn {
                column: "sugar".into(),
                skew: 3.0,
                transform,
            }],
        };
        assert!(matches!(
            artifact().with_preprocessing(unknown),
            Err(ModelError::Frame(FrameError::MissingColumn(_)))
        ));
    }

    #[test]
    fn predicts_and_checks_row_length() {
        let model = artifact();
        assert!((model.predict_row(&[2.0, 1.0]).unwrap() - 2.0).abs() < 1e-12);
        assert!(matches!(
            model.predict_row(&[1.0]),
            Err(ModelError::ShapeMismatch { expected: 2, found: 1 })
        ));
    }
}
