//! YAML configuration: `config.yaml` (paths), `params.yaml` (hyperparameters)
//! and `schema.yaml` (columns), validated once and handed out as immutable
//! per-stage structs.

use std::{
    fs,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Default location of the path configuration.
pub const CONFIG_FILE_PATH: &str = "config/config.yaml";
/// Default location of the hyperparameters.
pub const PARAMS_FILE_PATH: &str = "config/params.yaml";
/// Default location of the column schema.
pub const SCHEMA_FILE_PATH: &str = "config/schema.yaml";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read or a directory could not be created.
    #[error("io error on {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// File exists but holds no document.
    #[error("YAML file is empty: {0}")]
    Empty(PathBuf),
    /// File is not valid YAML for the expected schema.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: serde_yaml::Error,
    },
    /// A value is outside its accepted range.
    #[error("invalid value for `{key}`: {reason}")]
    Invalid {
        /// Dotted key, e.g. `ElasticNet.l1_ratio`.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// The target column is not declared in the schema.
    #[error("target column `{0}` is not declared in schema COLUMNS")]
    MissingTarget(String),
}

/// Reads a YAML file into `T`, rejecting empty documents.
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if raw.trim().is_empty() {
        return Err(ConfigError::Empty(path.to_path_buf()));
    }
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn create_dir(path: &Path) -> Result<(), ConfigError> {
    fs::create_dir_all(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Declared dtype of a schema column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Any finite or missing floating point value.
    Float64,
    /// Integral values only.
    Int64,
}

#[derive(Debug, Clone, Deserialize)]
struct ConfigDocument {
    artifacts_root: PathBuf,
    #[serde(default = "default_logs_dir")]
    logs_dir: PathBuf,
    data_ingestion: IngestionSection,
    data_validation: ValidationSection,
    data_transformation: TransformationSection,
    model_training: TrainingSection,
    model_evaluation: EvaluationSection,
    prediction: PredictionSection,
}

#[derive(Debug, Clone, Deserialize)]
struct IngestionSection {
    root_dir: PathBuf,
    source_url: String,
    local_data_file: PathBuf,
    unzip_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
struct ValidationSection {
    root_dir: PathBuf,
    unzip_data_dir: PathBuf,
    #[serde(rename = "STATUS_FILE")]
    status_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
struct TransformationSection {
    root_dir: PathBuf,
    data_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
struct TrainingSection {
    root_dir: PathBuf,
    data_train_path: PathBuf,
    data_test_path: PathBuf,
    model_name: String,
    #[serde(default)]
    preprocessor_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
struct EvaluationSection {
    root_dir: PathBuf,
    data_test_path: PathBuf,
    model_path: PathBuf,
    metric_file_name: PathBuf,
    #[serde(default)]
    tracking: Option<TrackingSettings>,
}

#[derive(Debug, Clone, Deserialize)]
struct PredictionSection {
    model_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
struct ParamsDocument {
    #[serde(rename = "ElasticNet")]
    elastic_net: ElasticNetParams,
    #[serde(rename = "Transformation", default)]
    transformation: TransformationParams,
}

#[derive(Debug, Clone, Deserialize)]
struct SchemaDocument {
    #[serde(rename = "COLUMNS")]
    columns: IndexMap<String, ColumnType>,
    #[serde(rename = "TARGET_COLUMN")]
    target_column: TargetColumn,
}

#[derive(Debug, Clone, Deserialize)]
struct TargetColumn {
    name: String,
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

/// Elastic-net hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElasticNetParams {
    /// Overall regularization strength.
    pub alpha: f64,
    /// L1 share of the penalty, in `[0, 1]`.
    pub l1_ratio: f64,
}

/// Tunables of the data-transformation stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformationParams {
    /// Share of rows assigned to the test set.
    pub test_size: f64,
    /// Seed for the split and the oversampler.
    pub random_state: u64,
    /// Columns with `|skew|` above this get a power transform.
    pub skew_threshold: f64,
    /// Whisker length in IQRs for outlier capping.
    pub iqr_multiplier: f64,
    /// Oversampler neighbor count when every class has more than four rows.
    pub k_neighbors: usize,
}

impl Default for TransformationParams {
    fn default() -> Self {
        Self {
            test_size: 0.25,
            random_state: 42,
            skew_threshold: 1.0,
            iqr_multiplier: 1.5,
            k_neighbors: 5,
        }
    }
}

/// Where evaluation runs are tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TrackingBackend {
    /// Keep runs in memory only.
    Memory,
    /// Append runs to a JSON-lines file.
    File {
        /// Runs file.
        path: PathBuf,
    },
    /// Post runs to a tracking service.
    Http {
        /// Service base URL.
        uri: String,
        /// Environment variable holding a bearer token.
        #[serde(default)]
        token_env: Option<String>,
    },
}

/// Tracking block of the evaluation config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingSettings {
    /// Experiment name runs are filed under.
    #[serde(default = "default_experiment")]
    pub experiment: String,
    /// Backend selection.
    #[serde(flatten)]
    pub backend: TrackingBackend,
}

fn default_experiment() -> String {
    "wine-quality".into()
}

/// Paths for fetching the raw dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataIngestionConfig {
    /// Stage artifact directory.
    pub root_dir: PathBuf,
    /// `http(s)://`, `file://` or plain path of the source archive/CSV.
    pub source_url: String,
    /// Where the fetched file is stored.
    pub local_data_file: PathBuf,
    /// Where archives are extracted.
    pub unzip_dir: PathBuf,
}

/// Inputs of the schema validation stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataValidationConfig {
    /// Stage artifact directory.
    pub root_dir: PathBuf,
    /// CSV file to validate.
    pub unzip_data_dir: PathBuf,
    /// File receiving `Validation status: <bool>`.
    pub status_file: PathBuf,
    /// Declared columns, in order.
    pub all_schema: IndexMap<String, ColumnType>,
}

/// Inputs of the transformation stage.
#[derive(Debug, Clone, PartialEq)]
pub struct DataTransformationConfig {
    /// Output directory for `train.csv` and `test.csv`.
    pub root_dir: PathBuf,
    /// Raw CSV.
    pub data_path: PathBuf,
    /// Target column name.
    pub target_column: String,
    /// Step tunables.
    pub params: TransformationParams,
}

/// Inputs of the training stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTrainingConfig {
    /// Output directory for the model artifact.
    pub root_dir: PathBuf,
    /// Transformed train CSV.
    pub data_train_path: PathBuf,
    /// Transformed test CSV.
    pub data_test_path: PathBuf,
    /// Artifact file name inside `root_dir`.
    pub model_name: String,
    /// Fitted skew transforms to embed in the model, when configured.
    pub preprocessor_path: Option<PathBuf>,
    /// Regularization strength.
    pub alpha: f64,
    /// L1 share of the penalty.
    pub l1_ratio: f64,
    /// Target column name.
    pub target_column: String,
}

impl ModelTrainingConfig {
    /// Full path of the model artifact.
    #[must_use]
    pub fn model_path(&self) -> PathBuf {
        self.root_dir.join(&self.model_name)
    }
}

/// Inputs of the evaluation stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelEvaluationConfig {
    /// Stage artifact directory.
    pub root_dir: PathBuf,
    /// Test CSV.
    pub data_test_path: PathBuf,
    /// Model artifact.
    pub model_path: PathBuf,
    /// Metrics JSON output.
    pub metric_file: PathBuf,
    /// Hyperparameters logged with the run.
    pub all_params: ElasticNetParams,
    /// Target column name.
    pub target_column: String,
    /// Tracking destination.
    pub tracking: TrackingSettings,
}

/// Inputs of the prediction pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionConfig {
    /// Model artifact.
    pub model_path: PathBuf,
}

/// Loads and validates the three YAML files and hands out per-stage configs.
#[derive(Debug, Clone)]
pub struct ConfigurationManager {
    config: ConfigDocument,
    params: ParamsDocument,
    schema: SchemaDocument,
}

impl ConfigurationManager {
    /// Loads the files at the default `config/` locations.
    pub fn from_default_paths() -> Result<Self, ConfigError> {
        Self::new(
            Path::new(CONFIG_FILE_PATH),
            Path::new(PARAMS_FILE_PATH),
            Path::new(SCHEMA_FILE_PATH),
        )
    }

    /// Loads, validates, and creates the artifacts root.
    pub fn new(config: &Path, params: &Path, schema: &Path) -> Result<Self, ConfigError> {
        let manager = Self {
            config: read_yaml(config)?,
            params: read_yaml(params)?,
            schema: read_yaml(schema)?,
        };
        manager.validate()?;
        create_dir(&manager.config.artifacts_root)?;
        Ok(manager)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let net = &self.params.elastic_net;
        if !(net.alpha.is_finite() && net.alpha >= 0.0) {
            return Err(invalid("ElasticNet.alpha", format!("{} must be >= 0", net.alpha)));
        }
        if !(0.0..=1.0).contains(&net.l1_ratio) {
            return Err(invalid(
                "ElasticNet.l1_ratio",
                format!("{} must lie in [0, 1]", net.l1_ratio),
            ));
        }
        let tp = &self.params.transformation;
        if !(tp.test_size > 0.0 && tp.test_size < 1.0) {
            return Err(invalid(
                "Transformation.test_size",
                format!("{} must lie in (0, 1)", tp.test_size),
            ));
        }
        if !(tp.skew_threshold.is_finite() && tp.skew_threshold >= 0.0) {
            return Err(invalid(
                "Transformation.skew_threshold",
                format!("{} must be >= 0", tp.skew_threshold),
            ));
        }
        if !(tp.iqr_multiplier.is_finite() && tp.iqr_multiplier >= 0.0) {
            return Err(invalid(
                "Transformation.iqr_multiplier",
                format!("{} must be >= 0", tp.iqr_multiplier),
            ));
        }
        if tp.k_neighbors == 0 {
            return Err(invalid("Transformation.k_neighbors", "must be >= 1".into()));
        }
        if !self.schema.columns.contains_key(&self.schema.target_column.name) {
            return Err(ConfigError::MissingTarget(
                self.schema.target_column.name.clone(),
            ));
        }
        Ok(())
    }

    /// Root directory for all stage artifacts.
    #[must_use]
    pub fn artifacts_root(&self) -> &Path {
        &self.config.artifacts_root
    }

    /// Directory for run logs.
    #[must_use]
    pub fn logs_dir(&self) -> &Path {
        &self.config.logs_dir
    }

    /// Target column declared in the schema.
    #[must_use]
    pub fn target_column(&self) -> &str {
        &self.schema.target_column.name
    }

    /// Elastic-net hyperparameters.
    #[must_use]
    pub const fn elastic_net_params(&self) -> ElasticNetParams {
        self.params.elastic_net
    }

    /// Ingestion stage config.
    pub fn data_ingestion_config(&self) -> Result<DataIngestionConfig, ConfigError> {
        let section = &self.config.data_ingestion;
        create_dir(&section.root_dir)?;
        Ok(DataIngestionConfig {
            root_dir: section.root_dir.clone(),
            source_url: section.source_url.clone(),
            local_data_file: section.local_data_file.clone(),
            unzip_dir: section.unzip_dir.clone(),
        })
    }

    /// Validation stage config.
    pub fn data_validation_config(&self) -> Result<DataValidationConfig, ConfigError> {
        let section = &self.config.data_validation;
        create_dir(&section.root_dir)?;
        Ok(DataValidationConfig {
            root_dir: section.root_dir.clone(),
            unzip_data_dir: section.unzip_data_dir.clone(),
            status_file: section.status_file.clone(),
            all_schema: self.schema.columns.clone(),
        })
    }

    /// Transformation stage config.
    pub fn data_transformation_config(&self) -> Result<DataTransformationConfig, ConfigError> {
        let section = &self.config.data_transformation;
        create_dir(&section.root_dir)?;
        Ok(DataTransformationConfig {
            root_dir: section.root_dir.clone(),
            data_path: section.data_path.clone(),
            target_column: self.target_column().to_owned(),
            params: self.params.transformation,
        })
    }

    /// Training stage config.
    pub fn model_training_config(&self) -> Result<ModelTrainingConfig, ConfigError> {
        let section = &self.config.model_training;
        create_dir(&section.root_dir)?;
        Ok(ModelTrainingConfig {
            root_dir: section.root_dir.clone(),
            data_train_path: section.data_train_path.clone(),
            data_test_path: section.data_test_path.clone(),
            model_name: section.model_name.clone(),
            preprocessor_path: section.preprocessor_path.clone(),
            alpha: self.params.elastic_net.alpha,
            l1_ratio: self.params.elastic_net.l1_ratio,
            target_column: self.target_column().to_owned(),
        })
    }

    /// Evaluation stage config; tracking defaults to `<root_dir>/runs.jsonl`.
    pub fn model_evaluation_config(&self) -> Result<ModelEvaluationConfig, ConfigError> {
        let section = &self.config.model_evaluation;
        create_dir(&section.root_dir)?;
        let tracking = section.tracking.clone().unwrap_or_else(|| TrackingSettings {
            experiment: default_experiment(),
            backend: TrackingBackend::File {
                path: section.root_dir.join("runs.jsonl"),
            },
        });
        Ok(ModelEvaluationConfig {
            root_dir: section.root_dir.clone(),
            data_test_path: section.data_test_path.clone(),
            model_path: section.model_path.clone(),
            metric_file: section.metric_file_name.clone(),
            all_params: self.params.elastic_net,
            target_column: self.target_column().to_owned(),
            tracking,
        })
    }

    /// Prediction pipeline config.
    #[must_use]
    pub fn prediction_config(&self) -> PredictionConfig {
        PredictionConfig {
            model_path: self.config.prediction.model_path.clone(),
        }
    }

    /// Hyperparameters as a JSON object, for logging.
    #[must_use]
    pub fn params_json(&self) -> serde_json::Value {
        json!({
            "alpha": self.params.elastic_net.alpha,
            "l1_ratio": self.params.elastic_net.l1_ratio,
        })
    }
}

fn invalid(key: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { key, reason }
}
