//! Data transformation: cleaning, splitting, outlier capping, skew correction
//! and class balancing, ending in `train.csv` and `test.csv`.

/// Null and duplicate row removal.
pub mod clean;
/// SMOTE oversampling.
pub mod imbalance;
/// IQR capping.
pub mod outliers;
/// Yeo-Johnson skew correction.
pub mod skewness;
/// Seeded train/test partition.
pub mod split;
/// Column statistics shared by the steps.
pub mod stats;

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use vintage_logging::LogLevel;

use crate::{
    config::DataTransformationConfig,
    frame::{Frame, FrameError},
    telemetry::PipelineTelemetry,
};
use clean::CleanSummary;
use imbalance::ClassBalance;
use outliers::OutlierBounds;
use skewness::{PowerTransformer, SkewedColumn};
use split::SplitFrames;

/// File holding the fitted skew transforms, next to `train.csv`.
pub const PREPROCESSOR_FILE: &str = "preprocessor.json";

/// Errors raised by the transformation steps.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Frame construction, lookup or CSV failure.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// A step that needs the split ran with splitting disabled.
    #[error("step `{step}` needs the train/test split, which is disabled")]
    SplitRequired {
        /// The dependent step.
        step: &'static str,
    },
    /// Test share outside `(0, 1)`.
    #[error("test_size must lie in (0, 1), got {0}")]
    InvalidTestSize(f64),
    /// The split would leave one side empty.
    #[error("{rows} rows cannot be split with test_size {test_size}")]
    TooFewRows {
        /// Rows available.
        rows: usize,
        /// Requested test share.
        test_size: f64,
    },
    /// A target value is not a class label.
    #[error("target value {value} in row {row} is not an integral class label")]
    NonIntegralTarget {
        /// 0-based row.
        row: usize,
        /// Offending value.
        value: f64,
    },
    /// The fitted transformer could not be written.
    #[error("io error on {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The fitted transformer could not be encoded.
    #[error("transformer serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    /// A class with one row has no neighbor to interpolate towards.
    #[error("class {label} has a single row; oversampling needs at least two")]
    SingletonClass {
        /// Offending class label.
        label: i64,
    },
}

/// Which steps run; all are on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct TransformSteps {
    /// Drop null and duplicate rows.
    pub clean: bool,
    /// Partition into train and test.
    pub split: bool,
    /// Cap train outliers.
    pub outliers: bool,
    /// Normalize skewed columns.
    pub skewness: bool,
    /// Oversample minority classes.
    pub imbalance: bool,
    /// Write the CSV outputs.
    pub write: bool,
}

impl Default for TransformSteps {
    fn default() -> Self {
        Self {
            clean: true,
            split: true,
            outliers: true,
            skewness: true,
            imbalance: true,
            write: true,
        }
    }
}

impl TransformSteps {
    /// Fails when a split-dependent step is enabled without the split.
    pub const fn check(&self) -> Result<(), TransformError> {
        if self.split {
            return Ok(());
        }
        let step = if self.outliers {
            "handle_outliers"
        } else if self.skewness {
            "handle_skewness_normalize"
        } else if self.imbalance {
            "handle_imbalanced"
        } else if self.write {
            "make_result"
        } else {
            return Ok(());
        };
        Err(TransformError::SplitRequired { step })
    }
}

/// What a transformation run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransformReport {
    /// Shape of the raw input.
    pub raw_shape: (usize, usize),
    /// Rows dropped by cleaning.
    pub clean: Option<CleanSummary>,
    /// Shape after cleaning.
    pub clean_shape: (usize, usize),
    /// Train shape after splitting.
    pub train_shape: Option<(usize, usize)>,
    /// Test shape after splitting.
    pub test_shape: Option<(usize, usize)>,
    /// Per-column capping bounds.
    pub outliers: Vec<OutlierBounds>,
    /// Columns that received a power transform.
    pub skewed: Vec<SkewedColumn>,
    /// Class counts around balancing.
    pub balance: Option<ClassBalance>,
    /// Written train CSV.
    pub train_path: Option<PathBuf>,
    /// Written test CSV.
    pub test_path: Option<PathBuf>,
    /// Written skew transforms.
    pub preprocessor_path: Option<PathBuf>,
}

/// Frames and report produced by [`DataTransformation::run`].
#[derive(Debug, Clone)]
pub struct TransformOutput {
    /// Cleaned frame (the input itself when cleaning is off).
    pub cleaned: Frame,
    /// Final train and test frames, when splitting ran.
    pub split: Option<SplitFrames>,
    /// Step report.
    pub report: TransformReport,
}

/// Runs the transformation steps over one raw frame.
#[derive(Debug, Clone)]
pub struct DataTransformation {
    config: DataTransformationConfig,
    steps: TransformSteps,
    telemetry: PipelineTelemetry,
}

impl DataTransformation {
    /// Creates the component with every step enabled.
    #[must_use]
    pub fn new(config: DataTransformationConfig, telemetry: PipelineTelemetry) -> Self {
        Self {
            config,
            steps: TransformSteps::default(),
            telemetry,
        }
    }

    /// Overrides the enabled steps.
    #[must_use]
    pub const fn with_steps(mut self, steps: TransformSteps) -> Self {
        self.steps = steps;
        self
    }

    /// Stage config.
    #[must_use]
    pub const fn config(&self) -> &DataTransformationConfig {
        &self.config
    }

    /// Drops nulls and duplicates.
    #[must_use]
    pub fn clean(&self, frame: &Frame) -> (Frame, CleanSummary) {
        let (cleaned, summary) = clean::clean(frame);
        self.log(
            "data cleaned",
            json!({
                "shape": cleaned.shape(),
                "null_rows": summary.null_rows,
                "duplicate_rows": summary.duplicate_rows,
            }),
        );
        (cleaned, summary)
    }

    /// Seeded train/test split.
    pub fn split(&self, frame: &Frame) -> Result<SplitFrames, TransformError> {
        let params = &self.config.params;
        let split = split::train_test_split(frame, params.test_size, params.random_state)?;
        self.log(
            "data split into training and test sets",
            json!({ "train_shape": split.train.shape(), "test_shape": split.test.shape() }),
        );
        Ok(split)
    }

    /// Caps train outliers in place.
    pub fn handle_outliers(
        &self,
        split: &mut SplitFrames,
    ) -> Result<Vec<OutlierBounds>, TransformError> {
        let bounds = outliers::cap_outliers(
            &mut split.train,
            &self.config.target_column,
            self.config.params.iqr_multiplier,
        )?;
        let capped: usize = bounds.iter().map(|b| b.capped).sum();
        self.log(
            "outliers capped",
            json!({ "train_shape": split.train.shape(), "capped_values": capped }),
        );
        Ok(bounds)
    }

    /// Fits skew correction on train and applies it to both frames.
    pub fn handle_skewness_normalize(
        &self,
        split: &mut SplitFrames,
    ) -> Result<Vec<SkewedColumn>, TransformError> {
        let transformer = skewness::normalize_skewed(
            &mut split.train,
            &mut split.test,
            &self.config.target_column,
            self.config.params.skew_threshold,
        )?;
        let columns: BTreeMap<&str, f64> = transformer
            .columns
            .iter()
            .map(|c| (c.column.as_str(), c.transform.lambda))
            .collect();
        self.log("skewed columns normalized", json!({ "lambdas": columns }));
        Ok(transformer.columns)
    }

    /// Oversamples minority classes of the train frame.
    pub fn handle_imbalanced(
        &self,
        split: &mut SplitFrames,
    ) -> Result<ClassBalance, TransformError> {
        let params = &self.config.params;
        let (balanced, balance) = imbalance::balance_classes(
            &split.train,
            &self.config.target_column,
            params.k_neighbors,
            params.random_state,
        )?;
        split.train = balanced;
        self.log(
            "classes balanced",
            json!({
                "train_shape": split.train.shape(),
                "k_neighbors": balance.k_neighbors,
                "synthetic": balance.synthetic,
            }),
        );
        Ok(balance)
    }

    /// Writes `train.csv`, `test.csv` and the fitted skew transforms under
    /// the output directory.
    ///
    /// An empty transformer is written when skew correction did not run, so
    /// a stale file from an earlier run never outlives its data.
    pub fn make_result(
        &self,
        split: &SplitFrames,
        transformer: &PowerTransformer,
    ) -> Result<(PathBuf, PathBuf), TransformError> {
        let train_path = self.config.root_dir.join("train.csv");
        let test_path = self.config.root_dir.join("test.csv");
        split.train.write_csv(&train_path)?;
        split.test.write_csv(&test_path)?;
        save_transformer(&self.preprocessor_path(), transformer)?;
        self.log(
            "train and test written",
            json!({
                "train_shape": split.train.shape(),
                "test_shape": split.test.shape(),
                "train_path": train_path,
                "test_path": test_path,
            }),
        );
        Ok((train_path, test_path))
    }

    /// Where [`DataTransformation::make_result`] writes the skew transforms.
    #[must_use]
    pub fn preprocessor_path(&self) -> PathBuf {
        self.config.root_dir.join(PREPROCESSOR_FILE)
    }

    /// Runs the enabled steps in order.
    pub fn run(&self, raw: &Frame) -> Result<TransformOutput, TransformError> {
        self.steps.check()?;
        raw.column_index(&self.config.target_column)?;
        let mut report = TransformReport {
            raw_shape: raw.shape(),
            ..TransformReport::default()
        };

        let cleaned = if self.steps.clean {
            let (cleaned, summary) = self.clean(raw);
            report.clean = Some(summary);
            cleaned
        } else {
            raw.clone()
        };
        report.clean_shape = cleaned.shape();

        let mut split = if self.steps.split {
            Some(self.split(&cleaned)?)
        } else {
            None
        };
        if let Some(split) = split.as_mut() {
            if self.steps.outliers {
                report.outliers = self.handle_outliers(split)?;
            }
            if self.steps.skewness {
                report.skewed = self.handle_skewness_normalize(split)?;
            }
            if self.steps.imbalance {
                report.balance = Some(self.handle_imbalanced(split)?);
            }
            if self.steps.write {
                let transformer = PowerTransformer {
                    columns: report.skewed.clone(),
                };
                let (train_path, test_path) = self.make_result(split, &transformer)?;
                report.train_path = Some(train_path);
                report.test_path = Some(test_path);
                report.preprocessor_path = Some(self.preprocessor_path());
            }
            report.train_shape = Some(split.train.shape());
            report.test_shape = Some(split.test.shape());
        }

        Ok(TransformOutput {
            cleaned,
            split,
            report,
        })
    }

    /// Reads the configured raw CSV and runs every enabled step.
    pub fn run_from_config(&self) -> Result<TransformOutput, TransformError> {
        let raw = Frame::read_csv(&self.config.data_path)?;
        self.log("raw data loaded", json!({ "shape": raw.shape(), "path": self.config.data_path }));
        self.run(&raw)
    }

    fn log(&self, message: &str, metadata: serde_json::Value) {
        if let Err(err) = self.telemetry.log(LogLevel::Info, message, metadata) {
            tracing::warn!(error = %err, "transformation log failed");
        }
    }
}

fn save_transformer(path: &Path, transformer: &PowerTransformer) -> Result<(), TransformError> {
    let body = serde_json::to_string_pretty(transformer)?;
    fs::write(path, body).map_err(|source| TransformError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::TransformationParams;
    use ndarray::Array2;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;
    use tempfile::tempdir;

    /// Wine feature columns in dataset order.
    pub(crate) const FEATURES: [&str; 11] = [
        "fixed_acidity",
        "volatile_acidity",
        "citric_acid",
        "residual_sugar",
        "chlorides",
        "free_sulfur_dioxide",
        "total_sulfur_dioxide",
        "density",
        "pH",
        "sulphates",
        "alcohol",
    ];

    /// 1599 synthetic wine rows: skewed features, quality in 3..=8, a few
    /// duplicates and nulls.
    pub(crate) fn wine_frame() -> Frame {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let rows = 1599;
        let mut data = Array2::<f64>::zeros((rows, 12));
        for r in 0..rows {
            let quality: f64 = match rng.gen_range(0..100) {
                0 => 3.0,
                1..=4 => 4.0,
                5..=46 => 5.0,
                47..=86 => 6.0,
                87..=98 => 7.0,
                _ => 8.0,
            };
            let z: f64 = rng.gen_range(-1.0..1.0);
            let spike: f64 = rng.gen::<f64>().powi(6);
            data[[r, 0]] = 0.5f64.mul_add(quality, 5.0 + 2.0 * z);
            data[[r, 1]] = 0.1f64.mul_add(-quality, 1.2) + 0.15 * z;
            data[[r, 2]] = 0.3 * rng.gen::<f64>();
            data[[r, 3]] = 8.0f64.mul_add(spike, 1.5);
            data[[r, 4]] = 0.5f64.mul_add(spike, 0.05);
            data[[r, 5]] = 5.0f64.mul_add(rng.gen::<f64>(), 10.0);
            data[[r, 6]] = 150.0f64.mul_add(spike, 20.0);
            data[[r, 7]] = 0.002f64.mul_add(z, 0.996);
            data[[r, 8]] = 0.2f64.mul_add(z, 3.3);
            data[[r, 9]] = 1.2f64.mul_add(spike, 0.55);
            data[[r, 10]] = 0.6f64.mul_add(quality, 7.0) + z;
            data[[r, 11]] = quality;
        }
        for r in [10, 500, 1200] {
            let copy = data.row(r - 1).to_owned();
            data.row_mut(r).assign(&copy);
        }
        data[[42, 3]] = f64::NAN;
        let mut columns: Vec<String> = FEATURES.iter().map(|c| (*c).to_owned()).collect();
        columns.push("quality".into());
        Frame::new(columns, data).unwrap()
    }

    fn config(root: PathBuf) -> DataTransformationConfig {
        DataTransformationConfig {
            data_path: root.join("raw.csv"),
            root_dir: root,
            target_column: "quality".into(),
            params: TransformationParams::default(),
        }
    }

    #[test]
    fn full_run_produces_clean_balanced_train_and_untouched_test_labels() {
        let dir = tempdir().unwrap();
        let raw = wine_frame();
        raw.write_csv(dir.path().join("raw.csv")).unwrap();
        let mut cfg = config(dir.path().to_path_buf());
        cfg.params.skew_threshold = 0.5;
        let output = DataTransformation::new(cfg, PipelineTelemetry::disabled())
            .run_from_config()
            .unwrap();
        let report = &output.report;

        assert_eq!(report.raw_shape, (1599, 12));
        let summary = report.clean.unwrap();
        assert_eq!(summary.null_rows, 1);
        assert_eq!(summary.duplicate_rows, 3);
        assert_eq!(output.cleaned.nrows(), 1595);

        let split = output.split.as_ref().unwrap();
        assert_eq!(split.test.nrows(), 399);
        assert_eq!(split.train.columns(), raw.columns());

        let train = Frame::read_csv(dir.path().join("train.csv")).unwrap();
        let test = Frame::read_csv(dir.path().join("test.csv")).unwrap();
        assert_eq!(train.columns(), raw.columns());
        assert_eq!(test.shape(), split.test.shape());
        assert!(train.data().iter().all(|v| v.is_finite()));

        let counts = imbalance::class_counts(&train, "quality").unwrap();
        assert_eq!(counts.len(), 6);
        let majority = counts.values().max().copied().unwrap();
        assert!(counts.values().all(|c| *c == majority));
        assert_eq!(Some(counts), report.balance.as_ref().map(|b| b.after.clone()));

        let unique: HashSet<Vec<u64>> = train
            .data()
            .rows()
            .into_iter()
            .map(|row| row.iter().map(|v| v.to_bits()).collect())
            .collect();
        assert_eq!(unique.len(), train.nrows());

        assert!(report.skewed.iter().any(|c| c.column == "chlorides"));
        assert!(report.skewed.iter().all(|c| c.column != "quality"));
        assert_eq!(report.outliers.len(), 11);

        let preprocessor = dir.path().join(PREPROCESSOR_FILE);
        assert_eq!(report.preprocessor_path.as_deref(), Some(preprocessor.as_path()));
        let saved: PowerTransformer =
            serde_json::from_str(&fs::read_to_string(preprocessor).unwrap()).unwrap();
        assert_eq!(saved.columns, report.skewed);
    }

    #[test]
    fn skipped_skew_step_writes_an_empty_transformer() {
        let dir = tempdir().unwrap();
        let output = DataTransformation::new(
            config(dir.path().to_path_buf()),
            PipelineTelemetry::disabled(),
        )
        .with_steps(TransformSteps {
            skewness: false,
            ..TransformSteps::default()
        })
        .run(&wine_frame())
        .unwrap();
        assert!(output.report.skewed.is_empty());
        let saved: PowerTransformer =
            serde_json::from_str(&fs::read_to_string(dir.path().join(PREPROCESSOR_FILE)).unwrap())
                .unwrap();
        assert!(saved.is_empty());
    }

    #[test]
    fn test_labels_are_not_resampled() {
        let dir = tempdir().unwrap();
        let raw = wine_frame();
        let cfg = config(dir.path().to_path_buf());
        let full = DataTransformation::new(cfg.clone(), PipelineTelemetry::disabled())
            .run(&raw)
            .unwrap();
        let split_only = DataTransformation::new(cfg, PipelineTelemetry::disabled())
            .with_steps(TransformSteps {
                outliers: false,
                skewness: false,
                imbalance: false,
                write: false,
                ..TransformSteps::default()
            })
            .run(&raw)
            .unwrap();
        let a = full.split.unwrap();
        let b = split_only.split.unwrap();
        assert_eq!(a.test.column("quality").unwrap(), b.test.column("quality").unwrap());
        assert_eq!(a.test.nrows(), b.test.nrows());
        assert!(split_only.report.train_path.is_none());
    }

    #[test]
    fn dependent_steps_need_split() {
        let dir = tempdir().unwrap();
        let transformation = DataTransformation::new(
            config(dir.path().to_path_buf()),
            PipelineTelemetry::disabled(),
        )
        .with_steps(TransformSteps {
            split: false,
            ..TransformSteps::default()
        });
        assert!(matches!(
            transformation.run(&wine_frame()),
            Err(TransformError::SplitRequired { step: "handle_outliers" })
        ));

        let clean_only = TransformSteps {
            clean: true,
            split: false,
            outliers: false,
            skewness: false,
            imbalance: false,
            write: false,
        };
        let output = DataTransformation::new(
            config(dir.path().to_path_buf()),
            PipelineTelemetry::disabled(),
        )
        .with_steps(clean_only)
        .run(&wine_frame())
        .unwrap();
        assert!(output.split.is_none());
        assert_eq!(output.cleaned.nrows(), 1595);
    }

    #[test]
    fn missing_target_fails_before_work() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path().to_path_buf());
        cfg.target_column = "rating".into();
        let result = DataTransformation::new(cfg, PipelineTelemetry::disabled()).run(&wine_frame());
        assert!(matches!(
            result,
            Err(TransformError::Frame(FrameError::MissingColumn(_)))
        ));
        assert!(!dir.path().join("train.csv").exists());
    }
}
