//! Skew correction with a standardized Yeo-Johnson power transform.
//!
//! `λ` is the maximum-likelihood estimate over `[-5, 5]`, found by
//! golden-section search. The transformed column is then centred and scaled
//! with its own mean and population standard deviation.

use serde::{Deserialize, Serialize};

use super::{stats, TransformError};
use crate::frame::{Frame, FrameError};

const LAMBDA_BOUNDS: (f64, f64) = (-5.0, 5.0);
const SEARCH_TOLERANCE: f64 = 1e-8;
const INV_PHI: f64 = 0.618_033_988_749_894_9;

/// Yeo-Johnson transform of one value.
#[must_use]
pub fn yeo_johnson(x: f64, lambda: f64) -> f64 {
    if x >= 0.0 {
        if lambda.abs() < f64::EPSILON {
            x.ln_1p()
        } else {
            (lambda * x.ln_1p()).exp_m1() / lambda
        }
    } else if (lambda - 2.0).abs() < f64::EPSILON {
        -(-x).ln_1p()
    } else {
        let power = 2.0 - lambda;
        -(power * (-x).ln_1p()).exp_m1() / power
    }
}

/// Inverse of [`yeo_johnson`].
#[must_use]
pub fn yeo_johnson_inverse(y: f64, lambda: f64) -> f64 {
    if y >= 0.0 {
        if lambda.abs() < f64::EPSILON {
            y.exp_m1()
        } else {
            ((lambda * y).ln_1p() / lambda).exp_m1()
        }
    } else if (lambda - 2.0).abs() < f64::EPSILON {
        -(-y).exp_m1()
    } else {
        let power = 2.0 - lambda;
        -((-power * y).ln_1p() / power).exp_m1()
    }
}

/// Profile log-likelihood of `lambda` for the given (finite) sample.
#[must_use]
pub fn log_likelihood(values: &[f64], lambda: f64) -> f64 {
    let transformed: Vec<f64> = values.iter().map(|x| yeo_johnson(*x, lambda)).collect();
    let variance = stats::variance(&transformed);
    if !(variance > 0.0 && variance.is_finite()) {
        return f64::NEG_INFINITY;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    let jacobian: f64 = values.iter().map(|x| x.signum() * x.abs().ln_1p()).sum();
    (-n / 2.0).mul_add(variance.ln(), (lambda - 1.0) * jacobian)
}

fn golden_section_max(f: impl Fn(f64) -> f64, lo: f64, hi: f64) -> f64 {
    let (mut a, mut b) = (lo, hi);
    let mut c = b - INV_PHI * (b - a);
    let mut d = a + INV_PHI * (b - a);
    let (mut fc, mut fd) = (f(c), f(d));
    while (b - a).abs() > SEARCH_TOLERANCE {
        if fc >= fd {
            b = d;
            d = c;
            fd = fc;
            c = b - INV_PHI * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + INV_PHI * (b - a);
            fd = f(d);
        }
    }
    (a + b) / 2.0
}

/// Fitted standardized Yeo-Johnson transform for one column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YeoJohnson {
    /// Power parameter.
    pub lambda: f64,
    /// Mean of the transformed training values.
    pub mean: f64,
    /// Population standard deviation of the transformed training values (1 when zero).
    pub std: f64,
}

impl YeoJohnson {
    /// Fits `λ` and the standardization on the finite values of `values`.
    ///
    /// Returns `None` when no finite value is present.
    #[must_use]
    pub fn fit(values: &[f64]) -> Option<Self> {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return None;
        }
        let lambda = golden_section_max(
            |lambda| log_likelihood(&finite, lambda),
            LAMBDA_BOUNDS.0,
            LAMBDA_BOUNDS.1,
        );
        let transformed: Vec<f64> = finite.iter().map(|x| yeo_johnson(*x, lambda)).collect();
        let mean = stats::mean(&transformed);
        let std = stats::variance(&transformed).sqrt();
        Some(Self {
            lambda,
            mean,
            std: if std > 0.0 { std } else { 1.0 },
        })
    }

    /// Forward transform followed by standardization.
    #[must_use]
    pub fn transform(&self, x: f64) -> f64 {
        (yeo_johnson(x, self.lambda) - self.mean) / self.std
    }

    /// Undoes [`YeoJohnson::transform`].
    #[must_use]
    pub fn inverse(&self, z: f64) -> f64 {
        yeo_johnson_inverse(z.mul_add(self.std, self.mean), self.lambda)
    }
}

/// A column selected for transformation, with its training skewness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkewedColumn {
    /// Column name.
    pub column: String,
    /// Training skewness before the transform.
    pub skew: f64,
    /// Fitted transform.
    pub transform: YeoJohnson,
}

/// Set of per-column transforms fit on a training frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerTransformer {
    /// Transformed columns, in frame order.
    pub columns: Vec<SkewedColumn>,
}

impl PowerTransformer {
    /// Fits a transform for every feature column whose `|skew|` exceeds `threshold`.
    pub fn fit(train: &Frame, target: &str, threshold: f64) -> Result<Self, TransformError> {
        train.column_index(target)?;
        let mut columns = Vec::new();
        for name in train.feature_names(target) {
            let values = stats::sorted_finite(train.column(&name)?);
            let skew = stats::skewness(&values);
            if skew.abs() <= threshold {
                continue;
            }
            if let Some(transform) = YeoJohnson::fit(&values) {
                columns.push(SkewedColumn {
                    column: name,
                    skew,
                    transform,
                });
            }
        }
        Ok(Self { columns })
    }

    /// Applies the fitted transforms in place; other columns are untouched.
    pub fn transform(&self, frame: &mut Frame) -> Result<(), TransformError> {
        for skewed in &self.columns {
            frame
                .column_mut(&skewed.column)?
                .mapv_inplace(|x| skewed.transform.transform(x));
        }
        Ok(())
    }

    /// Whether no column is transformed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Fails unless every transformed column appears in `feature_names`.
    pub fn check_columns(&self, feature_names: &[String]) -> Result<(), FrameError> {
        match self
            .columns
            .iter()
            .find(|skewed| !feature_names.contains(&skewed.column))
        {
            Some(skewed) => Err(FrameError::MissingColumn(skewed.column.clone())),
            None => Ok(()),
        }
    }

    /// Applies the fitted transforms to one row laid out as `feature_names`.
    pub fn transform_row(
        &self,
        feature_names: &[String],
        row: &mut [f64],
    ) -> Result<(), FrameError> {
        for skewed in &self.columns {
            let index = feature_names
                .iter()
                .position(|name| *name == skewed.column)
                .ok_or_else(|| FrameError::MissingColumn(skewed.column.clone()))?;
            row[index] = skewed.transform.transform(row[index]);
        }
        Ok(())
    }

    /// Undoes [`PowerTransformer::transform`] in place.
    pub fn inverse(&self, frame: &mut Frame) -> Result<(), TransformError> {
        for skewed in &self.columns {
            frame
                .column_mut(&skewed.column)?
                .mapv_inplace(|z| skewed.transform.inverse(z));
        }
        Ok(())
    }
}

/// Fits on `train`, then transforms both `train` and `test`.
pub fn normalize_skewed(
    train: &mut Frame,
    test: &mut Frame,
    target: &str,
    threshold: f64,
) -> Result<PowerTransformer, TransformError> {
    let transformer = PowerTransformer::fit(train, target, threshold)?;
    transformer.transform(train)?;
    transformer.transform(test)?;
    Ok(transformer)
}
