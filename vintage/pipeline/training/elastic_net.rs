//! Elastic-net linear regression fit by cyclic coordinate descent.
//!
//! Minimizes `1/(2n)·‖y − Xw − b‖² + α·ρ·‖w‖₁ + ½·α·(1−ρ)·‖w‖²`. The intercept
//! is recovered from the column means after fitting on centred data.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use super::ModelError;

/// Hyperparameters and solver settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElasticNet {
    /// Overall penalty strength.
    pub alpha: f64,
    /// L1 share of the penalty.
    pub l1_ratio: f64,
    /// Maximum passes over the coordinates.
    pub max_iter: usize,
    /// Stop when the largest weight change relative to the largest weight falls below this.
    pub tol: f64,
    /// Recorded seed; the cyclic solver itself is deterministic.
    pub random_state: u64,
}

impl Default for ElasticNet {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            l1_ratio: 0.5,
            max_iter: 1000,
            tol: 1e-4,
            random_state: 42,
        }
    }
}

/// Weights produced by [`ElasticNet::fit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedElasticNet {
    /// One weight per feature.
    pub coefficients: Vec<f64>,
    /// Bias term.
    pub intercept: f64,
    /// Passes performed.
    pub n_iter: usize,
    /// Whether the tolerance was met before `max_iter`.
    pub converged: bool,
}

impl ElasticNet {
    /// Solver with the given penalty and default settings.
    #[must_use]
    pub fn new(alpha: f64, l1_ratio: f64) -> Self {
        Self {
            alpha,
            l1_ratio,
            ..Self::default()
        }
    }

    /// Fits on a feature matrix and target vector.
    pub fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<FittedElasticNet, ModelError> {
        if !(self.alpha >= 0.0 && (0.0..=1.0).contains(&self.l1_ratio)) {
            return Err(ModelError::InvalidParams {
                alpha: self.alpha,
                l1_ratio: self.l1_ratio,
            });
        }
        let (n, p) = x.dim();
        if n == 0 || p == 0 {
            return Err(ModelError::Empty);
        }
        if y.len() != n {
            return Err(ModelError::ShapeMismatch {
                expected: n,
                found: y.len(),
            });
        }
        if let Some(row) = x
            .rows()
            .into_iter()
            .zip(y)
            .position(|(row, target)| !target.is_finite() || row.iter().any(|v| !v.is_finite()))
        {
            return Err(ModelError::NonFinite { row });
        }

        let x_mean = x.mean_axis(Axis(0)).ok_or(ModelError::Empty)?;
        let y_mean = y.mean().ok_or(ModelError::Empty)?;
        let xc = x - &x_mean;
        let mut residual = y - y_mean;

        #[allow(clippy::cast_precision_loss)]
        let n_f = n as f64;
        let l1_reg = self.alpha * self.l1_ratio * n_f;
        let l2_reg = self.alpha * (1.0 - self.l1_ratio) * n_f;
        let norms: Vec<f64> = xc.columns().into_iter().map(|c| c.dot(&c)).collect();

        let mut w = Array1::<f64>::zeros(p);
        let mut n_iter = 0;
        let mut converged = false;
        while n_iter < self.max_iter {
            n_iter += 1;
            let mut w_max = 0.0_f64;
            let mut d_w_max = 0.0_f64;
            for j in 0..p {
                if norms[j] == 0.0 {
                    continue;
                }
                let column = xc.column(j);
                let previous = w[j];
                if previous != 0.0 {
                    residual.scaled_add(previous, &column);
                }
                let rho = column.dot(&residual);
                w[j] = soft_threshold(rho, l1_reg) / (norms[j] + l2_reg);
                if w[j] != 0.0 {
                    residual.scaled_add(-w[j], &column);
                }
                d_w_max = d_w_max.max((w[j] - previous).abs());
                w_max = w_max.max(w[j].abs());
            }
            if w_max == 0.0 || d_w_max / w_max < self.tol {
                converged = true;
                break;
            }
        }

        let intercept = y_mean - x_mean.dot(&w);
        Ok(FittedElasticNet {
            coefficients: w.to_vec(),
            intercept,
            n_iter,
            converged,
        })
    }
}

impl FittedElasticNet {
    /// Prediction for one feature row.
    #[must_use]
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        row.iter()
            .zip(&self.coefficients)
            .fold(self.intercept, |acc, (x, w)| x.mul_add(*w, acc))
    }

    /// Predictions for every row of `x`.
    #[must_use]
    pub fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        x.rows().into_iter().map(|row| self.predict_row(row)).collect()
    }
}

/// `S(x, λ) = sign(x)·max(|x| − λ, 0)`.
fn soft_threshold(x: f64, threshold: f64) -> f64 {
    if x > threshold {
        x - threshold
    } else if x < -threshold {
        x + threshold
    } else {
        0.0
    }
}
