use std::path::Path;

use crate::training::{artifact::ModelArtifact, ModelError};

/// Loads a persisted model once and scores single rows.
#[derive(Debug, Clone)]
pub struct PredictionPipeline {
    model: ModelArtifact,
}

impl PredictionPipeline {
    /// Loads the model at `model_path`.
    pub fn new(model_path: impl AsRef<Path>) -> Result<Self, ModelError> {
        Ok(Self {
            model: ModelArtifact::load(model_path.as_ref())?,
        })
    }

    /// Feature names the row must follow, in order.
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.model.feature_names
    }

    /// Predicts one raw row and rounds to the nearest integer, ties to even.
    ///
    /// The model's stored skew transforms are applied first. Only the row
    /// length is checked; column order is the caller's contract.
    pub fn predict(&self, row: &[f64]) -> Result<f64, ModelError> {
        Ok(self.model.predict_row(row)?.round_ties_even())
    }
}
