use serde::Serialize;

use super::{stats, TransformError};
use crate::frame::Frame;

/// Capping interval computed for one column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlierBounds {
    /// Column name.
    pub column: String,
    /// First quartile.
    pub q1: f64,
    /// Third quartile.
    pub q3: f64,
    /// `q1 - k * iqr`.
    pub lower: f64,
    /// `q3 + k * iqr`.
    pub upper: f64,
    /// Values moved onto a bound.
    pub capped: usize,
}

impl OutlierBounds {
    /// Bounds from a column's own distribution; `None` when it has no finite values.
    #[must_use]
    pub fn fit(
        column: &str,
        values: ndarray::ArrayView1<'_, f64>,
        multiplier: f64,
    ) -> Option<Self> {
        let sorted = stats::sorted_finite(values);
        if sorted.is_empty() {
            return None;
        }
        let q1 = stats::quantile(&sorted, 0.25);
        let q3 = stats::quantile(&sorted, 0.75);
        let iqr = q3 - q1;
        Some(Self {
            column: column.to_owned(),
            q1,
            q3,
            lower: q1 - multiplier * iqr,
            upper: q3 + multiplier * iqr,
            capped: 0,
        })
    }
}

/// Clips every feature column (all but `target`) to its IQR whiskers in place.
///
/// Rows are never removed; `NaN` cells are left as they are.
pub fn cap_outliers(
    frame: &mut Frame,
    target: &str,
    multiplier: f64,
) -> Result<Vec<OutlierBounds>, TransformError> {
    frame.column_index(target)?;
    let mut report = Vec::new();
    for name in frame.feature_names(target) {
        let mut column = frame.column_mut(&name)?;
        let Some(mut bounds) = OutlierBounds::fit(&name, column.view(), multiplier) else {
            continue;
        };
        for value in &mut column {
            if *value < bounds.lower {
                *value = bounds.lower;
                bounds.capped += 1;
            } else if *value > bounds.upper {
                *value = bounds.upper;
                bounds.capped += 1;
            }
        }
        report.push(bounds);
    }
    Ok(report)
}
