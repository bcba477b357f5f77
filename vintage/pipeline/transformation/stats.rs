use ndarray::ArrayView1;

/// Finite values of a column, ascending.
#[must_use]
pub fn sorted_finite(values: ArrayView1<'_, f64>) -> Vec<f64> {
    let mut out: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    out.sort_by(f64::total_cmp);
    out
}

/// Quantile of ascending data with linear interpolation between closest ranks.
///
/// Returns `NaN` for empty input.
#[must_use]
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            #[allow(clippy::cast_precision_loss)]
            let pos = (n - 1) as f64 * q.clamp(0.0, 1.0);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = pos - pos.floor();
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Arithmetic mean; `NaN` for empty input.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    values.iter().sum::<f64>() / n
}

/// Population variance (divides by `n`).
#[must_use]
pub fn variance(values: &[f64]) -> f64 {
    let mu = mean(values);
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / n
}

/// Bias-corrected sample skewness (adjusted Fisher-Pearson `G1`).
///
/// Zero when fewer than three values are present or the values are constant.
#[must_use]
pub fn skewness(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 3 {
        return 0.0;
    }
    let mu = mean(values);
    #[allow(clippy::cast_precision_loss)]
    let nf = n as f64;
    let m2 = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / nf;
    let m3 = values.iter().map(|v| (v - mu).powi(3)).sum::<f64>() / nf;
    if m2 < 1e-14 {
        return 0.0;
    }
    let g1 = m3 / m2.powf(1.5);
    (nf * (nf - 1.0)).sqrt() / (nf - 2.0) * g1
}
