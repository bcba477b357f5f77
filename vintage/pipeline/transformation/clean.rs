use std::collections::HashSet;

use serde::Serialize;

use crate::frame::Frame;

/// Row counts removed by [`clean`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanSummary {
    /// Rows in the input.
    pub rows_before: usize,
    /// Rows dropped for holding at least one null.
    pub null_rows: usize,
    /// Rows dropped as exact duplicates of an earlier row.
    pub duplicate_rows: usize,
}

/// Drops rows containing `NaN`, then rows identical to an earlier row.
///
/// The first occurrence of a duplicated row is kept and row order is preserved.
#[must_use]
pub fn clean(frame: &Frame) -> (Frame, CleanSummary) {
    let data = frame.data();
    let mut seen: HashSet<Vec<u64>> = HashSet::with_capacity(frame.nrows());
    let mut keep = Vec::with_capacity(frame.nrows());
    let mut null_rows = 0;
    let mut duplicate_rows = 0;
    for (idx, row) in data.rows().into_iter().enumerate() {
        if row.iter().any(|v| v.is_nan()) {
            null_rows += 1;
            continue;
        }
        let key: Vec<u64> = row.iter().map(|v| row_key(*v)).collect();
        if seen.insert(key) {
            keep.push(idx);
        } else {
            duplicate_rows += 1;
        }
    }
    let summary = CleanSummary {
        rows_before: frame.nrows(),
        null_rows,
        duplicate_rows,
    };
    (frame.select_rows(&keep), summary)
}

// -0.0 and 0.0 are the same value for duplicate detection.
fn row_key(value: f64) -> u64 {
    if value == 0.0 {
        0.0_f64.to_bits()
    } else {
        value.to_bits()
    }
}
