use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::TransformError;
use crate::frame::Frame;

/// Train and test partitions produced by [`train_test_split`].
#[derive(Debug, Clone, PartialEq)]
pub struct SplitFrames {
    /// Training rows.
    pub train: Frame,
    /// Held-out rows.
    pub test: Frame,
}

/// Randomly partitions rows: `ceil(test_size * n)` rows go to test, the rest to train.
///
/// One seeded permutation decides both sides, so equal input and seed always
/// yield the same partition.
pub fn train_test_split(
    frame: &Frame,
    test_size: f64,
    seed: u64,
) -> Result<SplitFrames, TransformError> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(TransformError::InvalidTestSize(test_size));
    }
    let rows = frame.nrows();
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let n_test = (test_size * rows as f64).ceil() as usize;
    if n_test == 0 || n_test >= rows {
        return Err(TransformError::TooFewRows { rows, test_size });
    }
    let mut indices: Vec<usize> = (0..rows).collect();
    indices.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
    let (test_idx, train_idx) = indices.split_at(n_test);
    Ok(SplitFrames {
        train: frame.select_rows(train_idx),
        test: frame.select_rows(test_idx),
    })
}
