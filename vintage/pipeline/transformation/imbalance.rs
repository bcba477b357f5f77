//! SMOTE oversampling of minority target classes.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, ArrayView1};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use super::TransformError;
use crate::frame::{Frame, FrameError};

/// Class counts around a resampling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassBalance {
    /// Rows per label before resampling.
    pub before: BTreeMap<i64, usize>,
    /// Rows per label after resampling.
    pub after: BTreeMap<i64, usize>,
    /// Neighbor count actually used.
    pub k_neighbors: usize,
    /// Synthetic rows appended.
    pub synthetic: usize,
}

/// Synthetic minority oversampling with a seeded generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Smote {
    k_neighbors: usize,
    seed: u64,
}

impl Smote {
    /// Creates an oversampler; `k_neighbors` applies when every class has more than four rows.
    #[must_use]
    pub const fn new(k_neighbors: usize, seed: u64) -> Self {
        Self { k_neighbors, seed }
    }

    /// Neighbor count for a smallest class of `min_count` rows.
    #[must_use]
    pub fn effective_k(&self, min_count: usize) -> usize {
        if min_count <= 4 {
            min_count.saturating_sub(1)
        } else {
            self.k_neighbors.min(min_count - 1)
        }
    }

    /// Oversamples every class up to the majority count.
    ///
    /// Original rows keep their order and come first; synthetic rows follow,
    /// grouped by ascending label.
    pub fn fit_resample(
        &self,
        features: &Array2<f64>,
        target: &Array1<f64>,
    ) -> Result<(Array2<f64>, Array1<f64>, ClassBalance), TransformError> {
        let mut classes: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (row, value) in target.iter().enumerate() {
            classes.entry(class_label(row, *value)?).or_default().push(row);
        }
        let before: BTreeMap<i64, usize> =
            classes.iter().map(|(label, rows)| (*label, rows.len())).collect();
        let majority = before.values().copied().max().unwrap_or(0);
        let min_count = before.values().copied().min().unwrap_or(0);
        let k = self.effective_k(min_count);

        let mut rows: Vec<Vec<f64>> = Vec::new();
        let mut labels: Vec<f64> = Vec::new();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        for (label, members) in &classes {
            let needed = majority - members.len();
            if needed == 0 {
                continue;
            }
            if k == 0 {
                let singleton = before
                    .iter()
                    .find(|(_, count)| **count == 1)
                    .map_or(*label, |(label, _)| *label);
                return Err(TransformError::SingletonClass { label: singleton });
            }
            let neighbors = nearest_neighbors(features, members, k);
            for _ in 0..needed {
                let pick = rng.gen_range(0..members.len());
                let neighbor = neighbors[pick][rng.gen_range(0..k)];
                let gap: f64 = rng.gen();
                let origin = features.row(members[pick]);
                let other = features.row(neighbor);
                rows.push(
                    origin
                        .iter()
                        .zip(other.iter())
                        .map(|(a, b)| gap.mul_add(b - a, *a))
                        .collect(),
                );
                #[allow(clippy::cast_precision_loss)]
                labels.push(*label as f64);
            }
        }

        let synthetic = rows.len();
        let mut resampled = features.clone();
        for row in &rows {
            resampled
                .push_row(ArrayView1::from(row.as_slice()))
                .map_err(FrameError::from)?;
        }
        let mut resampled_target = target.to_vec();
        resampled_target.extend(labels);
        let after = before.keys().map(|label| (*label, majority)).collect();
        Ok((
            resampled,
            Array1::from(resampled_target),
            ClassBalance {
                before,
                after,
                k_neighbors: k,
                synthetic,
            },
        ))
    }
}

fn class_label(row: usize, value: f64) -> Result<i64, TransformError> {
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(TransformError::NonIntegralTarget { row, value });
    }
    #[allow(clippy::cast_possible_truncation)]
    let label = value as i64;
    Ok(label)
}

// For each member, the indices (into `features`) of its `k` nearest same-class rows.
fn nearest_neighbors(features: &Array2<f64>, members: &[usize], k: usize) -> Vec<Vec<usize>> {
    members
        .iter()
        .map(|&row| {
            let origin = features.row(row);
            let mut distances: Vec<(f64, usize)> = members
                .iter()
                .filter(|&&other| other != row)
                .map(|&other| {
                    let d = features
                        .row(other)
                        .iter()
                        .zip(origin.iter())
                        .map(|(a, b)| (a - b).powi(2))
                        .sum::<f64>();
                    (d, other)
                })
                .collect();
            distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            distances.into_iter().take(k).map(|(_, idx)| idx).collect()
        })
        .collect()
}

/// Balances a training frame by its `target` column; the target keeps its position.
pub fn balance_classes(
    train: &Frame,
    target: &str,
    k_neighbors: usize,
    seed: u64,
) -> Result<(Frame, ClassBalance), TransformError> {
    let position = train.column_index(target)?;
    let (features, labels) = train.split_target(target)?;
    let (feature_names, matrix) = features.into_parts();
    let (resampled, resampled_labels, balance) =
        Smote::new(k_neighbors, seed).fit_resample(&matrix, &labels)?;
    let balanced =
        Frame::new(feature_names, resampled)?.insert_column(position, target, &resampled_labels)?;
    Ok((balanced, balance))
}

/// Label counts of a frame's target column (non-integral values are rejected).
pub fn class_counts(frame: &Frame, target: &str) -> Result<BTreeMap<i64, usize>, TransformError> {
    let mut counts = BTreeMap::new();
    for (row, value) in frame.column(target)?.iter().enumerate() {
        *counts.entry(class_label(row, *value)?).or_insert(0) += 1;
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imbalanced() -> Frame {
        let mut rows = Vec::new();
        for i in 0..6 {
            rows.push(vec![f64::from(i), 5.0, f64::from(i) * 2.0]);
        }
        for i in 0..3 {
            rows.push(vec![10.0 + f64::from(i), 6.0, 1.0]);
        }
        rows.push(vec![20.0, 7.0, -1.0]);
        rows.push(vec![22.0, 7.0, -3.0]);
        Frame::from_rows(
            vec!["alcohol".into(), "quality".into(), "sulphates".into()],
            &rows,
        )
        .unwrap()
    }

    #[test]
    fn neighbor_count_follows_smallest_class() {
        let smote = Smote::new(5, 0);
        assert_eq!(smote.effective_k(2), 1);
        assert_eq!(smote.effective_k(4), 3);
        assert_eq!(smote.effective_k(5), 4);
        assert_eq!(smote.effective_k(50), 5);
        assert_eq!(smote.effective_k(1), 0);
    }

    #[test]
    fn balances_every_class_to_majority() {
        let train = imbalanced();
        let (balanced, balance) = balance_classes(&train, "quality", 5, 42).unwrap();
        assert_eq!(balanced.columns(), train.columns());
        assert_eq!(balance.k_neighbors, 1);
        assert_eq!(balance.synthetic, 7);
        assert_eq!(balanced.nrows(), 18);
        let counts = class_counts(&balanced, "quality").unwrap();
        assert!(counts.values().all(|count| *count == 6));
        assert_eq!(counts, balance.after);

        let head = balanced.select_rows(&(0..train.nrows()).collect::<Vec<_>>());
        assert_eq!(head, train);

        // synthetic rows lie between two members of their class
        let rows: Vec<_> = balanced.data().rows().into_iter().collect();
        let tail = &rows[11..];
        let labels: Vec<f64> = tail.iter().map(|row| row[1]).collect();
        assert!(labels.windows(2).all(|w| w[0] <= w[1]));
        for row in tail {
            if (row[1] - 7.0).abs() < f64::EPSILON {
                assert!((20.0..=22.0).contains(&row[0]));
                assert!((-3.0..=-1.0).contains(&row[2]));
            } else {
                assert!((10.0..=12.0).contains(&row[0]));
                assert!((row[2] - 1.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn resampling_is_seeded() {
        let train = imbalanced();
        let (a, _) = balance_classes(&train, "quality", 5, 42).unwrap();
        let (b, _) = balance_classes(&train, "quality", 5, 42).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn singleton_and_non_integral_targets_fail() {
        let singleton = Frame::from_rows(
            vec!["a".into(), "quality".into()],
            &[vec![1.0, 5.0], vec![2.0, 5.0], vec![3.0, 6.0]],
        )
        .unwrap();
        assert!(matches!(
            balance_classes(&singleton, "quality", 5, 1),
            Err(TransformError::SingletonClass { label: 6 })
        ));
        let fractional = Frame::from_rows(
            vec!["a".into(), "quality".into()],
            &[vec![1.0, 5.5], vec![2.0, 5.0]],
        )
        .unwrap();
        assert!(matches!(
            balance_classes(&fractional, "quality", 5, 1),
            Err(TransformError::NonIntegralTarget { row: 0, .. })
        ));
    }

    #[test]
    fn balanced_input_is_returned_unchanged() {
        let train = Frame::from_rows(
            vec!["a".into(), "quality".into()],
            &[vec![1.0, 5.0], vec![2.0, 6.0]],
        )
        .unwrap();
        let (balanced, balance) = balance_classes(&train, "quality", 5, 1).unwrap();
        assert_eq!(balanced, train);
        assert_eq!(balance.synthetic, 0);
    }
}
