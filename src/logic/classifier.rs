//! Classifier adapter
//!
//! Wraps the multi-class learning routine behind a train/predict contract.
//! The current implementation is a standardized nearest-centroid model:
//! features are z-scored with the training set's per-feature mean and
//! deviation, one centroid is kept per user label, and prediction returns
//! the label of the closest centroid. The predicted label is therefore
//! always one of the training labels.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error("need at least 2 distinct labels, found {0}")]
    TooFewClasses(usize),

    #[error("feature dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassCentroid {
    pub label: i64,
    /// Mean of the class's standardized feature vectors
    pub centroid: Vec<f64>,
}

/// A trained swipe classifier plus the user set it was trained on.
/// Serialized as the persisted model blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwipeModel {
    pub feature_means: Vec<f64>,
    pub feature_scales: Vec<f64>,
    pub centroids: Vec<ClassCentroid>,
    pub trained_on: Vec<i64>,
    pub sample_count: usize,
    pub trained_at: DateTime<Utc>,
}

/// Train on a (samples x features) matrix with one label per row.
///
/// Fails with `TooFewClasses` when fewer than 2 distinct labels are
/// present; the ModelManager enforces that precondition before calling.
pub fn train(x: &Array2<f64>, y: &[i64]) -> Result<SwipeModel, ClassifierError> {
    let samples = x.nrows();
    if samples == 0 {
        return Err(ClassifierError::EmptyTrainingSet);
    }
    if y.len() != samples {
        return Err(ClassifierError::DimensionMismatch {
            expected: samples,
            got: y.len(),
        });
    }

    let means = x.mean_axis(Axis(0)).ok_or(ClassifierError::EmptyTrainingSet)?;
    // Constant features get unit scale so standardization stays finite
    let scales = x
        .std_axis(Axis(0), 0.0)
        .mapv(|s| if s > 1e-9 { s } else { 1.0 });

    let mut sums: BTreeMap<i64, (Array1<f64>, usize)> = BTreeMap::new();
    for (row, &label) in x.rows().into_iter().zip(y) {
        let standardized = (&row.to_owned() - &means) / &scales;
        let entry = sums
            .entry(label)
            .or_insert_with(|| (Array1::zeros(x.ncols()), 0));
        entry.0 += &standardized;
        entry.1 += 1;
    }

    if sums.len() < 2 {
        return Err(ClassifierError::TooFewClasses(sums.len()));
    }

    let centroids = sums
        .iter()
        .map(|(&label, (sum, count))| ClassCentroid {
            label,
            centroid: sum.mapv(|v| v / *count as f64).to_vec(),
        })
        .collect();

    Ok(SwipeModel {
        feature_means: means.to_vec(),
        feature_scales: scales.to_vec(),
        centroids,
        trained_on: sums.keys().copied().collect(),
        sample_count: samples,
        trained_at: Utc::now(),
    })
}

impl SwipeModel {
    pub fn feature_count(&self) -> usize {
        self.feature_means.len()
    }

    /// Predict the label for one feature vector
    pub fn predict(&self, features: &[f64]) -> Result<i64, ClassifierError> {
        if features.len() != self.feature_count() {
            return Err(ClassifierError::DimensionMismatch {
                expected: self.feature_count(),
                got: features.len(),
            });
        }
        if self.centroids.is_empty() {
            return Err(ClassifierError::EmptyTrainingSet);
        }

        let mut best_label = self.centroids[0].label;
        let mut best_dist = f64::INFINITY;
        for class in &self.centroids {
            let mut dist = 0.0;
            for i in 0..features.len() {
                let z = (features[i] - self.feature_means[i]) / self.feature_scales[i];
                let d = z - class.centroid[i];
                dist += d * d;
            }
            if dist < best_dist {
                best_dist = dist;
                best_label = class.label;
            }
        }

        Ok(best_label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn two_cluster_training() -> (Array2<f64>, Vec<i64>) {
        // User 1 swipes low and slow, user 2 high and fast
        let x = arr2(&[
            [1.0, 10.0, 0.5],
            [1.2, 11.0, 0.4],
            [0.9, 9.5, 0.6],
            [5.0, 40.0, 3.0],
            [5.5, 42.0, 2.8],
            [4.8, 39.0, 3.2],
        ]);
        let y = vec![1, 1, 1, 2, 2, 2];
        (x, y)
    }

    #[test]
    fn test_train_and_predict_separable_clusters() {
        let (x, y) = two_cluster_training();
        let model = train(&x, &y).unwrap();

        assert_eq!(model.trained_on, vec![1, 2]);
        assert_eq!(model.sample_count, 6);
        assert_eq!(model.predict(&[1.1, 10.2, 0.5]).unwrap(), 1);
        assert_eq!(model.predict(&[5.2, 41.0, 3.0]).unwrap(), 2);
    }

    #[test]
    fn test_prediction_is_a_training_label() {
        let (x, y) = two_cluster_training();
        let model = train(&x, &y).unwrap();

        // Far outside both clusters, still one of the trained labels
        let label = model.predict(&[100.0, -50.0, 7.0]).unwrap();
        assert!(model.trained_on.contains(&label));
    }

    #[test]
    fn test_empty_training_set_rejected() {
        let x = Array2::<f64>::zeros((0, 3));
        assert_eq!(train(&x, &[]).unwrap_err(), ClassifierError::EmptyTrainingSet);
    }

    #[test]
    fn test_single_class_rejected() {
        let x = arr2(&[[1.0, 2.0], [1.1, 2.1]]);
        assert_eq!(train(&x, &[4, 4]).unwrap_err(), ClassifierError::TooFewClasses(1));
    }

    #[test]
    fn test_predict_dimension_mismatch() {
        let (x, y) = two_cluster_training();
        let model = train(&x, &y).unwrap();

        assert_eq!(
            model.predict(&[1.0, 2.0]),
            Err(ClassifierError::DimensionMismatch { expected: 3, got: 2 })
        );
    }

    #[test]
    fn test_constant_feature_does_not_break_scaling() {
        let x = arr2(&[[1.0, 7.0], [1.0, 7.5], [9.0, 7.2], [9.5, 7.1]]);
        let y = vec![1, 1, 2, 2];
        let model = train(&x, &y).unwrap();

        let label = model.predict(&[1.05, 7.3]).unwrap();
        assert_eq!(label, 1);
        assert!(model.feature_scales.iter().all(|s| s.is_finite() && *s > 0.0));
    }

    #[test]
    fn test_model_serialization_round_trip() {
        let (x, y) = two_cluster_training();
        let model = train(&x, &y).unwrap();

        let blob = serde_json::to_vec(&model).unwrap();
        let restored: SwipeModel = serde_json::from_slice(&blob).unwrap();
        assert_eq!(restored.trained_on, model.trained_on);
        assert_eq!(restored.predict(&[1.0, 10.0, 0.5]).unwrap(), 1);
    }
}
