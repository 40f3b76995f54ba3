//! Model manager
//!
//! Owns the active swipe classifier. State is explicit (Unloaded / Ready /
//! Training) and held in memory; the persisted blob backs the state but is
//! never re-checked per request. Readers always see either the previous or
//! the new model through an atomic Arc swap, and at most one retraining
//! pass runs at a time process-wide.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::Array2;
use parking_lot::RwLock;
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::logic::classifier::{self, ClassifierError, SwipeModel};
use crate::models::swipe::{self, EligibleUsers, FEATURE_COLUMNS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
    Unloaded,
    Ready,
    Training,
}

#[derive(Debug, Error)]
pub enum RetrainError {
    #[error("no swipe data available to train on")]
    NoDataAvailable,

    #[error("need at least 2 users with >= {min_strokes} strokes, found {eligible}")]
    NeedMultipleUsers { eligible: usize, min_strokes: u32 },

    #[error("classifier training failed: {0}")]
    Training(#[from] ClassifierError),

    #[error("training task aborted: {0}")]
    TaskAborted(String),

    #[error(transparent)]
    Storage(#[from] sqlx::Error),

    #[error("failed to persist model: {0}")]
    Persist(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrainOutcome {
    /// A training pass ran and a new model is being served
    Completed,
    /// Another retrain was already in flight; this call was a no-op
    AlreadyRunning,
}

pub struct ModelManager {
    current: RwLock<Option<Arc<SwipeModel>>>,
    training: AtomicBool,
    model_path: PathBuf,
    min_strokes: u32,
}

/// Releases the single-flight flag on every exit path
struct TrainingFlag<'a>(&'a AtomicBool);

impl Drop for TrainingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ModelManager {
    pub fn new(model_path: PathBuf, min_strokes: u32) -> Self {
        Self {
            current: RwLock::new(None),
            training: AtomicBool::new(false),
            model_path,
            min_strokes,
        }
    }

    /// Latest successfully trained model, if any. Non-blocking.
    pub fn current_model(&self) -> Option<Arc<SwipeModel>> {
        self.current.read().clone()
    }

    pub fn state(&self) -> ModelState {
        if self.training.load(Ordering::Acquire) {
            ModelState::Training
        } else if self.current.read().is_some() {
            ModelState::Ready
        } else {
            ModelState::Unloaded
        }
    }

    /// Load the persisted blob at startup. A missing file is normal; a
    /// corrupt or schema-mismatched blob is discarded with a warning.
    pub fn load_from_disk(&self) -> ModelState {
        let raw = match std::fs::read(&self.model_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!("No persisted model at {}", self.model_path.display());
                return ModelState::Unloaded;
            }
            Err(e) => {
                tracing::warn!("Failed to read model file {}: {}", self.model_path.display(), e);
                return ModelState::Unloaded;
            }
        };

        match serde_json::from_slice::<SwipeModel>(&raw) {
            Ok(model) if model.feature_count() == FEATURE_COLUMNS.len() => {
                tracing::info!(
                    "Loaded persisted swipe classifier (users: {:?}, {} samples)",
                    model.trained_on,
                    model.sample_count
                );
                *self.current.write() = Some(Arc::new(model));
                ModelState::Ready
            }
            Ok(model) => {
                tracing::warn!(
                    "Persisted model has {} features but the schema has {}; discarding",
                    model.feature_count(),
                    FEATURE_COLUMNS.len()
                );
                ModelState::Unloaded
            }
            Err(e) => {
                tracing::warn!("Persisted model is corrupt: {}; discarding", e);
                ModelState::Unloaded
            }
        }
    }

    /// Retrain from the current store contents if eligibility is met.
    ///
    /// Single-flight: while one retrain is running, concurrent calls return
    /// `AlreadyRunning` immediately without blocking or queueing. A failed
    /// retrain leaves the previously served model untouched.
    pub async fn maybe_retrain(&self, pool: &SqlitePool) -> Result<RetrainOutcome, RetrainError> {
        if self
            .training
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Retraining already in flight, skipping");
            return Ok(RetrainOutcome::AlreadyRunning);
        }
        let _flag = TrainingFlag(&self.training);

        let snapshot = swipe::eligible_users(pool, self.min_strokes).await?;
        if snapshot.strokes.is_empty() {
            return Err(RetrainError::NoDataAvailable);
        }
        if snapshot.eligible.len() < 2 {
            return Err(RetrainError::NeedMultipleUsers {
                eligible: snapshot.eligible.len(),
                min_strokes: self.min_strokes,
            });
        }

        let (x, y) = build_training_set(&snapshot)?;
        tracing::info!(
            "Training swipe classifier on {} samples from {} users",
            y.len(),
            snapshot.eligible.len()
        );

        // CPU-bound; keep it off the async workers
        let model = tokio::task::spawn_blocking(move || classifier::train(&x, &y))
            .await
            .map_err(|e| RetrainError::TaskAborted(e.to_string()))??;
        let model = Arc::new(model);

        *self.current.write() = Some(model.clone());
        tracing::info!("Swipe classifier ready (users: {:?})", model.trained_on);

        // The in-memory model stays active even if the disk write fails
        self.persist(&model).await?;
        Ok(RetrainOutcome::Completed)
    }

    async fn persist(&self, model: &SwipeModel) -> Result<(), RetrainError> {
        let blob = serde_json::to_vec_pretty(model)
            .map_err(|e| RetrainError::Persist(std::io::Error::new(ErrorKind::InvalidData, e)))?;
        tokio::fs::write(&self.model_path, blob).await?;
        tracing::debug!("Model persisted to {}", self.model_path.display());
        Ok(())
    }
}

/// Rows = one per eligible-user sample, labels = user ids, columns = the
/// fixed feature schema minus the identity column.
fn build_training_set(
    snapshot: &EligibleUsers,
) -> Result<(Array2<f64>, Vec<i64>), ClassifierError> {
    let dim = FEATURE_COLUMNS.len();
    let mut flat = Vec::new();
    let mut labels = Vec::new();

    for &user_id in &snapshot.eligible {
        if let Some(strokes) = snapshot.strokes.get(&user_id) {
            for stroke in strokes {
                if stroke.len() != dim {
                    return Err(ClassifierError::DimensionMismatch {
                        expected: dim,
                        got: stroke.len(),
                    });
                }
                flat.extend_from_slice(stroke);
                labels.push(user_id);
            }
        }
    }

    let x = Array2::from_shape_vec((labels.len(), dim), flat).map_err(|_| {
        ClassifierError::DimensionMismatch { expected: dim, got: 0 }
    })?;
    Ok((x, labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::models::swipe::test_support::seed_user;

    fn manager(dir: &tempfile::TempDir) -> ModelManager {
        ModelManager::new(dir.path().join("model.json"), 3)
    }

    #[tokio::test]
    async fn test_retrain_empty_store() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let mm = manager(&dir);

        let err = mm.maybe_retrain(&pool).await.unwrap_err();
        assert!(matches!(err, RetrainError::NoDataAvailable));
        assert_eq!(mm.state(), ModelState::Unloaded);
    }

    #[tokio::test]
    async fn test_retrain_needs_two_eligible_users() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let mm = manager(&dir);

        seed_user(&pool, 3, 0.5, 5).await;
        seed_user(&pool, 4, 0.9, 1).await;

        let err = mm.maybe_retrain(&pool).await.unwrap_err();
        assert!(matches!(err, RetrainError::NeedMultipleUsers { eligible: 1, .. }));
        assert!(mm.current_model().is_none());
    }

    #[tokio::test]
    async fn test_retrain_success_swaps_and_persists() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let mm = manager(&dir);

        seed_user(&pool, 1, 0.1, 4).await;
        seed_user(&pool, 2, 5.0, 4).await;

        let outcome = mm.maybe_retrain(&pool).await.unwrap();
        assert_eq!(outcome, RetrainOutcome::Completed);
        assert_eq!(mm.state(), ModelState::Ready);

        let model = mm.current_model().expect("model");
        assert_eq!(model.trained_on, vec![1, 2]);
        assert!(dir.path().join("model.json").exists());
    }

    #[tokio::test]
    async fn test_load_from_disk_round_trip() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let mm = manager(&dir);

        seed_user(&pool, 1, 0.1, 4).await;
        seed_user(&pool, 2, 5.0, 4).await;
        mm.maybe_retrain(&pool).await.unwrap();

        let fresh = manager(&dir);
        assert_eq!(fresh.load_from_disk(), ModelState::Ready);
        let model = fresh.current_model().expect("model");
        assert_eq!(model.trained_on, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_load_from_disk_discards_corrupt_blob() {
        let dir = tempfile::tempdir().unwrap();
        let mm = manager(&dir);

        std::fs::write(dir.path().join("model.json"), b"not json at all").unwrap();
        assert_eq!(mm.load_from_disk(), ModelState::Unloaded);
        assert!(mm.current_model().is_none());
    }

    #[tokio::test]
    async fn test_single_flight_short_circuit() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let mm = manager(&dir);

        seed_user(&pool, 1, 0.1, 4).await;
        seed_user(&pool, 2, 5.0, 4).await;

        // Hold the flag the way an in-flight retrain would
        assert!(mm
            .training
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok());
        assert_eq!(mm.state(), ModelState::Training);

        let outcome = mm.maybe_retrain(&pool).await.unwrap();
        assert_eq!(outcome, RetrainOutcome::AlreadyRunning);
        assert!(mm.current_model().is_none());

        mm.training.store(false, Ordering::Release);
        assert_eq!(mm.maybe_retrain(&pool).await.unwrap(), RetrainOutcome::Completed);
    }

    #[tokio::test]
    async fn test_concurrent_retrains_leave_one_consistent_model() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let mm = std::sync::Arc::new(manager(&dir));

        seed_user(&pool, 1, 0.1, 4).await;
        seed_user(&pool, 2, 5.0, 4).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let mm = mm.clone();
            let pool = pool.clone();
            handles.push(tokio::spawn(async move { mm.maybe_retrain(&pool).await }));
        }

        let mut completed = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                RetrainOutcome::Completed => completed += 1,
                RetrainOutcome::AlreadyRunning => {}
            }
        }

        assert!(completed >= 1);
        assert_eq!(mm.state(), ModelState::Ready);
        assert_eq!(mm.current_model().unwrap().trained_on, vec![1, 2]);
    }
}
