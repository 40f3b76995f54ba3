//! Authentication engine
//!
//! Orchestrates one authentication request: schema validation, the
//! eligibility gate, prediction against the active model, and outcome
//! reporting to the attempt tracker. Training never runs here; the model
//! comes from whatever the ModelManager currently serves.

use std::sync::Arc;

use serde_json::Value;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::logic::attempts::AttemptTracker;
use crate::logic::classifier::ClassifierError;
use crate::logic::model_manager::ModelManager;
use crate::models::swipe::{self, FeatureError};
use crate::notify::Notifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Predicted identity equals the claimed identity
    Matched,
    /// Prediction disagrees with the claim; still a successful call
    NotMatched,
    /// Fewer than 2 eligible users; neutral, client falls back to password
    Undetermined,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Features(#[from] FeatureError),

    #[error("model unavailable")]
    ModelUnavailable,

    #[error(transparent)]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),
}

pub struct AuthEngine {
    pool: SqlitePool,
    models: Arc<ModelManager>,
    attempts: Arc<AttemptTracker>,
    notifier: Arc<Notifier>,
    min_strokes: u32,
}

impl AuthEngine {
    pub fn new(
        pool: SqlitePool,
        models: Arc<ModelManager>,
        attempts: Arc<AttemptTracker>,
        notifier: Arc<Notifier>,
        min_strokes: u32,
    ) -> Self {
        Self {
            pool,
            models,
            attempts,
            notifier,
            min_strokes,
        }
    }

    /// Decide whether one swipe matches the claimed identity.
    ///
    /// `Undetermined` is returned before the model is consulted whenever
    /// fewer than 2 users are eligible, and is never reported to the
    /// attempt tracker.
    pub async fn authenticate(
        &self,
        claimed_user: i64,
        payload: &Value,
    ) -> Result<MatchOutcome, AuthError> {
        let features = swipe::feature_vector(payload)?;

        let snapshot = swipe::eligible_users(&self.pool, self.min_strokes).await?;
        if snapshot.eligible.len() <= 1 {
            tracing::debug!(
                "Only {} eligible user(s); biometric decision unavailable",
                snapshot.eligible.len()
            );
            return Ok(MatchOutcome::Undetermined);
        }

        let model = self.models.current_model().ok_or(AuthError::ModelUnavailable)?;
        let predicted = model.predict(&features)?;
        let matched = predicted == claimed_user;

        self.attempts
            .record_attempt(&self.pool, &self.notifier, claimed_user, matched)
            .await;

        if matched {
            Ok(MatchOutcome::Matched)
        } else {
            tracing::debug!(
                "User {} claimed but classifier predicted {}",
                claimed_user,
                predicted
            );
            Ok(MatchOutcome::NotMatched)
        }
    }
}
