//! Swipe authentication handler
//!
//! POST /authenticate/:user_id with the full feature schema as the JSON
//! body. The `match` field is "true"/"false"/"unknown"; only "unknown"
//! marks an undetermined or failed call. Status codes follow the mobile
//! client's contract: 200 matched, 400 not matched, 500 otherwise.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::logic::{AuthError, MatchOutcome};
use crate::AppState;

pub async fn authenticate(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    body: String,
) -> (StatusCode, Json<Value>) {
    let payload: Value = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(_) => {
            return unknown(StatusCode::INTERNAL_SERVER_ERROR, "Invalid or missing JSON body")
        }
    };

    match state.engine.authenticate(user_id, &payload).await {
        Ok(MatchOutcome::Matched) => (
            StatusCode::OK,
            Json(json!({"match": "true", "message": "Matched"})),
        ),
        Ok(MatchOutcome::NotMatched) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"match": "false", "message": "Not Matched"})),
        ),
        Ok(MatchOutcome::Undetermined) => unknown(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!(
                "Biometric model not available: need at least two users with >= {} strokes each.",
                state.config.min_strokes
            ),
        ),
        Err(AuthError::Features(e)) => {
            unknown(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
        Err(AuthError::ModelUnavailable) => unknown(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Model unavailable. Please train the model.",
        ),
        Err(AuthError::Storage(e)) => {
            tracing::error!("Storage error during authentication: {}", e);
            unknown(StatusCode::INTERNAL_SERVER_ERROR, "Internal storage error")
        }
        Err(AuthError::Classifier(e)) => {
            tracing::error!("Classifier error during authentication: {}", e);
            unknown(StatusCode::INTERNAL_SERVER_ERROR, "Internal classifier error")
        }
    }
}

fn unknown(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({"match": "unknown", "message": message})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::test_pool;
    use crate::models::swipe::test_support::{sample_payload, seed_user};
    use crate::notify::Notifier;

    async fn ready_state() -> AppState {
        let pool = test_pool().await;
        let state = AppState::new(Config::for_tests(), pool, Notifier::recording());
        seed_user(&state.pool, 1, 0.1, 4).await;
        seed_user(&state.pool, 2, 5.0, 4).await;
        state.models.maybe_retrain(&state.pool).await.unwrap();
        state
    }

    #[tokio::test]
    async fn test_matched_response() {
        let state = ready_state().await;

        let (status, Json(body)) = authenticate(
            State(state),
            Path(1),
            sample_payload(1, 0.1).to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["match"], "true");
        assert_eq!(body["message"], "Matched");
    }

    #[tokio::test]
    async fn test_not_matched_response() {
        let state = ready_state().await;

        let (status, Json(body)) = authenticate(
            State(state),
            Path(1),
            sample_payload(1, 5.0).to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["match"], "false");
        assert_eq!(body["message"], "Not Matched");
    }

    #[tokio::test]
    async fn test_undetermined_response() {
        let pool = test_pool().await;
        let state = AppState::new(Config::for_tests(), pool, Notifier::recording());
        seed_user(&state.pool, 1, 0.1, 4).await;

        let (status, Json(body)) = authenticate(
            State(state),
            Path(1),
            sample_payload(1, 0.1).to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["match"], "unknown");
        assert!(body["message"].as_str().unwrap().contains("at least two users"));
    }

    #[tokio::test]
    async fn test_missing_feature_response() {
        let state = ready_state().await;

        let mut payload = sample_payload(1, 0.1);
        payload.as_object_mut().unwrap().remove("startX");

        let (status, Json(body)) =
            authenticate(State(state), Path(1), payload.to_string()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["match"], "unknown");
        assert!(body["message"].as_str().unwrap().contains("missing 'startX'"));
    }

    #[tokio::test]
    async fn test_invalid_json_body() {
        let state = ready_state().await;

        let (status, Json(body)) =
            authenticate(State(state), Path(1), "not json".to_string()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["match"], "unknown");
        assert_eq!(body["message"], "Invalid or missing JSON body");
    }
}
