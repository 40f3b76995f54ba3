//! Verification token handler
//!
//! The mobile client polls this endpoint after requesting a verification
//! code over the command protocol.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::AppState;

pub async fn current(State(state): State<AppState>) -> Json<Value> {
    let token = state.verification.read().clone();

    match token {
        Some(token) => Json(json!({
            "status": "ok",
            "token": token.token,
            "email": token.email,
            "issued_at": token.issued_at.to_rfc3339(),
        })),
        None => Json(json!({"status": "none", "token": null})),
    }
}
