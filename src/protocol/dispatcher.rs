//! Connection dispatcher
//!
//! Accept loop for the swipe-command protocol: one spawned task per
//! connection, commands processed one at a time per session, one response
//! written before the next read. Malformed input answers a structured
//! error and keeps the session open; end-of-stream or the idle timeout
//! ends it.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::models::swipe::{self, SwipeSample};
use crate::models::Credential;
use crate::notify;
use crate::protocol::{parse_command, Command, Reply, VerifyMode};
use crate::{AppState, VerificationToken};
use crate::logic::RetrainOutcome;

/// Bind the dispatcher port and serve connections until the process exits
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", state.config.dispatcher_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Command dispatcher listening on {}", addr);

    loop {
        let (socket, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            tracing::debug!("Connection from {}", peer);
            if let Err(e) = handle_connection(state, socket).await {
                tracing::debug!("Session with {} ended: {}", peer, e);
            }
        });
    }
}

async fn handle_connection(state: AppState, socket: TcpStream) -> std::io::Result<()> {
    let idle = Duration::from_secs(state.config.idle_timeout_secs);
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match timeout(idle, lines.next_line()).await {
            Err(_) => {
                tracing::debug!("Idle timeout, closing session");
                break;
            }
            Ok(Ok(None)) => break,
            Ok(Ok(Some(line))) => line,
            Ok(Err(e)) => return Err(e),
        };

        if line.trim().is_empty() {
            continue;
        }

        let reply = match parse_command(&line) {
            Ok(command) => handle_command(&state, command).await,
            Err(e) => Reply::json(json!({"status": "error", "message": e.to_string()})),
        };

        writer.write_all(reply.to_wire().as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }

    Ok(())
}

/// Execute one command against shared state
pub async fn handle_command(state: &AppState, command: Command) -> Reply {
    match command {
        Command::Verify { email, mode } => handle_verify(state, email, mode).await,

        Command::StoreCredential { email, password_hash, device_id } => {
            match Credential::exists_by_email(&state.pool, &email).await {
                Ok(true) => Reply::json(json!({"status": "exists"})),
                Ok(false) => {
                    match Credential::create(&state.pool, &email, &password_hash, &device_id).await
                    {
                        Ok(user_id) => {
                            tracing::info!("Registered {} as user {}", email, user_id);
                            Reply::json(json!({"status": "ok", "userID": user_id}))
                        }
                        Err(e) => db_error(e),
                    }
                }
                Err(e) => db_error(e),
            }
        }

        Command::CheckCredential { email, password_hash, device_id } => {
            let credential =
                match Credential::find_by_login(&state.pool, &email, &password_hash).await {
                    Ok(Some(credential)) => credential,
                    Ok(None) => return Reply::json(json!({"status": "fail"})),
                    Err(e) => return db_error(e),
                };

            if let Some(stored) = &credential.device_id {
                if *stored != device_id {
                    tracing::warn!(
                        "User {} signed in from unrecognized device",
                        credential.user_id
                    );
                    notify::send_device_mismatch_alert(
                        &state.notifier,
                        &credential.email,
                        &device_id,
                    )
                    .await;
                }
            }

            match swipe::count_for_user(&state.pool, credential.user_id).await {
                Ok(features) => Reply::json(json!({
                    "status": "ok",
                    "userID": credential.user_id,
                    "features": features,
                })),
                Err(e) => db_error(e),
            }
        }

        Command::UpdatePassword { email, password_hash, device_id: _ } => {
            match Credential::find_by_email(&state.pool, &email).await {
                Ok(None) => Reply::json(json!({"status": "dne"})),
                Ok(Some(credential)) if credential.password_hash == password_hash => {
                    Reply::json(json!({"status": "same"}))
                }
                Ok(Some(_)) => {
                    match Credential::update_password(&state.pool, &email, &password_hash).await {
                        Ok(()) => Reply::json(json!({"status": "ok"})),
                        Err(e) => db_error(e),
                    }
                }
                Err(e) => db_error(e),
            }
        }

        Command::FeatureCount { user_id } => {
            let count = match swipe::count_for_user(&state.pool, user_id).await {
                Ok(count) => count,
                Err(e) => return db_error(e),
            };

            if count >= state.config.max_rows_per_user as i64 {
                spawn_cap_retrain(state, user_id);
            }

            Reply::Plain(count.to_string())
        }

        Command::StoreFeatures { payload } => {
            let sample = match SwipeSample::from_json(&payload) {
                Ok(sample) => sample,
                Err(e) => {
                    return Reply::json(json!({"status": "error", "message": e.to_string()}))
                }
            };

            let count = match swipe::count_for_user(&state.pool, sample.user_id).await {
                Ok(count) => count,
                Err(e) => return db_error(e),
            };
            // Count-then-insert is not atomic across connections; the
            // overshoot is bounded by the number of concurrent writers.
            if count >= state.config.max_rows_per_user as i64 {
                return Reply::json(json!({"status": "cap_reached", "count": count}));
            }

            match sample.insert(&state.pool).await {
                Ok(()) => Reply::json(json!({"status": "ok", "count": count + 1})),
                Err(e) => db_error(e),
            }
        }

        Command::LegacyStoreFeatures { payload } => {
            let sample = match SwipeSample::from_json(&payload) {
                Ok(sample) => sample,
                Err(e) => {
                    return Reply::json(json!({"status": "error", "message": e.to_string()}))
                }
            };
            match sample.insert(&state.pool).await {
                Ok(()) => Reply::json(json!({"status": "received"})),
                Err(e) => db_error(e),
            }
        }
    }
}

async fn handle_verify(state: &AppState, email: String, mode: VerifyMode) -> Reply {
    let exists = match Credential::exists_by_email(&state.pool, &email).await {
        Ok(exists) => exists,
        Err(e) => return db_error(e),
    };

    match (mode, exists) {
        (VerifyMode::Dne, true) => Reply::json(json!({"status": "exists"})),
        (VerifyMode::Exists, false) => Reply::json(json!({"status": "dne"})),
        _ => {
            let code = generate_verification_code();
            *state.verification.write() = Some(VerificationToken {
                email: email.clone(),
                token: code.clone(),
                issued_at: Utc::now(),
            });

            let body = format!(
                "Hello,\n\n\
                 Your TouchAlytics verification code is {code}.\n\n\
                 If you did not request this code you can ignore this message.\n\
                 — TouchAlytics Security"
            );
            if let Err(e) = state
                .notifier
                .send(&email, "TouchAlytics Verification Code", &body)
                .await
            {
                tracing::error!("Failed to send verification code to {}: {}", email, e);
            }

            Reply::json(json!({"status": "ok", "token": code}))
        }
    }
}

fn generate_verification_code() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

/// Cap crossing is the only request-path retraining trigger; it runs in
/// the background and never affects the FCOUNT reply.
fn spawn_cap_retrain(state: &AppState, user_id: i64) {
    tracing::info!("User {} reached the swipe cap, checking retrain", user_id);
    let models = state.models.clone();
    let pool = state.pool.clone();
    tokio::spawn(async move {
        match models.maybe_retrain(&pool).await {
            Ok(RetrainOutcome::Completed) => tracing::info!("Cap-triggered retrain completed"),
            Ok(RetrainOutcome::AlreadyRunning) => {
                tracing::debug!("Cap-triggered retrain skipped, already running")
            }
            Err(e) => tracing::warn!("Cap-triggered retrain failed: {}", e),
        }
    });
}

fn db_error(e: sqlx::Error) -> Reply {
    tracing::error!("Database error: {}", e);
    Reply::json(json!({"status": "db_error"}))
}
