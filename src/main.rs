//! TouchAlytics Biometric Backend Server
//!
//! Authenticates users by the dynamics of their touchscreen swipes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   TOUCHALYTICS SERVER                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌────────────┐  ┌─────────────────────────┐  │
//! │  │  HTTP API │  │  Command   │  │  Model Manager          │  │
//! │  │  (Axum)   │  │  Dispatcher│  │  (single-flight         │  │
//! │  │           │  │  (TCP)     │  │   retraining)           │  │
//! │  └─────┬─────┘  └─────┬──────┘  └────────────┬────────────┘  │
//! │        └──────────────┼─────────────────────-┘               │
//! │                       ▼                                      │
//! │                ┌─────────────┐                               │
//! │                │   SQLite    │                               │
//! │                └─────────────┘                               │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod db;
mod handlers;
mod logic;
mod models;
mod notify;
mod protocol;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::logic::{AttemptTracker, AuthEngine, ModelManager, ModelState, RetrainError, RetrainOutcome};
use crate::notify::Notifier;

/// Most recently issued verification code; polled by the mobile client
/// over HTTP
#[derive(Debug, Clone)]
pub struct VerificationToken {
    pub email: String,
    pub token: String,
    pub issued_at: DateTime<Utc>,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::SqlitePool,
    pub config: Arc<config::Config>,
    pub models: Arc<ModelManager>,
    pub notifier: Arc<Notifier>,
    pub engine: Arc<AuthEngine>,
    pub verification: Arc<RwLock<Option<VerificationToken>>>,
}

impl AppState {
    pub fn new(config: config::Config, pool: sqlx::SqlitePool, notifier: Notifier) -> Self {
        let notifier = Arc::new(notifier);
        let models = Arc::new(ModelManager::new(
            config.model_path.clone(),
            config.min_strokes,
        ));
        let attempts = Arc::new(AttemptTracker::new(
            config.alert_time_window_secs,
            config.min_failed_attempts,
            config.alert_cooldown_secs,
        ));
        let engine = Arc::new(AuthEngine::new(
            pool.clone(),
            models.clone(),
            attempts,
            notifier.clone(),
            config.min_strokes,
        ));

        Self {
            pool,
            config: Arc::new(config),
            models,
            notifier,
            engine,
            verification: Arc::new(RwLock::new(None)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "touchalytics_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env();

    tracing::info!("TouchAlytics server starting...");
    tracing::info!("Database: {}", config.database_url);

    // Initialize database pool and schema
    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;

    let notifier = Notifier::from_config(&config);
    let state = AppState::new(config, pool, notifier);

    // Load the persisted classifier; train once at startup if none loads
    if state.models.load_from_disk() == ModelState::Unloaded {
        spawn_startup_training(&state);
    }

    // Swipe-command dispatcher on its own port
    let dispatcher_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = protocol::dispatcher::serve(dispatcher_state).await {
            tracing::error!("Dispatcher failed: {}", e);
        }
    });

    // HTTP API
    let app = create_router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.http_port));
    tracing::info!("HTTP API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::check))
        .route("/token", get(handlers::token::current))
        .route("/authenticate/:user_id", post(handlers::authenticate::authenticate))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// One best-effort training pass at startup; eligibility shortfalls are
/// normal on a fresh install and only logged.
fn spawn_startup_training(state: &AppState) {
    let models = state.models.clone();
    let pool = state.pool.clone();
    tokio::spawn(async move {
        match models.maybe_retrain(&pool).await {
            Ok(RetrainOutcome::Completed) => {
                tracing::info!("Startup training completed")
            }
            Ok(RetrainOutcome::AlreadyRunning) => {}
            Err(e @ (RetrainError::NoDataAvailable | RetrainError::NeedMultipleUsers { .. })) => {
                tracing::info!("Not enough data to train at startup: {}", e)
            }
            Err(e) => tracing::error!("Startup training failed: {}", e),
        }
    });
}
