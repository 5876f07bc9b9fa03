//! HTTP front end.

pub mod error;
mod handlers;
pub mod types;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::Database;
use crate::dialogue::{DialogueEngine, HttpDialogueEngine};
use crate::orchestrator::ChatOrchestrator;
use crate::otp::OtpVerifier;
use crate::slots::SlotController;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Database>>,
    engine: Arc<dyn DialogueEngine>,
    chat: Arc<ChatOrchestrator>,
    otp: OtpVerifier,
}

impl AppState {
    pub fn new(db: Database, engine: Arc<dyn DialogueEngine>, config: &Config) -> Self {
        let db = Arc::new(Mutex::new(db));
        let otp = OtpVerifier::from_config(&config.otp);
        let chat = ChatOrchestrator::new(
            Arc::clone(&db),
            Arc::clone(&engine),
            SlotController::from_config(&config.slots),
            otp.clone(),
        )
        .with_otp_gate(config.otp.gate_enabled);

        Self {
            db,
            engine,
            chat: Arc::new(chat),
            otp,
        }
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/chat", post(handlers::chat))
        .route("/chat/release", post(handlers::release))
        .route("/otp/generate", post(handlers::otp_generate))
        .route("/otp/verify", post(handlers::otp_verify))
        .route("/otp/status/:phone", get(handlers::otp_status))
        .route("/otp/verified/:phone", get(handlers::otp_verified))
        .route("/pan/status", post(handlers::pan_status))
        .route("/tan/status", post(handlers::tan_status))
        .route("/consent/grant", post(handlers::consent_grant))
        .route("/consent/check", post(handlers::consent_check))
        .route("/consent/revoke", post(handlers::consent_revoke))
        .route("/consent/history/:phone", get(handlers::consent_history))
        .route("/conversations/pan", post(handlers::save_pan))
        .route("/conversations/tan", post(handlers::save_tan))
        .route("/conversations/ensure/:phone", post(handlers::ensure_phone))
        .route("/conversations/:phone", get(handlers::conversations))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open storage, connect the engine and serve until interrupted.
pub async fn serve(config: Config) -> Result<()> {
    let db = match &config.database_path {
        Some(path) => Database::open_at(path.clone())?,
        None => Database::open()?,
    };
    let created = db.init_slot_pool(config.slots.pool_size)?;
    tracing::info!(pool_size = config.slots.pool_size, created, "slot pool ready");

    let engine = Arc::new(HttpDialogueEngine::new(&config.engine)?);
    let state = AppState::new(db, engine, &config);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!(
        http_port = config.http_port,
        engine = %config.engine.webhook_url,
        otp_gate = config.otp.gate_enabled,
        "chat bridge listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("chat bridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
