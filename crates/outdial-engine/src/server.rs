//! Control surface: a single loopback endpoint that (re)starts a dialing
//! run. Everything else is 404.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::{error, info};

use crate::config::DialerConfig;
use crate::error::Result;
use crate::orchestrator::{DialerEngine, RunStatus};

/// Build the control router.
pub fn router(engine: Arc<DialerEngine>) -> Router {
    Router::new()
        .route("/start", get(handle_start))
        .fallback(handle_not_found)
        .with_state(engine)
}

/// Serve the control surface on loopback.
pub async fn serve(engine: Arc<DialerEngine>, port: u16) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "🌐 Control surface listening");
    axum::serve(listener, router(engine))
        .await
        .map_err(|e| crate::error::DialerError::orchestration(format!("HTTP server failed: {e}")))
}

async fn handle_start(State(engine): State<Arc<DialerEngine>>) -> Response {
    // Configuration is re-read from the environment on every trigger
    let refreshed = match DialerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Rejecting /start: configuration reload failed");
            return error_response(e.to_string());
        }
    };

    match engine.trigger_run(Some(refreshed)).await {
        Ok(RunStatus::Started) => (
            StatusCode::CREATED,
            Json(json!({"status": "ok", "message": "Dialer started."})),
        )
            .into_response(),
        Ok(RunStatus::Restarted) => (
            StatusCode::OK,
            Json(json!({"status": "ok", "message": "Dialer run restarted."})),
        )
            .into_response(),
        Ok(RunStatus::AlreadyRunning) => (
            StatusCode::OK,
            Json(json!({"status": "ok", "message": "Dialer already running."})),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Run trigger failed");
            error_response(e.to_string())
        }
    }
}

async fn handle_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"status": "error", "message": "Not found"})),
    )
        .into_response()
}

fn error_response(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"status": "error", "message": message})),
    )
        .into_response()
}
