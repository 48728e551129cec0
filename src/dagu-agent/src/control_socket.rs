//! Control-Plane Handler : a tiny HTTP server over a Unix domain
//! socket exposing `GET /status` and `POST /stop`. Grounded on
//! `cortex-app-server::lib::create_router_with_state` / `run_with_shutdown`:
//! build the `Router` with shared state, bind it to a listener, serve with
//! graceful shutdown wired to the same cancellation signal the rest of the
//! Agent uses.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use dagu_types::RunStatus;
use serde_json::json;
use tokio::net::UnixListener;
use tracing::info;

use crate::error::{AgentError, Result};
use crate::runner::AbortFlag;
use crate::status_writer::StatusWriter;

#[derive(Clone)]
struct ControlState {
    status_writer: Arc<StatusWriter>,
    abort: AbortFlag,
}

/// Serves the control socket until `shutdown` resolves. `GET /status`
/// always reports the run as `Running` (this endpoint only exists while the
/// Agent process is alive, so that's the only status it can ever observe
/// itself in — §9 Open Question); `POST /stop` raises the abort flag and
/// returns immediately without waiting for cleanup.
pub async fn serve(
    socket_path: &std::path::Path,
    status_writer: Arc<StatusWriter>,
    abort: AbortFlag,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    if socket_path.exists() {
        tokio::fs::remove_file(socket_path).await?;
    }

    let listener = UnixListener::bind(socket_path)
        .map_err(|e| AgentError::SocketBind(format!("{}: {e}", socket_path.display())))?;

    let state = ControlState { status_writer, abort };
    let app = Router::new()
        .route("/status", get(get_status))
        .route("/stop", post(post_stop))
        .fallback(not_found)
        .with_state(state);

    info!(path = %socket_path.display(), "control socket listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| AgentError::SocketBind(e.to_string()))?;

    let _ = tokio::fs::remove_file(socket_path).await;
    Ok(())
}

async fn get_status(State(state): State<ControlState>) -> impl IntoResponse {
    let status = state.status_writer.snapshot(RunStatus::Running, None).await;
    Json(status)
}

/// `200 text/plain "OK"`, asynchronous SIGTERM (§6).
async fn post_stop(State(state): State<ControlState>) -> impl IntoResponse {
    crate::signal::request_abort(&state.abort);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain")
        .body("OK".to_string())
        .unwrap()
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"message": "Not found"})))
}
