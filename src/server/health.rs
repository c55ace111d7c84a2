//! Liveness and drain status endpoints.
//!
//! `/healthz` answers as long as the server accepts connections. `/status`
//! reports whether shutdown has begun and how many commands are still
//! running, for orchestrators that wait out a drain.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
}

/// Health check handler.
///
/// # Example
///
/// ```ignore
/// GET /healthz HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: application/json
///
/// {"status":"ok"}
/// ```
pub async fn healthz_handler() -> Json<Health> {
    Json(Health { status: "ok" })
}

#[derive(Debug, Serialize)]
pub struct Status {
    pub shutting_down: bool,
    pub in_progress_operations: usize,
    pub version: &'static str,
}

pub async fn status_handler(State(app_state): State<AppState>) -> Json<Status> {
    let drain = app_state.parts().drainer.status();
    Json(Status {
        shutting_down: drain.shutting_down,
        in_progress_operations: drain.in_progress_operations,
        version: env!("CARGO_PKG_VERSION"),
    })
}
