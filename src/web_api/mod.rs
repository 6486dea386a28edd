//! WebAPI - Control surface
//!
//! ## Responsibilities
//!
//! - Model start/stop control
//! - Live MJPEG stream and single-frame capture
//! - Stream, worker and detection listings

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_connected = match &state.pool {
        Some(pool) => sqlx::query("SELECT 1").execute(pool).await.is_ok(),
        None => false,
    };

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.started_at.elapsed().as_secs(),
        db_connected,
        open_streams: state.registry.open_cameras().await.len(),
        running_workers: state.supervisor.count(),
    };

    Json(response)
}
