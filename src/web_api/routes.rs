//! API Routes

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::frame_buffer::BufferState;
use crate::models::{
    ApiResponse, DetectionQuery, ModelAction, ModelControlRequest, ModelControlResponse,
    StreamReleaseResponse,
};
use crate::state::AppState;
use crate::stream_registry::CameraHandle;

const DEFAULT_DETECTION_LIMIT: usize = 100;
const MAX_DETECTION_LIMIT: usize = 500;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(super::health_check))
        // Model control
        .route("/model-control", post(model_control))
        .route("/api/workers", get(list_workers))
        // Video
        .route("/video_feed/:camera_id", get(video_feed))
        .route("/capture_frame/:camera_id", get(capture_frame))
        // Streams
        .route("/api/streams", get(list_streams))
        .route("/api/streams/:camera_id", delete(release_stream))
        // Detections
        .route("/api/detections", get(list_detections))
        .with_state(state)
}

async fn resolve_address(state: &AppState, camera_id: &str) -> Result<String> {
    state
        .cameras
        .resolve(camera_id)
        .await?
        .ok_or_else(|| Error::CameraNotFound(camera_id.to_string()))
}

// ========================================
// Model control
// ========================================

async fn model_control(
    State(state): State<AppState>,
    Json(req): Json<ModelControlRequest>,
) -> Result<impl IntoResponse> {
    if req.camera_id.trim().is_empty() || req.model_id.trim().is_empty() {
        return Err(Error::Validation(
            "camera_id and model_id are required".to_string(),
        ));
    }

    let response = match req.action {
        ModelAction::Start => {
            let worker = state.supervisor.start(&req.camera_id, &req.model_id).await?;
            ModelControlResponse {
                message: format!("Model {} started on camera {}", req.model_id, req.camera_id),
                worker,
            }
        }
        ModelAction::Stop => {
            let worker = state.supervisor.stop(&req.camera_id, &req.model_id)?;
            ModelControlResponse {
                message: format!("Model {} stopped on camera {}", req.model_id, req.camera_id),
                worker,
            }
        }
    };

    Ok(Json(ApiResponse::success(response)))
}

async fn list_workers(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.supervisor.list()))
}

// ========================================
// Video
// ========================================

fn multipart_part(jpeg: &[u8]) -> Vec<u8> {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

/// Next frame for a live viewer; `None` ends the stream
async fn next_stream_frame(handle: &CameraHandle, wait: Duration) -> Option<Vec<u8>> {
    loop {
        let read = match handle.lease().await {
            Ok(lease) => lease.read(wait).await,
            Err(Error::Busy(_)) => continue,
            Err(e) => Err(e),
        };
        match read {
            Ok(Some(frame)) => return Some(frame.data),
            Ok(None) if handle.state() == BufferState::Running => continue,
            Ok(None) => return None,
            Err(e) => {
                tracing::info!(camera_id = %handle.camera_id(), error = %e, "Ending video feed");
                return None;
            }
        }
    }
}

/// Live MJPEG stream (`multipart/x-mixed-replace`)
async fn video_feed(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> Result<Response> {
    let address = resolve_address(&state, &camera_id).await?;
    let handle = state.registry.acquire(&camera_id, &address).await?;
    let wait = Duration::from_millis(state.config.snapshot_timeout_ms);

    tracing::debug!(camera_id = %camera_id, "Video feed opened");

    let stream = futures::stream::unfold(handle, move |handle: Arc<CameraHandle>| async move {
        let jpeg = next_stream_frame(&handle, wait).await?;
        Some((Ok::<_, std::io::Error>(multipart_part(&jpeg)), handle))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .body(Body::from_stream(stream))
        .map_err(|e| Error::Internal(format!("Failed to build stream response: {}", e)))
}

/// Single JPEG frame
async fn capture_frame(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> Result<Response> {
    let address = resolve_address(&state, &camera_id).await?;
    let handle = state.registry.acquire(&camera_id, &address).await?;
    let wait = Duration::from_millis(state.config.snapshot_timeout_ms);

    let frame = {
        let lease = handle.lease().await?;
        lease.read(wait).await?
    };

    match frame {
        Some(frame) => Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "image/jpeg"),
                (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            ],
            frame.data,
        )
            .into_response()),
        None => Err(Error::NoFrame(camera_id)),
    }
}

// ========================================
// Streams
// ========================================

async fn list_streams(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.registry.open_cameras().await))
}

/// Stop the camera's workers and close its connection
async fn release_stream(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> impl IntoResponse {
    let stopped_workers = state.supervisor.stop_camera(&camera_id);
    let released = state.registry.release(&camera_id).await;

    tracing::info!(
        camera_id = %camera_id,
        released = released,
        stopped_workers = stopped_workers.len(),
        "Stream release requested"
    );

    Json(ApiResponse::success(StreamReleaseResponse {
        camera_id,
        released,
        stopped_workers,
    }))
}

// ========================================
// Detections
// ========================================

async fn list_detections(
    State(state): State<AppState>,
    Query(query): Query<DetectionQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_DETECTION_LIMIT)
        .min(MAX_DETECTION_LIMIT);

    let events = match query.camera_id {
        Some(camera_id) => state.event_log.get_by_camera(&camera_id, limit).await,
        None => state.event_log.get_latest(limit).await,
    };

    Json(ApiResponse::success(events))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipart_part_framing() {
        let part = multipart_part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(part.ends_with(&[0xFF, 0xD9, b'\r', b'\n']));
    }
}
