//! Shared request/response types for the control surface

use crate::worker_supervisor::WorkerInfo;
use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub db_connected: bool,
    pub open_streams: usize,
    pub running_workers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelAction {
    Start,
    Stop,
}

/// `POST /model-control` body
#[derive(Debug, Clone, Deserialize)]
pub struct ModelControlRequest {
    pub camera_id: String,
    pub model_id: String,
    pub action: ModelAction,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelControlResponse {
    pub message: String,
    pub worker: WorkerInfo,
}

/// `DELETE /api/streams/:camera_id` result
#[derive(Debug, Clone, Serialize)]
pub struct StreamReleaseResponse {
    pub camera_id: String,
    pub released: bool,
    pub stopped_workers: Vec<WorkerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionQuery {
    pub camera_id: Option<String>,
    pub limit: Option<usize>,
}
