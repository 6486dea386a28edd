//! Application state
//!
//! Holds all shared components and state

use crate::ai_client::{GeminiConfig, InferenceService};
use crate::config_store::{CameraDirectory, ModelKind, ModelRegistry};
use crate::detection_log_service::DetectionStore;
use crate::detection_pipeline::{DetectionPipeline, PipelineConfig};
use crate::event_log_service::EventLogService;
use crate::frame_buffer::FrameBufferConfig;
use crate::frame_source::{FfmpegOptions, SourceConnector};
use crate::inference_gate::InferenceGates;
use crate::stream_registry::{StreamConfig, StreamRegistry};
use crate::worker_supervisor::{WorkerConfig, WorkerSupervisor};
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// PostgreSQL URL; without it cameras and models come from `CAMERAS`/`MODELS`
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
    /// Static cameras, `id=address` pairs
    pub static_cameras: Vec<(String, String)>,
    /// Static models, `id=kind` pairs
    pub static_models: Vec<(String, ModelKind)>,
    pub gemini_api_key_fire: Option<String>,
    pub gemini_api_key_helmet: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub inference_cooldown_ms: u64,
    pub inference_timeout_ms: u64,
    pub frame_buffer_capacity: usize,
    pub frame_read_timeout_ms: u64,
    /// Wait for a frame on single-frame capture
    pub snapshot_timeout_ms: u64,
    pub stream_open_timeout_sec: u64,
    pub stream_stall_timeout_sec: u64,
    pub stream_max_failures: u32,
    pub camera_lease_timeout_ms: u64,
    pub worker_max_acquire_failures: u32,
    pub worker_acquire_retry_ms: u64,
    pub capture_fps: Option<u32>,
    pub ffmpeg_path: String,
    pub event_log_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: env_opt("DATABASE_URL"),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("PORT", 8000),
            cors_origin: std::env::var("CORS_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            static_cameras: env_opt("CAMERAS")
                .map(|v| parse_pairs(&v))
                .unwrap_or_default(),
            static_models: env_opt("MODELS")
                .map(|v| parse_model_pairs(&v))
                .unwrap_or_default(),
            gemini_api_key_fire: env_opt("GOOGLE_API_KEY_FIRE"),
            gemini_api_key_helmet: env_opt("GOOGLE_API_KEY_HELMET"),
            gemini_model: std::env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-1.5-flash-latest".to_string()),
            gemini_base_url: std::env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string()),
            inference_cooldown_ms: env_parse("INFERENCE_COOLDOWN_MS", 500),
            inference_timeout_ms: env_parse("INFERENCE_TIMEOUT_MS", 2000),
            frame_buffer_capacity: env_parse("FRAME_BUFFER_CAPACITY", 2),
            frame_read_timeout_ms: env_parse("FRAME_READ_TIMEOUT_MS", 100),
            snapshot_timeout_ms: env_parse("SNAPSHOT_TIMEOUT_MS", 5000),
            stream_open_timeout_sec: env_parse("STREAM_OPEN_TIMEOUT_SEC", 10),
            stream_stall_timeout_sec: env_parse("STREAM_STALL_TIMEOUT_SEC", 10),
            stream_max_failures: env_parse("STREAM_MAX_FAILURES", 30),
            camera_lease_timeout_ms: env_parse("CAMERA_LEASE_TIMEOUT_MS", 5000),
            worker_max_acquire_failures: env_parse("WORKER_MAX_ACQUIRE_FAILURES", 5),
            worker_acquire_retry_ms: env_parse("WORKER_ACQUIRE_RETRY_MS", 1000),
            capture_fps: env_opt("CAPTURE_FPS").and_then(|v| v.trim().parse().ok()),
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            event_log_capacity: env_parse("EVENT_LOG_CAPACITY", 500),
        }
    }
}

/// Parse `a=x,b=y` into pairs, skipping malformed entries
fn parse_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|item| {
            let (id, value) = item.split_once('=')?;
            let (id, value) = (id.trim(), value.trim());
            if id.is_empty() || value.is_empty() {
                tracing::warn!(entry = %item, "Ignoring malformed config entry");
                return None;
            }
            Some((id.to_string(), value.to_string()))
        })
        .collect()
}

fn parse_model_pairs(raw: &str) -> Vec<(String, ModelKind)> {
    parse_pairs(raw)
        .into_iter()
        .filter_map(|(id, kind)| match kind.parse::<ModelKind>() {
            Ok(kind) => Some((id, kind)),
            Err(e) => {
                tracing::warn!(model_id = %id, error = %e, "Ignoring static model");
                None
            }
        })
        .collect()
}

impl AppConfig {
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            buffer: FrameBufferConfig {
                capacity: self.frame_buffer_capacity,
                stall_timeout: Duration::from_secs(self.stream_stall_timeout_sec),
                max_consecutive_failures: self.stream_max_failures,
                ..FrameBufferConfig::default()
            },
            lease_timeout: Duration::from_millis(self.camera_lease_timeout_ms),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            frame_timeout: Duration::from_millis(self.frame_read_timeout_ms),
            max_acquire_failures: self.worker_max_acquire_failures,
            acquire_retry_delay: Duration::from_millis(self.worker_acquire_retry_ms),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            inference_timeout: Duration::from_millis(self.inference_timeout_ms),
        }
    }

    pub fn ffmpeg_options(&self) -> FfmpegOptions {
        FfmpegOptions {
            ffmpeg_path: self.ffmpeg_path.clone(),
            open_timeout: Duration::from_secs(self.stream_open_timeout_sec),
            capture_fps: self.capture_fps,
            ..FfmpegOptions::default()
        }
    }

    pub fn gemini_config(&self) -> GeminiConfig {
        GeminiConfig {
            base_url: self.gemini_base_url.clone(),
            model: self.gemini_model.clone(),
            fire_api_key: self.gemini_api_key_fire.clone(),
            helmet_api_key: self.gemini_api_key_helmet.clone(),
            ..GeminiConfig::default()
        }
    }
}

/// External collaborators the state is assembled from
pub struct Collaborators {
    pub cameras: Arc<dyn CameraDirectory>,
    pub models: Arc<dyn ModelRegistry>,
    pub connector: Arc<dyn SourceConnector>,
    pub inference: Arc<dyn InferenceService>,
    pub store: Arc<dyn DetectionStore>,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Database pool (absent in static mode)
    pub pool: Option<PgPool>,
    /// Camera source resolver
    pub cameras: Arc<dyn CameraDirectory>,
    /// Open camera connections
    pub registry: Arc<StreamRegistry>,
    /// Detection workers
    pub supervisor: Arc<WorkerSupervisor>,
    /// Recent detections
    pub event_log: Arc<EventLogService>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, pool: Option<PgPool>, collaborators: Collaborators) -> Self {
        let registry = Arc::new(StreamRegistry::new(
            collaborators.connector,
            config.stream_config(),
        ));
        let gates = Arc::new(InferenceGates::new(Duration::from_millis(
            config.inference_cooldown_ms,
        )));
        let pipeline = Arc::new(DetectionPipeline::new(
            gates,
            collaborators.inference,
            config.pipeline_config(),
        ));
        let event_log = Arc::new(EventLogService::new(config.event_log_capacity));
        let supervisor = Arc::new(WorkerSupervisor::new(
            registry.clone(),
            collaborators.cameras.clone(),
            collaborators.models,
            pipeline,
            collaborators.store,
            event_log.clone(),
            config.worker_config(),
        ));

        Self {
            config,
            pool,
            cameras: collaborators.cameras,
            registry,
            supervisor,
            event_log,
            started_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let pairs = parse_pairs("cam1=rtsp://a/b?x=1, cam2 = 0 ,broken,=x");
        assert_eq!(
            pairs,
            vec![
                ("cam1".to_string(), "rtsp://a/b?x=1".to_string()),
                ("cam2".to_string(), "0".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_model_pairs() {
        let models = parse_model_pairs("m1=fire,m2=Helmet,m3=attendance");
        assert_eq!(
            models,
            vec![
                ("m1".to_string(), ModelKind::Fire),
                ("m2".to_string(), ModelKind::Helmet),
            ]
        );
    }

    #[test]
    fn test_component_configs() {
        let config = AppConfig {
            frame_buffer_capacity: 3,
            inference_timeout_ms: 1500,
            ..AppConfig::default()
        };
        assert_eq!(config.stream_config().buffer.capacity, 3);
        assert_eq!(
            config.pipeline_config().inference_timeout,
            Duration::from_millis(1500)
        );
    }
}
