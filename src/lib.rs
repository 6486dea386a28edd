//! camwatch - Multi-camera stream and detection worker manager
//!
//! ## Architecture
//!
//! 1. FrameSource - Live video connections (ffmpeg MJPEG)
//! 2. FrameBuffer - Bounded drop-oldest frame queue
//! 3. StreamRegistry - One open connection per camera, per-camera guard
//! 4. InferenceGate - Cooldown throttle per model kind
//! 5. AIClient - Vision inference (Gemini)
//! 6. DetectionPipeline - Frame to fire/helmet verdict
//! 7. WorkerSupervisor - Per (camera, model) worker lifecycle
//! 8. ConfigStore - Camera addresses and model kinds
//! 9. DetectionLogService - Detection persistence
//! 10. EventLogService - Recent detections (ring buffer)
//! 11. WebAPI - Control surface

pub mod ai_client;
pub mod config_store;
pub mod detection_log_service;
pub mod detection_pipeline;
pub mod error;
pub mod event_log_service;
pub mod frame_buffer;
pub mod frame_source;
pub mod inference_gate;
pub mod models;
pub mod state;
pub mod stream_registry;
pub mod web_api;
pub mod worker_supervisor;

pub use error::{Error, Result};
pub use state::AppState;
