//! WorkerSupervisor - Detection worker lifecycle
//!
//! ## Responsibilities
//!
//! - Start one detection worker per (camera, model) pair
//! - Reject duplicate starts and stops of idle pairs
//! - Signal workers to stop; workers exit within one iteration
//! - Clean up entries when a worker exits on its own
//! - Close the camera when its last worker stops or its stream is lost
//!
//! ## Worker loop
//!
//! check running flag → attach camera → lease → read frame →
//! DetectionPipeline → event log + detection store
//!
//! A worker keeps the handle it attached to. It never reopens a lost
//! stream; a lost stream ends the worker.

use crate::config_store::{CameraDirectory, ModelKind, ModelRegistry};
use crate::detection_log_service::DetectionStore;
use crate::detection_pipeline::DetectionPipeline;
use crate::error::{Error, Result};
use crate::event_log_service::EventLogService;
use crate::frame_buffer::BufferState;
use crate::stream_registry::{CameraHandle, StreamRegistry};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Wait per frame read
    pub frame_timeout: Duration,
    /// Consecutive acquire failures before a worker gives up
    pub max_acquire_failures: u32,
    pub acquire_retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            frame_timeout: Duration::from_millis(100),
            max_acquire_failures: 5,
            acquire_retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WorkerKey {
    camera_id: String,
    model_id: String,
}

impl WorkerKey {
    fn new(camera_id: &str, model_id: &str) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            model_id: model_id.to_string(),
        }
    }
}

struct WorkerEntry {
    worker_id: Uuid,
    kind: ModelKind,
    started_at: DateTime<Utc>,
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Worker summary for the control surface
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    pub worker_id: Uuid,
    pub camera_id: String,
    pub model_id: String,
    pub kind: ModelKind,
    pub started_at: DateTime<Utc>,
    pub running: bool,
}

impl WorkerInfo {
    fn from_entry(key: &WorkerKey, entry: &WorkerEntry) -> Self {
        Self {
            worker_id: entry.worker_id,
            camera_id: key.camera_id.clone(),
            model_id: key.model_id.clone(),
            kind: entry.kind,
            started_at: entry.started_at,
            running: entry.running.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ExitReason {
    Stopped,
    SourceLost,
    ConnectionFailed,
}

impl ExitReason {
    fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Stopped => "stopped",
            ExitReason::SourceLost => "source_lost",
            ExitReason::ConnectionFailed => "connection_failed",
        }
    }
}

struct Shared {
    registry: Arc<StreamRegistry>,
    cameras: Arc<dyn CameraDirectory>,
    models: Arc<dyn ModelRegistry>,
    pipeline: Arc<DetectionPipeline>,
    store: Arc<dyn DetectionStore>,
    event_log: Arc<EventLogService>,
    config: WorkerConfig,
    workers: Mutex<HashMap<WorkerKey, WorkerEntry>>,
}

impl Shared {
    fn workers(&self) -> MutexGuard<'_, HashMap<WorkerKey, WorkerEntry>> {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// WorkerSupervisor instance
pub struct WorkerSupervisor {
    shared: Arc<Shared>,
}

impl WorkerSupervisor {
    pub fn new(
        registry: Arc<StreamRegistry>,
        cameras: Arc<dyn CameraDirectory>,
        models: Arc<dyn ModelRegistry>,
        pipeline: Arc<DetectionPipeline>,
        store: Arc<dyn DetectionStore>,
        event_log: Arc<EventLogService>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                cameras,
                models,
                pipeline,
                store,
                event_log,
                config,
                workers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start a worker for (camera, model)
    ///
    /// Resolves the camera and model kind and opens the stream before the
    /// worker is registered, so a failed start leaves nothing running.
    pub async fn start(&self, camera_id: &str, model_id: &str) -> Result<WorkerInfo> {
        let key = WorkerKey::new(camera_id, model_id);
        let already_running = || Error::AlreadyRunning {
            camera_id: camera_id.to_string(),
            model_id: model_id.to_string(),
        };

        if self.shared.workers().contains_key(&key) {
            return Err(already_running());
        }

        let address = self
            .shared
            .cameras
            .resolve(camera_id)
            .await?
            .ok_or_else(|| Error::CameraNotFound(camera_id.to_string()))?;

        let kind = self
            .shared
            .models
            .kind_of(model_id)
            .await?
            .ok_or_else(|| Error::ModelNotFound(model_id.to_string()))?;

        self.shared.registry.acquire(camera_id, &address).await?;

        let mut workers = self.shared.workers();
        if workers.contains_key(&key) {
            return Err(already_running());
        }

        let worker_id = Uuid::new_v4();
        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(run_worker(
            self.shared.clone(),
            key.clone(),
            worker_id,
            kind,
            address,
            running.clone(),
        ));

        let entry = WorkerEntry {
            worker_id,
            kind,
            started_at: Utc::now(),
            running,
            task,
        };
        let info = WorkerInfo::from_entry(&key, &entry);
        workers.insert(key, entry);

        tracing::info!(
            camera_id = %camera_id,
            model_id = %model_id,
            kind = %kind,
            worker_id = %worker_id,
            "Worker started"
        );
        Ok(info)
    }

    /// Signal the worker for (camera, model) to stop
    ///
    /// Returns once the entry is removed; the task exits after its current
    /// iteration.
    pub fn stop(&self, camera_id: &str, model_id: &str) -> Result<WorkerInfo> {
        let key = WorkerKey::new(camera_id, model_id);
        let entry = self
            .shared
            .workers()
            .remove(&key)
            .ok_or_else(|| Error::NotRunning {
                camera_id: camera_id.to_string(),
                model_id: model_id.to_string(),
            })?;

        entry.running.store(false, Ordering::SeqCst);
        tracing::info!(
            camera_id = %camera_id,
            model_id = %model_id,
            worker_id = %entry.worker_id,
            "Worker stop requested"
        );
        Ok(WorkerInfo::from_entry(&key, &entry))
    }

    /// Stop every worker on a camera
    pub fn stop_camera(&self, camera_id: &str) -> Vec<WorkerInfo> {
        let mut workers = self.shared.workers();
        let keys: Vec<WorkerKey> = workers
            .keys()
            .filter(|k| k.camera_id == camera_id)
            .cloned()
            .collect();

        keys.into_iter()
            .filter_map(|key| {
                let entry = workers.remove(&key)?;
                entry.running.store(false, Ordering::SeqCst);
                Some(WorkerInfo::from_entry(&key, &entry))
            })
            .collect()
    }

    pub fn is_running(&self, camera_id: &str, model_id: &str) -> bool {
        self.shared
            .workers()
            .contains_key(&WorkerKey::new(camera_id, model_id))
    }

    pub fn status(&self, camera_id: &str, model_id: &str) -> Option<WorkerInfo> {
        let key = WorkerKey::new(camera_id, model_id);
        self.shared
            .workers()
            .get(&key)
            .map(|entry| WorkerInfo::from_entry(&key, entry))
    }

    pub fn list(&self) -> Vec<WorkerInfo> {
        let mut list: Vec<WorkerInfo> = self
            .shared
            .workers()
            .iter()
            .map(|(key, entry)| WorkerInfo::from_entry(key, entry))
            .collect();
        list.sort_by(|a, b| {
            (a.camera_id.as_str(), a.model_id.as_str())
                .cmp(&(b.camera_id.as_str(), b.model_id.as_str()))
        });
        list
    }

    pub fn count(&self) -> usize {
        self.shared.workers().len()
    }

    /// Stop all workers and wait up to `timeout` for them to exit
    pub async fn shutdown(&self, timeout: Duration) {
        let entries: Vec<(WorkerKey, WorkerEntry)> = self.shared.workers().drain().collect();
        if entries.is_empty() {
            return;
        }

        tracing::info!(workers = entries.len(), "Stopping all workers");
        for (_, entry) in &entries {
            entry.running.store(false, Ordering::SeqCst);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        for (key, entry) in entries {
            let abort = entry.task.abort_handle();
            if tokio::time::timeout_at(deadline, entry.task).await.is_err() {
                tracing::warn!(
                    camera_id = %key.camera_id,
                    model_id = %key.model_id,
                    "Worker did not exit in time, aborting"
                );
                abort.abort();
            }
        }
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    key: WorkerKey,
    worker_id: Uuid,
    kind: ModelKind,
    address: String,
    running: Arc<AtomicBool>,
) {
    let camera_id = key.camera_id.as_str();
    let model_id = key.model_id.as_str();
    let mut acquire_failures: u32 = 0;
    let mut attached: Option<Arc<CameraHandle>> = None;

    let reason = loop {
        if !running.load(Ordering::SeqCst) {
            break ExitReason::Stopped;
        }

        let handle = match attached.as_ref() {
            Some(handle) => handle.clone(),
            None => match shared.registry.attach(camera_id, &address).await {
                Ok(handle) => {
                    acquire_failures = 0;
                    attached = Some(handle.clone());
                    handle
                }
                Err(e) => {
                    acquire_failures += 1;
                    tracing::warn!(
                        camera_id = %camera_id,
                        model_id = %model_id,
                        failures = acquire_failures,
                        error = %e,
                        "Worker could not acquire camera"
                    );
                    if acquire_failures >= shared.config.max_acquire_failures {
                        break ExitReason::ConnectionFailed;
                    }
                    tokio::time::sleep(shared.config.acquire_retry_delay).await;
                    continue;
                }
            },
        };

        match handle.state() {
            BufferState::Lost => break ExitReason::SourceLost,
            // Released under us; attach to whatever is registered now
            BufferState::Stopped => {
                attached = None;
                continue;
            }
            BufferState::Running => {}
        }

        let frame = {
            let lease = match handle.lease().await {
                Ok(lease) => lease,
                Err(_) => continue,
            };
            match lease.read(shared.config.frame_timeout).await {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(Error::SourceLost(_)) => break ExitReason::SourceLost,
                Err(e) => {
                    tracing::warn!(camera_id = %camera_id, error = %e, "Frame read failed");
                    continue;
                }
            }
        };

        let Some(result) = shared
            .pipeline
            .evaluate(camera_id, model_id, kind, &frame)
            .await
        else {
            continue;
        };

        if result.detected {
            tracing::info!(
                camera_id = %camera_id,
                model_id = %model_id,
                label = %result.label,
                "Detection positive"
            );
        }

        shared.event_log.add_event(result.clone()).await;
        if let Err(e) = shared.store.record(&result).await {
            tracing::warn!(
                camera_id = %camera_id,
                model_id = %model_id,
                error = %e,
                "Failed to record detection"
            );
        }
    };

    let camera_in_use = {
        let mut workers = shared.workers();
        if workers
            .get(&key)
            .is_some_and(|entry| entry.worker_id == worker_id)
        {
            workers.remove(&key);
        }
        workers.keys().any(|k| k.camera_id == key.camera_id)
    };

    // Only the connection this worker held is closed
    if let Some(handle) = attached.as_ref() {
        let release = match reason {
            ExitReason::SourceLost => true,
            ExitReason::Stopped => !camera_in_use,
            ExitReason::ConnectionFailed => false,
        };
        if release {
            shared.registry.release_if(camera_id, handle).await;
        }
    }

    match reason {
        ExitReason::Stopped => tracing::info!(
            camera_id = %camera_id,
            model_id = %model_id,
            worker_id = %worker_id,
            "Worker exited"
        ),
        _ => tracing::warn!(
            camera_id = %camera_id,
            model_id = %model_id,
            worker_id = %worker_id,
            reason = reason.as_str(),
            "Worker exited"
        ),
    }
}
