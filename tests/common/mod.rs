//! Shared fixtures: scripted camera sources and inference

#![allow(dead_code)]

use async_trait::async_trait;
use camwatch::ai_client::{InferenceError, InferenceRequest, InferenceService};
use camwatch::config_store::{InMemoryConfig, ModelKind};
use camwatch::detection_log_service::InMemoryDetectionStore;
use camwatch::frame_source::{FrameSource, OpenError, OpenMode, ReadError, SourceConnector};
use camwatch::state::{AppConfig, AppState, Collaborators};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub fn jpeg(seq: u64) -> Vec<u8> {
    let mut frame = vec![0xFF, 0xD8];
    frame.extend_from_slice(&seq.to_be_bytes());
    frame.extend_from_slice(&[0xFF, 0xD9]);
    frame
}

/// Emits a frame every 5ms until the connector's kill switch is set or its
/// lifetime runs out
pub struct ScriptedSource {
    seq: AtomicU64,
    kill: Arc<AtomicBool>,
    closed: Arc<AtomicUsize>,
    ends_at: Option<Instant>,
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn next_frame(&mut self) -> Result<Vec<u8>, ReadError> {
        if self.kill.load(Ordering::SeqCst) {
            return Err(ReadError::Ended);
        }
        if self.ends_at.is_some_and(|at| Instant::now() >= at) {
            return Err(ReadError::Ended);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(jpeg(self.seq.fetch_add(1, Ordering::SeqCst)))
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct ScriptedConnector {
    pub opens: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
    /// Once set, every open source ends and new opens fail
    pub kill: Arc<AtomicBool>,
    /// How long each newly opened source lives
    lifetime: Mutex<Option<Duration>>,
}

impl ScriptedConnector {
    pub fn set_lifetime(&self, lifetime: Option<Duration>) {
        *self.lifetime.lock().unwrap() = lifetime;
    }
}

#[async_trait]
impl SourceConnector for ScriptedConnector {
    async fn open(
        &self,
        address: &str,
        _mode: OpenMode,
    ) -> Result<Box<dyn FrameSource>, OpenError> {
        if address.contains("unreachable") || self.kill.load(Ordering::SeqCst) {
            return Err(OpenError::NotReady("no frames".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let lifetime = *self.lifetime.lock().unwrap();
        Ok(Box::new(ScriptedSource {
            seq: AtomicU64::new(1),
            kill: self.kill.clone(),
            closed: self.closed.clone(),
            ends_at: lifetime.map(|l| Instant::now() + l),
        }))
    }
}

pub struct ScriptedInference {
    reply: Mutex<String>,
    pub delay: Mutex<Duration>,
    pub calls: AtomicUsize,
}

impl ScriptedInference {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: Mutex::new(reply.to_string()),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl InferenceService for ScriptedInference {
    async fn generate(
        &self,
        _kind: ModelKind,
        _request: InferenceRequest,
    ) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        Ok(self.reply.lock().unwrap().clone())
    }
}

pub struct Harness {
    pub state: AppState,
    pub connector: Arc<ScriptedConnector>,
    pub inference: Arc<ScriptedInference>,
    pub store: Arc<InMemoryDetectionStore>,
}

pub fn harness(reply: &str) -> Harness {
    let config = AppConfig {
        database_url: None,
        inference_cooldown_ms: 0,
        snapshot_timeout_ms: 1000,
        worker_acquire_retry_ms: 10,
        ..AppConfig::default()
    };
    let lookups = Arc::new(
        InMemoryConfig::new()
            .with_camera("cam1", "rtsp://10.0.0.5/stream1")
            .with_camera("cam2", "rtsp://10.0.0.6/stream1")
            .with_camera("cam-down", "rtsp://unreachable/stream1")
            .with_model("fire-model-1", ModelKind::Fire)
            .with_model("helmet-model-1", ModelKind::Helmet),
    );
    let connector = Arc::new(ScriptedConnector::default());
    let inference = Arc::new(ScriptedInference::new(reply));
    let store = Arc::new(InMemoryDetectionStore::new());

    let state = AppState::new(
        config,
        None,
        Collaborators {
            cameras: lookups.clone(),
            models: lookups,
            connector: connector.clone(),
            inference: inference.clone(),
            store: store.clone(),
        },
    );

    Harness {
        state,
        connector,
        inference,
        store,
    }
}

/// Poll `check` until it holds or two seconds pass
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
