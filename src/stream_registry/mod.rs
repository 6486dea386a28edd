//! StreamRegistry - Per-camera connection ownership
//!
//! ## Purpose
//!
//! - Hold at most one open connection per camera
//! - Open on first use, release on demand
//! - Serialize frame consumers of one camera through its guard
//!
//! ## Locking
//!
//! The id → slot map is behind a short lock that is never held across an
//! open. Each slot has its own lock, held while that camera opens, so
//! concurrent acquires of one id share a single connection. A slot retired by
//! a failed open or a release sends waiters back to the map for a fresh slot.

use crate::error::{Error, Result};
use crate::frame_buffer::{
    BufferState, BufferStats, BufferedFrame, FrameBuffer, FrameBufferConfig,
};
use crate::frame_source::{redact_address, OpenError, OpenMode, SourceConnector};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

/// Default lease wait timeout (5s)
const DEFAULT_LEASE_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub buffer: FrameBufferConfig,
    /// How long `lease()` waits for the camera guard
    pub lease_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer: FrameBufferConfig::default(),
            lease_timeout: Duration::from_millis(DEFAULT_LEASE_TIMEOUT_MS),
        }
    }
}

/// An open camera: its frame buffer and exclusive-access guard
pub struct CameraHandle {
    camera_id: String,
    /// Address the connection was opened with
    address: String,
    open_mode: OpenMode,
    opened_at: DateTime<Utc>,
    buffer: FrameBuffer,
    guard: Arc<Mutex<()>>,
    lease_timeout: Duration,
}

impl CameraHandle {
    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn open_mode(&self) -> OpenMode {
        self.open_mode
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn is_lost(&self) -> bool {
        self.buffer.is_lost()
    }

    pub fn state(&self) -> BufferState {
        self.buffer.state()
    }

    pub fn stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    /// Take the camera guard, waiting up to the lease timeout
    ///
    /// The returned lease releases the guard on drop.
    pub async fn lease(&self) -> Result<FrameLease<'_>> {
        match timeout(self.lease_timeout, self.guard.clone().lock_owned()).await {
            Ok(guard) => {
                tracing::trace!(camera_id = %self.camera_id, "Camera lease acquired");
                Ok(FrameLease {
                    handle: self,
                    _guard: guard,
                })
            }
            Err(_) => {
                tracing::warn!(
                    camera_id = %self.camera_id,
                    timeout_ms = self.lease_timeout.as_millis() as u64,
                    "Camera lease timeout - camera busy"
                );
                Err(Error::Busy(self.camera_id.clone()))
            }
        }
    }

    /// Take the camera guard without waiting
    pub fn try_lease(&self) -> Option<FrameLease<'_>> {
        match self.guard.clone().try_lock_owned() {
            Ok(guard) => Some(FrameLease {
                handle: self,
                _guard: guard,
            }),
            Err(_) => {
                tracing::debug!(camera_id = %self.camera_id, "Camera lease denied - camera busy");
                None
            }
        }
    }
}

/// Exclusive frame access to one camera, released on drop
pub struct FrameLease<'a> {
    handle: &'a CameraHandle,
    _guard: OwnedMutexGuard<()>,
}

impl FrameLease<'_> {
    pub fn camera_id(&self) -> &str {
        &self.handle.camera_id
    }

    /// Read the newest buffered frame, waiting up to `wait`
    pub async fn read(&self, wait: Duration) -> Result<Option<BufferedFrame>> {
        self.handle.buffer.read(wait).await
    }
}

impl Drop for FrameLease<'_> {
    fn drop(&mut self) {
        tracing::trace!(camera_id = %self.handle.camera_id, "Camera lease released");
    }
}

/// Open camera summary for the control surface
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub camera_id: String,
    pub open_mode: &'static str,
    pub opened_at: DateTime<Utc>,
    pub buffer: BufferStats,
}

struct SlotState {
    handle: Option<Arc<CameraHandle>>,
    retired: bool,
}

type Slot = Arc<Mutex<SlotState>>;

/// Camera id → open connection
pub struct StreamRegistry {
    connector: Arc<dyn SourceConnector>,
    config: StreamConfig,
    slots: Mutex<HashMap<String, Slot>>,
}

impl StreamRegistry {
    pub fn new(connector: Arc<dyn SourceConnector>, config: StreamConfig) -> Self {
        Self {
            connector,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Existing handle for `camera_id`, or a freshly opened one
    ///
    /// A handle whose source was lost is replaced. Fails with `Connection`
    /// when neither open mode yields a source; nothing is registered then.
    pub async fn acquire(&self, camera_id: &str, address: &str) -> Result<Arc<CameraHandle>> {
        self.acquire_slot(camera_id, address, true).await
    }

    /// Registered handle for `camera_id` as is, lost or not; opens only when
    /// none is registered
    ///
    /// Detection workers use this so a dying camera ends them instead of
    /// being reopened on every pass.
    pub async fn attach(&self, camera_id: &str, address: &str) -> Result<Arc<CameraHandle>> {
        self.acquire_slot(camera_id, address, false).await
    }

    async fn acquire_slot(
        &self,
        camera_id: &str,
        address: &str,
        replace_lost: bool,
    ) -> Result<Arc<CameraHandle>> {
        loop {
            let slot = {
                let mut slots = self.slots.lock().await;
                slots
                    .entry(camera_id.to_string())
                    .or_insert_with(|| {
                        Arc::new(Mutex::new(SlotState {
                            handle: None,
                            retired: false,
                        }))
                    })
                    .clone()
            };

            let mut state = slot.lock().await;
            if state.retired {
                continue;
            }

            if let Some(handle) = state.handle.as_ref() {
                if !replace_lost || !handle.is_lost() {
                    return Ok(handle.clone());
                }
            }
            if let Some(lost) = state.handle.take() {
                tracing::info!(camera_id = %camera_id, "Replacing lost camera connection");
                lost.buffer.stop().await;
            }

            match self.open(camera_id, address).await {
                Ok(handle) => {
                    let handle = Arc::new(handle);
                    state.handle = Some(handle.clone());
                    return Ok(handle);
                }
                Err(e) => {
                    state.retired = true;
                    let mut slots = self.slots.lock().await;
                    if slots.get(camera_id).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                        slots.remove(camera_id);
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn open(&self, camera_id: &str, address: &str) -> Result<CameraHandle> {
        let connection_error = |e: OpenError| Error::Connection {
            camera_id: camera_id.to_string(),
            message: e.to_string(),
        };

        let (source, open_mode) = match self.connector.open(address, OpenMode::Default).await {
            Ok(source) => (source, OpenMode::Default),
            Err(OpenError::NotReady(reason)) => {
                tracing::warn!(
                    camera_id = %camera_id,
                    reason = %reason,
                    "Default open not ready, retrying with configured options"
                );
                let source = self
                    .connector
                    .open(address, OpenMode::Configured)
                    .await
                    .map_err(connection_error)?;
                (source, OpenMode::Configured)
            }
            Err(e) => return Err(connection_error(e)),
        };

        let buffer = FrameBuffer::new(camera_id, self.config.buffer.clone());
        buffer.start(source)?;

        tracing::info!(
            camera_id = %camera_id,
            address = %redact_address(address),
            mode = open_mode.as_str(),
            "Camera connection opened"
        );

        Ok(CameraHandle {
            camera_id: camera_id.to_string(),
            address: address.to_string(),
            open_mode,
            opened_at: Utc::now(),
            buffer,
            guard: Arc::new(Mutex::new(())),
            lease_timeout: self.config.lease_timeout,
        })
    }

    /// Close and forget the camera's connection. Returns whether one was open.
    pub async fn release(&self, camera_id: &str) -> bool {
        let slot = self.slots.lock().await.remove(camera_id);
        let Some(slot) = slot else {
            return false;
        };

        // Waits out an open in progress
        let mut state = slot.lock().await;
        state.retired = true;
        match state.handle.take() {
            Some(handle) => {
                handle.buffer.stop().await;
                tracing::info!(camera_id = %camera_id, "Camera connection released");
                true
            }
            None => false,
        }
    }

    /// Release the camera only while `handle` is the registered connection
    ///
    /// A replacement opened since `handle` was taken is left alone.
    pub async fn release_if(&self, camera_id: &str, handle: &Arc<CameraHandle>) -> bool {
        let Some(slot) = self.slots.lock().await.get(camera_id).cloned() else {
            return false;
        };

        let mut state = slot.lock().await;
        if !state.handle.as_ref().is_some_and(|h| Arc::ptr_eq(h, handle)) {
            return false;
        }
        state.retired = true;
        state.handle = None;
        {
            let mut slots = self.slots.lock().await;
            if slots.get(camera_id).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                slots.remove(camera_id);
            }
        }

        handle.buffer.stop().await;
        tracing::info!(camera_id = %camera_id, "Camera connection released");
        true
    }

    /// Release every camera
    pub async fn release_all(&self) {
        let ids: Vec<String> = self.slots.lock().await.keys().cloned().collect();
        for id in ids {
            self.release(&id).await;
        }
    }

    /// Current handle, if open and not mid-open
    pub async fn get(&self, camera_id: &str) -> Option<Arc<CameraHandle>> {
        let slot = self.slots.lock().await.get(camera_id).cloned()?;
        let state = slot.try_lock().ok()?;
        state.handle.clone()
    }

    pub async fn is_open(&self, camera_id: &str) -> bool {
        self.get(camera_id)
            .await
            .is_some_and(|handle| !handle.is_lost())
    }

    pub async fn open_cameras(&self) -> Vec<StreamInfo> {
        let slots: Vec<Slot> = self.slots.lock().await.values().cloned().collect();
        let mut streams = Vec::with_capacity(slots.len());
        for slot in slots {
            let Ok(state) = slot.try_lock() else {
                continue;
            };
            if let Some(handle) = state.handle.as_ref() {
                streams.push(StreamInfo {
                    camera_id: handle.camera_id.clone(),
                    open_mode: handle.open_mode.as_str(),
                    opened_at: handle.opened_at,
                    buffer: handle.stats(),
                });
            }
        }
        streams.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        streams
    }
}
