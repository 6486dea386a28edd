//! EventLogService - Recent detections (Ring Buffer)
//!
//! ## Responsibilities
//!
//! - Keep the most recent detection results in memory
//! - Serve recent results, overall or per camera

use crate::detection_pipeline::DetectionResult;
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Detection result with its ring buffer sequence id
#[derive(Debug, Clone, Serialize)]
pub struct DetectionEvent {
    pub event_id: u64,
    #[serde(flatten)]
    pub result: DetectionResult,
}

/// Ring buffer for events
struct EventRingBuffer {
    events: VecDeque<DetectionEvent>,
    capacity: usize,
    next_id: u64,
}

impl EventRingBuffer {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    fn push(&mut self, result: DetectionResult) -> u64 {
        let event_id = self.next_id;
        self.next_id += 1;

        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(DetectionEvent { event_id, result });
        event_id
    }

    fn get_latest(&self, count: usize) -> Vec<DetectionEvent> {
        self.events.iter().rev().take(count).cloned().collect()
    }

    fn get_by_camera(&self, camera_id: &str, count: usize) -> Vec<DetectionEvent> {
        self.events
            .iter()
            .rev()
            .filter(|e| e.result.camera_id == camera_id)
            .take(count)
            .cloned()
            .collect()
    }
}

/// EventLogService instance
pub struct EventLogService {
    buffer: RwLock<EventRingBuffer>,
}

impl EventLogService {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(EventRingBuffer::new(capacity)),
        }
    }

    /// Add a result, returning its event id
    pub async fn add_event(&self, result: DetectionResult) -> u64 {
        let mut buffer = self.buffer.write().await;
        let id = buffer.push(result);
        tracing::trace!(event_id = id, "Detection added to ring buffer");
        id
    }

    /// Newest first
    pub async fn get_latest(&self, count: usize) -> Vec<DetectionEvent> {
        self.buffer.read().await.get_latest(count)
    }

    pub async fn get_by_camera(&self, camera_id: &str, count: usize) -> Vec<DetectionEvent> {
        self.buffer.read().await.get_by_camera(camera_id, count)
    }

    pub async fn count(&self) -> usize {
        self.buffer.read().await.events.len()
    }
}

impl Default for EventLogService {
    fn default() -> Self {
        Self::new(500)
    }
}
