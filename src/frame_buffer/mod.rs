//! FrameBuffer - Bounded Frame Queue
//!
//! ## Responsibilities
//!
//! - Own the capture task reading from one FrameSource
//! - Keep at most `capacity` frames, dropping the oldest when full
//! - Hand the newest frame to readers with a bounded wait
//! - Detect a dead source and move to `Lost`
//!
//! ## States
//!
//! `Stopped -> Running -> Stopped`. A dead source moves `Running -> Lost`;
//! `stop()` takes any state back to `Stopped`.

use crate::error::{Error, Result};
use crate::frame_source::FrameSource;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A captured JPEG frame
#[derive(Debug, Clone)]
pub struct BufferedFrame {
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
    /// Per-buffer sequence number, starting at 1
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferState {
    Stopped,
    Running,
    /// Capture gave up after persistent source failure
    Lost,
}

#[derive(Debug, Clone)]
pub struct FrameBufferConfig {
    pub capacity: usize,
    /// A read taking longer than this counts as a failure
    pub stall_timeout: Duration,
    pub retry_delay: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for FrameBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 2,
            stall_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_millis(100),
            max_consecutive_failures: 30,
        }
    }
}

/// Counters for the control surface
#[derive(Debug, Clone, Serialize)]
pub struct BufferStats {
    pub state: BufferState,
    pub buffered: usize,
    pub capacity: usize,
    pub captured: u64,
    pub dropped: u64,
    pub last_frame_at: Option<DateTime<Utc>>,
}

struct Inner {
    queue: VecDeque<BufferedFrame>,
    state: BufferState,
    seq: u64,
    captured: u64,
    dropped: u64,
    last_frame_at: Option<DateTime<Utc>>,
}

struct Shared {
    inner: Mutex<Inner>,
    ready: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, data: Vec<u8>, capacity: usize) {
        {
            let mut inner = self.lock();
            while inner.queue.len() >= capacity {
                inner.queue.pop_front();
                inner.dropped += 1;
            }
            inner.seq += 1;
            inner.captured += 1;
            let now = Utc::now();
            inner.last_frame_at = Some(now);
            let seq = inner.seq;
            inner.queue.push_back(BufferedFrame {
                data,
                captured_at: now,
                seq,
            });
        }
        self.ready.notify_waiters();
    }

    fn set_state(&self, state: BufferState) {
        self.lock().state = state;
        self.ready.notify_waiters();
    }
}

struct CaptureControl {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Bounded frame queue over a background capture task
pub struct FrameBuffer {
    camera_id: String,
    config: FrameBufferConfig,
    shared: Arc<Shared>,
    control: Mutex<Option<CaptureControl>>,
}

impl FrameBuffer {
    pub fn new(camera_id: impl Into<String>, mut config: FrameBufferConfig) -> Self {
        config.capacity = config.capacity.max(1);
        Self {
            camera_id: camera_id.into(),
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    queue: VecDeque::with_capacity(config.capacity),
                    state: BufferState::Stopped,
                    seq: 0,
                    captured: 0,
                    dropped: 0,
                    last_frame_at: None,
                }),
                ready: Notify::new(),
            }),
            config,
            control: Mutex::new(None),
        }
    }

    /// Start capturing from `source`
    pub fn start(&self, source: Box<dyn FrameSource>) -> Result<()> {
        let mut control = self
            .control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        {
            let mut inner = self.shared.lock();
            if inner.state == BufferState::Running {
                return Err(Error::Internal(format!(
                    "frame buffer for {} already running",
                    self.camera_id
                )));
            }
            inner.state = BufferState::Running;
            inner.queue.clear();
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(capture_loop(
            self.camera_id.clone(),
            source,
            self.shared.clone(),
            self.config.clone(),
            shutdown_rx,
        ));
        *control = Some(CaptureControl { shutdown, task });

        tracing::debug!(
            camera_id = %self.camera_id,
            capacity = self.config.capacity,
            "Frame capture started"
        );
        Ok(())
    }

    /// Wait up to `timeout` for a frame and pop the newest one
    ///
    /// `Ok(None)` means no frame arrived in time, or the buffer is stopped.
    pub async fn read(&self, timeout: Duration) -> Result<Option<BufferedFrame>> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.shared.ready.notified();
            tokio::pin!(notified);
            // Register before checking so a push between check and wait is not missed
            notified.as_mut().enable();

            {
                let mut inner = self.shared.lock();
                match inner.state {
                    BufferState::Lost => return Err(Error::SourceLost(self.camera_id.clone())),
                    BufferState::Stopped => return Ok(None),
                    BufferState::Running => {}
                }
                if let Some(frame) = inner.queue.pop_back() {
                    return Ok(Some(frame));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    /// Stop capture, wait for the task to close the source, clear the buffer
    pub async fn stop(&self) {
        let control = self
            .control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(control) = control {
            let _ = control.shutdown.send(true);
            if let Err(e) = control.task.await {
                tracing::warn!(camera_id = %self.camera_id, error = %e, "Capture task join failed");
            }
        }

        {
            let mut inner = self.shared.lock();
            inner.queue.clear();
            inner.state = BufferState::Stopped;
        }
        self.shared.ready.notify_waiters();

        tracing::debug!(camera_id = %self.camera_id, "Frame capture stopped");
    }

    pub fn state(&self) -> BufferState {
        self.shared.lock().state
    }

    pub fn is_lost(&self) -> bool {
        self.state() == BufferState::Lost
    }

    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn stats(&self) -> BufferStats {
        let inner = self.shared.lock();
        BufferStats {
            state: inner.state,
            buffered: inner.queue.len(),
            capacity: self.config.capacity,
            captured: inner.captured,
            dropped: inner.dropped,
            last_frame_at: inner.last_frame_at,
        }
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        let control = self
            .control
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(control) = control {
            // Task sees the closed channel and closes the source
            let _ = control.shutdown.send(true);
        }
    }
}

async fn capture_loop(
    camera_id: String,
    mut source: Box<dyn FrameSource>,
    shared: Arc<Shared>,
    config: FrameBufferConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut failures: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let outcome = tokio::select! {
            _ = shutdown.changed() => break,
            r = tokio::time::timeout(config.stall_timeout, source.next_frame()) => r,
        };

        let error = match outcome {
            Ok(Ok(frame)) => {
                failures = 0;
                shared.push(frame, config.capacity);
                continue;
            }
            Ok(Err(crate::frame_source::ReadError::Ended)) => {
                tracing::warn!(camera_id = %camera_id, "Source stream ended");
                failures = config.max_consecutive_failures;
                "stream ended".to_string()
            }
            Ok(Err(e)) => {
                failures += 1;
                e.to_string()
            }
            Err(_) => {
                failures += 1;
                format!("no frame within {}s", config.stall_timeout.as_secs())
            }
        };

        if failures >= config.max_consecutive_failures {
            tracing::error!(
                camera_id = %camera_id,
                failures = failures,
                error = %error,
                "Source lost, stopping capture"
            );
            source.close().await;
            shared.set_state(BufferState::Lost);
            return;
        }

        tracing::warn!(
            camera_id = %camera_id,
            failures = failures,
            error = %error,
            "Frame read failed, retrying"
        );

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(config.retry_delay) => {}
        }
    }

    source.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_source::ReadError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    /// Source fed through a channel; closing the channel ends the stream
    struct ChannelSource {
        rx: mpsc::UnboundedReceiver<std::result::Result<Vec<u8>, ReadError>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl FrameSource for ChannelSource {
        async fn next_frame(&mut self) -> std::result::Result<Vec<u8>, ReadError> {
            match self.rx.recv().await {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn channel_source() -> (
        Box<dyn FrameSource>,
        mpsc::UnboundedSender<std::result::Result<Vec<u8>, ReadError>>,
        Arc<AtomicBool>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        (
            Box::new(ChannelSource {
                rx,
                closed: closed.clone(),
            }),
            tx,
            closed,
        )
    }

    async fn wait_captured(buffer: &FrameBuffer, count: u64) {
        for _ in 0..200 {
            if buffer.stats().captured >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("frames not captured");
    }

    #[tokio::test]
    async fn test_capacity_and_drop_oldest() {
        let buffer = FrameBuffer::new("cam1", FrameBufferConfig::default());
        let (source, tx, _closed) = channel_source();
        buffer.start(source).unwrap();

        for i in 1..=3u8 {
            tx.send(Ok(vec![i])).unwrap();
        }
        wait_captured(&buffer, 3).await;

        assert_eq!(buffer.len(), 2);
        let stats = buffer.stats();
        assert_eq!(stats.dropped, 1);

        // Newest first; frame 1 was evicted
        let frame = buffer.read(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(frame.data, vec![3]);
        let frame = buffer.read(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(frame.data, vec![2]);
        assert!(buffer.read(Duration::from_millis(10)).await.unwrap().is_none());

        buffer.stop().await;
    }

    #[tokio::test]
    async fn test_read_waits_for_push() {
        let buffer = Arc::new(FrameBuffer::new("cam1", FrameBufferConfig::default()));
        let (source, tx, _closed) = channel_source();
        buffer.start(source).unwrap();

        let reader = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.read(Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(Ok(vec![42])).unwrap();

        let frame = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(frame.data, vec![42]);
        assert_eq!(frame.seq, 1);

        buffer.stop().await;
    }

    #[tokio::test]
    async fn test_read_times_out_empty() {
        let buffer = FrameBuffer::new("cam1", FrameBufferConfig::default());
        let (source, _tx, _closed) = channel_source();
        buffer.start(source).unwrap();

        let result = buffer.read(Duration::from_millis(20)).await.unwrap();
        assert!(result.is_none());

        buffer.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_source_and_reads_none() {
        let buffer = FrameBuffer::new("cam1", FrameBufferConfig::default());
        let (source, tx, closed) = channel_source();
        buffer.start(source).unwrap();
        tx.send(Ok(vec![1])).unwrap();
        wait_captured(&buffer, 1).await;

        buffer.stop().await;

        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(buffer.state(), BufferState::Stopped);
        assert!(buffer.is_empty());
        assert!(buffer.read(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persistent_failure_marks_lost() {
        let config = FrameBufferConfig {
            retry_delay: Duration::from_millis(1),
            max_consecutive_failures: 3,
            ..FrameBufferConfig::default()
        };
        let buffer = FrameBuffer::new("cam1", config);
        let (source, tx, closed) = channel_source();
        buffer.start(source).unwrap();

        for _ in 0..3 {
            tx.send(Err(ReadError::Io(std::io::Error::other("decode")))).unwrap();
        }

        let result = buffer.read(Duration::from_secs(2)).await;
        assert!(matches!(result, Err(Error::SourceLost(_))));
        assert!(buffer.is_lost());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let config = FrameBufferConfig {
            retry_delay: Duration::from_millis(1),
            max_consecutive_failures: 3,
            ..FrameBufferConfig::default()
        };
        let buffer = FrameBuffer::new("cam1", config);
        let (source, tx, _closed) = channel_source();
        buffer.start(source).unwrap();

        tx.send(Err(ReadError::Io(std::io::Error::other("glitch")))).unwrap();
        tx.send(Err(ReadError::Io(std::io::Error::other("glitch")))).unwrap();
        tx.send(Ok(vec![5])).unwrap();
        tx.send(Err(ReadError::Io(std::io::Error::other("glitch")))).unwrap();

        let frame = buffer.read(Duration::from_secs(2)).await.unwrap().unwrap();
        assert_eq!(frame.data, vec![5]);
        assert_eq!(buffer.state(), BufferState::Running);

        buffer.stop().await;
    }

    #[tokio::test]
    async fn test_stream_end_is_lost() {
        let buffer = FrameBuffer::new("cam1", FrameBufferConfig::default());
        let (source, tx, _closed) = channel_source();
        buffer.start(source).unwrap();
        tx.send(Err(ReadError::Ended)).unwrap();

        let result = buffer.read(Duration::from_secs(2)).await;
        assert!(matches!(result, Err(Error::SourceLost(_))));
    }

    #[tokio::test]
    async fn test_stop_clears_lost() {
        let buffer = FrameBuffer::new("cam1", FrameBufferConfig::default());
        let (source, tx, _closed) = channel_source();
        buffer.start(source).unwrap();
        tx.send(Err(ReadError::Ended)).unwrap();

        let result = buffer.read(Duration::from_secs(2)).await;
        assert!(matches!(result, Err(Error::SourceLost(_))));

        buffer.stop().await;
        assert_eq!(buffer.state(), BufferState::Stopped);
        assert!(buffer.read(Duration::from_millis(10)).await.unwrap().is_none());

        // Restartable after stop
        let (source, tx, _closed) = channel_source();
        buffer.start(source).unwrap();
        tx.send(Ok(vec![7])).unwrap();
        let frame = buffer.read(Duration::from_secs(2)).await.unwrap().unwrap();
        assert_eq!(frame.data, vec![7]);

        buffer.stop().await;
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let buffer = FrameBuffer::new("cam1", FrameBufferConfig::default());
        let (source, _tx, _closed) = channel_source();
        buffer.start(source).unwrap();

        let (second, _tx2, _closed2) = channel_source();
        assert!(buffer.start(second).is_err());

        buffer.stop().await;
    }
}
