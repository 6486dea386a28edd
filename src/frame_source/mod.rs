//! FrameSource - Live Video Connections
//!
//! ## Responsibilities
//!
//! - Wrap a single live video connection (network camera or local device)
//! - Produce JPEG-encoded frames on demand
//! - Open connections in default or configured-fallback mode
//!
//! The production connector runs `ffmpeg` as a child process and splits its
//! MJPEG output into frames. Tests plug in scripted sources through the
//! `SourceConnector` trait.

mod ffmpeg;
mod mjpeg;

pub use ffmpeg::{redact_address, FfmpegConnector, FfmpegOptions, FfmpegSource};
pub use mjpeg::MjpegSplitter;

use async_trait::async_trait;

/// How a connection is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Plain open with source defaults
    Default,
    /// Explicit transport/buffering options, used as the retry after `NotReady`
    Configured,
}

impl OpenMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenMode::Default => "default",
            OpenMode::Configured => "configured",
        }
    }
}

/// Failure to open a source
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// Connection attempted but produced no frame; worth one configured retry
    #[error("source not ready: {0}")]
    NotReady(String),

    /// Cannot open at all (bad address, missing binary)
    #[error("source open failed: {0}")]
    Failed(String),
}

/// Failure to read the next frame from an open source
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// Source closed its stream
    #[error("stream ended")]
    Ended,

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A single open video connection
#[async_trait]
pub trait FrameSource: Send {
    /// Read the next JPEG frame
    async fn next_frame(&mut self) -> Result<Vec<u8>, ReadError>;

    /// Release the underlying connection
    async fn close(&mut self);
}

/// Opens frame sources for addresses
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn open(
        &self,
        address: &str,
        mode: OpenMode,
    ) -> Result<Box<dyn FrameSource>, OpenError>;
}

/// Local capture device (`0`, `/dev/video0`) rather than a network URL
pub fn is_local_device(address: &str) -> bool {
    let trimmed = address.trim();
    (!trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()))
        || trimmed.starts_with("/dev/video")
}

/// Device path for a local capture address
pub fn device_path(address: &str) -> String {
    let trimmed = address.trim();
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        format!("/dev/video{}", trimmed)
    } else {
        trimmed.to_string()
    }
}
