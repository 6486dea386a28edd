//! ffmpeg-backed frame source
//!
//! Spawns `ffmpeg` transcoding the camera into MJPEG on stdout. The child is
//! spawned with `kill_on_drop(true)` so a dropped source never leaves a
//! stray process behind.

use super::{
    device_path, is_local_device, FrameSource, MjpegSplitter, OpenError, OpenMode, ReadError,
    SourceConnector,
};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

const READ_CHUNK: usize = 64 * 1024;
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// ffmpeg invocation settings
#[derive(Debug, Clone)]
pub struct FfmpegOptions {
    /// ffmpeg binary
    pub ffmpeg_path: String,
    /// Time allowed for the first frame after spawn
    pub open_timeout: Duration,
    /// Output frame rate cap (None = source rate)
    pub capture_fps: Option<u32>,
    /// MJPEG quality (2 = best, 31 = worst)
    pub jpeg_quality: u8,
}

impl Default for FfmpegOptions {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            open_timeout: Duration::from_secs(10),
            capture_fps: None,
            jpeg_quality: 5,
        }
    }
}

/// Opens ffmpeg sources
pub struct FfmpegConnector {
    options: FfmpegOptions,
}

impl FfmpegConnector {
    pub fn new(options: FfmpegOptions) -> Self {
        Self { options }
    }

    /// Build the ffmpeg argument list for an address and open mode
    pub fn build_args(&self, address: &str, mode: OpenMode) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        if is_local_device(address) {
            args.extend(["-f".to_string(), "v4l2".to_string()]);
            if mode == OpenMode::Configured {
                args.extend(
                    ["-input_format", "mjpeg", "-framerate", "30"]
                        .iter()
                        .map(|s| s.to_string()),
                );
            }
            args.extend(["-i".to_string(), device_path(address)]);
        } else {
            if mode == OpenMode::Configured {
                // Low-latency network options
                args.extend(
                    [
                        "-rtsp_transport",
                        "tcp",
                        "-rtsp_flags",
                        "prefer_tcp",
                        "-buffer_size",
                        "8192000",
                        "-fflags",
                        "nobuffer",
                        "-flags",
                        "low_delay",
                    ]
                    .iter()
                    .map(|s| s.to_string()),
                );
            }
            args.extend(["-i".to_string(), address.trim().to_string()]);
        }

        args.push("-an".to_string());
        if let Some(fps) = self.options.capture_fps {
            args.extend(["-vf".to_string(), format!("fps={}", fps)]);
        }
        args.extend([
            "-f".to_string(),
            "image2pipe".to_string(),
            "-vcodec".to_string(),
            "mjpeg".to_string(),
            "-q:v".to_string(),
            self.options.jpeg_quality.to_string(),
            "-".to_string(),
        ]);
        args
    }
}

#[async_trait]
impl SourceConnector for FfmpegConnector {
    async fn open(
        &self,
        address: &str,
        mode: OpenMode,
    ) -> Result<Box<dyn FrameSource>, OpenError> {
        let args = self.build_args(address, mode);

        let mut child = Command::new(&self.options.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OpenError::Failed(format!("ffmpeg spawn failed: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OpenError::Failed("ffmpeg stdout not captured".to_string()))?;

        let mut source = FfmpegSource {
            child,
            stdout,
            splitter: MjpegSplitter::new(MAX_FRAME_BYTES),
            pending: None,
            chunk: vec![0u8; READ_CHUNK],
        };

        // A source counts as open once it produced its first frame
        let timeout = self.options.open_timeout;
        match tokio::time::timeout(timeout, source.read_frame()).await {
            Ok(Ok(frame)) => {
                tracing::debug!(
                    address = %redact_address(address),
                    mode = mode.as_str(),
                    first_frame_bytes = frame.len(),
                    "ffmpeg source opened"
                );
                source.pending = Some(frame);
                Ok(Box::new(source))
            }
            Ok(Err(e)) => {
                source.close().await;
                Err(OpenError::NotReady(format!("no frame from source: {}", e)))
            }
            Err(_) => {
                source.close().await;
                Err(OpenError::NotReady(format!(
                    "no frame within {}s",
                    timeout.as_secs()
                )))
            }
        }
    }
}

/// A running ffmpeg process and its MJPEG output
pub struct FfmpegSource {
    child: Child,
    stdout: ChildStdout,
    splitter: MjpegSplitter,
    /// First frame read during open
    pending: Option<Vec<u8>>,
    chunk: Vec<u8>,
}

impl FfmpegSource {
    async fn read_frame(&mut self) -> Result<Vec<u8>, ReadError> {
        loop {
            if let Some(frame) = self.splitter.next_frame() {
                return Ok(frame);
            }
            let n = self.stdout.read(&mut self.chunk).await?;
            if n == 0 {
                return Err(ReadError::Ended);
            }
            self.splitter.push(&self.chunk[..n]);
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    async fn next_frame(&mut self) -> Result<Vec<u8>, ReadError> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        self.read_frame().await
    }

    async fn close(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(error = %e, "ffmpeg already exited");
        }
        if let Err(e) = self.child.wait().await {
            tracing::warn!(error = %e, "ffmpeg wait failed");
        }
    }
}

/// Strip credentials from a source address for logging
pub fn redact_address(address: &str) -> String {
    match (address.find("://"), address.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &address[..scheme_end], &address[at + 1..])
        }
        _ => address.to_string(),
    }
}
