//! Frame sources.
//!
//! `StreamSource` pulls decoded frames from a network stream. Real URLs are
//! handed to an ffmpeg decoder child that emits fixed-size rawvideo frames
//! on its stdout pipe; `stub://` URLs select a synthetic in-process
//! generator so the pipeline can run without a network or an ffmpeg binary.
//!
//! Lifecycle is open/read/close with an explicit `reopen` for the session's
//! reconnect path. `close` is idempotent; reading a closed source is a
//! connection error.

use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

const STUB_SCHEME: &str = "stub://";
const STUB_DOWN_SCHEME: &str = "stub-down://";
const SPAWN_GRACE: Duration = Duration::from_millis(50);

/// Configuration for a frame source.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Transport address (e.g. `tcp://host:port`, `rtsp://...`, `stub://name`).
    pub url: String,
    /// Decode geometry for the rawvideo pipe.
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Decoder binary, resolved through PATH.
    pub program: String,
}

/// Statistics for a source, for operational monitoring.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub url: String,
    pub frames_read: u64,
}

pub struct StreamSource {
    config: SourceConfig,
    backend: Option<Backend>,
    frames_read: u64,
}

enum Backend {
    Synthetic(SyntheticSource),
    Decoder(DecoderProcess),
}

impl StreamSource {
    /// Connect to the configured transport.
    pub fn open(config: SourceConfig) -> PipelineResult<Self> {
        let backend = open_backend(&config)?;
        log::info!("source connected: {}", config.url);
        Ok(Self {
            config,
            backend: Some(backend),
            frames_read: 0,
        })
    }

    /// Read the next decoded frame.
    ///
    /// An error here means the connection dropped or the stream ended; the
    /// caller decides whether to reconnect.
    pub fn read_frame(&mut self) -> PipelineResult<Frame> {
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| PipelineError::connection("source is closed"))?;
        let frame = match backend {
            Backend::Synthetic(source) => source.next_frame()?,
            Backend::Decoder(decoder) => decoder.next_frame()?,
        };
        self.frames_read += 1;
        Ok(frame)
    }

    /// Release the current connection and establish a fresh one.
    ///
    /// Cumulative statistics survive; the transport state does not.
    pub fn reopen(&mut self) -> PipelineResult<()> {
        self.close();
        self.backend = Some(open_backend(&self.config)?);
        log::info!("source reconnected: {}", self.config.url);
        Ok(())
    }

    /// Release the connection. Idempotent.
    pub fn close(&mut self) {
        if let Some(backend) = self.backend.take() {
            match backend {
                Backend::Synthetic(_) => {}
                Backend::Decoder(decoder) => decoder.close(),
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            url: self.config.url.clone(),
            frames_read: self.frames_read,
        }
    }
}

impl Drop for StreamSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_backend(config: &SourceConfig) -> PipelineResult<Backend> {
    if config.url.starts_with(STUB_DOWN_SCHEME) {
        return Err(PipelineError::connection(format!(
            "cannot open {}",
            config.url
        )));
    }
    if config.url.starts_with(STUB_SCHEME) {
        return Ok(Backend::Synthetic(SyntheticSource::new(config)));
    }
    Ok(Backend::Decoder(DecoderProcess::spawn(config)?))
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for development and tests
// ----------------------------------------------------------------------------

struct SyntheticSource {
    width: u32,
    height: u32,
    /// Frames to produce before reporting end-of-stream (`?frames=N`).
    frame_limit: Option<u64>,
    frames_produced: u64,
}

impl SyntheticSource {
    fn new(config: &SourceConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            frame_limit: query_param(&config.url, "frames"),
            frames_produced: 0,
        }
    }

    fn next_frame(&mut self) -> PipelineResult<Frame> {
        if let Some(limit) = self.frame_limit {
            if self.frames_produced >= limit {
                return Err(PipelineError::connection("synthetic stream ended"));
            }
        }
        self.frames_produced += 1;

        // Simple moving pattern; intentionally non-uniform so the stub
        // detector sees a face in every frame.
        let tick = self.frames_produced;
        let pixel_count = self.width as usize * self.height as usize * 3;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + tick) % 256) as u8;
        }

        Frame::new(pixels, self.width, self.height)
    }
}

/// Parse a `?key=value` query parameter off a stub URL.
pub(crate) fn query_param(url: &str, key: &str) -> Option<u64> {
    let (_, query) = url.split_once('?')?;
    for pair in query.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            if k == key {
                return v.parse().ok();
            }
        }
    }
    None
}

// ----------------------------------------------------------------------------
// Production source: ffmpeg decoder child emitting rawvideo on stdout
// ----------------------------------------------------------------------------

struct DecoderProcess {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
}

impl DecoderProcess {
    fn spawn(config: &SourceConfig) -> PipelineResult<Self> {
        which::which(&config.program).map_err(|_| {
            PipelineError::connection(format!("decoder '{}' not found in PATH", config.program))
        })?;

        let mut child = Command::new(&config.program)
            .args(decoder_args(config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                PipelineError::connection(format!("failed to spawn decoder: {}", e))
            })?;

        // A transport that refuses outright makes the decoder exit at once.
        std::thread::sleep(SPAWN_GRACE);
        if let Ok(Some(status)) = child.try_wait() {
            return Err(PipelineError::connection(format!(
                "decoder exited immediately ({}) for {}",
                status, config.url
            )));
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::connection("decoder stdout not captured"))?;

        Ok(Self {
            child,
            stdout,
            width: config.width,
            height: config.height,
        })
    }

    fn next_frame(&mut self) -> PipelineResult<Frame> {
        // Geometry is fixed by the decoder command line.
        let mut pixels = vec![0u8; self.width as usize * self.height as usize * 3];
        self.stdout
            .read_exact(&mut pixels)
            .map_err(|e| PipelineError::connection(format!("stream read failed: {}", e)))?;
        Frame::new(pixels, self.width, self.height)
    }

    fn close(mut self) {
        drop(self.stdout);
        if let Err(e) = self.child.kill() {
            log::debug!("decoder already exited: {}", e);
        }
        if let Err(e) = self.child.wait() {
            log::warn!("failed to reap decoder: {}", e);
        }
    }
}

fn decoder_args(config: &SourceConfig) -> Vec<String> {
    vec![
        "-nostdin".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        config.url.clone(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "bgr24".to_string(),
        "-s".to_string(),
        format!("{}x{}", config.width, config.height),
        "-r".to_string(),
        config.fps.to_string(),
        "pipe:1".to_string(),
    ]
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
