//! Encoder sink.
//!
//! `EncoderSink` pushes raw frames into an external encoder child process
//! over a write-only byte pipe; the encoder serves the re-encoded stream on
//! a listening socket. The encoder must receive exactly
//! `width * height * 3` bytes per frame in bgr24 order at the configured
//! rate. `stub://` output URLs select an in-memory sink so the pipeline can
//! run without an encoder binary.

use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::{PipelineError, PipelineResult};

const STUB_SCHEME: &str = "stub://";
const DEFAULT_LISTEN_PORT: u16 = 8554;
const DEFAULT_BITRATE: &str = "2000k";
const DEFAULT_PRESET: &str = "ultrafast";
const DEFAULT_TUNE: &str = "zerolatency";
const SPAWN_GRACE: Duration = Duration::from_millis(50);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const REAP_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration for the encoder sink.
#[derive(Clone, Debug)]
pub struct SinkConfig {
    /// Address the encoded stream is served on (`tcp://host:port`).
    pub output_url: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Encoder binary, resolved through PATH.
    pub program: String,
}

/// Builder for the encoder command line.
///
/// The default shape matches a low-latency h264 relay: rawvideo on stdin,
/// `libx264` + `zerolatency`, mpegts on a listening TCP socket.
#[derive(Clone, Debug)]
pub struct EncoderCommand {
    program: String,
    args: EncoderArgs,
}

#[derive(Clone, Debug)]
enum EncoderArgs {
    Relay {
        width: u32,
        height: u32,
        fps: u32,
        bitrate: String,
        preset: String,
        tune: String,
        listen_url: String,
    },
    /// Escape hatch: a fully custom argument list.
    Raw(Vec<String>),
}

impl EncoderCommand {
    pub fn new(config: &SinkConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: EncoderArgs::Relay {
                width: config.width,
                height: config.height,
                fps: config.fps,
                bitrate: DEFAULT_BITRATE.to_string(),
                preset: DEFAULT_PRESET.to_string(),
                tune: DEFAULT_TUNE.to_string(),
                listen_url: listen_address(&config.output_url),
            },
        }
    }

    /// Use a custom program and argument list verbatim.
    pub fn raw(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args: EncoderArgs::Raw(args),
        }
    }

    pub fn bitrate(mut self, bitrate: impl Into<String>) -> Self {
        if let EncoderArgs::Relay { bitrate: b, .. } = &mut self.args {
            *b = bitrate.into();
        }
        self
    }

    pub fn preset(mut self, preset: impl Into<String>) -> Self {
        if let EncoderArgs::Relay { preset: p, .. } = &mut self.args {
            *p = preset.into();
        }
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn build_args(&self) -> Vec<String> {
        match &self.args {
            EncoderArgs::Raw(args) => args.clone(),
            EncoderArgs::Relay {
                width,
                height,
                fps,
                bitrate,
                preset,
                tune,
                listen_url,
            } => vec![
                "-f".to_string(),
                "rawvideo".to_string(),
                "-pix_fmt".to_string(),
                "bgr24".to_string(),
                "-s".to_string(),
                format!("{}x{}", width, height),
                "-r".to_string(),
                fps.to_string(),
                "-i".to_string(),
                "-".to_string(),
                "-c:v".to_string(),
                "libx264".to_string(),
                "-preset".to_string(),
                preset.clone(),
                "-tune".to_string(),
                tune.clone(),
                "-b:v".to_string(),
                bitrate.clone(),
                "-f".to_string(),
                "mpegts".to_string(),
                "-listen".to_string(),
                "1".to_string(),
                listen_url.clone(),
            ],
        }
    }
}

/// Derive the listening address from the configured output URL: keep the
/// port, bind every interface. URLs without a parseable port fall back to
/// 8554.
fn listen_address(output_url: &str) -> String {
    let port = output_url
        .rsplit(':')
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(DEFAULT_LISTEN_PORT);
    format!("tcp://0.0.0.0:{}", port)
}

/// Statistics for a sink, for operational monitoring.
#[derive(Clone, Debug, Default)]
pub struct SinkStats {
    pub frames_written: u64,
    pub bytes_written: u64,
}

pub struct EncoderSink {
    backend: Option<SinkBackend>,
    stats: SinkStats,
}

enum SinkBackend {
    Process(EncoderProcess),
    Memory(MemorySink),
}

/// In-memory sink for `stub://` output URLs. `?fail_after=N` makes the Nth
/// and later writes fail like a broken encoder pipe, for fatal-path tests.
struct MemorySink {
    fail_after: Option<u64>,
    writes: u64,
}

impl MemorySink {
    fn new(url: &str) -> Self {
        Self {
            fail_after: crate::source::query_param(url, "fail_after"),
            writes: 0,
        }
    }

    fn write(&mut self) -> PipelineResult<()> {
        if let Some(limit) = self.fail_after {
            if self.writes >= limit {
                return Err(PipelineError::sink_write("stub encoder pipe broken"));
            }
        }
        self.writes += 1;
        Ok(())
    }
}

impl EncoderSink {
    /// Launch the encoder for this configuration.
    pub fn open(config: &SinkConfig) -> PipelineResult<Self> {
        if config.output_url.starts_with(STUB_SCHEME) {
            log::info!("sink opened in memory: {}", config.output_url);
            return Ok(Self {
                backend: Some(SinkBackend::Memory(MemorySink::new(&config.output_url))),
                stats: SinkStats::default(),
            });
        }
        Self::spawn(EncoderCommand::new(config))
    }

    /// Spawn an encoder child from an explicit command.
    pub fn spawn(command: EncoderCommand) -> PipelineResult<Self> {
        let process = EncoderProcess::spawn(&command)?;
        log::info!("encoder launched: {}", command.program());
        Ok(Self {
            backend: Some(SinkBackend::Process(process)),
            stats: SinkStats::default(),
        })
    }

    /// Push one raw frame down the encoder pipe.
    ///
    /// A failure here means the encoder died; the session treats it as
    /// fatal.
    pub fn write_frame(&mut self, bytes: &[u8]) -> PipelineResult<()> {
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| PipelineError::sink_write("sink is closed"))?;
        match backend {
            SinkBackend::Process(process) => process.write(bytes)?,
            SinkBackend::Memory(memory) => memory.write()?,
        }
        self.stats.frames_written += 1;
        self.stats.bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Close the input pipe and wind the encoder down. Idempotent.
    ///
    /// Termination is requested by closing stdin; the child gets a bounded
    /// wait to drain and exit before it is killed.
    pub fn close(&mut self) {
        if let Some(backend) = self.backend.take() {
            match backend {
                SinkBackend::Process(process) => process.close(),
                SinkBackend::Memory(_) => {}
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    pub fn stats(&self) -> SinkStats {
        self.stats.clone()
    }
}

impl Drop for EncoderSink {
    fn drop(&mut self) {
        self.close();
    }
}

struct EncoderProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl EncoderProcess {
    fn spawn(command: &EncoderCommand) -> PipelineResult<Self> {
        which::which(command.program()).map_err(|_| {
            PipelineError::sink_launch(format!(
                "encoder '{}' not found in PATH",
                command.program()
            ))
        })?;

        let mut child = Command::new(command.program())
            .args(command.build_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PipelineError::sink_launch(format!("failed to spawn encoder: {}", e)))?;

        // Bad flags or a busy listen port make the encoder exit at once.
        std::thread::sleep(SPAWN_GRACE);
        if let Ok(Some(status)) = child.try_wait() {
            return Err(PipelineError::sink_launch(format!(
                "encoder exited immediately ({})",
                status
            )));
        }

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PipelineError::sink_launch("encoder stdin not captured"))?;

        Ok(Self {
            child,
            stdin: Some(stdin),
        })
    }

    fn write(&mut self, bytes: &[u8]) -> PipelineResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| PipelineError::sink_write("encoder stdin already closed"))?;
        stdin
            .write_all(bytes)
            .and_then(|_| stdin.flush())
            .map_err(|e| PipelineError::sink_write(format!("encoder pipe broken: {}", e)))
    }

    fn close(mut self) {
        // EOF on stdin is the graceful termination request.
        drop(self.stdin.take());

        let deadline = Instant::now() + CLOSE_TIMEOUT;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    log::debug!("encoder exited: {}", status);
                    return;
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    std::thread::sleep(REAP_INTERVAL);
                }
                Err(e) => {
                    log::warn!("failed to poll encoder: {}", e);
                    break;
                }
            }
        }

        log::warn!("encoder unresponsive after {:?}, killing", CLOSE_TIMEOUT);
        if let Err(e) = self.child.kill() {
            log::debug!("encoder already exited: {}", e);
        }
        if let Err(e) = self.child.wait() {
            log::warn!("failed to reap encoder: {}", e);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
