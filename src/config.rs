use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};

const DEFAULT_SOURCE_URL: &str = "stub://camera";
const DEFAULT_OUTPUT_URL: &str = "tcp://localhost:8554";
const DEFAULT_OUTPUT_WIDTH: u32 = 640;
const DEFAULT_OUTPUT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_FFMPEG_PROGRAM: &str = "ffmpeg";
const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 1_000;
const DEFAULT_JOIN_TIMEOUT_SECS: u64 = 10;

/// Configuration for one capture session.
///
/// The output geometry doubles as the decode geometry: the decoder backend
/// emits rawvideo at this size, and every frame leaving the transform chain
/// is resampled back to it before hitting the encoder pipe.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Transport address of the frame source (e.g. `tcp://host:port`).
    /// `stub://` selects the synthetic in-process source.
    pub source_url: String,
    /// Address the encoder listens on for the outgoing stream.
    pub output_url: String,
    pub output_width: u32,
    pub output_height: u32,
    pub fps: u32,
    /// ffmpeg binary used for both the decoder and encoder children,
    /// resolved through PATH at launch.
    pub ffmpeg_program: String,
    /// Wait between releasing a failed connection and reopening it.
    pub reconnect_backoff: Duration,
    /// How long `stop()` waits for the worker before giving up on the join.
    pub join_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            source_url: DEFAULT_SOURCE_URL.to_string(),
            output_url: DEFAULT_OUTPUT_URL.to_string(),
            output_width: DEFAULT_OUTPUT_WIDTH,
            output_height: DEFAULT_OUTPUT_HEIGHT,
            fps: DEFAULT_FPS,
            ffmpeg_program: DEFAULT_FFMPEG_PROGRAM.to_string(),
            reconnect_backoff: Duration::from_millis(DEFAULT_RECONNECT_BACKOFF_MS),
            join_timeout: Duration::from_secs(DEFAULT_JOIN_TIMEOUT_SECS),
        }
    }
}

impl SessionConfig {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            ..Self::default()
        }
    }

    /// Load from a JSON file, with unset fields falling back to defaults.
    pub fn from_file(path: &Path) -> PipelineResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::InvalidConfig(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let file: SessionConfigFile = serde_json::from_str(&raw).map_err(|e| {
            PipelineError::InvalidConfig(format!("invalid config file {}: {}", path.display(), e))
        })?;
        let defaults = Self::default();
        let cfg = Self {
            source_url: file.source_url.unwrap_or(defaults.source_url),
            output_url: file.output_url.unwrap_or(defaults.output_url),
            output_width: file.output_width.unwrap_or(defaults.output_width),
            output_height: file.output_height.unwrap_or(defaults.output_height),
            fps: file.fps.unwrap_or(defaults.fps),
            ffmpeg_program: file.ffmpeg_program.unwrap_or(defaults.ffmpeg_program),
            reconnect_backoff: file
                .reconnect_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_backoff),
            join_timeout: file
                .join_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.join_timeout),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.source_url.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("source url is empty".into()));
        }
        if self.output_url.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("output url is empty".into()));
        }
        if self.output_width == 0 || self.output_height == 0 {
            return Err(PipelineError::InvalidConfig(
                "output geometry must be non-zero".into(),
            ));
        }
        if self.fps == 0 {
            return Err(PipelineError::InvalidConfig(
                "frame rate must be greater than zero".into(),
            ));
        }
        if self.ffmpeg_program.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("ffmpeg program is empty".into()));
        }
        Ok(())
    }

    /// Raw byte size of one output frame.
    pub fn frame_bytes(&self) -> usize {
        self.output_width as usize * self.output_height as usize * 3
    }

    /// Target inter-frame interval.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps as f64)
    }
}

#[derive(Debug, Deserialize, Default)]
struct SessionConfigFile {
    source_url: Option<String>,
    output_url: Option<String>,
    output_width: Option<u32>,
    output_height: Option<u32>,
    fps: Option<u32>,
    ffmpeg_program: Option<String>,
    reconnect_backoff_ms: Option<u64>,
    join_timeout_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_fps_is_rejected() {
        let cfg = SessionConfig {
            fps: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn frame_bytes_matches_geometry() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.frame_bytes(), 640 * 480 * 3);
    }

    #[test]
    fn file_fields_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"source_url": "tcp://cam:9000", "fps": 15, "output_width": 320}}"#
        )
        .unwrap();
        let cfg = SessionConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.source_url, "tcp://cam:9000");
        assert_eq!(cfg.fps, 15);
        assert_eq!(cfg.output_width, 320);
        assert_eq!(cfg.output_height, DEFAULT_OUTPUT_HEIGHT);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = SessionConfig::from_file(Path::new("/nonexistent/facecast.json")).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }
}
