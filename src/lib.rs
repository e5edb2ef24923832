//! facecast - real-time face-swap relay.
//!
//! Pulls decoded video from a network source, runs each frame through an
//! ordered chain of face transforms, paces output to the configured frame
//! rate, and feeds raw frames to an ffmpeg encoder child that serves the
//! re-encoded stream on a listening TCP socket.
//!
//! # Architecture
//!
//! - `source`: pull-based decoded-frame sources (ffmpeg decoder child, stub)
//! - `sink`: push-based encoder child over a write-only byte pipe
//! - `transform`: per-frame face swap / face enhance stages
//! - `model`: inference capability traits and the once-only model cache
//! - `session`: the capture orchestrator (worker thread, pacing, reconnect,
//!   coordinated shutdown)
//! - `limiter`: bounded pool of concurrent capture permits
//!
//! The model cache and the session limiter are the only cross-session shared
//! state; both are explicit objects handed into constructors so tests can
//! isolate them. Everything else is exclusively owned by one session.
//!
//! # Failure model
//!
//! Per-frame transform faults drop that frame and keep the session alive. A
//! source read failure gets exactly one reconnect attempt before it is
//! fatal. Encoder faults are fatal. Fatal worker exits release every OS
//! resource and the capacity permit, and leave the session observable as
//! `Stopped`.

pub mod config;
pub mod error;
pub mod frame;
pub mod limiter;
pub mod model;
pub mod session;
mod signal;
pub mod sink;
pub mod source;
pub mod transform;

pub use config::SessionConfig;
pub use error::{PipelineError, PipelineResult};
pub use frame::Frame;
pub use limiter::{SessionLimiter, SessionPermit};
pub use model::backends::stub::{StubDetector, StubModelLoader};
#[cfg(feature = "backend-tract")]
pub use model::backends::tract::{TractDetector, TractModelLoader};
pub use model::{
    primary_face, EnhanceEngine, Face, FaceDetector, ModelCache, ModelKey, ModelLoader, ModelSet,
    SwapEngine,
};
pub use session::{CaptureSession, SessionStats, SessionStatus};
pub use sink::{EncoderCommand, EncoderSink, SinkConfig, SinkStats};
pub use source::{SourceConfig, SourceStats, StreamSource};
pub use transform::{FaceEnhanceTransform, FaceSwapTransform, FrameTransform};
