//! facecastd - face-swap relay daemon.
//!
//! This daemon:
//! 1. Loads the swap model set and reference face through the model cache
//! 2. Opens one capture session: network source -> transform chain -> encoder
//! 3. Serves the re-encoded stream on the configured listening address
//! 4. Stops cleanly on SIGINT/SIGTERM or when the session dies

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use clap::Parser;

use facecast::{
    CaptureSession, FaceEnhanceTransform, FaceSwapTransform, FrameTransform, ModelCache,
    SessionConfig, SessionLimiter,
};

#[derive(Debug, Parser)]
#[command(
    name = "facecastd",
    about = "Face-swap relay: pull a video stream, swap faces, re-stream it"
)]
struct Args {
    /// Input stream address (e.g. tcp://host:port)
    #[arg(long, env = "FACECAST_SOURCE_URL")]
    source_url: Option<String>,

    /// Output stream address the encoder listens on
    #[arg(long, env = "FACECAST_OUTPUT_URL")]
    output_url: Option<String>,

    /// Face swap model path
    #[arg(
        long,
        env = "FACECAST_MODEL_PATH",
        default_value = "models/inswapper_128_fp16.onnx"
    )]
    model_path: PathBuf,

    /// Reference face image path
    #[arg(long, env = "FACECAST_REFERENCE_IMAGE", default_value = "face.jpg")]
    reference_image: PathBuf,

    /// Output video width
    #[arg(long)]
    width: Option<u32>,

    /// Output video height
    #[arg(long)]
    height: Option<u32>,

    /// Output frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Run face enhancement after the swap
    #[arg(long)]
    enhance: bool,

    /// Maximum concurrent capture sessions
    #[arg(long, env = "FACECAST_MAX_SESSIONS", default_value_t = 3)]
    max_sessions: usize,

    /// Optional JSON config file; flags override its values
    #[arg(long, env = "FACECAST_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SessionConfig::from_file(path)?,
        None => SessionConfig::default(),
    };
    if let Some(url) = args.source_url {
        config.source_url = url;
    }
    if let Some(url) = args.output_url {
        config.output_url = url;
    }
    if let Some(width) = args.width {
        config.output_width = width;
    }
    if let Some(height) = args.height {
        config.output_height = height;
    }
    if let Some(fps) = args.fps {
        config.fps = fps;
    }
    config.validate()?;

    if !args.model_path.exists() {
        return Err(anyhow!(
            "model file not found: {} (see models/instructions.txt)",
            args.model_path.display()
        ));
    }
    if !args.reference_image.exists() {
        return Err(anyhow!(
            "reference image not found: {}",
            args.reference_image.display()
        ));
    }

    let cache = build_cache();
    log::info!(
        "loading models: model={} reference={}",
        args.model_path.display(),
        args.reference_image.display()
    );
    let models = cache.get_or_load(&args.model_path, &args.reference_image)?;

    let mut transforms: Vec<Arc<dyn FrameTransform>> =
        vec![Arc::new(FaceSwapTransform::new(models.clone()))];
    if args.enhance {
        transforms.push(Arc::new(FaceEnhanceTransform::new(models)));
    }

    let limiter = SessionLimiter::new(args.max_sessions);
    let session = CaptureSession::new(config, transforms, limiter.clone())?;
    session.start()?;
    log::info!(
        "relay running: {} -> {}",
        session.config().source_url,
        session.config().output_url
    );

    let term = Arc::new(AtomicBool::new(false));
    {
        let term = term.clone();
        ctrlc::set_handler(move || term.store(true, Ordering::SeqCst))?;
    }

    let mut last_health = Instant::now();
    while !term.load(Ordering::SeqCst) && session.is_running() {
        std::thread::sleep(Duration::from_secs(1));
        if last_health.elapsed() >= Duration::from_secs(5) {
            let stats = session.stats();
            log::info!(
                "health: emitted={} dropped={} reconnects={} sessions={}/{} models={}",
                stats.frames_emitted,
                stats.frames_dropped,
                stats.reconnects,
                limiter.in_use(),
                limiter.capacity(),
                cache.len()
            );
            last_health = Instant::now();
        }
    }

    if term.load(Ordering::SeqCst) {
        log::info!("shutdown signal received, stopping");
    } else {
        log::warn!("capture session ended on its own, shutting down");
    }
    session.stop();
    cache.clear();
    log::info!("relay stopped");
    Ok(())
}

#[cfg(feature = "backend-tract")]
fn build_cache() -> ModelCache {
    ModelCache::new(facecast::TractModelLoader::new())
}

#[cfg(not(feature = "backend-tract"))]
fn build_cache() -> ModelCache {
    ModelCache::new(facecast::StubModelLoader::new())
}
