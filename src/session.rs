//! Capture session orchestration.
//!
//! A `CaptureSession` owns one source connection, one encoder sink, and one
//! dedicated worker thread that reads, transforms, paces, and emits frames
//! until told to stop or hit by a fatal fault. The control surface
//! (`start`/`stop`/`status`) is thread-safe; the worker owns its resources
//! outright, so the state lock is never held across blocking I/O.
//!
//! Failure policy: a transform fault costs one frame; a read failure gets
//! one reconnect attempt and is fatal on the second; an encoder fault is
//! fatal. Fatal exits tear everything down, release the capacity permit,
//! and leave the session observable as `Stopped`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::SessionConfig;
use crate::error::PipelineResult;
use crate::frame::Frame;
use crate::limiter::{SessionLimiter, SessionPermit};
use crate::signal::Signal;
use crate::sink::{EncoderSink, SinkConfig};
use crate::source::{SourceConfig, StreamSource};
use crate::transform::FrameTransform;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// Not running; `start()` may be called.
    Idle,
    Running,
    /// The worker exited on its own (fatal fault); `stop()` resets to Idle.
    Stopped,
}

/// Counters for one run, for operational monitoring.
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    pub frames_read: u64,
    pub frames_emitted: u64,
    pub frames_dropped: u64,
    pub bytes_written: u64,
    pub reconnects: u64,
}

#[derive(Default)]
struct Counters {
    frames_read: AtomicU64,
    frames_emitted: AtomicU64,
    frames_dropped: AtomicU64,
    bytes_written: AtomicU64,
    reconnects: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        self.frames_read.store(0, Ordering::Relaxed);
        self.frames_emitted.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
        self.reconnects.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            frames_emitted: self.frames_emitted.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

struct SessionState {
    status: SessionStatus,
    worker: Option<JoinHandle<()>>,
}

pub struct CaptureSession {
    config: SessionConfig,
    transforms: Arc<[Arc<dyn FrameTransform>]>,
    limiter: Arc<SessionLimiter>,
    state: Mutex<SessionState>,
    shutdown: Arc<Signal>,
    frame_ready: Arc<Signal>,
    worker_done: Arc<Signal>,
    counters: Arc<Counters>,
}

impl CaptureSession {
    /// Build a session bound to one source and one sink.
    ///
    /// The transform list is applied in order to every frame and is shared
    /// with (not owned by) the session; transforms must be reentrant.
    pub fn new(
        config: SessionConfig,
        transforms: Vec<Arc<dyn FrameTransform>>,
        limiter: Arc<SessionLimiter>,
    ) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transforms: transforms.into(),
            limiter,
            state: Mutex::new(SessionState {
                status: SessionStatus::Idle,
                worker: None,
            }),
            shutdown: Arc::new(Signal::new()),
            frame_ready: Arc::new(Signal::new()),
            worker_done: Arc::new(Signal::new()),
            counters: Arc::new(Counters::default()),
        })
    }

    /// Start the pipeline. Idempotent while running.
    ///
    /// Acquires a capacity permit, opens the source, launches the encoder,
    /// then spawns the worker. Any failure rolls back everything acquired
    /// before it; nothing is left half-open.
    pub fn start(&self) -> PipelineResult<()> {
        let mut state = self.state.lock();

        if state.status == SessionStatus::Running && !self.worker_done.is_set() {
            log::warn!("capture session already running");
            return Ok(());
        }
        // Reap a worker that finished on its own or was left by a prior run.
        if let Some(handle) = state.worker.take() {
            if handle.join().is_err() {
                log::error!("previous capture worker panicked");
            }
        }

        let permit = self.limiter.try_acquire()?;

        // Permit and source ride RAII from here: an early return releases
        // them in reverse order with nothing leaked.
        let source = StreamSource::open(self.source_config())?;
        let sink = match EncoderSink::open(&self.sink_config()) {
            Ok(sink) => sink,
            Err(e) => {
                let mut source = source;
                source.close();
                return Err(e);
            }
        };

        self.shutdown.clear();
        self.frame_ready.clear();
        self.worker_done.clear();
        self.counters.reset();

        let worker = Worker {
            source,
            sink,
            transforms: self.transforms.clone(),
            output_width: self.config.output_width,
            output_height: self.config.output_height,
            interval: self.config.frame_interval(),
            reconnect_backoff: self.config.reconnect_backoff,
            shutdown: self.shutdown.clone(),
            frame_ready: self.frame_ready.clone(),
            done: self.worker_done.clone(),
            counters: self.counters.clone(),
            permit: Some(permit),
        };
        let handle = std::thread::Builder::new()
            .name("capture-worker".to_string())
            .spawn(move || worker.run())?;

        state.worker = Some(handle);
        state.status = SessionStatus::Running;
        log::info!(
            "capture session started: {} -> {} ({}x{}@{})",
            self.config.source_url,
            self.config.output_url,
            self.config.output_width,
            self.config.output_height,
            self.config.fps
        );
        Ok(())
    }

    /// Stop the pipeline and release every resource. Idempotent; safe from
    /// any thread and from drop.
    pub fn stop(&self) {
        let handle = {
            let mut state = self.state.lock();
            if state.status == SessionStatus::Idle {
                return;
            }
            self.shutdown.set();
            state.worker.take()
        };

        // Join outside the lock so the worker can finish its own cleanup
        // without deadlocking against us.
        let finished = self.worker_done.wait_timeout(self.config.join_timeout);
        if let Some(handle) = handle {
            if finished {
                if handle.join().is_err() {
                    log::error!("capture worker panicked");
                }
            } else {
                log::warn!(
                    "capture worker did not stop within {:?}, detaching",
                    self.config.join_timeout
                );
            }
        }

        self.state.lock().status = SessionStatus::Idle;
        log::info!("capture session stopped");
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.state.lock();
        match state.status {
            SessionStatus::Running if self.worker_done.is_set() => SessionStatus::Stopped,
            status => status,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status() == SessionStatus::Running
    }

    /// Block until the first frame has been emitted, the timeout elapses, or
    /// the session is already past that point. The readiness state persists
    /// for late callers.
    pub fn wait_until_ready(&self, timeout: std::time::Duration) -> bool {
        self.frame_ready.wait_timeout(timeout)
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn source_config(&self) -> SourceConfig {
        SourceConfig {
            url: self.config.source_url.clone(),
            width: self.config.output_width,
            height: self.config.output_height,
            fps: self.config.fps,
            program: self.config.ffmpeg_program.clone(),
        }
    }

    fn sink_config(&self) -> SinkConfig {
        SinkConfig {
            output_url: self.config.output_url.clone(),
            width: self.config.output_width,
            height: self.config.output_height,
            fps: self.config.fps,
            program: self.config.ffmpeg_program.clone(),
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------------
// Worker
// ----------------------------------------------------------------------------

struct Worker {
    source: StreamSource,
    sink: EncoderSink,
    transforms: Arc<[Arc<dyn FrameTransform>]>,
    output_width: u32,
    output_height: u32,
    interval: std::time::Duration,
    reconnect_backoff: std::time::Duration,
    shutdown: Arc<Signal>,
    frame_ready: Arc<Signal>,
    done: Arc<Signal>,
    counters: Arc<Counters>,
    permit: Option<SessionPermit>,
}

/// Sets the worker-done signal when dropped, so `stop()` never waits out its
/// full join timeout even if the worker unwinds.
struct DoneGuard(Arc<Signal>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.0.set();
    }
}

impl Worker {
    fn run(mut self) {
        let _done = DoneGuard(self.done.clone());
        if let Err(e) = self.pump() {
            log::error!("capture worker terminated: {}", e);
        }
        self.source.close();
        self.sink.close();
        // Capacity frees only after both ends of the pipe are torn down.
        drop(self.permit.take());
    }

    fn pump(&mut self) -> PipelineResult<()> {
        loop {
            if self.shutdown.is_set() {
                return Ok(());
            }
            let started = Instant::now();

            let frame = match self.source.read_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("frame read failed ({}), reconnecting", e);
                    self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                    self.source.close();
                    if self.shutdown.wait_timeout(self.reconnect_backoff) {
                        return Ok(());
                    }
                    // One attempt per read failure; a second failure in a
                    // row ends the session instead of busy-looping against
                    // a dead source.
                    self.source.reopen()?;
                    continue;
                }
            };
            self.counters.frames_read.fetch_add(1, Ordering::Relaxed);

            let Some(frame) = self.apply_transforms(frame) else {
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            };

            let frame = if frame.matches(self.output_width, self.output_height) {
                frame
            } else {
                match frame.resize(self.output_width, self.output_height) {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::warn!("resize failed, dropping frame: {}", e);
                        self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                }
            };

            let bytes = frame.as_bytes();
            self.sink.write_frame(bytes)?;
            self.counters.frames_emitted.fetch_add(1, Ordering::Relaxed);
            self.counters
                .bytes_written
                .fetch_add(bytes.len() as u64, Ordering::Relaxed);
            if !self.frame_ready.is_set() {
                self.frame_ready.set();
            }

            let elapsed = started.elapsed();
            if elapsed < self.interval && self.shutdown.wait_timeout(self.interval - elapsed) {
                return Ok(());
            }
        }
    }

    /// Run the transform chain in configured order. `None` means this frame
    /// failed and is dropped; the session keeps going.
    fn apply_transforms(&self, mut frame: Frame) -> Option<Frame> {
        for transform in self.transforms.iter() {
            let started = Instant::now();
            match transform.process(frame) {
                Ok(next) => {
                    log::debug!(
                        "transform {} took {:.2?}",
                        transform.name(),
                        started.elapsed()
                    );
                    frame = next;
                }
                Err(e) => {
                    log::warn!("transform {} failed, dropping frame: {}", transform.name(), e);
                    return None;
                }
            }
        }
        Some(frame)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn fast_config(source_url: &str) -> SessionConfig {
        SessionConfig {
            source_url: source_url.to_string(),
            output_url: "stub://sink".to_string(),
            output_width: 64,
            output_height: 48,
            fps: 100,
            reconnect_backoff: Duration::from_millis(10),
            join_timeout: Duration::from_secs(5),
            ..SessionConfig::default()
        }
    }

    fn session_with(
        config: SessionConfig,
        transforms: Vec<Arc<dyn FrameTransform>>,
        limiter: Arc<SessionLimiter>,
    ) -> CaptureSession {
        CaptureSession::new(config, transforms, limiter).unwrap()
    }

    #[test]
    fn start_emits_frames_and_stop_resets() {
        let session = session_with(
            fast_config("stub://cam"),
            Vec::new(),
            SessionLimiter::new(4),
        );
        session.start().unwrap();
        assert!(session.wait_until_ready(Duration::from_secs(5)));
        assert_eq!(session.status(), SessionStatus::Running);

        std::thread::sleep(Duration::from_millis(100));
        session.stop();
        assert_eq!(session.status(), SessionStatus::Idle);

        let stats = session.stats();
        assert!(stats.frames_emitted >= 1);
        assert_eq!(
            stats.bytes_written,
            stats.frames_emitted * (64 * 48 * 3) as u64,
            "every emitted frame must be exactly one output-sized buffer"
        );
    }

    #[test]
    fn start_is_idempotent_and_holds_one_permit() {
        let limiter = SessionLimiter::new(4);
        let session = session_with(fast_config("stub://cam"), Vec::new(), limiter.clone());
        session.start().unwrap();
        session.start().unwrap();
        assert_eq!(limiter.in_use(), 1);
        session.stop();
        assert_eq!(limiter.in_use(), 0);
    }

    #[test]
    fn restart_after_stop_yields_a_working_session() {
        let limiter = SessionLimiter::new(1);
        let session = session_with(fast_config("stub://cam"), Vec::new(), limiter.clone());

        session.start().unwrap();
        assert!(session.wait_until_ready(Duration::from_secs(5)));
        session.stop();
        assert_eq!(limiter.in_use(), 0);

        session.start().unwrap();
        assert!(session.wait_until_ready(Duration::from_secs(5)));
        assert_eq!(session.status(), SessionStatus::Running);
        session.stop();
        assert_eq!(limiter.in_use(), 0);
    }

    #[test]
    fn transform_fault_drops_the_frame_but_not_the_session() {
        struct Flaky {
            calls: AtomicUsize,
        }
        impl FrameTransform for Flaky {
            fn name(&self) -> &'static str {
                "flaky"
            }
            fn process(&self, frame: Frame) -> PipelineResult<Frame> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(PipelineError::transform("flaky", "transient device fault"));
                }
                Ok(frame)
            }
        }

        let session = session_with(
            fast_config("stub://cam"),
            vec![Arc::new(Flaky {
                calls: AtomicUsize::new(0),
            })],
            SessionLimiter::new(4),
        );
        session.start().unwrap();
        assert!(
            session.wait_until_ready(Duration::from_secs(5)),
            "the frame after the fault must still be emitted"
        );
        session.stop();

        let stats = session.stats();
        assert!(stats.frames_dropped >= 1);
        assert!(stats.frames_emitted >= 1);
    }

    #[test]
    fn source_failure_reconnects_without_losing_readiness() {
        let session = session_with(
            fast_config("stub://cam?frames=3"),
            Vec::new(),
            SessionLimiter::new(4),
        );
        session.start().unwrap();
        assert!(session.wait_until_ready(Duration::from_secs(5)));

        std::thread::sleep(Duration::from_millis(300));
        let stats = session.stats();
        assert!(stats.reconnects >= 1, "source must have been reopened");
        assert!(
            stats.frames_emitted > 3,
            "the pipeline must resume past the first stream end"
        );
        assert!(session.is_running());
        assert!(
            session.wait_until_ready(Duration::ZERO),
            "readiness must survive reconnects"
        );
        session.stop();
    }

    #[test]
    fn sink_failure_is_fatal_and_frees_capacity() {
        let limiter = SessionLimiter::new(1);
        let mut config = fast_config("stub://cam");
        config.output_url = "stub://sink?fail_after=2".to_string();
        let session = session_with(config, Vec::new(), limiter.clone());
        session.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while session.status() != SessionStatus::Stopped {
            assert!(Instant::now() < deadline, "worker should have died");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(limiter.in_use(), 0, "dead sessions must not pin capacity");

        session.stop();
        assert_eq!(session.status(), SessionStatus::Idle);
        // The session is restartable after the fatal exit.
        session.start().unwrap();
        session.stop();
    }

    #[test]
    fn stop_from_another_thread_interrupts_the_paced_sleep() {
        let mut config = fast_config("stub://cam");
        config.fps = 2; // 500 ms frame interval
        let session = Arc::new(session_with(config, Vec::new(), SessionLimiter::new(4)));
        session.start().unwrap();
        assert!(session.wait_until_ready(Duration::from_secs(5)));

        let stopper = {
            let session = session.clone();
            std::thread::spawn(move || {
                let started = Instant::now();
                session.stop();
                started.elapsed()
            })
        };
        let elapsed = stopper.join().unwrap();
        assert!(
            elapsed < Duration::from_millis(450),
            "stop blocked for {:?}, the paced sleep was not interrupted",
            elapsed
        );
        assert_eq!(session.status(), SessionStatus::Idle);
    }

    #[test]
    fn dropping_a_running_session_releases_its_permit() {
        let limiter = SessionLimiter::new(1);
        {
            let session = session_with(fast_config("stub://cam"), Vec::new(), limiter.clone());
            session.start().unwrap();
            assert_eq!(limiter.in_use(), 1);
        }
        assert_eq!(limiter.in_use(), 0);
    }

    #[test]
    fn connection_failure_at_start_rolls_back_the_permit() {
        let limiter = SessionLimiter::new(1);
        let session = session_with(fast_config("stub-down://cam"), Vec::new(), limiter.clone());
        assert!(matches!(
            session.start(),
            Err(PipelineError::Connection(_))
        ));
        assert_eq!(limiter.in_use(), 0);
        assert_eq!(session.status(), SessionStatus::Idle);
    }
}
