//! Per-frame transforms.
//!
//! A transform takes ownership of a frame and returns either a new frame or
//! the same one unchanged. "No face in this frame" is a normal outcome, not
//! an error; a returned error means this frame failed and should be dropped,
//! never that the session should die. Transforms are shared across sessions
//! and must stay reentrant.

use std::sync::Arc;

use crate::error::PipelineResult;
use crate::frame::Frame;
use crate::model::{primary_face, ModelSet};

pub trait FrameTransform: Send + Sync {
    fn name(&self) -> &'static str;

    fn process(&self, frame: Frame) -> PipelineResult<Frame>;
}

/// Replaces the leftmost detected face with the cached reference identity.
pub struct FaceSwapTransform {
    models: Arc<ModelSet>,
}

impl FaceSwapTransform {
    pub fn new(models: Arc<ModelSet>) -> Self {
        Self { models }
    }
}

impl FrameTransform for FaceSwapTransform {
    fn name(&self) -> &'static str {
        "face-swap"
    }

    fn process(&self, frame: Frame) -> PipelineResult<Frame> {
        let faces =
            self.models
                .detector
                .detect(frame.as_bytes(), frame.width(), frame.height())?;
        let Some(live) = primary_face(faces) else {
            return Ok(frame);
        };
        self.models
            .swapper
            .swap(&frame, &live, &self.models.reference)
    }
}

/// Runs face restoration on the leftmost detected face.
pub struct FaceEnhanceTransform {
    models: Arc<ModelSet>,
}

impl FaceEnhanceTransform {
    pub fn new(models: Arc<ModelSet>) -> Self {
        Self { models }
    }
}

impl FrameTransform for FaceEnhanceTransform {
    fn name(&self) -> &'static str {
        "face-enhance"
    }

    fn process(&self, frame: Frame) -> PipelineResult<Frame> {
        let faces =
            self.models
                .detector
                .detect(frame.as_bytes(), frame.width(), frame.height())?;
        let Some(face) = primary_face(faces) else {
            return Ok(frame);
        };
        self.models.enhancer.enhance(&frame, &face)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::model::backends::stub::{StubDetector, StubEnhanceEngine, StubSwapEngine};
    use crate::model::{Face, SwapEngine};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn reference() -> Face {
        Face {
            x: 0.25,
            y: 0.25,
            w: 0.5,
            h: 0.5,
            confidence: 0.9,
            embedding: vec![0.0; 16],
        }
    }

    struct CountingSwap {
        calls: AtomicUsize,
    }

    impl SwapEngine for CountingSwap {
        fn name(&self) -> &'static str {
            "counting-swap"
        }

        fn swap(&self, frame: &Frame, _live: &Face, _reference: &Face) -> PipelineResult<Frame> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(frame.clone())
        }
    }

    fn models_with_swap(swap: Arc<CountingSwap>) -> Arc<ModelSet> {
        Arc::new(ModelSet {
            detector: Arc::new(StubDetector::new()),
            swapper: swap,
            enhancer: Arc::new(StubEnhanceEngine),
            reference: reference(),
        })
    }

    fn uniform_frame() -> Frame {
        Frame::new(vec![90u8; 32 * 32 * 3], 32, 32).unwrap()
    }

    fn varied_frame() -> Frame {
        let data = (0..32usize * 32 * 3).map(|i| (i % 251) as u8).collect();
        Frame::new(data, 32, 32).unwrap()
    }

    #[test]
    fn no_face_passes_frame_through_unchanged() {
        let swap = Arc::new(CountingSwap {
            calls: AtomicUsize::new(0),
        });
        let transform = FaceSwapTransform::new(models_with_swap(swap.clone()));
        let frame = uniform_frame();
        let expected = frame.clone();
        let out = transform.process(frame).unwrap();
        assert_eq!(out, expected);
        assert_eq!(swap.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn detected_face_reaches_the_swap_engine() {
        let swap = Arc::new(CountingSwap {
            calls: AtomicUsize::new(0),
        });
        let transform = FaceSwapTransform::new(models_with_swap(swap.clone()));
        transform.process(varied_frame()).unwrap();
        assert_eq!(swap.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn engine_failure_surfaces_as_an_error() {
        struct FailingSwap;
        impl SwapEngine for FailingSwap {
            fn name(&self) -> &'static str {
                "failing-swap"
            }
            fn swap(&self, _f: &Frame, _l: &Face, _r: &Face) -> PipelineResult<Frame> {
                Err(PipelineError::transform("failing-swap", "device fault"))
            }
        }
        let models = Arc::new(ModelSet {
            detector: Arc::new(StubDetector::new()),
            swapper: Arc::new(FailingSwap),
            enhancer: Arc::new(StubEnhanceEngine),
            reference: reference(),
        });
        let transform = FaceSwapTransform::new(models);
        assert!(transform.process(varied_frame()).is_err());
    }

    #[test]
    fn enhance_follows_the_same_no_face_rule() {
        let models = Arc::new(ModelSet {
            detector: Arc::new(StubDetector::new()),
            swapper: Arc::new(StubSwapEngine),
            enhancer: Arc::new(StubEnhanceEngine),
            reference: reference(),
        });
        let transform = FaceEnhanceTransform::new(models);
        let frame = uniform_frame();
        let expected = frame.clone();
        assert_eq!(transform.process(frame).unwrap(), expected);
    }
}
