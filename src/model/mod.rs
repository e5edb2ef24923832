//! Face model interfaces.
//!
//! The detection, swap, and enhancement models are external collaborators:
//! this module defines the capability traits the pipeline calls through and
//! the loader seam that turns a pair of on-disk paths into a ready
//! [`ModelSet`]. Implementations must be reentrant — a loaded set is shared
//! read-only by every session that references it — and must not retain a
//! pixel slice beyond the call.

pub mod backends;
mod cache;

pub use cache::{ModelCache, ModelKey};

use std::sync::Arc;

use crate::error::PipelineResult;
use crate::frame::Frame;

/// One detected face: bounding box in normalized 0..1 coordinates plus the
/// identity embedding the swap model consumes.
#[derive(Clone, Debug)]
pub struct Face {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
    pub embedding: Vec<f32>,
}

/// Pick the face the pipeline operates on when several are present: the
/// leftmost one (smallest bounding-box x), not the most confident.
pub fn primary_face(faces: Vec<Face>) -> Option<Face> {
    faces
        .into_iter()
        .min_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
}

/// Face detector over raw interleaved pixels.
///
/// Implementations must treat the pixel slice as read-only and ephemeral.
pub trait FaceDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, pixels: &[u8], width: u32, height: u32) -> PipelineResult<Vec<Face>>;
}

/// Face swap model: replaces the live face in `frame` with the reference
/// identity and pastes the result back.
pub trait SwapEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn swap(&self, frame: &Frame, live: &Face, reference: &Face) -> PipelineResult<Frame>;
}

/// Face restoration/enhancement model, applied to the detected face region.
pub trait EnhanceEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn enhance(&self, frame: &Frame, face: &Face) -> PipelineResult<Frame>;
}

/// Everything loaded for one `(model, reference image)` pair: the inference
/// handles plus the reference face descriptor extracted once at load time.
pub struct ModelSet {
    pub detector: Arc<dyn FaceDetector>,
    pub swapper: Arc<dyn SwapEngine>,
    pub enhancer: Arc<dyn EnhanceEngine>,
    pub reference: Face,
}

impl std::fmt::Debug for ModelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSet")
            .field("detector", &self.detector.name())
            .field("swapper", &self.swapper.name())
            .field("enhancer", &self.enhancer.name())
            .field("reference", &self.reference)
            .finish()
    }
}

/// Loader seam between the cache and the concrete inference backend.
pub trait ModelLoader: Send + Sync {
    /// Load the model set for a canonicalized key. Expensive; the cache
    /// guarantees this runs at most once per key.
    fn load(&self, key: &ModelKey) -> PipelineResult<ModelSet>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, confidence: f32) -> Face {
        Face {
            x,
            y: 0.2,
            w: 0.3,
            h: 0.3,
            confidence,
            embedding: vec![0.0; 4],
        }
    }

    #[test]
    fn primary_face_is_leftmost_not_most_confident() {
        let picked = primary_face(vec![face(0.6, 0.99), face(0.1, 0.50)]).unwrap();
        assert_eq!(picked.x, 0.1);
        assert_eq!(picked.confidence, 0.50);
    }

    #[test]
    fn primary_face_of_empty_is_none() {
        assert!(primary_face(Vec::new()).is_none());
    }
}
