//! Deterministic stub backend for development and tests.
//!
//! The stub detector reports one centered face on any frame with pixel
//! variation and no face on uniform frames, which gives tests a lever for
//! the "no target detected" path without model files. The stub engines pass
//! frames through unchanged — a legitimate transform outcome.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::model::{
    primary_face, EnhanceEngine, Face, FaceDetector, ModelKey, ModelLoader, ModelSet, SwapEngine,
};

const HISTOGRAM_BINS: usize = 16;
const SAMPLE_STRIDE: usize = 100;

pub struct StubDetector;

impl StubDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceDetector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&self, pixels: &[u8], width: u32, height: u32) -> PipelineResult<Vec<Face>> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(PipelineError::InvalidFrame(format!(
                "expected {} bytes for {}x{}, got {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }

        // Coarse sampled histogram; a uniform frame lands in a single bin
        // and counts as "no face".
        let mut histogram = [0u32; HISTOGRAM_BINS];
        let mut sampled = 0u32;
        for &p in pixels.iter().step_by(SAMPLE_STRIDE) {
            histogram[p as usize * HISTOGRAM_BINS / 256] += 1;
            sampled += 1;
        }
        let occupied = histogram.iter().filter(|&&count| count > 0).count();
        if occupied <= 1 {
            return Ok(Vec::new());
        }

        let embedding = histogram
            .iter()
            .map(|&count| count as f32 / sampled.max(1) as f32)
            .collect();
        // Digest keeps the stub honest about reading the full frame.
        let digest: [u8; 32] = Sha256::digest(pixels).into();
        let confidence = 0.5 + (digest[0] as f32 / 255.0) * 0.5;

        Ok(vec![Face {
            x: 0.25,
            y: 0.25,
            w: 0.5,
            h: 0.5,
            confidence,
            embedding,
        }])
    }
}

pub struct StubSwapEngine;

impl SwapEngine for StubSwapEngine {
    fn name(&self) -> &'static str {
        "stub-swap"
    }

    fn swap(&self, frame: &Frame, _live: &Face, _reference: &Face) -> PipelineResult<Frame> {
        Ok(frame.clone())
    }
}

pub struct StubEnhanceEngine;

impl EnhanceEngine for StubEnhanceEngine {
    fn name(&self) -> &'static str {
        "stub-enhance"
    }

    fn enhance(&self, frame: &Frame, _face: &Face) -> PipelineResult<Frame> {
        Ok(frame.clone())
    }
}

/// Loader wiring the stub backend behind the cache seam.
///
/// Still does the real load-time work: reads the model file, decodes the
/// reference image, and extracts the reference face descriptor once.
pub struct StubModelLoader;

impl StubModelLoader {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelLoader for StubModelLoader {
    fn load(&self, key: &ModelKey) -> PipelineResult<ModelSet> {
        let model_bytes = std::fs::read(key.model_path()).map_err(|e| {
            PipelineError::model_load(format!(
                "failed to read model {}: {}",
                key.model_path().display(),
                e
            ))
        })?;
        if model_bytes.is_empty() {
            return Err(PipelineError::model_load(format!(
                "model file {} is empty",
                key.model_path().display()
            )));
        }

        let detector = Arc::new(StubDetector::new());
        let reference = load_reference_face(&*detector, key)?;

        Ok(ModelSet {
            detector,
            swapper: Arc::new(StubSwapEngine),
            enhancer: Arc::new(StubEnhanceEngine),
            reference,
        })
    }
}

/// Decode the reference image and extract its face descriptor.
pub(crate) fn load_reference_face(
    detector: &dyn FaceDetector,
    key: &ModelKey,
) -> PipelineResult<Face> {
    let image = image::open(key.reference_path()).map_err(|e| {
        PipelineError::model_load(format!(
            "failed to decode reference image {}: {}",
            key.reference_path().display(),
            e
        ))
    })?;
    let rgb = image.to_rgb8();
    let (width, height) = (rgb.width(), rgb.height());
    let faces = detector.detect(rgb.as_raw(), width, height)?;
    primary_face(faces).ok_or_else(|| {
        PipelineError::model_load(format!(
            "no face found in reference image {}",
            key.reference_path().display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(width: u32, height: u32, value: u8) -> Vec<u8> {
        vec![value; width as usize * height as usize * 3]
    }

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        (0..width as usize * height as usize * 3)
            .map(|i| (i % 251) as u8)
            .collect()
    }

    #[test]
    fn uniform_frame_has_no_face() {
        let detector = StubDetector::new();
        let faces = detector.detect(&uniform(64, 48, 80), 64, 48).unwrap();
        assert!(faces.is_empty());
    }

    #[test]
    fn varied_frame_has_one_face() {
        let detector = StubDetector::new();
        let faces = detector.detect(&gradient(64, 48), 64, 48).unwrap();
        assert_eq!(faces.len(), 1);
        assert!(faces[0].confidence >= 0.5);
        assert_eq!(faces[0].embedding.len(), HISTOGRAM_BINS);
    }

    #[test]
    fn detection_is_deterministic() {
        let detector = StubDetector::new();
        let pixels = gradient(32, 32);
        let a = detector.detect(&pixels, 32, 32).unwrap();
        let b = detector.detect(&pixels, 32, 32).unwrap();
        assert_eq!(a[0].confidence, b[0].confidence);
        assert_eq!(a[0].embedding, b[0].embedding);
    }

    #[test]
    fn geometry_mismatch_is_rejected() {
        let detector = StubDetector::new();
        assert!(detector.detect(&uniform(10, 10, 0), 64, 48).is_err());
    }

    fn write_reference_jpeg(path: &std::path::Path, uniform: bool) {
        let img = image::RgbImage::from_fn(64, 64, |x, y| {
            if uniform {
                image::Rgb([120, 120, 120])
            } else {
                image::Rgb([(x * 3) as u8, (y * 2) as u8, ((x + y) % 255) as u8])
            }
        });
        img.save(path).unwrap();
    }

    #[test]
    fn loader_builds_a_model_set_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("swap.onnx");
        std::fs::write(&model, b"model-bytes").unwrap();
        let reference = dir.path().join("face.jpg");
        write_reference_jpeg(&reference, false);

        let key = ModelKey::new(&model, &reference).unwrap();
        let set = StubModelLoader::new().load(&key).unwrap();
        assert_eq!(set.reference.embedding.len(), HISTOGRAM_BINS);
        assert!(set.reference.confidence >= 0.5);
    }

    #[test]
    fn reference_without_a_face_fails_the_load() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("swap.onnx");
        std::fs::write(&model, b"model-bytes").unwrap();
        let reference = dir.path().join("blank.jpg");
        write_reference_jpeg(&reference, true);

        let key = ModelKey::new(&model, &reference).unwrap();
        let err = StubModelLoader::new().load(&key).unwrap_err();
        assert!(err.to_string().contains("no face"), "got: {}", err);
    }

    #[test]
    fn empty_model_file_fails_the_load() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("swap.onnx");
        std::fs::write(&model, b"").unwrap();
        let reference = dir.path().join("face.jpg");
        write_reference_jpeg(&reference, false);

        let key = ModelKey::new(&model, &reference).unwrap();
        assert!(matches!(
            StubModelLoader::new().load(&key),
            Err(PipelineError::ModelLoad(_))
        ));
    }

    #[test]
    fn stub_swap_returns_identical_frame() {
        let frame = Frame::new(gradient(16, 16), 16, 16).unwrap();
        let face = Face {
            x: 0.25,
            y: 0.25,
            w: 0.5,
            h: 0.5,
            confidence: 0.9,
            embedding: vec![0.0; HISTOGRAM_BINS],
        };
        let swapped = StubSwapEngine.swap(&frame, &face, &face).unwrap();
        assert_eq!(swapped, frame);
    }
}
