#![cfg(feature = "backend-tract")]

use std::path::Path;
use std::sync::Arc;

use tract_onnx::prelude::*;

use crate::error::{PipelineError, PipelineResult};
use crate::model::backends::stub::{load_reference_face, StubEnhanceEngine, StubSwapEngine};
use crate::model::{Face, FaceDetector, ModelKey, ModelLoader, ModelSet};

const DEFAULT_INPUT_WIDTH: u32 = 224;
const DEFAULT_INPUT_HEIGHT: u32 = 224;
const DEFAULT_THRESHOLD: f32 = 0.5;
const EMBEDDING_LEN: usize = 128;

/// Tract-based face detector running a local ONNX model.
///
/// Frames are resampled to the model's input geometry before inference; the
/// model's best output score gates a single full-frame detection and the
/// leading output values double as the identity embedding.
pub struct TractDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>,
    input_width: u32,
    input_height: u32,
    threshold: f32,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> PipelineResult<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| {
                PipelineError::model_load(format!(
                    "failed to load ONNX model from {}: {}",
                    model_path.display(),
                    e
                ))
            })?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .map_err(|e| PipelineError::model_load(format!("failed to set input fact: {}", e)))?
            .into_optimized()
            .map_err(|e| PipelineError::model_load(format!("failed to optimize model: {}", e)))?
            .into_runnable()
            .map_err(|e| PipelineError::model_load(format!("failed to build runnable model: {}", e)))?;

        Ok(Self {
            model,
            input_width: width,
            input_height: height,
            threshold: DEFAULT_THRESHOLD,
        })
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> PipelineResult<Tensor> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| PipelineError::InvalidFrame("frame dimensions overflow".into()))?;
        if pixels.len() != expected {
            return Err(PipelineError::InvalidFrame(format!(
                "expected {} bytes, received {}",
                expected,
                pixels.len()
            )));
        }

        let frame = crate::frame::Frame::new(pixels.to_vec(), width, height)?
            .resize(self.input_width, self.input_height)?;
        let scaled = frame.as_bytes();
        let width = self.input_width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.input_height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                scaled[idx] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }

    fn extract_scores(&self, outputs: TVec<TValue>) -> PipelineResult<Vec<f32>> {
        let output = outputs
            .get(0)
            .ok_or_else(|| PipelineError::transform("tract", "model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .map_err(|e| PipelineError::transform("tract", format!("output was not f32: {}", e)))?;
        Ok(scores.iter().cloned().collect())
    }
}

impl FaceDetector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&self, pixels: &[u8], width: u32, height: u32) -> PipelineResult<Vec<Face>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| PipelineError::transform("tract", format!("inference failed: {}", e)))?;

        let scores = self.extract_scores(outputs)?;

        let best = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        if !best.is_finite() || best < self.threshold {
            return Ok(Vec::new());
        }

        let embedding = scores.into_iter().take(EMBEDDING_LEN).collect();
        Ok(vec![Face {
            x: 0.0,
            y: 0.0,
            w: 1.0,
            h: 1.0,
            confidence: best.min(1.0),
            embedding,
        }])
    }
}

/// Loader producing a tract-backed detector; the swap and enhance engines
/// remain collaborator-provided and default to the pass-through stubs.
pub struct TractModelLoader {
    input_width: u32,
    input_height: u32,
}

impl TractModelLoader {
    pub fn new() -> Self {
        Self {
            input_width: DEFAULT_INPUT_WIDTH,
            input_height: DEFAULT_INPUT_HEIGHT,
        }
    }

    pub fn with_input_size(mut self, width: u32, height: u32) -> Self {
        self.input_width = width;
        self.input_height = height;
        self
    }
}

impl Default for TractModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelLoader for TractModelLoader {
    fn load(&self, key: &ModelKey) -> PipelineResult<ModelSet> {
        let detector = Arc::new(TractDetector::new(
            key.model_path(),
            self.input_width,
            self.input_height,
        )?);
        let reference = load_reference_face(&*detector, key)?;

        Ok(ModelSet {
            detector,
            swapper: Arc::new(StubSwapEngine),
            enhancer: Arc::new(StubEnhanceEngine),
            reference,
        })
    }
}
