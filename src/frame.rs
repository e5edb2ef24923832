//! Decoded frame container.
//!
//! A `Frame` is one decoded image: height x width x 3 interleaved bytes,
//! row-major. The pipeline never interprets channel order; sources and sinks
//! agree on bgr24 and everything in between just moves bytes. Each pipeline
//! stage owns the frame exclusively: a transform either returns a new frame
//! or hands the same one back.

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::{PipelineError, PipelineResult};

/// One decoded image, `height * width * 3` bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Frame {
    /// Wrap a pixel buffer, enforcing the byte-length invariant.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> PipelineResult<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| PipelineError::InvalidFrame("frame dimensions overflow".into()))?;
        if data.len() != expected {
            return Err(PipelineError::InvalidFrame(format!(
                "expected {} bytes for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// True when the frame already has the given geometry.
    pub fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Resample to a new geometry.
    ///
    /// Bilinear; channel order does not matter to a per-channel resampler, so
    /// bgr24 data through an RGB container is exact.
    pub fn resize(self, width: u32, height: u32) -> PipelineResult<Self> {
        if self.matches(width, height) {
            return Ok(self);
        }
        let image = RgbImage::from_raw(self.width, self.height, self.data).ok_or_else(|| {
            PipelineError::InvalidFrame("pixel buffer shorter than geometry".into())
        })?;
        let resized = imageops::resize(&image, width, height, FilterType::Triangle);
        Self::new(resized.into_raw(), width, height)
    }
}
