//! Inference backends.

pub mod stub;
#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{StubDetector, StubEnhanceEngine, StubModelLoader, StubSwapEngine};
#[cfg(feature = "backend-tract")]
pub use tract::{TractDetector, TractModelLoader};
