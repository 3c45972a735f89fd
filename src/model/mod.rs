//! The lie-detection model: artifact configs, the candle network and its runtime.

pub mod classifier;
pub mod config;
pub mod runtime;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod wav2vec2;

pub use config::{ProcessorConfig, Wav2Vec2Config};
pub use runtime::{Classifier, MockClassifier, ModelHandle, ModelRuntime, ModelState};
