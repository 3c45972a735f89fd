//! Audio handling: external decoding, WAV parsing, resampling and feature extraction.

pub mod convert;
pub mod features;
pub mod resample;
pub mod waveform;

pub use convert::{FfmpegTranscoder, ScriptedTranscoder, Transcoder};
pub use features::{FeatureExtractor, FeatureTensor};
pub use waveform::Waveform;
