//! Canonical WAV bytes to the normalized 1-D tensor the classifier consumes.
//!
//! The extractor is a pure function of its input bytes and processor config:
//! the resampler is rebuilt per call, channels are averaged in index order and
//! the statistics are accumulated in `f64` in a fixed order, so the same bytes
//! always produce bit-identical features.

use super::resample::resample;
use super::waveform::Waveform;
use crate::defaults::{MODEL_SAMPLE_RATE, NORMALIZE_EPSILON};
use crate::error::{LiewaveError, Result};
use crate::model::config::ProcessorConfig;
use tracing::debug;

/// Mono, model-rate, normalized feature vector.
///
/// Only [`FeatureExtractor::extract`] builds one, so every instance is at the
/// model sample rate with the processor's normalization applied.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTensor {
    values: Vec<f32>,
    sample_rate: u32,
}

impl FeatureTensor {
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_secs(&self) -> f64 {
        self.values.len() as f64 / f64::from(self.sample_rate)
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

pub struct FeatureExtractor {
    config: ProcessorConfig,
}

impl FeatureExtractor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Decode, resample to 16 kHz, downmix and normalize one recording.
    pub fn extract(&self, wav_bytes: &[u8]) -> Result<FeatureTensor> {
        let waveform = Waveform::from_wav_bytes(wav_bytes)?;
        self.extract_waveform(waveform)
    }

    pub fn extract_waveform(&self, waveform: Waveform) -> Result<FeatureTensor> {
        let source_rate = waveform.sample_rate();
        let channels = if source_rate == MODEL_SAMPLE_RATE {
            waveform.into_channels()
        } else {
            resample(waveform.channels(), source_rate, MODEL_SAMPLE_RATE)?
        };

        let mut values = downmix(&channels);
        if values.is_empty() {
            return Err(LiewaveError::UnsupportedAudio {
                message: "recording is empty after resampling".to_string(),
            });
        }

        if self.config.do_normalize {
            normalize(&mut values);
        }

        if let Some(multiple) = self.config.pad_to_multiple_of.filter(|&m| m > 0) {
            let padded = values.len().div_ceil(multiple) * multiple;
            values.resize(padded, self.config.padding_value);
        }

        debug!(
            "Extracted {} feature samples ({:.2}s) from {} Hz input",
            values.len(),
            values.len() as f64 / f64::from(MODEL_SAMPLE_RATE),
            source_rate
        );

        Ok(FeatureTensor {
            values,
            sample_rate: MODEL_SAMPLE_RATE,
        })
    }
}

/// Average channels sample by sample, summing in channel index order.
fn downmix(channels: &[Vec<f32>]) -> Vec<f32> {
    match channels {
        [] => Vec::new(),
        [mono] => mono.clone(),
        _ => {
            let frames = channels[0].len();
            let count = channels.len() as f32;
            (0..frames)
                .map(|i| channels.iter().map(|c| c[i]).sum::<f32>() / count)
                .collect()
        }
    }
}

/// Zero-mean, unit-variance normalization: `(x - mean) / sqrt(var + 1e-7)`.
fn normalize(values: &mut [f32]) {
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|&v| {
            let d = f64::from(v) - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let denom = (variance + NORMALIZE_EPSILON).sqrt();
    for v in values.iter_mut() {
        *v = ((f64::from(*v) - mean) / denom) as f32;
    }
}
