//! Lie-detection head on top of the wav2vec2 encoder.

use super::config::Wav2Vec2Config;
use super::wav2vec2::Wav2Vec2Model;
use crate::error::{LiewaveError, Result};
use crate::prediction::{Label, PredictionResult};
use candle_core::{Module, Tensor};
use candle_nn::{Linear, VarBuilder};

/// Encoder, temporal mean pooling, then a linear projection to class scores.
pub struct LieDetectionModel {
    wav2vec2: Wav2Vec2Model,
    classifier: Linear,
    num_labels: usize,
}

impl LieDetectionModel {
    pub fn load(config: &Wav2Vec2Config, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            wav2vec2: Wav2Vec2Model::load(config, vb.pp("wav2vec2"))?,
            classifier: candle_nn::linear(config.hidden_size, config.num_labels, vb.pp("classifier"))?,
            num_labels: config.num_labels,
        })
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn min_input_samples(&self) -> usize {
        self.wav2vec2.min_input_samples()
    }
}

impl Module for LieDetectionModel {
    /// `(batch, samples)` waveform in, `(batch, num_labels)` logits out.
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let hidden = self.wav2vec2.forward(xs)?;
        let pooled = hidden.mean(1)?;
        self.classifier.forward(&pooled)
    }
}

/// Pick the most probable class from one row of softmax output.
///
/// Ties go to the lower index. Non-finite probabilities and classes without a
/// label are inference errors.
pub fn decide(probabilities: &[f32]) -> Result<PredictionResult> {
    if probabilities.is_empty() {
        return Err(inference_error("model produced no class scores"));
    }
    if let Some(bad) = probabilities.iter().find(|p| !p.is_finite()) {
        return Err(inference_error(&format!(
            "model produced a non-finite probability ({bad})"
        )));
    }

    let (index, &probability) = probabilities
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, &f32)>, (i, p)| match best {
            Some((_, b)) if *b >= *p => best,
            _ => Some((i, p)),
        })
        .ok_or_else(|| inference_error("model produced no class scores"))?;

    let label = Label::from_class_index(index)
        .ok_or_else(|| inference_error(&format!("class index {index} has no label")))?;
    Ok(PredictionResult::new(label, probability))
}

fn inference_error(message: &str) -> LiewaveError {
    LiewaveError::Inference {
        message: message.to_string(),
    }
}
