//! Model artifact configuration files.
//!
//! `config.json` follows the Hugging Face wav2vec2 layout and
//! `preprocessor_config.json` the matching feature-extractor layout, so
//! artifacts exported from the training code load without conversion.

use crate::defaults;
use crate::error::{LiewaveError, Result};
use candle_nn::Activation;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Normalization applied to the conv feature encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatExtractNorm {
    /// Group norm after the first conv layer only (base models)
    Group,
    /// Layer norm after every conv layer (large/stable models)
    Layer,
}

/// Encoder and classification head geometry (`config.json`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Wav2Vec2Config {
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub hidden_act: Activation,
    pub feat_extract_activation: Activation,
    pub feat_extract_norm: FeatExtractNorm,
    pub conv_dim: Vec<usize>,
    pub conv_stride: Vec<usize>,
    pub conv_kernel: Vec<usize>,
    pub conv_bias: bool,
    pub num_conv_pos_embeddings: usize,
    pub num_conv_pos_embedding_groups: usize,
    pub do_stable_layer_norm: bool,
    pub layer_norm_eps: f64,
    pub num_labels: usize,
}

impl Default for Wav2Vec2Config {
    fn default() -> Self {
        // facebook/wav2vec2-base
        Self {
            hidden_size: 768,
            num_hidden_layers: 12,
            num_attention_heads: 12,
            intermediate_size: 3072,
            hidden_act: Activation::Gelu,
            feat_extract_activation: Activation::Gelu,
            feat_extract_norm: FeatExtractNorm::Group,
            conv_dim: vec![512; 7],
            conv_stride: vec![5, 2, 2, 2, 2, 2, 2],
            conv_kernel: vec![10, 3, 3, 3, 3, 2, 2],
            conv_bias: false,
            num_conv_pos_embeddings: 128,
            num_conv_pos_embedding_groups: 16,
            do_stable_layer_norm: false,
            layer_norm_eps: 1e-5,
            num_labels: 2,
        }
    }
}

impl Wav2Vec2Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: Self = read_json(path)?;
        config.validate().map_err(|message| LiewaveError::ModelLoad {
            path: path.display().to_string(),
            message,
        })?;
        Ok(config)
    }

    /// Number of input samples consumed per encoder frame.
    pub fn samples_per_frame(&self) -> usize {
        self.conv_stride.iter().product()
    }

    /// Shortest input (in samples) that yields at least one encoder frame.
    pub fn min_input_samples(&self) -> usize {
        // Invert the conv stack: len_out = (len_in - kernel) / stride + 1
        self.conv_kernel
            .iter()
            .zip(&self.conv_stride)
            .rev()
            .fold(1, |len, (&kernel, &stride)| (len - 1) * stride + kernel)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.conv_dim.is_empty()
            || self.conv_dim.len() != self.conv_stride.len()
            || self.conv_dim.len() != self.conv_kernel.len()
        {
            return Err("conv_dim, conv_stride and conv_kernel must have the same non-zero length"
                .to_string());
        }
        if self.conv_stride.contains(&0) || self.conv_kernel.contains(&0) {
            return Err("conv strides and kernels must be positive".to_string());
        }
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return Err(format!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                self.hidden_size, self.num_attention_heads
            ));
        }
        if self.num_conv_pos_embedding_groups == 0
            || self.hidden_size % self.num_conv_pos_embedding_groups != 0
        {
            return Err(format!(
                "hidden_size {} is not divisible by num_conv_pos_embedding_groups {}",
                self.hidden_size, self.num_conv_pos_embedding_groups
            ));
        }
        if self.num_labels < 2 {
            return Err(format!("num_labels must be at least 2, got {}", self.num_labels));
        }
        Ok(())
    }
}

/// Feature-normalization parameters paired with the weights (`preprocessor_config.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub do_normalize: bool,
    pub sampling_rate: u32,
    pub padding_value: f32,
    pub feature_size: usize,
    pub return_attention_mask: bool,
    pub pad_to_multiple_of: Option<usize>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            do_normalize: true,
            sampling_rate: defaults::MODEL_SAMPLE_RATE,
            padding_value: 0.0,
            feature_size: 1,
            return_attention_mask: false,
            pad_to_multiple_of: None,
        }
    }
}

impl ProcessorConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: Self = read_json(path)?;
        let fail = |message: String| LiewaveError::ModelLoad {
            path: path.display().to_string(),
            message,
        };
        if config.sampling_rate != defaults::MODEL_SAMPLE_RATE {
            return Err(fail(format!(
                "processor expects {} Hz input, only {} Hz is supported",
                config.sampling_rate,
                defaults::MODEL_SAMPLE_RATE
            )));
        }
        if config.feature_size != 1 {
            return Err(fail(format!(
                "feature_size {} is not a raw waveform processor",
                config.feature_size
            )));
        }
        if config.pad_to_multiple_of == Some(0) {
            return Err(fail("pad_to_multiple_of must be positive".to_string()));
        }
        Ok(config)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let load_error = |message: String| LiewaveError::ModelLoad {
        path: path.display().to_string(),
        message,
    };
    let bytes = std::fs::read(path).map_err(|e| load_error(format!("Read failed: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| load_error(format!("Parse failed: {e}")))
}
