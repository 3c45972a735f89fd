//! wav2vec2 encoder built from candle-nn layers.
//!
//! Tensor names follow the Hugging Face `Wav2Vec2Model` state dict so the
//! fine-tuned weights load as-is. Inference only: dropout and feature
//! masking are absent.

use super::config::{FeatExtractNorm, Wav2Vec2Config};
use candle_core::{D, Module, Result, Tensor};
use candle_nn::{
    Activation, Conv1d, Conv1dConfig, GroupNorm, Init, LayerNorm, Linear, VarBuilder,
};

/// eps used by the conv stack norms (PyTorch defaults).
const CONV_NORM_EPS: f64 = 1e-5;

enum ConvNorm {
    None,
    Group(GroupNorm),
    Layer(LayerNorm),
}

struct FeatureEncoderLayer {
    conv: Conv1d,
    norm: ConvNorm,
    activation: Activation,
}

impl FeatureEncoderLayer {
    fn load(config: &Wav2Vec2Config, index: usize, vb: VarBuilder) -> Result<Self> {
        let in_dim = if index == 0 { 1 } else { config.conv_dim[index - 1] };
        let out_dim = config.conv_dim[index];
        let conv_config = Conv1dConfig {
            stride: config.conv_stride[index],
            ..Default::default()
        };
        let kernel = config.conv_kernel[index];
        let conv = if config.conv_bias {
            candle_nn::conv1d(in_dim, out_dim, kernel, conv_config, vb.pp("conv"))?
        } else {
            candle_nn::conv1d_no_bias(in_dim, out_dim, kernel, conv_config, vb.pp("conv"))?
        };

        let norm = match config.feat_extract_norm {
            FeatExtractNorm::Group if index == 0 => ConvNorm::Group(candle_nn::group_norm(
                out_dim,
                out_dim,
                CONV_NORM_EPS,
                vb.pp("layer_norm"),
            )?),
            FeatExtractNorm::Group => ConvNorm::None,
            FeatExtractNorm::Layer => ConvNorm::Layer(candle_nn::layer_norm(
                out_dim,
                CONV_NORM_EPS,
                vb.pp("layer_norm"),
            )?),
        };

        Ok(Self {
            conv,
            norm,
            activation: config.feat_extract_activation,
        })
    }
}

impl Module for FeatureEncoderLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.conv.forward(xs)?;
        let xs = match &self.norm {
            ConvNorm::None => xs,
            ConvNorm::Group(norm) => norm.forward(&xs)?,
            // Layer norm runs over channels, which sit on dim 1 here
            ConvNorm::Layer(norm) => norm.forward(&xs.transpose(1, 2)?)?.transpose(1, 2)?,
        };
        self.activation.forward(&xs)
    }
}

struct FeatureProjection {
    layer_norm: LayerNorm,
    projection: Linear,
}

impl FeatureProjection {
    fn load(config: &Wav2Vec2Config, vb: VarBuilder) -> Result<Self> {
        let conv_out = config.conv_dim[config.conv_dim.len() - 1];
        Ok(Self {
            layer_norm: candle_nn::layer_norm(conv_out, config.layer_norm_eps, vb.pp("layer_norm"))?,
            projection: candle_nn::linear(conv_out, config.hidden_size, vb.pp("projection"))?,
        })
    }
}

impl Module for FeatureProjection {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.projection.forward(&self.layer_norm.forward(xs)?)
    }
}

/// Grouped convolution over time, added to the hidden states before the transformer.
struct PositionalConvEmbedding {
    conv: Conv1d,
    drop_last_frame: bool,
    activation: Activation,
}

impl PositionalConvEmbedding {
    fn load(config: &Wav2Vec2Config, vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_size;
        let kernel = config.num_conv_pos_embeddings;
        let groups = config.num_conv_pos_embedding_groups;
        let vb = vb.pp("conv");

        let weight = weight_norm(&vb, (hidden, hidden / groups, kernel))?;
        let bias = vb.get(hidden, "bias")?;
        let conv = Conv1d::new(
            weight,
            Some(bias),
            Conv1dConfig {
                padding: kernel / 2,
                groups,
                ..Default::default()
            },
        );

        Ok(Self {
            conv,
            drop_last_frame: kernel % 2 == 0,
            activation: config.feat_extract_activation,
        })
    }
}

impl Module for PositionalConvEmbedding {
    /// `xs` is `(batch, time, hidden)`.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.conv.forward(&xs.transpose(1, 2)?)?;
        let xs = if self.drop_last_frame {
            let frames = xs.dim(D::Minus1)?;
            xs.narrow(D::Minus1, 0, frames - 1)?
        } else {
            xs
        };
        self.activation.forward(&xs)?.transpose(1, 2)
    }
}

/// Rebuild a weight-normed conv kernel: `g * v / ||v||`, norm over every dim but the last.
///
/// Accepts the legacy `weight_g`/`weight_v` pair and the newer
/// `parametrizations.weight.original0/1` names.
fn weight_norm(vb: &VarBuilder, shape: (usize, usize, usize)) -> Result<Tensor> {
    let kernel = shape.2;
    let (g, v) = if vb.contains_tensor("parametrizations.weight.original0") {
        (
            vb.get((1, 1, kernel), "parametrizations.weight.original0")?,
            vb.get(shape, "parametrizations.weight.original1")?,
        )
    } else {
        (
            vb.get_with_hints((1, 1, kernel), "weight_g", Init::Const(1.))?,
            vb.get_with_hints(shape, "weight_v", candle_nn::init::DEFAULT_KAIMING_NORMAL)?,
        )
    };
    let norm = v.sqr()?.sum_keepdim(0)?.sum_keepdim(1)?.sqrt()?;
    v.broadcast_div(&norm)?.broadcast_mul(&g)
}

struct SelfAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    num_heads: usize,
    head_dim: usize,
    scaling: f64,
}

impl SelfAttention {
    fn load(config: &Wav2Vec2Config, vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_size;
        let head_dim = hidden / config.num_attention_heads;
        Ok(Self {
            q_proj: candle_nn::linear(hidden, hidden, vb.pp("q_proj"))?,
            k_proj: candle_nn::linear(hidden, hidden, vb.pp("k_proj"))?,
            v_proj: candle_nn::linear(hidden, hidden, vb.pp("v_proj"))?,
            out_proj: candle_nn::linear(hidden, hidden, vb.pp("out_proj"))?,
            num_heads: config.num_attention_heads,
            head_dim,
            scaling: (head_dim as f64).powf(-0.5),
        })
    }

    fn split_heads(&self, xs: &Tensor, batch: usize, time: usize) -> Result<Tensor> {
        xs.reshape((batch, time, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }
}

impl Module for SelfAttention {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, time, hidden) = xs.dims3()?;
        let q = self.q_proj.forward(xs)?.affine(self.scaling, 0.)?;
        let q = self.split_heads(&q, batch, time)?;
        let k = self.split_heads(&self.k_proj.forward(xs)?, batch, time)?;
        let v = self.split_heads(&self.v_proj.forward(xs)?, batch, time)?;

        let scores = q.matmul(&k.t()?.contiguous()?)?;
        let weights = candle_nn::ops::softmax_last_dim(&scores)?;
        let context = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch, time, hidden))?;
        self.out_proj.forward(&context)
    }
}

struct FeedForward {
    intermediate_dense: Linear,
    output_dense: Linear,
    activation: Activation,
}

impl FeedForward {
    fn load(config: &Wav2Vec2Config, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            intermediate_dense: candle_nn::linear(
                config.hidden_size,
                config.intermediate_size,
                vb.pp("intermediate_dense"),
            )?,
            output_dense: candle_nn::linear(
                config.intermediate_size,
                config.hidden_size,
                vb.pp("output_dense"),
            )?,
            activation: config.hidden_act,
        })
    }
}

impl Module for FeedForward {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.intermediate_dense.forward(xs)?;
        let xs = self.activation.forward(&xs)?;
        self.output_dense.forward(&xs)
    }
}

struct EncoderLayer {
    attention: SelfAttention,
    layer_norm: LayerNorm,
    feed_forward: FeedForward,
    final_layer_norm: LayerNorm,
    pre_norm: bool,
}

impl EncoderLayer {
    fn load(config: &Wav2Vec2Config, vb: VarBuilder) -> Result<Self> {
        let eps = config.layer_norm_eps;
        Ok(Self {
            attention: SelfAttention::load(config, vb.pp("attention"))?,
            layer_norm: candle_nn::layer_norm(config.hidden_size, eps, vb.pp("layer_norm"))?,
            feed_forward: FeedForward::load(config, vb.pp("feed_forward"))?,
            final_layer_norm: candle_nn::layer_norm(
                config.hidden_size,
                eps,
                vb.pp("final_layer_norm"),
            )?,
            pre_norm: config.do_stable_layer_norm,
        })
    }
}

impl Module for EncoderLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        if self.pre_norm {
            let attended = self.attention.forward(&self.layer_norm.forward(xs)?)?;
            let xs = (xs + attended)?;
            let ff = self
                .feed_forward
                .forward(&self.final_layer_norm.forward(&xs)?)?;
            xs + ff
        } else {
            let xs = (xs + self.attention.forward(xs)?)?;
            let xs = self.layer_norm.forward(&xs)?;
            let xs = (&xs + self.feed_forward.forward(&xs)?)?;
            self.final_layer_norm.forward(&xs)
        }
    }
}

struct Encoder {
    pos_conv_embed: PositionalConvEmbedding,
    layer_norm: LayerNorm,
    layers: Vec<EncoderLayer>,
    pre_norm: bool,
}

impl Encoder {
    fn load(config: &Wav2Vec2Config, vb: VarBuilder) -> Result<Self> {
        let layers = (0..config.num_hidden_layers)
            .map(|i| EncoderLayer::load(config, vb.pp(format!("layers.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            pos_conv_embed: PositionalConvEmbedding::load(config, vb.pp("pos_conv_embed"))?,
            layer_norm: candle_nn::layer_norm(
                config.hidden_size,
                config.layer_norm_eps,
                vb.pp("layer_norm"),
            )?,
            layers,
            pre_norm: config.do_stable_layer_norm,
        })
    }
}

impl Module for Encoder {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = (xs + self.pos_conv_embed.forward(xs)?)?;
        if !self.pre_norm {
            xs = self.layer_norm.forward(&xs)?;
        }
        for layer in &self.layers {
            xs = layer.forward(&xs)?;
        }
        if self.pre_norm {
            xs = self.layer_norm.forward(&xs)?;
        }
        Ok(xs)
    }
}

/// The wav2vec2 backbone: raw waveform in, contextual frame embeddings out.
pub struct Wav2Vec2Model {
    feature_extractor: Vec<FeatureEncoderLayer>,
    feature_projection: FeatureProjection,
    encoder: Encoder,
    min_input_samples: usize,
}

impl Wav2Vec2Model {
    pub fn load(config: &Wav2Vec2Config, vb: VarBuilder) -> Result<Self> {
        let conv_vb = vb.pp("feature_extractor").pp("conv_layers");
        let feature_extractor = (0..config.conv_dim.len())
            .map(|i| FeatureEncoderLayer::load(config, i, conv_vb.pp(i.to_string())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            feature_extractor,
            feature_projection: FeatureProjection::load(config, vb.pp("feature_projection"))?,
            encoder: Encoder::load(config, vb.pp("encoder"))?,
            min_input_samples: config.min_input_samples(),
        })
    }

    /// Shortest waveform that produces at least one frame.
    pub fn min_input_samples(&self) -> usize {
        self.min_input_samples
    }
}

impl Module for Wav2Vec2Model {
    /// `xs` is `(batch, samples)`; the result is `(batch, frames, hidden)`.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut features = xs.unsqueeze(1)?;
        for layer in &self.feature_extractor {
            features = layer.forward(&features)?;
        }
        let features = features.transpose(1, 2)?;
        let hidden = self.feature_projection.forward(&features)?;
        self.encoder.forward(&hidden)
    }
}
