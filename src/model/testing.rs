//! Tiny randomly initialised model artifacts for tests.
//!
//! Built with the crate's own tests and with the `test-util` feature, which the
//! integration tests enable through the self dev-dependency.

#![allow(clippy::expect_used)]

use super::classifier::LieDetectionModel;
use super::config::Wav2Vec2Config;
use crate::defaults;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use std::path::Path;

/// Two conv layers (stride 10 overall) and two transformer layers of width 16.
pub const TINY_CONFIG_JSON: &str = r#"{
    "hidden_size": 16,
    "num_hidden_layers": 2,
    "num_attention_heads": 4,
    "intermediate_size": 32,
    "conv_dim": [8, 8],
    "conv_stride": [5, 2],
    "conv_kernel": [10, 3],
    "num_conv_pos_embeddings": 4,
    "num_conv_pos_embedding_groups": 4,
    "num_labels": 2
}"#;

const TINY_PROCESSOR_JSON: &str = r#"{"do_normalize": true, "sampling_rate": 16000}"#;

/// Small but structurally complete encoder config.
pub fn tiny_config() -> Wav2Vec2Config {
    serde_json::from_str(TINY_CONFIG_JSON).expect("tiny config parses")
}

/// Write config.json, preprocessor_config.json and random safetensors weights into `dir`.
pub fn write_tiny_artifact(dir: &Path) {
    std::fs::write(dir.join(defaults::MODEL_CONFIG_FILENAME), TINY_CONFIG_JSON)
        .expect("write model config");
    std::fs::write(
        dir.join(defaults::PROCESSOR_CONFIG_FILENAME),
        TINY_PROCESSOR_JSON,
    )
    .expect("write processor config");

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    LieDetectionModel::load(&tiny_config(), vb).expect("build tiny model");
    varmap
        .save(dir.join(defaults::WEIGHTS_SAFETENSORS_FILENAME))
        .expect("save tiny weights");
}
