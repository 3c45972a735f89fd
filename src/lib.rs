//! liewave - truthful/deceptive speech classification for stored recordings
//!
//! Fetches a recording from object storage, transcodes it with ffmpeg, runs a
//! wav2vec2 sequence classifier on it and stores the verdict per recording.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod defaults;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod prediction;
pub mod storage;

// Pipeline seams (fetch → transcode → extract → classify → persist)
pub use audio::{FeatureExtractor, FeatureTensor, Transcoder};
pub use model::Classifier;
pub use storage::{DocumentStore, ObjectStore, StorageGateway};

pub use orchestrator::Orchestrator;

// Error handling
pub use error::{LiewaveError, Result};

// Config
pub use config::Config;

// Results
pub use prediction::{Label, PredictionData, PredictionResult};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_contains_plus_when_git_hash_present() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            let hash_part = ver.split('+').nth(1).unwrap_or("");
            assert_eq!(hash_part.len(), 7, "Git hash should be 7 chars, got: {}", ver);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
