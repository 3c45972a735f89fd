//! Prediction orchestrator: fetch, transcode, extract, classify, persist.
//!
//! Stages run strictly in order and the first failure ends the request with
//! that stage's error unchanged. The record is written last, so a failed
//! request never leaves a record behind.

use crate::audio::convert::{FfmpegTranscoder, Transcoder};
use crate::audio::features::FeatureExtractor;
use crate::config::Config;
use crate::error::{LiewaveError, Result};
use crate::model::runtime::{Classifier, ModelHandle};
use crate::prediction::PredictionResult;
use crate::storage::StorageGateway;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, debug, info, info_span};

pub struct Orchestrator {
    gateway: StorageGateway,
    transcoder: Arc<dyn Transcoder>,
    extractor: Arc<FeatureExtractor>,
    classifier: Arc<dyn Classifier>,
}

impl Orchestrator {
    pub fn new(
        gateway: StorageGateway,
        transcoder: Arc<dyn Transcoder>,
        extractor: FeatureExtractor,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            gateway,
            transcoder,
            extractor: Arc::new(extractor),
            classifier,
        }
    }

    /// Wire the production collaborators from configuration and a loaded model.
    pub fn from_config(config: &Config, model: Arc<ModelHandle>) -> Result<Self> {
        let gateway = StorageGateway::from_config(&config.storage)?;
        let transcoder = Arc::new(FfmpegTranscoder::from_config(&config.decoder));
        let extractor = model.feature_extractor();
        Ok(Self::new(gateway, transcoder, extractor, model))
    }

    pub fn classifier_name(&self) -> &str {
        self.classifier.name()
    }

    /// Produce and persist a prediction for the recording at `path`.
    pub async fn run(&self, path: &str, user_id: &str) -> Result<PredictionResult> {
        let span = info_span!("predict", path = %path, user_id = %user_id);
        self.run_stages(path, user_id).instrument(span).await
    }

    async fn run_stages(&self, path: &str, user_id: &str) -> Result<PredictionResult> {
        if user_id.trim().is_empty() {
            return Err(LiewaveError::InvalidRequest {
                message: "user id is empty".to_string(),
            });
        }
        let started = Instant::now();

        let audio = self.gateway.fetch(path).await?;
        debug!("Fetched {} bytes", audio.len());

        let wav = self.transcoder.transcode(audio.into_bytes()).await?;
        debug!("Transcoded to {} bytes of WAV", wav.len());

        let extractor = Arc::clone(&self.extractor);
        let features = tokio::task::spawn_blocking(move || extractor.extract(&wav))
            .await
            .map_err(|e| task_failed("feature extraction", e))??;
        debug!("Extracted {:.2}s of features", features.duration_secs());

        let classifier = Arc::clone(&self.classifier);
        let result = tokio::task::spawn_blocking(move || classifier.classify(&features))
            .await
            .map_err(|e| task_failed("classification", e))??;
        debug!(
            "Classified as {} ({:.2})",
            result.label().wire_name(),
            result.confidence()
        );

        let record_id = self.gateway.persist(path, user_id, &result).await?;
        info!(
            "Predicted {} with confidence {:.2} in {:?}, stored as {}",
            result.label().wire_name(),
            result.confidence(),
            started.elapsed(),
            record_id
        );
        Ok(result)
    }
}

fn task_failed(stage: &str, e: tokio::task::JoinError) -> LiewaveError {
    LiewaveError::Inference {
        message: format!("{stage} task failed: {e}"),
    }
}
