//! End-to-end pipeline runs with a real (tiny, random) model and in-memory storage.

mod common;

use candle_core::Device;
use common::tone_wav;
use liewave::audio::ScriptedTranscoder;
use liewave::config::{StorageBackend, StorageConfig};
use liewave::model::testing::write_tiny_artifact;
use liewave::model::ModelHandle;
use liewave::storage::{MemoryDocumentStore, MemoryObjectStore, StorageGateway};
use liewave::{LiewaveError, Orchestrator};
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    _model_dir: TempDir,
    objects: Arc<MemoryObjectStore>,
    documents: Arc<MemoryDocumentStore>,
    transcoder: Arc<ScriptedTranscoder>,
    orchestrator: Orchestrator,
}

fn harness(transcoder: ScriptedTranscoder) -> Harness {
    let model_dir = TempDir::new().unwrap();
    write_tiny_artifact(model_dir.path());
    let model = Arc::new(ModelHandle::load_on(model_dir.path(), Device::Cpu).unwrap());

    let objects = Arc::new(MemoryObjectStore::new());
    let documents = Arc::new(MemoryDocumentStore::new());
    let transcoder = Arc::new(transcoder);
    let orchestrator = Orchestrator::new(
        StorageGateway::new(objects.clone(), documents.clone(), "predictions"),
        transcoder.clone(),
        model.feature_extractor(),
        model,
    );
    Harness {
        _model_dir: model_dir,
        objects,
        documents,
        transcoder,
        orchestrator,
    }
}

#[tokio::test]
async fn prediction_is_stored_under_sanitized_path() {
    let h = harness(ScriptedTranscoder::returning(tone_wav(16_000, 1, 2.0)));
    h.objects.insert("users/42/clip1.aac", b"aac payload".to_vec());

    let result = h.orchestrator.run("users/42/clip1.aac", "42").await.unwrap();
    assert!(
        (0.5..=1.0).contains(&result.confidence()),
        "arg-max of two classes is at least 0.5, got {}",
        result.confidence()
    );

    let doc = h
        .documents
        .get("predictions", "users_42_clip1.aac")
        .expect("record written");
    assert_eq!(doc["user_id"], "42");
    assert_eq!(doc["source_path"], "users/42/clip1.aac");
    assert_eq!(
        doc["predictionData"]["prediction"],
        result.label().wire_name()
    );
    assert_eq!(
        doc["predictionData"]["confidence"].as_f64(),
        Some(result.confidence())
    );
    assert!(doc["timestamp"].is_string());
}

#[tokio::test]
async fn decoder_output_at_44k1_stereo_is_accepted() {
    let h = harness(ScriptedTranscoder::returning(tone_wav(44_100, 2, 1.5)));
    h.objects.insert("users/7/stereo.m4a", vec![0; 16]);

    let result = h.orchestrator.run("users/7/stereo.m4a", "7").await.unwrap();
    let doc = h.documents.get("predictions", "users_7_stereo.m4a").unwrap();
    assert_eq!(doc["predictionData"]["prediction"], result.label().wire_name());
}

#[tokio::test]
async fn identical_input_gives_identical_prediction_and_one_record() {
    let h = harness(ScriptedTranscoder::returning(tone_wav(16_000, 1, 2.0)));
    h.objects.insert("users/3/same.aac", vec![1, 2, 3]);

    let first = h.orchestrator.run("users/3/same.aac", "3").await.unwrap();
    let second = h.orchestrator.run("users/3/same.aac", "3").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.documents.len("predictions"), 1);
    assert_eq!(h.documents.write_count(), 2);
}

#[tokio::test]
async fn missing_object_writes_nothing() {
    let h = harness(ScriptedTranscoder::returning(tone_wav(16_000, 1, 2.0)));

    let err = h.orchestrator.run("users/42/missing.aac", "42").await.unwrap_err();
    assert!(matches!(err, LiewaveError::NotFound { .. }), "got {err:?}");
    assert_eq!(h.transcoder.call_count(), 0);
    assert_eq!(h.documents.write_count(), 0);
}

#[tokio::test]
async fn malformed_audio_stops_before_inference() {
    let h = harness(ScriptedTranscoder::with_script(vec![Err(
        LiewaveError::DecodeError {
            message: "moov atom not found".to_string(),
        },
    )]));
    h.objects.insert("users/1/broken.aac", b"not audio".to_vec());

    let err = h.orchestrator.run("users/1/broken.aac", "1").await.unwrap_err();
    assert!(matches!(err, LiewaveError::DecodeError { .. }), "got {err:?}");
    assert!(!err.is_retryable());
    assert_eq!(h.documents.write_count(), 0);
}

#[tokio::test]
async fn clip_shorter_than_receptive_field_is_inference_error() {
    // Ten samples is below the conv stack's minimum input.
    let h = harness(ScriptedTranscoder::returning(tone_wav(16_000, 1, 10.0 / 16_000.0)));
    h.objects.insert("users/1/blip.aac", vec![1]);

    let err = h.orchestrator.run("users/1/blip.aac", "1").await.unwrap_err();
    assert!(matches!(err, LiewaveError::Inference { .. }), "got {err:?}");
    assert_eq!(h.documents.write_count(), 0);
}

#[tokio::test]
async fn local_backend_reads_files_under_root() {
    let root = TempDir::new().unwrap();
    std::fs::create_dir_all(root.path().join("users/5")).unwrap();
    std::fs::write(root.path().join("users/5/local.aac"), b"local bytes").unwrap();

    let config = StorageConfig {
        backend: StorageBackend::Local,
        local_root: root.path().to_path_buf(),
        ..StorageConfig::default()
    };
    let gateway = StorageGateway::from_config(&config).unwrap();

    let object = gateway.fetch("users/5/local.aac").await.unwrap();
    assert_eq!(object.bytes(), b"local bytes");

    let err = gateway.fetch("../outside.aac").await.unwrap_err();
    assert!(matches!(err, LiewaveError::NotFound { .. }), "got {err:?}");
}
