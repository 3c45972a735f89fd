//! Command handler implementation for the daemon.

use crate::ipc::protocol::{Command, Response};
use crate::ipc::server::CommandHandler;
use crate::model::runtime::{ModelRuntime, device_name};
use crate::model::Classifier;
use crate::orchestrator::Orchestrator;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Notify, Semaphore};
use tracing::{info, warn};

/// Answers daemon requests by driving the orchestrator.
pub struct DaemonCommandHandler {
    orchestrator: Arc<Orchestrator>,
    runtime: &'static ModelRuntime,
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    shutdown: Arc<Notify>,
}

/// Decrements the in-flight counter when a request finishes, however it ends.
struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl DaemonCommandHandler {
    /// # Arguments
    /// * `max_concurrent` - predictions allowed to run at once; later ones wait
    /// * `shutdown` - notified when a client asks the daemon to stop
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        runtime: &'static ModelRuntime,
        max_concurrent: usize,
        shutdown: Arc<Notify>,
    ) -> Self {
        Self {
            orchestrator,
            runtime,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: Arc::new(AtomicUsize::new(0)),
            shutdown,
        }
    }

    /// Requests currently waiting for or holding a permit.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    async fn predict(&self, path: String, user_id: String) -> Response {
        if path.trim().is_empty() || user_id.trim().is_empty() {
            return Response::client_error("Missing path or user_id");
        }

        let _guard = InFlightGuard::enter(&self.in_flight);
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => return Response::server_error(e),
        };

        match self.orchestrator.run(&path, &user_id).await {
            Ok(result) => Response::Prediction {
                prediction_data: result.data(),
                user_id,
            },
            Err(e) if e.is_client_error() => Response::client_error(e.to_string()),
            Err(e) => {
                warn!("Prediction for {} failed: {}", path, e);
                Response::server_error(e)
            }
        }
    }

    fn status(&self) -> Response {
        let handle = self.runtime.handle();
        Response::Status {
            model_state: self.runtime.state(),
            device: handle.as_ref().map(|h| device_name(h.device()).to_string()),
            model_name: handle
                .as_ref()
                .map(|h| h.name().to_string())
                .or_else(|| Some(self.orchestrator.classifier_name().to_string())),
            in_flight: self.in_flight(),
            version: crate::version_string(),
        }
    }
}

#[async_trait::async_trait]
impl CommandHandler for DaemonCommandHandler {
    async fn handle(&self, command: Command) -> Response {
        match command {
            Command::Predict { path, user_id } => self.predict(path, user_id).await,
            Command::Status => self.status(),
            Command::Shutdown => {
                info!("Shutdown requested over IPC");
                self.shutdown.notify_one();
                Response::Ok
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::convert::ScriptedTranscoder;
    use crate::audio::features::FeatureExtractor;
    use crate::audio::waveform::tests::make_wav_data;
    use crate::ipc::protocol::ErrorKind;
    use crate::model::config::ProcessorConfig;
    use crate::model::runtime::{MockClassifier, ModelState};
    use crate::prediction::{Label, PredictionResult};
    use crate::storage::{MemoryDocumentStore, MemoryObjectStore, StorageGateway};
    use std::time::Duration;

    struct Fixture {
        objects: Arc<MemoryObjectStore>,
        documents: Arc<MemoryDocumentStore>,
        shutdown: Arc<Notify>,
        handler: DaemonCommandHandler,
    }

    fn fixture(classifier: MockClassifier) -> Fixture {
        let objects = Arc::new(MemoryObjectStore::new());
        let documents = Arc::new(MemoryDocumentStore::new());
        let samples: Vec<i16> = (0..16000).map(|i| ((i % 80) * 40) as i16).collect();
        let orchestrator = Orchestrator::new(
            StorageGateway::new(objects.clone(), documents.clone(), "predictions"),
            Arc::new(ScriptedTranscoder::returning(make_wav_data(16000, 1, &samples))),
            FeatureExtractor::new(ProcessorConfig::default()),
            Arc::new(classifier),
        );
        let runtime: &'static ModelRuntime = Box::leak(Box::new(ModelRuntime::new()));
        let shutdown = Arc::new(Notify::new());
        let handler =
            DaemonCommandHandler::new(Arc::new(orchestrator), runtime, 2, Arc::clone(&shutdown));
        Fixture {
            objects,
            documents,
            shutdown,
            handler,
        }
    }

    fn truthful() -> MockClassifier {
        MockClassifier::new(PredictionResult::new(Label::Truthful, 0.934))
    }

    #[tokio::test]
    async fn predict_returns_rounded_prediction() {
        let f = fixture(truthful());
        f.objects.insert("users/42/clip1.aac", vec![1, 2, 3]);

        let response = f
            .handler
            .handle(Command::predict("users/42/clip1.aac", "42"))
            .await;
        match response {
            Response::Prediction {
                prediction_data,
                user_id,
            } => {
                assert_eq!(user_id, "42");
                assert_eq!(prediction_data.prediction, "truth");
                assert!((prediction_data.confidence - 0.93).abs() < 1e-9);
            }
            other => panic!("Expected Prediction, got {:?}", other),
        }
        assert!(f.documents.get("predictions", "users_42_clip1.aac").is_some());
        assert_eq!(f.handler.in_flight(), 0);
    }

    #[tokio::test]
    async fn missing_fields_are_client_errors() {
        let f = fixture(truthful());
        for command in [
            Command::predict("", "42"),
            Command::predict("users/42/a.aac", ""),
            Command::predict("  ", " "),
        ] {
            match f.handler.handle(command).await {
                Response::Error { kind, message } => {
                    assert_eq!(kind, ErrorKind::Client);
                    assert_eq!(message, "Missing path or user_id");
                }
                other => panic!("Expected client error, got {:?}", other),
            }
        }
        assert_eq!(f.objects.read_count(), 0);
    }

    #[tokio::test]
    async fn pipeline_failure_is_server_error() {
        let f = fixture(truthful());

        match f.handler.handle(Command::predict("users/1/gone.aac", "1")).await {
            Response::Error { kind, message } => {
                assert_eq!(kind, ErrorKind::Server);
                assert!(message.starts_with("Internal error: "), "got {message}");
                assert!(message.contains("users/1/gone.aac"));
            }
            other => panic!("Expected server error, got {:?}", other),
        }
        assert_eq!(f.documents.write_count(), 0);
    }

    #[tokio::test]
    async fn inference_failure_is_server_error() {
        let f = fixture(MockClassifier::failing());
        f.objects.insert("a.aac", vec![1]);

        match f.handler.handle(Command::predict("a.aac", "1")).await {
            Response::Error { kind, .. } => assert_eq!(kind, ErrorKind::Server),
            other => panic!("Expected server error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn status_reports_runtime_state() {
        let f = fixture(truthful());
        match f.handler.handle(Command::Status).await {
            Response::Status {
                model_state,
                device,
                model_name,
                in_flight,
                version,
            } => {
                assert_eq!(model_state, ModelState::Uninitialized);
                assert!(device.is_none());
                assert_eq!(model_name.as_deref(), Some("mock-classifier"));
                assert_eq!(in_flight, 0);
                assert_eq!(version, crate::version_string());
            }
            other => panic!("Expected Status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn shutdown_notifies_waiter() {
        let f = fixture(truthful());
        assert_eq!(f.handler.handle(Command::Shutdown).await, Response::Ok);
        tokio::time::timeout(Duration::from_secs(1), f.shutdown.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_predictions_all_complete() {
        let f = fixture(truthful());
        for i in 0..5 {
            f.objects.insert(&format!("users/{i}/c.aac"), vec![i as u8]);
        }
        let handler = Arc::new(f.handler);

        let tasks: Vec<_> = (0..5)
            .map(|i| {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    handler
                        .handle(Command::predict(format!("users/{i}/c.aac"), i.to_string()))
                        .await
                })
            })
            .collect();
        for task in tasks {
            assert!(matches!(task.await.unwrap(), Response::Prediction { .. }));
        }
        assert_eq!(f.documents.len("predictions"), 5);
        assert_eq!(handler.in_flight(), 0);
    }
}
