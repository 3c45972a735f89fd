//! The daemon command handler behind a real Unix socket.

mod common;

use common::tone_wav;
use liewave::audio::ScriptedTranscoder;
use liewave::daemon::handler::DaemonCommandHandler;
use liewave::ipc::client::send_command;
use liewave::ipc::protocol::{Command, ErrorKind, Response};
use liewave::ipc::server::IpcServer;
use liewave::model::testing::write_tiny_artifact;
use liewave::model::{ModelRuntime, ModelState};
use liewave::storage::{MemoryDocumentStore, MemoryObjectStore, StorageGateway};
use liewave::Orchestrator;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::Notify;

struct Daemon {
    _dir: TempDir,
    socket: PathBuf,
    server: Arc<IpcServer>,
    objects: Arc<MemoryObjectStore>,
    documents: Arc<MemoryDocumentStore>,
    shutdown: Arc<Notify>,
}

async fn start_daemon() -> Daemon {
    let dir = TempDir::new().unwrap();
    let model_dir = dir.path().join("model");
    std::fs::create_dir(&model_dir).unwrap();
    write_tiny_artifact(&model_dir);

    let runtime: &'static ModelRuntime = Box::leak(Box::new(ModelRuntime::new()));
    let model = runtime.initialize(&model_dir).unwrap();

    let objects = Arc::new(MemoryObjectStore::new());
    let documents = Arc::new(MemoryDocumentStore::new());
    let orchestrator = Orchestrator::new(
        StorageGateway::new(objects.clone(), documents.clone(), "predictions"),
        Arc::new(ScriptedTranscoder::returning(tone_wav(16_000, 1, 2.0))),
        model.feature_extractor(),
        model,
    );

    let shutdown = Arc::new(Notify::new());
    let handler =
        DaemonCommandHandler::new(Arc::new(orchestrator), runtime, 2, Arc::clone(&shutdown));

    let socket = dir.path().join("liewave.sock");
    let server = Arc::new(IpcServer::new(socket.clone()));
    let running = Arc::clone(&server);
    tokio::spawn(async move { running.start(handler).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    Daemon {
        _dir: dir,
        socket,
        server,
        objects,
        documents,
        shutdown,
    }
}

#[tokio::test]
async fn predict_over_socket_returns_and_stores_prediction() {
    let d = start_daemon().await;
    d.objects.insert("users/42/clip1.aac", b"aac".to_vec());

    let response = send_command(&d.socket, Command::predict("users/42/clip1.aac", "42"))
        .await
        .unwrap();
    match response {
        Response::Prediction {
            prediction_data,
            user_id,
        } => {
            assert_eq!(user_id, "42");
            assert!(["truth", "lie"].contains(&prediction_data.prediction.as_str()));
            let doc = d
                .documents
                .get("predictions", "users_42_clip1.aac")
                .unwrap();
            assert_eq!(doc["predictionData"]["prediction"], prediction_data.prediction);
        }
        other => panic!("Expected Prediction, got {:?}", other),
    }
    d.server.stop().unwrap();
}

#[tokio::test]
async fn missing_user_id_is_client_error() {
    let d = start_daemon().await;

    let mut stream = UnixStream::connect(&d.socket).await.unwrap();
    stream
        .write_all(b"{\"type\":\"predict\",\"path\":\"users/1/a.aac\"}\n")
        .await
        .unwrap();
    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();

    match Response::from_json(raw.trim()).unwrap() {
        Response::Error { kind, message } => {
            assert_eq!(kind, ErrorKind::Client);
            assert_eq!(message, "Missing path or user_id");
        }
        other => panic!("Expected client error, got {:?}", other),
    }
    assert_eq!(d.objects.read_count(), 0);
    d.server.stop().unwrap();
}

#[tokio::test]
async fn unknown_recording_is_server_error() {
    let d = start_daemon().await;

    let response = send_command(&d.socket, Command::predict("users/9/none.aac", "9"))
        .await
        .unwrap();
    match response {
        Response::Error { kind, message } => {
            assert_eq!(kind, ErrorKind::Server);
            assert!(message.starts_with("Internal error: "));
        }
        other => panic!("Expected server error, got {:?}", other),
    }
    assert_eq!(d.documents.write_count(), 0);
    d.server.stop().unwrap();
}

#[tokio::test]
async fn status_reports_ready_model() {
    let d = start_daemon().await;

    match send_command(&d.socket, Command::Status).await.unwrap() {
        Response::Status {
            model_state,
            device,
            model_name,
            in_flight,
            version,
        } => {
            assert_eq!(model_state, ModelState::Ready);
            assert_eq!(device.as_deref(), Some("cpu"));
            assert!(model_name.is_some());
            assert_eq!(in_flight, 0);
            assert_eq!(version, liewave::version_string());
        }
        other => panic!("Expected Status, got {:?}", other),
    }
    d.server.stop().unwrap();
}

#[tokio::test]
async fn shutdown_command_wakes_daemon() {
    let d = start_daemon().await;

    let response = send_command(&d.socket, Command::Shutdown).await.unwrap();
    assert_eq!(response, Response::Ok);
    tokio::time::timeout(Duration::from_secs(1), d.shutdown.notified())
        .await
        .unwrap();
    d.server.stop().unwrap();
}
