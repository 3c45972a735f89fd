//! Async Unix socket server for the prediction daemon.

use crate::error::{LiewaveError, Result};
use crate::ipc::protocol::{Command, Response};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

/// How often the accept loop rechecks the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Longest request line read from a client; anything longer is refused unread.
pub const MAX_REQUEST_BYTES: u64 = 64 * 1024;

/// Processes one decoded request.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: Command) -> Response;
}

/// Unix socket server answering one JSON request line per connection.
pub struct IpcServer {
    socket_path: PathBuf,
    shutdown: AtomicBool,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// `$XDG_RUNTIME_DIR/liewave.sock`, else `/tmp/liewave-<uid>.sock`.
    pub fn default_socket_path() -> PathBuf {
        match std::env::var("XDG_RUNTIME_DIR") {
            Ok(runtime_dir) if !runtime_dir.is_empty() => {
                PathBuf::from(runtime_dir).join("liewave.sock")
            }
            _ => {
                // SAFETY: getuid has no preconditions and cannot fail.
                let uid = unsafe { libc::getuid() };
                PathBuf::from(format!("/tmp/liewave-{uid}.sock"))
            }
        }
    }

    /// Accept connections until [`IpcServer::stop`] is called.
    pub async fn start<H>(&self, handler: H) -> Result<()>
    where
        H: CommandHandler + 'static,
    {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| LiewaveError::IpcSocket {
                message: format!("Failed to remove stale socket: {}", e),
            })?;
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| LiewaveError::IpcSocket {
                message: format!("Failed to bind {}: {}", self.socket_path.display(), e),
            })?;

        let handler = Arc::new(handler);

        while !self.shutdown.load(Ordering::Acquire) {
            match tokio::time::timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, _))) => {
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, handler).await {
                            warn!("Client connection failed: {}", e);
                        }
                    });
                }
                Ok(Err(e)) => {
                    return Err(LiewaveError::IpcConnection {
                        message: format!("Failed to accept connection: {}", e),
                    });
                }
                Err(_) => continue,
            }
        }

        Ok(())
    }

    /// Stop accepting and remove the socket file.
    pub fn stop(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| LiewaveError::IpcSocket {
                message: format!("Failed to remove socket file: {}", e),
            })?;
        }
        Ok(())
    }
}

async fn handle_client<H>(stream: UnixStream, handler: Arc<H>) -> Result<()>
where
    H: CommandHandler,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader.take(MAX_REQUEST_BYTES + 1));
    let mut line = String::new();

    let read = reader
        .read_line(&mut line)
        .await
        .map_err(|e| LiewaveError::IpcConnection {
            message: format!("Failed to read request: {}", e),
        })?;

    let response = if read as u64 > MAX_REQUEST_BYTES {
        warn!("Refusing request longer than {} bytes", MAX_REQUEST_BYTES);
        Response::client_error(format!(
            "Request exceeds {} bytes",
            MAX_REQUEST_BYTES
        ))
    } else {
        match Command::from_json(line.trim()) {
            Ok(command) => {
                debug!("Received {:?}", command);
                handler.handle(command).await
            }
            Err(e) => Response::client_error(format!("Malformed request: {e}")),
        }
    };

    let mut payload = response.to_json().map_err(|e| LiewaveError::IpcProtocol {
        message: format!("Failed to serialize response: {}", e),
    })?;
    payload.push('\n');

    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| LiewaveError::IpcConnection {
            message: format!("Failed to write response: {}", e),
        })?;
    writer
        .flush()
        .await
        .map_err(|e| LiewaveError::IpcConnection {
            message: format!("Failed to flush response: {}", e),
        })?;

    Ok(())
}
