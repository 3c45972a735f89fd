//! Client side of the daemon socket.

use crate::error::{LiewaveError, Result};
use crate::ipc::protocol::{Command, Response};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Send one command and wait for its response.
///
/// # Errors
/// `IpcConnection` when the daemon is unreachable or hangs up,
/// `IpcProtocol` when the response cannot be decoded.
pub async fn send_command(socket_path: &Path, command: Command) -> Result<Response> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| LiewaveError::IpcConnection {
            message: format!(
                "Failed to connect to daemon at {}: {}",
                socket_path.display(),
                e
            ),
        })?;

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let mut request = command.to_json().map_err(|e| LiewaveError::IpcProtocol {
        message: format!("Failed to serialize command: {}", e),
    })?;
    request.push('\n');

    writer
        .write_all(request.as_bytes())
        .await
        .map_err(|e| LiewaveError::IpcConnection {
            message: format!("Failed to write command: {}", e),
        })?;
    writer
        .flush()
        .await
        .map_err(|e| LiewaveError::IpcConnection {
            message: format!("Failed to flush command: {}", e),
        })?;

    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .await
        .map_err(|e| LiewaveError::IpcConnection {
            message: format!("Failed to read response: {}", e),
        })?;
    if read == 0 {
        return Err(LiewaveError::IpcConnection {
            message: "Daemon closed the connection without responding".to_string(),
        });
    }

    Response::from_json(line.trim()).map_err(|e| LiewaveError::IpcProtocol {
        message: format!("Failed to decode response: {}", e),
    })
}
