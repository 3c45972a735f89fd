//! JSON-lines protocol between clients and the prediction daemon.
//!
//! One request line per connection, answered by one response line.

use crate::model::runtime::ModelState;
use crate::prediction::PredictionData;
use serde::{Deserialize, Serialize};

/// Requests accepted by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Classify the recording at `path` on behalf of `user_id`.
    ///
    /// Missing fields decode as empty strings so the handler can answer with
    /// a client error instead of dropping the connection.
    Predict {
        #[serde(default)]
        path: String,
        #[serde(default)]
        user_id: String,
    },
    Status,
    Shutdown,
}

impl Command {
    pub fn predict(path: impl Into<String>, user_id: impl Into<String>) -> Self {
        Command::Predict {
            path: path.into(),
            user_id: user_id.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Who caused a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or incomplete request
    Client,
    /// The pipeline failed
    Server,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Prediction {
        prediction_data: PredictionData,
        user_id: String,
    },
    Status {
        model_state: ModelState,
        device: Option<String>,
        model_name: Option<String>,
        in_flight: usize,
        version: String,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl Response {
    pub fn client_error(message: impl Into<String>) -> Self {
        Response::Error {
            kind: ErrorKind::Client,
            message: message.into(),
        }
    }

    /// Pipeline failure, prefixed the way callers expect.
    pub fn server_error(detail: impl std::fmt::Display) -> Self {
        Response::Error {
            kind: ErrorKind::Server,
            message: format!("Internal error: {detail}"),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
