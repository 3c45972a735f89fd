//! Error types for liewave.
//!
//! Every pipeline stage reports one of these kinds and the orchestrator
//! surfaces them unchanged; the serving layer decides how to present them.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LiewaveError {
    // Storage collaborators
    #[error("No object stored at {path}")]
    NotFound { path: String },

    #[error("Authentication failed: {message}")]
    AuthFailure { message: String },

    #[error("Transient I/O failure: {message}")]
    TransientIo { message: String },

    // External decoder
    #[error("Audio decoding failed: {message}")]
    DecodeError { message: String },

    #[error("Audio decoder timed out after {seconds:.1}s")]
    DecodeTimeout { seconds: f64 },

    // Feature extraction
    #[error("Unsupported audio: {message}")]
    UnsupportedAudio { message: String },

    // Model runtime
    #[error("Failed to load model from {path}: {message}")]
    ModelLoad { path: String, message: String },

    #[error("Inference failed: {message}")]
    Inference { message: String },

    // Request validation
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    // IPC errors
    #[error("IPC socket error: {message}")]
    IpcSocket { message: String },

    #[error("IPC protocol error: {message}")]
    IpcProtocol { message: String },

    #[error("IPC connection failed: {message}")]
    IpcConnection { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LiewaveError {
    /// Whether a caller may reasonably retry the whole request.
    ///
    /// Only service hiccups qualify; decoding and inference are deterministic
    /// for identical input, so repeating them cannot change the outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LiewaveError::TransientIo { .. })
    }

    /// Whether the failure was caused by the request itself rather than the pipeline.
    pub fn is_client_error(&self) -> bool {
        matches!(self, LiewaveError::InvalidRequest { .. })
    }
}

impl From<toml::de::Error> for LiewaveError {
    fn from(e: toml::de::Error) -> Self {
        LiewaveError::ConfigParse {
            message: e.to_string(),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, LiewaveError>;
