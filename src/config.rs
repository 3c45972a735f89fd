use crate::defaults;
use crate::error::{LiewaveError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub decoder: DecoderConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

/// Model artifact configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory holding config.json, preprocessor_config.json and the weights
    pub path: PathBuf,
}

/// External decoder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecoderConfig {
    pub program: String,
    pub sample_rate: u32,
    /// Deadline for one decoder run, in milliseconds
    pub timeout_ms: u64,
}

/// Object store / document store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Firebase Storage bucket holding the recordings
    pub bucket: String,
    /// Google Cloud project that owns the Firestore database
    pub project: String,
    /// Firestore database id
    pub database: String,
    /// Collection receiving prediction records
    pub collection: String,
    /// Root directory for the `local` backend
    pub local_root: PathBuf,
    /// OAuth2 bearer token for the `firebase` backend
    pub access_token: Option<String>,
    pub storage_endpoint: String,
    pub firestore_endpoint: String,
    pub timeout_secs: u64,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Firebase,
    Local,
    /// Empty in-process stores. Tests fill them through the store handles;
    /// `validate` rejects it because nothing can put a recording there.
    Memory,
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub socket: Option<PathBuf>,
    pub max_concurrent_requests: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(defaults::DEFAULT_MODEL_DIR),
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            program: defaults::DECODER_PROGRAM.to_string(),
            sample_rate: defaults::DECODER_SAMPLE_RATE,
            timeout_ms: defaults::DECODER_TIMEOUT_MS,
        }
    }
}

impl DecoderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Firebase,
            bucket: String::new(),
            project: String::new(),
            database: defaults::FIRESTORE_DATABASE.to_string(),
            collection: defaults::PREDICTIONS_COLLECTION.to_string(),
            local_root: PathBuf::from("."),
            access_token: None,
            storage_endpoint: defaults::STORAGE_ENDPOINT.to_string(),
            firestore_endpoint: defaults::FIRESTORE_ENDPOINT.to_string(),
            timeout_secs: defaults::HTTP_TIMEOUT_SECS,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket: None,
            max_concurrent_requests: defaults::MAX_CONCURRENT_REQUESTS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file cannot be read or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(LiewaveError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables (the unprefixed names are accepted for
    /// deployments that already export them):
    /// - LIEWAVE_MODEL_PATH / MODEL_PATH → model.path
    /// - LIEWAVE_FFMPEG_PATH / FFMPEG_PATH → decoder.program
    /// - LIEWAVE_STORAGE_BUCKET / STORAGE_BUCKET → storage.bucket
    /// - LIEWAVE_FIREBASE_PROJECT → storage.project
    /// - LIEWAVE_FIREBASE_DATABASE_ID / FIREBASE_DATABASE_ID → storage.database
    /// - LIEWAVE_ACCESS_TOKEN → storage.access_token
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(path) = env_value(&["LIEWAVE_MODEL_PATH", "MODEL_PATH"]) {
            self.model.path = PathBuf::from(path);
        }

        if let Some(program) = env_value(&["LIEWAVE_FFMPEG_PATH", "FFMPEG_PATH"]) {
            self.decoder.program = program;
        }

        if let Some(bucket) = env_value(&["LIEWAVE_STORAGE_BUCKET", "STORAGE_BUCKET"]) {
            self.storage.bucket = bucket;
        }

        if let Some(project) = env_value(&["LIEWAVE_FIREBASE_PROJECT"]) {
            self.storage.project = project;
        }

        if let Some(database) = env_value(&["LIEWAVE_FIREBASE_DATABASE_ID", "FIREBASE_DATABASE_ID"])
        {
            self.storage.database = database;
        }

        if let Some(token) = env_value(&["LIEWAVE_ACCESS_TOKEN"]) {
            self.storage.access_token = Some(token);
        }

        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.decoder.program.trim().is_empty() {
            return Err(invalid("decoder.program", "must not be empty"));
        }
        if self.decoder.sample_rate == 0 {
            return Err(invalid("decoder.sample_rate", "must be positive"));
        }
        if self.decoder.timeout_ms == 0 {
            return Err(invalid("decoder.timeout_ms", "must be positive"));
        }
        if self.storage.collection.is_empty() || self.storage.collection.contains('/') {
            return Err(invalid(
                "storage.collection",
                "must be a non-empty name without '/'",
            ));
        }
        if self.storage.timeout_secs == 0 {
            return Err(invalid("storage.timeout_secs", "must be positive"));
        }
        if self.storage.backend == StorageBackend::Memory {
            return Err(invalid(
                "storage.backend",
                "memory holds no recordings; use local or firebase",
            ));
        }
        if self.storage.backend == StorageBackend::Firebase {
            if self.storage.bucket.is_empty() {
                return Err(invalid("storage.bucket", "required for the firebase backend"));
            }
            if self.storage.project.is_empty() {
                return Err(invalid(
                    "storage.project",
                    "required for the firebase backend",
                ));
            }
        }
        if self.server.max_concurrent_requests == 0 {
            return Err(invalid("server.max_concurrent_requests", "must be positive"));
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/liewave/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("liewave")
            .join("config.toml")
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| LiewaveError::ConfigParse {
            message: format!("Failed to serialize configuration: {e}"),
        })
    }
}

fn env_value(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.is_empty())
}

fn invalid(key: &str, message: &str) -> LiewaveError {
    LiewaveError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
