//! Default configuration constants for liewave.
//!
//! Shared between the config structs, the pipeline stages and the tests so the
//! same numbers are never spelled twice.

/// Sample rate the classification model was trained on, in Hz.
pub const MODEL_SAMPLE_RATE: u32 = 16000;

/// Sample rate requested from the external decoder, in Hz.
///
/// The decoder output is resampled to [`MODEL_SAMPLE_RATE`] afterwards, so this
/// only has to be a rate every input codec can be converted to losslessly enough.
pub const DECODER_SAMPLE_RATE: u32 = 44100;

/// Default decoder executable, resolved through `PATH`.
pub const DECODER_PROGRAM: &str = "ffmpeg";

/// Wall-clock budget for one decoder invocation, in milliseconds.
pub const DECODER_TIMEOUT_MS: u64 = 30_000;

/// Document-store collection that holds prediction records.
pub const PREDICTIONS_COLLECTION: &str = "predictions";

/// Character substituted for path separators in record identities.
pub const RECORD_ID_SEPARATOR: char = '_';

/// Decimal places kept in reported confidences.
pub const CONFIDENCE_DECIMALS: i32 = 2;

/// Encoder configuration file inside the model artifact directory.
pub const MODEL_CONFIG_FILENAME: &str = "config.json";

/// Feature-normalization configuration inside the model artifact directory.
pub const PROCESSOR_CONFIG_FILENAME: &str = "preprocessor_config.json";

/// Preferred weights file (safetensors).
pub const WEIGHTS_SAFETENSORS_FILENAME: &str = "lie_detection_model.safetensors";

/// Fallback weights file (PyTorch state dict).
pub const WEIGHTS_PTH_FILENAME: &str = "lie_detection_model.pth";

/// Default model artifact directory, relative to the working directory.
pub const DEFAULT_MODEL_DIR: &str = "models/liewave";

/// Variance floor used when normalizing features to zero mean and unit variance.
pub const NORMALIZE_EPSILON: f64 = 1e-7;

/// Default Firebase Storage REST endpoint.
pub const STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";

/// Default Firestore REST endpoint.
pub const FIRESTORE_ENDPOINT: &str = "https://firestore.googleapis.com";

/// Default Firestore database id.
pub const FIRESTORE_DATABASE: &str = "(default)";

/// Per-request timeout for object store and document store calls, in seconds.
pub const HTTP_TIMEOUT_SECS: u64 = 60;

/// Requests processed concurrently by the daemon.
pub const MAX_CONCURRENT_REQUESTS: usize = 4;

/// Report the compute backend compiled into this build.
///
/// The runtime still falls back to the CPU when the compiled backend finds no device.
pub fn compute_backend() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA"
    } else if cfg!(feature = "metal") {
        "Metal"
    } else {
        "CPU"
    }
}
