//! One-time model loading and the classification entry point.
//!
//! `ModelRuntime` owns the single `ModelHandle` of a process. Loading happens
//! at most once: concurrent first callers block on the same initialization
//! and all receive the same `Arc`. A failed load leaves the runtime
//! uninitialized so the caller can report it and exit.

use super::classifier::{LieDetectionModel, decide};
use super::config::{ProcessorConfig, Wav2Vec2Config};
use crate::audio::features::{FeatureExtractor, FeatureTensor};
use crate::defaults;
use crate::error::{LiewaveError, Result};
use crate::prediction::PredictionResult;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Produces a prediction from extracted features.
pub trait Classifier: Send + Sync {
    fn classify(&self, features: &FeatureTensor) -> Result<PredictionResult>;

    /// Human-readable model name for status output.
    fn name(&self) -> &str;
}

impl<T: Classifier + ?Sized> Classifier for Arc<T> {
    fn classify(&self, features: &FeatureTensor) -> Result<PredictionResult> {
        (**self).classify(features)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Lifecycle of the process-wide model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Uninitialized,
    Loading,
    Ready,
}

impl std::fmt::Display for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelState::Uninitialized => "uninitialized",
            ModelState::Loading => "loading",
            ModelState::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// Pick the fastest available device: CUDA, then Metal, then CPU.
///
/// Accelerators are only reported available when the matching cargo feature
/// is compiled in.
pub fn select_device() -> Device {
    if candle_core::utils::cuda_is_available() {
        match Device::new_cuda(0) {
            Ok(device) => return device,
            Err(e) => warn!("CUDA reported available but failed to open: {}", e),
        }
    }
    if candle_core::utils::metal_is_available() {
        match Device::new_metal(0) {
            Ok(device) => return device,
            Err(e) => warn!("Metal reported available but failed to open: {}", e),
        }
    }
    Device::Cpu
}

pub fn device_name(device: &Device) -> &'static str {
    if device.is_cuda() {
        "cuda"
    } else if device.is_metal() {
        "metal"
    } else {
        "cpu"
    }
}

/// Loaded weights pinned to one device, plus the paired processor config.
///
/// Read-only once built. On CPU forward passes run concurrently; on an
/// accelerator they are serialized.
pub struct ModelHandle {
    model: LieDetectionModel,
    device: Device,
    processor: ProcessorConfig,
    name: String,
    artifact_dir: PathBuf,
    forward_lock: Option<Mutex<()>>,
}

impl ModelHandle {
    /// Load an artifact directory onto the best available device.
    pub fn load(artifact_dir: &Path) -> Result<Self> {
        Self::load_on(artifact_dir, select_device())
    }

    pub fn load_on(artifact_dir: &Path, device: Device) -> Result<Self> {
        let started = Instant::now();
        if !artifact_dir.is_dir() {
            return Err(load_error(artifact_dir, "artifact directory does not exist"));
        }

        let config =
            Wav2Vec2Config::from_file(&artifact_dir.join(defaults::MODEL_CONFIG_FILENAME))?;
        let processor =
            ProcessorConfig::from_file(&artifact_dir.join(defaults::PROCESSOR_CONFIG_FILENAME))?;

        let (weights_path, vb) = weights_builder(artifact_dir, &device)?;
        let model = LieDetectionModel::load(&config, vb)
            .map_err(|e| load_error(&weights_path, &format!("Failed to build model: {e}")))?;

        let name = format!(
            "{} ({} layers, hidden {})",
            artifact_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "liewave".to_string()),
            config.num_hidden_layers,
            config.hidden_size
        );

        info!(
            "Loaded {} from {} on {} in {:?}",
            name,
            weights_path.display(),
            device_name(&device),
            started.elapsed()
        );

        let forward_lock = (!device.is_cpu()).then(|| Mutex::new(()));
        Ok(Self {
            model,
            device,
            processor,
            name,
            artifact_dir: artifact_dir.to_path_buf(),
            forward_lock,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn processor(&self) -> &ProcessorConfig {
        &self.processor
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Feature extractor configured with this model's processor settings.
    pub fn feature_extractor(&self) -> FeatureExtractor {
        FeatureExtractor::new(self.processor.clone())
    }

    fn forward_probabilities(&self, values: &[f32]) -> candle_core::Result<Vec<f32>> {
        let input = Tensor::from_slice(values, (1, values.len()), &self.device)?;
        let logits = self.model.forward(&input)?;
        let probabilities = candle_nn::ops::softmax_last_dim(&logits)?;
        probabilities.squeeze(0)?.to_dtype(DType::F32)?.to_vec1()
    }
}

impl Classifier for ModelHandle {
    fn classify(&self, features: &FeatureTensor) -> Result<PredictionResult> {
        if features.sample_rate() != defaults::MODEL_SAMPLE_RATE {
            return Err(LiewaveError::Inference {
                message: format!(
                    "features are at {} Hz, model expects {} Hz",
                    features.sample_rate(),
                    defaults::MODEL_SAMPLE_RATE
                ),
            });
        }
        let min = self.model.min_input_samples();
        if features.len() < min {
            return Err(LiewaveError::Inference {
                message: format!(
                    "recording too short: {} samples, model needs at least {}",
                    features.len(),
                    min
                ),
            });
        }

        let started = Instant::now();
        let probabilities = {
            let _guard = self
                .forward_lock
                .as_ref()
                .map(|lock| lock.lock().unwrap_or_else(|e| e.into_inner()));
            self.forward_probabilities(features.values())
        }
        .map_err(|e| LiewaveError::Inference {
            message: e.to_string(),
        })?;

        if probabilities.len() != self.model.num_labels() {
            return Err(LiewaveError::Inference {
                message: format!(
                    "expected {} class scores, got {}",
                    self.model.num_labels(),
                    probabilities.len()
                ),
            });
        }

        let result = decide(&probabilities)?;
        debug!(
            "Forward pass over {:.2}s of audio took {:?}: {:?}",
            features.duration_secs(),
            started.elapsed(),
            probabilities
        );
        Ok(result)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn load_error(path: &Path, message: &str) -> LiewaveError {
    LiewaveError::ModelLoad {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

/// Open the weights file: safetensors when present, else a PyTorch state dict.
fn weights_builder(dir: &Path, device: &Device) -> Result<(PathBuf, VarBuilder<'static>)> {
    let safetensors = dir.join(defaults::WEIGHTS_SAFETENSORS_FILENAME);
    if safetensors.is_file() {
        // SAFETY: the file is mapped read-only; artifacts are not rewritten while the daemon runs.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&safetensors], DType::F32, device)
        }
        .map_err(|e| load_error(&safetensors, &format!("Failed to map weights: {e}")))?;
        return Ok((safetensors, vb));
    }

    let pth = dir.join(defaults::WEIGHTS_PTH_FILENAME);
    if pth.is_file() {
        let vb = VarBuilder::from_pth(&pth, DType::F32, device)
            .map_err(|e| load_error(&pth, &format!("Failed to read state dict: {e}")))?;
        return Ok((pth, vb));
    }

    Err(load_error(
        dir,
        &format!(
            "no weights found (expected {} or {})",
            defaults::WEIGHTS_SAFETENSORS_FILENAME,
            defaults::WEIGHTS_PTH_FILENAME
        ),
    ))
}

/// Single-initialization holder for the process model.
pub struct ModelRuntime<H = ModelHandle> {
    handle: OnceCell<Arc<H>>,
    loading: AtomicBool,
    loads: AtomicUsize,
}

impl<H> Default for ModelRuntime<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> ModelRuntime<H> {
    pub const fn new() -> Self {
        Self {
            handle: OnceCell::new(),
            loading: AtomicBool::new(false),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> ModelState {
        // Read the flag first: it is only cleared after the handle is set.
        let loading = self.loading.load(Ordering::Acquire);
        if self.handle.get().is_some() {
            ModelState::Ready
        } else if loading {
            ModelState::Loading
        } else {
            ModelState::Uninitialized
        }
    }

    pub fn handle(&self) -> Option<Arc<H>> {
        self.handle.get().cloned()
    }

    /// Number of times a loader has actually run.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Acquire)
    }

    /// Run `loader` unless a handle already exists.
    ///
    /// Callers arriving while a load is in flight block until it finishes.
    pub fn initialize_with<F>(&self, loader: F) -> Result<Arc<H>>
    where
        F: FnOnce() -> Result<H>,
    {
        if let Some(handle) = self.handle.get() {
            return Ok(Arc::clone(handle));
        }
        let handle = self.handle.get_or_try_init(|| {
            self.loading.store(true, Ordering::Release);
            self.loads.fetch_add(1, Ordering::AcqRel);
            let result = loader().map(Arc::new);
            if result.is_err() {
                self.loading.store(false, Ordering::Release);
            }
            result
        })?;
        // Cleared only once the cell holds the handle, so `state()` goes
        // straight from Loading to Ready.
        self.loading.store(false, Ordering::Release);
        Ok(Arc::clone(handle))
    }
}

impl ModelRuntime<ModelHandle> {
    /// Process-wide runtime used by the daemon.
    pub fn global() -> &'static ModelRuntime {
        static GLOBAL: ModelRuntime = ModelRuntime::new();
        &GLOBAL
    }

    /// Load the artifact at `artifact_dir` once.
    ///
    /// After a successful load, later calls return the existing handle even
    /// when they name a different directory.
    pub fn initialize(&self, artifact_dir: &Path) -> Result<Arc<ModelHandle>> {
        if let Some(handle) = self.handle.get() {
            if handle.artifact_dir() != artifact_dir {
                warn!(
                    "Model already loaded from {}, ignoring {}",
                    handle.artifact_dir().display(),
                    artifact_dir.display()
                );
            }
            return Ok(Arc::clone(handle));
        }
        self.initialize_with(|| ModelHandle::load(artifact_dir))
    }
}

/// Classifier returning a fixed answer, for tests and dry runs.
#[derive(Debug)]
pub struct MockClassifier {
    name: String,
    result: Option<PredictionResult>,
    calls: AtomicUsize,
}

impl MockClassifier {
    pub fn new(result: PredictionResult) -> Self {
        Self {
            name: "mock-classifier".to_string(),
            result: Some(result),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every call fails with an inference error.
    pub fn failing() -> Self {
        Self {
            name: "mock-classifier".to_string(),
            result: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

impl Classifier for MockClassifier {
    fn classify(&self, _features: &FeatureTensor) -> Result<PredictionResult> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        self.result.ok_or_else(|| LiewaveError::Inference {
            message: "mock inference failure".to_string(),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
