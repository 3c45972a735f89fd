//! Conversion of arbitrary encoded audio into canonical WAV via an external decoder.
//!
//! The `Transcoder` trait keeps the orchestrator independent of ffmpeg so
//! tests can script the decoder's behavior.

use crate::config::DecoderConfig;
use crate::error::{LiewaveError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Longest stderr tail carried into a `DecodeError`.
const STDERR_TAIL_CHARS: usize = 500;

/// Turns encoded audio bytes into canonical WAV bytes.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, input: Vec<u8>) -> Result<Vec<u8>>;
}

#[async_trait]
impl<T: Transcoder + ?Sized> Transcoder for std::sync::Arc<T> {
    async fn transcode(&self, input: Vec<u8>) -> Result<Vec<u8>> {
        (**self).transcode(input).await
    }
}

/// ffmpeg subprocess reading from stdin and writing 16-bit PCM WAV to stdout.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: String,
    sample_rate: u32,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<String>, sample_rate: u32, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            sample_rate,
            timeout,
        }
    }

    pub fn from_config(config: &DecoderConfig) -> Self {
        Self::new(config.program.clone(), config.sample_rate, config.timeout())
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn args(&self) -> Vec<String> {
        [
            "-hide_banner",
            "-loglevel",
            "error",
            "-y",
            "-i",
            "pipe:0",
            "-f",
            "wav",
            "-acodec",
            "pcm_s16le",
            "-ar",
        ]
        .iter()
        .map(|s| s.to_string())
        .chain([self.sample_rate.to_string(), "pipe:1".to_string()])
        .collect()
    }

    /// Run `<program> -version` to confirm the decoder is installed.
    pub async fn probe(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| LiewaveError::DecodeTimeout {
                seconds: self.timeout.as_secs_f64(),
            })?
            .map_err(|e| decode_error(format!("Failed to run {}: {}", self.program, e)))?;
        if !output.status.success() {
            return Err(decode_error(format!(
                "{} -version exited with {}",
                self.program, output.status
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: Vec<u8>) -> Result<Vec<u8>> {
        let started = Instant::now();
        let input_len = input.len();

        let mut child = Command::new(&self.program)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| decode_error(format!("Failed to spawn {}: {}", self.program, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| decode_error("decoder stdin was not captured".to_string()))?;

        // Writer runs apart from the reader so a full stdout pipe cannot stall it.
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&input).await;
            drop(stdin);
            result
        });

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output,
            Err(_) => {
                writer.abort();
                warn!(
                    "{} did not finish within {:.1}s, killed",
                    self.program,
                    self.timeout.as_secs_f64()
                );
                return Err(LiewaveError::DecodeTimeout {
                    seconds: self.timeout.as_secs_f64(),
                });
            }
        };
        let output =
            output.map_err(|e| decode_error(format!("Failed to wait for {}: {}", self.program, e)))?;

        match writer.await {
            Ok(Ok(())) => {}
            // The decoder may stop reading early (bad header); its exit status tells the story.
            Ok(Err(e)) => debug!("Decoder closed stdin early: {}", e),
            Err(e) => debug!("Decoder stdin writer did not complete: {}", e),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(decode_error(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr_tail(&stderr)
            )));
        }
        if output.stdout.is_empty() {
            return Err(decode_error(format!("{} produced no output", self.program)));
        }

        debug!(
            "Transcoded {} bytes into {} bytes of WAV in {:?}",
            input_len,
            output.stdout.len(),
            started.elapsed()
        );
        Ok(output.stdout)
    }
}

fn decode_error(message: String) -> LiewaveError {
    LiewaveError::DecodeError { message }
}

fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_TAIL_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - STDERR_TAIL_CHARS).collect()
}

/// Transcoder returning canned results, for tests and offline runs.
///
/// Each call pops the next scripted result; once the script is exhausted the
/// fallback is used. Every input is recorded.
pub struct ScriptedTranscoder {
    script: std::sync::Mutex<std::collections::VecDeque<Result<Vec<u8>>>>,
    fallback: Option<Vec<u8>>,
    calls: std::sync::Mutex<Vec<Vec<u8>>>,
}

impl ScriptedTranscoder {
    /// Always answer with `wav`.
    pub fn returning(wav: Vec<u8>) -> Self {
        Self {
            script: std::sync::Mutex::new(Default::default()),
            fallback: Some(wav),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Answer with each result in turn, then fail.
    pub fn with_script(results: Vec<Result<Vec<u8>>>) -> Self {
        Self {
            script: std::sync::Mutex::new(results.into()),
            fallback: None,
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn inputs(&self) -> Vec<Vec<u8>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Transcoder for ScriptedTranscoder {
    async fn transcode(&self, input: Vec<u8>) -> Result<Vec<u8>> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(input);
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match (next, &self.fallback) {
            (Some(result), _) => result,
            (None, Some(wav)) => Ok(wav.clone()),
            (None, None) => Err(decode_error("transcoder script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_request_pcm_wav_on_stdout() {
        let transcoder = FfmpegTranscoder::new("ffmpeg", 44100, Duration::from_secs(30));
        let args = transcoder.args();
        assert_eq!(args[args.len() - 1], "pipe:1");
        assert_eq!(args[args.len() - 2], "44100");
        let joined = args.join(" ");
        assert!(joined.contains("-i pipe:0"));
        assert!(joined.contains("-f wav -acodec pcm_s16le"));
    }

    #[test]
    fn from_config_copies_decoder_settings() {
        let config = DecoderConfig {
            program: "/opt/ffmpeg/bin/ffmpeg".to_string(),
            sample_rate: 22050,
            timeout_ms: 5_000,
        };
        let transcoder = FfmpegTranscoder::from_config(&config);
        assert_eq!(transcoder.program(), "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(transcoder.timeout(), Duration::from_secs(5));
        assert!(transcoder.args().contains(&"22050".to_string()));
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let long = format!("{}END", "x".repeat(1000));
        let tail = stderr_tail(&long);
        assert_eq!(tail.chars().count(), STDERR_TAIL_CHARS);
        assert!(tail.ends_with("END"));
        assert_eq!(stderr_tail("  short\n"), "short");
    }

    #[tokio::test]
    async fn missing_program_is_decode_error() {
        let transcoder = FfmpegTranscoder::new(
            "/nonexistent/liewave-decoder",
            44100,
            Duration::from_secs(5),
        );
        let err = transcoder.transcode(vec![1, 2, 3]).await.unwrap_err();
        match err {
            LiewaveError::DecodeError { message } => assert!(message.contains("Failed to spawn")),
            other => panic!("Expected DecodeError, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_decode_error() {
        // `false` ignores its arguments and exits 1
        let transcoder = FfmpegTranscoder::new("false", 44100, Duration::from_secs(5));
        let err = transcoder.transcode(vec![0; 64]).await.unwrap_err();
        assert!(matches!(err, LiewaveError::DecodeError { .. }), "{err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn empty_output_is_decode_error() {
        // `true` exits 0 without writing anything
        let transcoder = FfmpegTranscoder::new("true", 44100, Duration::from_secs(5));
        let err = transcoder.transcode(vec![0; 64]).await.unwrap_err();
        match err {
            LiewaveError::DecodeError { message } => assert!(message.contains("no output")),
            other => panic!("Expected DecodeError, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_decoder_times_out_within_deadline() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("hang.sh");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let transcoder = FfmpegTranscoder::new(
            script.display().to_string(),
            44100,
            Duration::from_millis(300),
        );
        let started = Instant::now();
        let err = transcoder.transcode(vec![0; 16]).await.unwrap_err();

        assert!(matches!(err, LiewaveError::DecodeTimeout { .. }), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn scripted_transcoder_replays_results_in_order() {
        let transcoder = ScriptedTranscoder::with_script(vec![
            Ok(vec![1]),
            Err(decode_error("bad input".to_string())),
        ]);
        assert_eq!(transcoder.transcode(vec![9]).await.unwrap(), vec![1]);
        assert!(transcoder.transcode(vec![8]).await.is_err());
        assert!(transcoder.transcode(vec![7]).await.is_err());
        assert_eq!(transcoder.call_count(), 3);
        assert_eq!(transcoder.inputs()[0], vec![9]);
    }

    #[tokio::test]
    async fn returning_transcoder_repeats_its_output() {
        let transcoder = ScriptedTranscoder::returning(vec![4, 2]);
        for _ in 0..3 {
            assert_eq!(transcoder.transcode(Vec::new()).await.unwrap(), vec![4, 2]);
        }
    }
}
