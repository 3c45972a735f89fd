//! Decoding of canonical WAV bytes into a planar floating-point waveform.

use crate::error::{LiewaveError, Result};
use std::borrow::Cow;
use std::io::Cursor;

/// Planar audio buffer (channels × samples) with its sample rate.
///
/// Integer PCM is scaled into `[-1.0, 1.0)` by `2^(bits - 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl Waveform {
    /// Build a waveform, enforcing rate > 0, at least one channel, equal channel lengths.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(unsupported("sample rate is zero"));
        }
        let Some(first) = channels.first() else {
            return Err(unsupported("no audio channels"));
        };
        let frames = first.len();
        if channels.iter().any(|c| c.len() != frames) {
            return Err(unsupported("channels have different lengths"));
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// Parse a RIFF/WAVE container.
    ///
    /// Accepts the open-ended headers a decoder writes when its output is a
    /// pipe (RIFF and data sizes left at `0xFFFFFFFF`).
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes = clamp_streamed_sizes(bytes);
        let mut reader = hound::WavReader::new(Cursor::new(bytes.as_ref()))
            .map_err(|e| unsupported(&format!("Failed to parse WAV container: {e}")))?;

        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(unsupported("WAV header declares zero channels"));
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => {
                if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                    return Err(unsupported(&format!(
                        "unsupported bit depth {}",
                        spec.bits_per_sample
                    )));
                }
                let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<f32>, _>>()
            }
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<f32>, _>>(),
        }
        .map_err(|e| unsupported(&format!("Failed to read WAV samples: {e}")))?;

        let channel_count = usize::from(spec.channels);
        let frames = interleaved.len() / channel_count;
        if frames == 0 {
            return Err(unsupported("WAV contains no audio frames"));
        }

        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in interleaved.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }

        Self::new(channels, spec.sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn duration_secs(&self) -> f64 {
        self.num_frames() as f64 / f64::from(self.sample_rate)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }
}

fn unsupported(message: &str) -> LiewaveError {
    LiewaveError::UnsupportedAudio {
        message: message.to_string(),
    }
}

/// Clamp RIFF and `data` chunk sizes that run past the end of the buffer.
///
/// Returns the input untouched when nothing needs fixing or when it is not a
/// RIFF/WAVE container at all (the parser reports that case).
fn clamp_streamed_sizes(bytes: &[u8]) -> Cow<'_, [u8]> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Cow::Borrowed(bytes);
    }

    let mut patched: Option<Vec<u8>> = None;
    let riff_size = read_u32(bytes, 4);
    let riff_available = (bytes.len() - 8) as u32;
    if riff_size > riff_available {
        write_u32(patched.get_or_insert_with(|| bytes.to_vec()), 4, riff_available);
    }

    let mut pos = 12usize;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = read_u32(bytes, pos + 4) as usize;
        let available = bytes.len() - pos - 8;
        if id == b"data" {
            if size > available {
                write_u32(
                    patched.get_or_insert_with(|| bytes.to_vec()),
                    pos + 4,
                    available as u32,
                );
            }
            break;
        }
        if size > available {
            break;
        }
        // Chunks are word aligned
        pos += 8 + size + (size & 1);
    }

    match patched {
        Some(buf) => Cow::Owned(buf),
        None => Cow::Borrowed(bytes),
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
