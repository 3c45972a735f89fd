//! Whole-buffer sample rate conversion using rubato.
//!
//! Every call builds a fresh resampler with fixed parameters and runs the
//! whole signal through it in one pass, so identical input always produces
//! bit-identical output.

use crate::error::{LiewaveError, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

/// Upper bound on flush passes when draining the filter tail.
const MAX_FLUSH_PASSES: usize = 4;

fn sinc_parameters() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

/// Resample planar channels from `from_rate` to `to_rate`.
///
/// The output has exactly `ceil(frames * to_rate / from_rate)` frames per
/// channel. `SincFixedIn` starts its interpolation window half a filter
/// length early, so output frame 0 already lines up with input frame 0; only
/// the tail still sitting in the filter needs flushing.
pub fn resample(channels: &[Vec<f32>], from_rate: u32, to_rate: u32) -> Result<Vec<Vec<f32>>> {
    if from_rate == to_rate {
        return Ok(channels.to_vec());
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(LiewaveError::UnsupportedAudio {
            message: format!("cannot resample between {from_rate} Hz and {to_rate} Hz"),
        });
    }

    let frames = channels.first().map_or(0, Vec::len);
    if frames == 0 {
        return Ok(vec![Vec::new(); channels.len()]);
    }

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let expected = (frames as u64 * u64::from(to_rate)).div_ceil(u64::from(from_rate)) as usize;

    debug!(
        "Resampling {} frames from {}Hz to {}Hz ({} channels)",
        frames,
        from_rate,
        to_rate,
        channels.len()
    );

    let mut resampler =
        SincFixedIn::<f32>::new(ratio, 1.0, sinc_parameters(), frames, channels.len())
            .map_err(|e| resample_error(&format!("Failed to create resampler: {e}")))?;

    let mut output = resampler
        .process(channels, None)
        .map_err(|e| resample_error(&format!("Resampling failed: {e}")))?;

    // The last frames need look-ahead past the end; push silence through to get them out.
    for _ in 0..MAX_FLUSH_PASSES {
        if output[0].len() >= expected {
            break;
        }
        let tail = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| resample_error(&format!("Resampler flush failed: {e}")))?;
        if tail[0].is_empty() {
            break;
        }
        for (channel, rest) in output.iter_mut().zip(tail) {
            channel.extend(rest);
        }
    }

    for channel in &mut output {
        channel.resize(expected, 0.0);
    }

    Ok(output)
}

fn resample_error(message: &str) -> LiewaveError {
    LiewaveError::UnsupportedAudio {
        message: message.to_string(),
    }
}
