//! WAV file decoding for the offline analyzer and test fixtures.
//!
//! Interleaved multi-channel input is downmixed to mono by averaging.

use std::path::Path;

use crate::error::{Result, SonitusError};

/// Read a WAV file as mono f32 samples in [-1.0, 1.0].
///
/// Supports float WAVs and 8–32-bit integer WAVs. Returns the samples and
/// the file's sample rate.
///
/// # Errors
/// Returns `SonitusError::WavDecode` for unreadable or malformed files.
pub fn read_mono_f32(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| SonitusError::WavDecode(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(|e| SonitusError::WavDecode(e.to_string())))
            .collect::<Result<Vec<_>>>()?,
        hound::SampleFormat::Int => {
            if spec.bits_per_sample <= 16 {
                reader
                    .samples::<i16>()
                    .map(|s| {
                        s.map(|v| (v as f32) / (i16::MAX as f32))
                            .map_err(|e| SonitusError::WavDecode(e.to_string()))
                    })
                    .collect::<Result<Vec<_>>>()?
            } else {
                let max = ((1_i64 << (spec.bits_per_sample - 1)) - 1) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| {
                        s.map(|v| (v as f32) / max)
                            .map_err(|e| SonitusError::WavDecode(e.to_string()))
                    })
                    .collect::<Result<Vec<_>>>()?
            }
        }
    };

    if channels == 1 {
        return Ok((interleaved, spec.sample_rate));
    }

    let frames = interleaved.len() / channels;
    let mut mono = Vec::with_capacity(frames);
    for frame in 0..frames {
        let base = frame * channels;
        let sum: f32 = interleaved[base..base + channels].iter().sum();
        mono.push(sum / channels as f32);
    }
    Ok((mono, spec.sample_rate))
}
