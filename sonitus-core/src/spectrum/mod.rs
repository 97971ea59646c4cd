//! Octave-band spectrum analysis.
//!
//! Each analysis frame is windowed with a flat-top window (optimal for energy
//! measurements), transformed with a forward FFT, and reduced to:
//!
//! - per-octave energy over nine bands (skipping the DC bin, octave *o* sums
//!   `2^o` consecutive bins: bin 1; bins 2–3; 4–7; … 256–511),
//! - A-weighted loudness in dB over those bands,
//! - the energy-maximal ("peak") bin index, refined by parabolic
//!   interpolation over its neighbours.
//!
//! Frequencies are handled in bin units throughout — a source declares the
//! bin it expects the peak in, and one bin spans
//! `analysis_sample_rate / fft_size` Hz.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::config::MIN_FFT_SIZE;
use crate::error::{Result, SonitusError};

/// Number of octave bands.
pub const OCTAVES: usize = 9;

/// A-weighting per octave band, 31.5 Hz … 8 kHz, in dB.
pub const A_WEIGHTING_DB: [f32; OCTAVES] = [-39.4, -26.2, -16.1, -8.6, -3.2, 0.0, 1.2, 1.0, -1.1];

/// Energy floor substituted before log conversion (≈ -120 dB).
const ENERGY_FLOOR: f32 = 1e-12;

/// Flat-top window coefficients (3-term).
const FLAT_TOP: [f32; 3] = [0.281_063_9, 0.520_897_2, 0.198_039_9];

/// `10·log10(v)` — caller guards against `v <= 0`.
pub fn decibel(v: f32) -> f32 {
    10.0 * v.log10()
}

/// Center frequency of `bin` in Hz for a given analysis configuration.
pub fn bin_hz(bin: u32, sample_rate: u32, fft_size: usize) -> f32 {
    bin as f32 * sample_rate as f32 / fft_size as f32
}

/// Result of analyzing one frame.
#[derive(Debug, Clone)]
pub struct SpectrumFrame {
    /// Interpolated energy-maximal bin, floored to an integer index.
    pub peak_bin: u32,
    /// A-weighted loudness in dB. `None` for an all-zero frame.
    pub loudness_db: Option<f32>,
    /// Per-octave energy in dB (floored at ≈ -120 dB).
    pub octave_db: [f32; OCTAVES],
    /// Per-octave linear energy.
    pub octave_energy: [f32; OCTAVES],
}

/// Reusable FFT session for fixed-size analysis frames.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    fft_size: usize,
    /// FFT scratch, reused across frames.
    buf: Vec<Complex<f32>>,
    /// Per-bin energy over the half spectrum, reused across frames.
    energy: Vec<f32>,
}

impl SpectrumAnalyzer {
    /// Create an analyzer for frames of `fft_size` samples.
    ///
    /// # Errors
    /// `SonitusError::InvalidFftSize` unless `fft_size` is a power of two of
    /// at least [`MIN_FFT_SIZE`] (the octave bands need 512 usable bins).
    pub fn new(fft_size: usize) -> Result<Self> {
        if !fft_size.is_power_of_two() || fft_size < MIN_FFT_SIZE {
            return Err(SonitusError::InvalidFftSize {
                size: fft_size,
                min: MIN_FFT_SIZE,
            });
        }

        let fft = Arc::from(FftPlanner::<f32>::new().plan_fft_forward(fft_size));
        let window = build_flat_top_window(fft_size);

        Ok(Self {
            fft,
            window,
            fft_size,
            buf: vec![Complex::new(0.0, 0.0); fft_size],
            energy: vec![0.0; fft_size / 2],
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Analyze one frame of samples.
    ///
    /// `samples` shorter than the frame length are zero-padded; extra samples
    /// are ignored. The pipeline always hands in exact frames.
    pub fn analyze(&mut self, samples: &[f32]) -> SpectrumFrame {
        for (i, slot) in self.buf.iter_mut().enumerate() {
            let s = samples.get(i).copied().unwrap_or(0.0);
            *slot = Complex::new(s * self.window[i], 0.0);
        }
        self.fft.process(&mut self.buf);

        for (bin, slot) in self.energy.iter_mut().enumerate() {
            *slot = self.buf[bin].norm_sqr();
        }

        let octave_energy = sum_octave_energy(&self.energy);

        let mut octave_db = [0.0f32; OCTAVES];
        let mut weighted_sum = 0.0f32;
        for (o, &energy) in octave_energy.iter().enumerate() {
            weighted_sum += energy * 10f32.powf(A_WEIGHTING_DB[o] / 10.0);
            octave_db[o] = decibel(energy.max(ENERGY_FLOOR));
        }

        let loudness_db = (weighted_sum > 0.0).then(|| decibel(weighted_sum));
        let peak_bin = interpolated_peak_bin(&self.energy);

        SpectrumFrame {
            peak_bin,
            loudness_db,
            octave_db,
            octave_energy,
        }
    }
}

fn build_flat_top_window(len: usize) -> Vec<f32> {
    let n_minus_1 = (len - 1) as f32;
    (0..len)
        .map(|n| {
            let x = 2.0 * std::f32::consts::PI * n as f32 / n_minus_1;
            FLAT_TOP[0] - FLAT_TOP[1] * x.cos() + FLAT_TOP[2] * (2.0 * x).cos()
        })
        .collect()
}

/// Sum bin energies into octave bands, skipping the DC bin.
fn sum_octave_energy(energy: &[f32]) -> [f32; OCTAVES] {
    let mut octaves = [0.0f32; OCTAVES];
    let mut bin = 1usize;
    let mut band_width = 1usize;
    for band in octaves.iter_mut() {
        *band = energy[bin..bin + band_width].iter().sum();
        bin += band_width;
        band_width *= 2;
    }
    octaves
}

/// Energy-maximal bin over `1 .. half_spectrum - 1`, refined by parabolic
/// interpolation and floored to an integer index.
fn interpolated_peak_bin(energy: &[f32]) -> u32 {
    let mut peak = 1usize;
    for bin in 1..energy.len() - 1 {
        if energy[bin] > energy[peak] {
            peak = bin;
        }
    }

    let prev = energy[peak - 1];
    let here = energy[peak];
    let next = energy[peak + 1];
    let denom = prev - 2.0 * here + next;
    let delta = if denom.abs() > f32::EPSILON {
        (0.5 * (prev - next) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };

    (peak as f32 + delta).floor().max(0.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine_frame(bin: usize, amplitude: f32, fft_size: usize) -> Vec<f32> {
        (0..fft_size)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * bin as f32 * i as f32 / fft_size as f32).sin()
            })
            .collect()
    }

    #[test]
    fn rejects_bad_frame_sizes() {
        assert!(SpectrumAnalyzer::new(1000).is_err());
        assert!(SpectrumAnalyzer::new(512).is_err());
        assert!(SpectrumAnalyzer::new(1024).is_ok());
        assert!(SpectrumAnalyzer::new(2048).is_ok());
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let mut analyzer = SpectrumAnalyzer::new(1024).unwrap();
        let frame = analyzer.analyze(&sine_frame(54, 0.5, 1024));
        // Interpolation flooring may land one bin low; source matching
        // accepts bin and bin+1 for exactly this reason.
        assert!(
            frame.peak_bin == 54 || frame.peak_bin == 53,
            "peak_bin = {}",
            frame.peak_bin
        );
    }

    #[test]
    fn sine_energy_lands_in_the_right_octave() {
        let mut analyzer = SpectrumAnalyzer::new(1024).unwrap();
        // Bin 54 lies in octave 5 (bins 32..63).
        let frame = analyzer.analyze(&sine_frame(54, 0.5, 1024));
        let loudest = frame
            .octave_energy
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(o, _)| o)
            .unwrap();
        assert_eq!(loudest, 5);
    }

    #[test]
    fn loudness_grows_with_amplitude() {
        let mut analyzer = SpectrumAnalyzer::new(1024).unwrap();
        let quiet = analyzer
            .analyze(&sine_frame(100, 0.05, 1024))
            .loudness_db
            .unwrap();
        let loud = analyzer
            .analyze(&sine_frame(100, 0.5, 1024))
            .loudness_db
            .unwrap();
        assert!(loud > quiet, "loud={loud} quiet={quiet}");
        // 10x amplitude = 100x energy = +20 dB
        assert_relative_eq!(loud - quiet, 20.0, epsilon = 0.5);
    }

    #[test]
    fn silence_has_no_loudness() {
        let mut analyzer = SpectrumAnalyzer::new(1024).unwrap();
        let frame = analyzer.analyze(&vec![0.0f32; 1024]);
        assert!(frame.loudness_db.is_none());
        assert!(frame.octave_db.iter().all(|db| *db <= -110.0));
    }

    #[test]
    fn short_input_is_zero_padded() {
        let mut analyzer = SpectrumAnalyzer::new(1024).unwrap();
        let frame = analyzer.analyze(&[0.5f32; 16]);
        // Must not panic; produces some spectrum.
        assert!(frame.octave_energy.iter().any(|e| *e > 0.0));
    }

    #[test]
    fn bin_hz_maps_bins_to_frequencies() {
        assert_relative_eq!(bin_hz(54, 16_000, 1024), 843.75);
        assert_relative_eq!(bin_hz(0, 16_000, 1024), 0.0);
    }

    #[test]
    fn octave_bands_partition_the_low_half_spectrum() {
        // 1 + 2 + 4 + ... + 256 bins starting at bin 1 ends at bin 511.
        let energy: Vec<f32> = (0..512).map(|_| 1.0).collect();
        let octaves = sum_octave_energy(&energy);
        let total: f32 = octaves.iter().sum();
        assert_relative_eq!(total, 511.0);
        assert_relative_eq!(octaves[0], 1.0);
        assert_relative_eq!(octaves[8], 256.0);
    }
}
