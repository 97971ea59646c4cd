//! Audio capture via cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not**:
//! - Allocate heap memory (beyond the reused mixdown scratch buffer)
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! This module satisfies that contract by writing directly into an SPSC ring
//! buffer producer whose `push_slice` is lock-free and allocation-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `MicCapture` therefore must be created and dropped on the same
//! thread. The engine accomplishes this by opening the device inside
//! `spawn_blocking`.

pub mod device;
pub mod resample;
pub mod wav;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use crate::{
    buffering::{AudioProducer, Producer},
    error::{Result, SonitusError},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Handle to an active microphone capture stream.
///
/// **Not `Send`** — `cpal::Stream` is bound to its creation thread on
/// Windows/macOS. Create and drop this type on the same OS thread.
pub struct MicCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Shared flag — set to `false` to signal the callback to no-op.
    running: Arc<AtomicBool>,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

/// Downmix an interleaved frame buffer to mono into `out`.
///
/// `convert` maps one raw sample to f32 in [-1, 1].
#[cfg(feature = "audio-cpal")]
fn mix_to_mono<T: Copy>(data: &[T], channels: usize, out: &mut Vec<f32>, convert: impl Fn(T) -> f32) {
    let frames = data.len() / channels;
    out.resize(frames, 0.0);
    if channels == 1 {
        for (dst, sample) in out.iter_mut().zip(data.iter()) {
            *dst = convert(*sample);
        }
        return;
    }
    for (frame, dst) in out.iter_mut().enumerate() {
        let base = frame * channels;
        let mut sum = 0f32;
        for c in 0..channels {
            sum += convert(data[base + c]);
        }
        *dst = sum / channels as f32;
    }
}

impl MicCapture {
    /// Open an input device by preferred name, otherwise fall back to the
    /// default input device and then the first available device.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = preferred_device_name {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });

                    if selected_device.is_none() {
                        warn!(
                            "preferred input device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => {
                    warn!("failed to list input devices while resolving preference: {e}");
                }
            }
        }

        let device = if let Some(device) = selected_device {
            device
        } else if let Some(default) = host.default_input_device() {
            default
        } else {
            let mut devices = host
                .input_devices()
                .map_err(|e| SonitusError::AudioDevice(e.to_string()))?;
            let fallback = devices.next().ok_or(SonitusError::NoDefaultInputDevice)?;
            warn!("no default input device, falling back to first available input");
            fallback
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| SonitusError::AudioDevice(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();

        info!(sample_rate, channels, "audio config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ch = channels as usize;

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let running = Arc::clone(&running);
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        mix_to_mono(data, ch, &mut mix_buf, |s| s);
                        let written = producer.push_slice(&mix_buf);
                        if written < mix_buf.len() {
                            warn!("ring buffer full: dropped {} frames", mix_buf.len() - written);
                        }
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            SampleFormat::I16 => {
                let running = Arc::clone(&running);
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        mix_to_mono(data, ch, &mut mix_buf, |s| s as f32 / 32768.0);
                        let written = producer.push_slice(&mix_buf);
                        if written < mix_buf.len() {
                            warn!("ring buffer full: dropped {} frames", mix_buf.len() - written);
                        }
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            SampleFormat::U8 => {
                let running = Arc::clone(&running);
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[u8], _info| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        mix_to_mono(data, ch, &mut mix_buf, |s| (s as f32 - 128.0) / 128.0);
                        let written = producer.push_slice(&mix_buf);
                        if written < mix_buf.len() {
                            warn!("ring buffer full: dropped {} frames", mix_buf.len() - written);
                        }
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            fmt => {
                return Err(SonitusError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| SonitusError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| SonitusError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Open the system default microphone and push f32 PCM frames into `producer`.
    ///
    /// Must be called from the thread that will also drop this value.
    /// In practice this means calling it inside `tokio::task::spawn_blocking`.
    ///
    /// # Errors
    /// Returns `SonitusError::NoDefaultInputDevice` when no microphone is
    /// available, or `SonitusError::AudioStream` if cpal fails to build the
    /// stream.
    #[cfg(feature = "audio-cpal")]
    pub fn open_default(producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(producer, running, None)
    }

    /// Stop: signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl MicCapture {
    pub fn open_with_preference(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(SonitusError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn open_default(producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(producer, running, None)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}
