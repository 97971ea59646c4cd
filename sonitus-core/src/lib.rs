//! # sonitus-core
//!
//! Reusable audio presence & sound-source detection engine SDK.
//!
//! ## Architecture
//!
//! ```text
//! Document (JSON) → ComponentRegistry (validate + wire)
//!                          │
//!                    AudioDetector ⟶ microphone id
//!                          │
//! Microphone → MicCapture → SPSC RingBuffer → Pipeline(spawn_blocking)
//!                                                  │
//!                                     presence decision (per chunk)
//!                                                  │
//!                                     spectrum frame (per fft_size)
//!                                      loudness · peak bin · sources
//!                                                  │
//!                                      broadcast::Sender<events>
//! ```
//!
//! The audio callback is zero-alloc. All heap work happens in the pipeline thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod events;
pub mod metrics;
pub mod registry;
pub mod spectrum;

// Convenience re-exports for downstream crates
pub use config::{DetectorConfig, Document, SourceConfig};
pub use detect::{LevelDetector, Presence, PresenceDetector, SourceMatcher};
pub use engine::DetectorEngine;
pub use error::SonitusError;
pub use events::{
    ActivityEvent, EngineStatus, EngineStatusEvent, SourceEvent, SpectrumEvent,
};
pub use metrics::{LoudnessMetrics, MetricsSnapshot};
pub use registry::{AudioDetector, ComponentRegistry, MicrophoneHandle};
pub use spectrum::{SpectrumAnalyzer, SpectrumFrame, OCTAVES};
