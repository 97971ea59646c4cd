//! `DetectorEngine` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! DetectorEngine::new(detector, microphone)   → status = Idle
//!     └─► start()    → audio open, pipeline spawned, status = Listening
//!         └─► stop() → running=false, stream dropped, status = Stopped
//! ```
//!
//! `start()`/`stop()` are idempotent: calling them in the wrong state returns
//! an error rather than panicking.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread
//! affinity). `MicCapture` is therefore created *inside* the `spawn_blocking`
//! closure so it never crosses a thread boundary. A bounded rendezvous
//! channel propagates any open-device errors back to the `start()` caller.

pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    audio::MicCapture,
    buffering::create_audio_ring,
    config::DetectorConfig,
    detect::{LevelDetector, PresenceDetector},
    error::{Result, SonitusError},
    events::{ActivityEvent, EngineStatus, EngineStatusEvent, SourceEvent, SpectrumEvent},
    metrics::{LoudnessMetrics, MetricsSnapshot},
    registry::{AudioDetector, MicrophoneHandle},
};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// The runtime for one registered detector.
///
/// `DetectorEngine` is `Send + Sync` — all fields use interior mutability.
/// Wrap in `Arc<DetectorEngine>` to share between the host and
/// event-forwarding async tasks.
#[derive(Debug)]
pub struct DetectorEngine {
    detector_id: String,
    microphone_id: String,
    /// Preferred OS device of the bound microphone.
    device: Option<String>,
    config: DetectorConfig,
    /// `true` while capture + pipeline are active.
    running: Arc<AtomicBool>,
    /// Canonical status (written atomically via Mutex, read from hosts).
    status: Arc<Mutex<EngineStatus>>,
    activity_tx: broadcast::Sender<ActivityEvent>,
    spectrum_tx: broadcast::Sender<SpectrumEvent>,
    source_tx: broadcast::Sender<SourceEvent>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    /// Monotonically increasing event sequence counter.
    seq: Arc<AtomicU64>,
    /// Shared loudness metrics, updated by the pipeline.
    metrics: Arc<Mutex<LoudnessMetrics>>,
    /// Shared pipeline diagnostics counters.
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
}

impl DetectorEngine {
    /// Create an engine for a registered detector and the microphone it is
    /// bound to. Does not start capturing — call `start()`.
    ///
    /// # Errors
    /// - `SonitusError::UnboundMicrophone` if the detector was never bound.
    /// - `SonitusError::InvalidDetector` if it is bound to a different
    ///   microphone than the handle passed in.
    pub fn new(detector: &AudioDetector, microphone: &MicrophoneHandle) -> Result<Self> {
        match detector.microphone() {
            None => {
                return Err(SonitusError::UnboundMicrophone {
                    detector: detector.id().to_string(),
                })
            }
            Some(bound) if bound != microphone.id() => {
                return Err(SonitusError::InvalidDetector {
                    detector: detector.id().to_string(),
                    reason: format!(
                        "bound to microphone `{bound}` but given `{}`",
                        microphone.id()
                    ),
                })
            }
            Some(_) => {}
        }

        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (spectrum_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (source_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);

        Ok(Self {
            detector_id: detector.id().to_string(),
            microphone_id: microphone.id().to_string(),
            device: microphone.device().map(ToOwned::to_owned),
            config: detector.config().clone(),
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            activity_tx,
            spectrum_tx,
            source_tx,
            status_tx,
            seq: Arc::new(AtomicU64::new(0)),
            metrics: Arc::new(Mutex::new(LoudnessMetrics::new())),
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
        })
    }

    pub fn detector_id(&self) -> &str {
        &self.detector_id
    }

    /// Identifier of the microphone this engine listens to.
    pub fn microphone_id(&self) -> &str {
        &self.microphone_id
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Start audio capture and the pipeline.
    ///
    /// Blocks until the audio device is confirmed open (or fails), then
    /// returns. The pipeline continues running in a background blocking
    /// thread.
    ///
    /// # Errors
    /// - `SonitusError::AlreadyRunning` if already started.
    /// - `SonitusError::NoDefaultInputDevice` / `SonitusError::AudioStream`
    ///   on device error.
    pub fn start(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(SonitusError::AlreadyRunning);
        }

        self.diagnostics.reset();
        self.running.store(true, Ordering::SeqCst);
        self.set_status(EngineStatus::Listening, None);

        let (producer, consumer) = create_audio_ring();

        // Clone all Arc-wrapped state before moving into the closure.
        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        let activity_tx = self.activity_tx.clone();
        let spectrum_tx = self.spectrum_tx.clone();
        let source_tx = self.source_tx.clone();
        let seq = Arc::clone(&self.seq);
        let metrics = Arc::clone(&self.metrics);
        let diagnostics = Arc::clone(&self.diagnostics);
        let preferred_device = self.device.clone();

        // Rendezvous: pipeline thread signals open success/failure to start().
        // Carries the actual capture sample rate on success.
        let (open_tx, open_rx) = crossbeam_channel::bounded::<Result<u32>>(1);

        tokio::task::spawn_blocking(move || {
            // ── Open audio device (must happen on THIS thread — cpal::Stream is !Send) ──
            let capture = match MicCapture::open_with_preference(
                producer,
                Arc::clone(&running),
                preferred_device.as_deref(),
            ) {
                Ok(c) => {
                    let _ = open_tx.send(Ok(c.sample_rate));
                    c
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let capture_sample_rate = capture.sample_rate;

            let detector: Box<dyn PresenceDetector> = Box::new(LevelDetector::new(
                config.presence_threshold,
                config.hangover_chunks,
            ));

            // ── Run pipeline ──────────────────────────────────────────────
            pipeline::run(pipeline::PipelineContext {
                config,
                detector,
                consumer,
                running,
                activity_tx,
                spectrum_tx,
                source_tx,
                seq,
                capture_sample_rate,
                metrics,
                diagnostics,
            });

            // Stream drops here, releasing the audio device on this thread.
            drop(capture);
        });

        // Block start() until device open is confirmed (receives actual sample rate).
        match open_rx.recv() {
            Ok(Ok(_rate)) => {
                info!(
                    detector = %self.detector_id,
                    microphone = %self.microphone_id,
                    "engine started — listening"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent — spawn_blocking panicked?
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some("pipeline failed to start".into()));
                Err(SonitusError::Other(anyhow::anyhow!(
                    "pipeline task died unexpectedly"
                )))
            }
        }
    }

    /// Stop audio capture and the pipeline.
    ///
    /// # Errors
    /// - `SonitusError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(SonitusError::NotRunning);
        }

        self.running.store(false, Ordering::SeqCst);
        self.set_status(EngineStatus::Stopped, None);
        info!(detector = %self.detector_id, "engine stop requested");
        Ok(())
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    /// Subscribe to per-chunk activity events (RMS + presence).
    pub fn subscribe_activity(&self) -> broadcast::Receiver<ActivityEvent> {
        self.activity_tx.subscribe()
    }

    /// Subscribe to per-frame spectrum events.
    pub fn subscribe_spectrum(&self) -> broadcast::Receiver<SpectrumEvent> {
        self.spectrum_tx.subscribe()
    }

    /// Subscribe to per-frame sound-source events.
    pub fn subscribe_sources(&self) -> broadcast::Receiver<SourceEvent> {
        self.source_tx.subscribe()
    }

    /// Subscribe to engine status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of the running loudness metrics.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.lock().snapshot()
    }

    /// Restart loudness metrics tracking.
    pub fn clear_metrics(&self) {
        self.metrics.lock().clear();
        info!(detector = %self.detector_id, "loudness metrics cleared");
    }

    /// Snapshot of pipeline counters for observability.
    pub fn diagnostics_snapshot(&self) -> pipeline::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}
