//! Blocking pipeline loop.
//!
//! ## Pipeline stages (per iteration)
//!
//! ```text
//! 1. Drain ring buffer → Vec<f32> (one chunk per iteration)
//! 2. Resample to the analysis rate, build AudioChunk
//! 3. Presence classify → Present | Absent, broadcast ActivityEvent
//! 4. Accumulate samples into fft_size analysis frames
//! 5. Per full frame: spectrum analysis → SpectrumEvent,
//!    loudness metrics update, per-source matching → SourceEvent
//! ```
//!
//! This entire loop runs in `spawn_blocking`, keeping the Tokio async
//! executor free for the host's I/O.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::{
    audio::resample::RateConverter,
    buffering::{chunk::AudioChunk, AudioConsumer, Consumer},
    config::DetectorConfig,
    detect::{PresenceDetector, SourceMatcher},
    events::{ActivityEvent, SourceEvent, SpectrumEvent},
    metrics::LoudnessMetrics,
    spectrum::SpectrumAnalyzer,
};

#[derive(Debug)]
pub struct PipelineDiagnostics {
    pub samples_in: AtomicUsize,
    pub samples_resampled: AtomicUsize,
    pub chunks_classified: AtomicUsize,
    pub chunks_present: AtomicUsize,
    pub frames_analyzed: AtomicUsize,
    pub source_detections: AtomicUsize,
}

impl Default for PipelineDiagnostics {
    fn default() -> Self {
        Self {
            samples_in: AtomicUsize::new(0),
            samples_resampled: AtomicUsize::new(0),
            chunks_classified: AtomicUsize::new(0),
            chunks_present: AtomicUsize::new(0),
            frames_analyzed: AtomicUsize::new(0),
            source_detections: AtomicUsize::new(0),
        }
    }
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.samples_in.store(0, Ordering::Relaxed);
        self.samples_resampled.store(0, Ordering::Relaxed);
        self.chunks_classified.store(0, Ordering::Relaxed);
        self.chunks_present.store(0, Ordering::Relaxed);
        self.frames_analyzed.store(0, Ordering::Relaxed);
        self.source_detections.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            samples_resampled: self.samples_resampled.load(Ordering::Relaxed),
            chunks_classified: self.chunks_classified.load(Ordering::Relaxed),
            chunks_present: self.chunks_present.load(Ordering::Relaxed),
            frames_analyzed: self.frames_analyzed.load(Ordering::Relaxed),
            source_detections: self.source_detections.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub samples_in: usize,
    pub samples_resampled: usize,
    pub chunks_classified: usize,
    pub chunks_present: usize,
    pub frames_analyzed: usize,
    pub source_detections: usize,
}

/// All context the pipeline needs, passed as one struct so the closure stays tidy.
pub struct PipelineContext {
    pub config: DetectorConfig,
    pub detector: Box<dyn PresenceDetector>,
    pub consumer: AudioConsumer,
    pub running: Arc<AtomicBool>,
    pub activity_tx: broadcast::Sender<ActivityEvent>,
    pub spectrum_tx: broadcast::Sender<SpectrumEvent>,
    pub source_tx: broadcast::Sender<SourceEvent>,
    pub seq: Arc<AtomicU64>,
    pub capture_sample_rate: u32,
    pub metrics: Arc<Mutex<LoudnessMetrics>>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Chunk size drained from the ring buffer per iteration.
/// 20 ms at 48 kHz = 960 samples; at 16 kHz = 320 samples.
/// Using 960 gives a reasonable presence-decision stride for most capture rates.
const DRAIN_CHUNK: usize = 960;

/// Minimum sleep when the ring is empty (avoids busy-wait burning a core).
const SLEEP_EMPTY_MS: u64 = 5;

/// Run the blocking pipeline until `ctx.running` becomes false.
pub fn run(mut ctx: PipelineContext) {
    info!("pipeline started");

    // Initialise resampler (passthrough when rates match)
    let mut resampler = match RateConverter::new(
        ctx.capture_sample_rate,
        ctx.config.analysis_sample_rate,
        DRAIN_CHUNK,
    ) {
        Ok(r) => r,
        Err(e) => {
            error!("failed to create resampler: {e}");
            return;
        }
    };

    if !resampler.is_passthrough() {
        info!(
            "resampling enabled from={} to={}",
            ctx.capture_sample_rate, ctx.config.analysis_sample_rate
        );
    }

    // fft_size is validated at configuration load; a failure here means the
    // context was built by hand with a bad size.
    let mut analyzer = match SpectrumAnalyzer::new(ctx.config.fft_size) {
        Ok(a) => a,
        Err(e) => {
            error!("failed to create spectrum analyzer: {e}");
            return;
        }
    };

    let mut matchers: Vec<SourceMatcher> = ctx
        .config
        .sources
        .iter()
        .cloned()
        .map(SourceMatcher::new)
        .collect();

    // Temporary scratch buffer, reused each iteration
    let mut raw = vec![0f32; DRAIN_CHUNK];
    // Samples awaiting a full analysis frame
    let mut frame_buf: Vec<f32> = Vec::with_capacity(ctx.config.fft_size * 2);
    // Processed chunk counter, for periodic level logging
    let mut chunk_count = 0u64;

    loop {
        // ── 0. Check running flag ─────────────────────────────────────────
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        // ── 1. Drain ring buffer ──────────────────────────────────────────
        let n = ctx.consumer.pop_slice(&mut raw);

        if n == 0 {
            // Nothing to process — yield to avoid burning 100 % CPU
            std::thread::sleep(std::time::Duration::from_millis(SLEEP_EMPTY_MS));
            continue;
        }

        ctx.diagnostics.samples_in.fetch_add(n, Ordering::Relaxed);

        // ── 2. Resample to analysis rate ──────────────────────────────────
        let resampled = resampler.process(&raw[..n]);
        if resampled.is_empty() {
            // Partial chunk — waiting for more data to fill rubato's input buffer
            continue;
        }
        ctx.diagnostics
            .samples_resampled
            .fetch_add(resampled.len(), Ordering::Relaxed);
        let chunk = AudioChunk::new(resampled, ctx.config.analysis_sample_rate);

        debug!(
            raw = n,
            resampled = chunk.samples.len(),
            "processed audio chunk"
        );

        // ── 3. Presence decision ──────────────────────────────────────────
        let rms = chunk.rms();
        let present = ctx.detector.classify(&chunk).is_present();
        ctx.diagnostics
            .chunks_classified
            .fetch_add(1, Ordering::Relaxed);
        if present {
            ctx.diagnostics
                .chunks_present
                .fetch_add(1, Ordering::Relaxed);
        }

        let seq = ctx.seq.fetch_add(1, Ordering::Relaxed);
        let _ = ctx.activity_tx.send(ActivityEvent { seq, rms, present });

        chunk_count += 1;
        if chunk_count % 50 == 0 {
            debug!(
                rms = format_args!("{:.4}", rms),
                present,
                buffered = frame_buf.len(),
                "audio level check"
            );
        }

        // ── 4. Analysis frames ────────────────────────────────────────────
        frame_buf.extend_from_slice(&chunk.samples);

        while frame_buf.len() >= ctx.config.fft_size {
            analyze_frame(&mut ctx, &mut analyzer, &mut matchers, &frame_buf);
            frame_buf.drain(..ctx.config.fft_size);
        }
    }

    // Partial frame at stop is discarded — it never filled an analysis window.
    if !frame_buf.is_empty() {
        debug!(
            discarded = frame_buf.len(),
            "stop requested with partial analysis frame"
        );
    }
    ctx.detector.reset();

    let snap = ctx.diagnostics.snapshot();
    info!(
        samples_in = snap.samples_in,
        samples_resampled = snap.samples_resampled,
        chunks_classified = snap.chunks_classified,
        chunks_present = snap.chunks_present,
        frames_analyzed = snap.frames_analyzed,
        source_detections = snap.source_detections,
        "pipeline stopped — diagnostics"
    );
}

/// Analyze one full frame at the head of `frame_buf` and broadcast results.
fn analyze_frame(
    ctx: &mut PipelineContext,
    analyzer: &mut SpectrumAnalyzer,
    matchers: &mut [SourceMatcher],
    frame_buf: &[f32],
) {
    let frame = analyzer.analyze(&frame_buf[..ctx.config.fft_size]);
    ctx.diagnostics
        .frames_analyzed
        .fetch_add(1, Ordering::Relaxed);

    if let Some(loudness) = frame.loudness_db {
        ctx.metrics.lock().update(loudness);
    }

    let seq = ctx.seq.fetch_add(1, Ordering::Relaxed);
    let _ = ctx.spectrum_tx.send(SpectrumEvent {
        seq,
        peak_bin: frame.peak_bin,
        loudness_db: frame.loudness_db,
        octave_db: frame.octave_db,
    });

    for matcher in matchers.iter_mut() {
        let detected = matcher.observe(frame.peak_bin);
        if detected {
            ctx.diagnostics
                .source_detections
                .fetch_add(1, Ordering::Relaxed);
        }
        let seq = ctx.seq.fetch_add(1, Ordering::Relaxed);
        let _ = ctx.source_tx.send(SourceEvent {
            seq,
            source: matcher.name().to_string(),
            detected,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::{Duration, Instant};

    use tokio::sync::broadcast::error::TryRecvError;

    use crate::buffering::{create_audio_ring, Producer};
    use crate::config::SourceConfig;
    use crate::detect::Presence;

    struct ScriptedDetector {
        decisions: Vec<Presence>,
        idx: usize,
        resets: Arc<AtomicUsize>,
    }

    impl ScriptedDetector {
        fn new(decisions: Vec<Presence>, resets: Arc<AtomicUsize>) -> Self {
            Self {
                decisions,
                idx: 0,
                resets,
            }
        }
    }

    impl PresenceDetector for ScriptedDetector {
        fn classify(&mut self, _chunk: &AudioChunk) -> Presence {
            let decision = self
                .decisions
                .get(self.idx)
                .copied()
                .unwrap_or(Presence::Absent);
            self.idx += 1;
            decision
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn recv_with_timeout<T: Clone>(rx: &mut broadcast::Receiver<T>, timeout: Duration) -> T {
        let start = Instant::now();
        loop {
            match rx.try_recv() {
                Ok(ev) => return ev,
                Err(TryRecvError::Empty) => {
                    if start.elapsed() >= timeout {
                        panic!("timed out waiting for event");
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => panic!("event channel closed unexpectedly"),
            }
        }
    }

    fn base_config() -> DetectorConfig {
        DetectorConfig {
            presence_threshold: 0.01,
            hangover_chunks: 0,
            fft_size: 1024,
            analysis_sample_rate: 16_000,
            sources: Vec::new(),
        }
    }

    struct TestHarness {
        ctx: PipelineContext,
        activity_rx: broadcast::Receiver<ActivityEvent>,
        spectrum_rx: broadcast::Receiver<SpectrumEvent>,
        source_rx: broadcast::Receiver<SourceEvent>,
        running: Arc<AtomicBool>,
        resets: Arc<AtomicUsize>,
    }

    fn harness(
        config: DetectorConfig,
        decisions: Vec<Presence>,
        consumer: AudioConsumer,
    ) -> TestHarness {
        let (activity_tx, activity_rx) = broadcast::channel(64);
        let (spectrum_tx, spectrum_rx) = broadcast::channel(64);
        let (source_tx, source_rx) = broadcast::channel(64);
        let running = Arc::new(AtomicBool::new(true));
        let resets = Arc::new(AtomicUsize::new(0));

        let ctx = PipelineContext {
            config,
            detector: Box::new(ScriptedDetector::new(decisions, Arc::clone(&resets))),
            consumer,
            running: Arc::clone(&running),
            activity_tx,
            spectrum_tx,
            source_tx,
            seq: Arc::new(AtomicU64::new(0)),
            capture_sample_rate: 16_000,
            metrics: Arc::new(Mutex::new(LoudnessMetrics::new())),
            diagnostics: Arc::new(PipelineDiagnostics::default()),
        };

        TestHarness {
            ctx,
            activity_rx,
            spectrum_rx,
            source_rx,
            running,
            resets,
        }
    }

    fn sine(bin: usize, amplitude: f32, len: usize, fft_size: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * bin as f32 * i as f32 / fft_size as f32).sin()
            })
            .collect()
    }

    #[test]
    fn run_emits_activity_events_with_presence_decisions() {
        let (mut producer, consumer) = create_audio_ring();
        producer.push_slice(&vec![0.2f32; 960]);
        producer.push_slice(&vec![0.0f32; 960]);

        let mut h = harness(
            base_config(),
            vec![Presence::Present, Presence::Absent],
            consumer,
        );
        let diagnostics = Arc::clone(&h.ctx.diagnostics);

        let handle = thread::spawn(move || run(h.ctx));

        let first = recv_with_timeout(&mut h.activity_rx, Duration::from_secs(1));
        let second = recv_with_timeout(&mut h.activity_rx, Duration::from_secs(1));

        h.running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        assert!(first.present);
        assert!((first.rms - 0.2).abs() < 1e-4);
        assert!(!second.present);
        assert!(second.rms < 1e-6);
        assert!(second.seq > first.seq);

        let snap = diagnostics.snapshot();
        assert_eq!(snap.chunks_classified, 2);
        assert_eq!(snap.chunks_present, 1);
        assert_eq!(h.resets.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn run_emits_spectrum_event_once_a_frame_fills() {
        let (mut producer, consumer) = create_audio_ring();
        // Two drain chunks fill one 1024-sample frame with room to spare.
        producer.push_slice(&sine(54, 0.5, 1920, 1024));

        let mut h = harness(
            base_config(),
            vec![Presence::Present, Presence::Present],
            consumer,
        );
        let metrics = Arc::clone(&h.ctx.metrics);
        let diagnostics = Arc::clone(&h.ctx.diagnostics);

        let handle = thread::spawn(move || run(h.ctx));

        let frame = recv_with_timeout(&mut h.spectrum_rx, Duration::from_secs(1));

        h.running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        assert!(
            (53..=55).contains(&frame.peak_bin),
            "peak_bin = {}",
            frame.peak_bin
        );
        assert!(frame.loudness_db.is_some());
        assert!(diagnostics.snapshot().frames_analyzed >= 1);
        assert!(metrics.lock().snapshot().frames >= 1);
    }

    #[test]
    fn run_reports_declared_sources_per_frame() {
        let (mut producer, consumer) = create_audio_ring();
        producer.push_slice(&sine(54, 0.5, 1920, 1024));

        let mut config = base_config();
        config.sources = vec![
            SourceConfig {
                name: "doorbell".into(),
                bin: 54,
                min_match: 1,
                wide: true,
            },
            SourceConfig {
                name: "siren".into(),
                bin: 300,
                min_match: 1,
                wide: false,
            },
        ];

        let mut h = harness(config, vec![Presence::Present, Presence::Present], consumer);

        let handle = thread::spawn(move || run(h.ctx));

        let first = recv_with_timeout(&mut h.source_rx, Duration::from_secs(1));
        let second = recv_with_timeout(&mut h.source_rx, Duration::from_secs(1));

        h.running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        assert_eq!(first.source, "doorbell");
        assert!(first.detected);
        assert_eq!(second.source, "siren");
        assert!(!second.detected);
    }

    #[test]
    fn quiet_input_yields_no_source_detection() {
        let (mut producer, consumer) = create_audio_ring();
        producer.push_slice(&vec![0.0f32; 1920]);

        let mut config = base_config();
        config.sources = vec![SourceConfig {
            name: "doorbell".into(),
            bin: 54,
            min_match: 1,
            wide: true,
        }];

        let mut h = harness(config, vec![Presence::Absent, Presence::Absent], consumer);
        let diagnostics = Arc::clone(&h.ctx.diagnostics);

        let handle = thread::spawn(move || run(h.ctx));

        let event = recv_with_timeout(&mut h.source_rx, Duration::from_secs(1));

        h.running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        assert!(!event.detected);
        assert_eq!(diagnostics.snapshot().source_detections, 0);
    }
}
