use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use sonitus_core::buffering::{chunk::AudioChunk, create_audio_ring, Producer};
use sonitus_core::config::DetectorConfig;
use sonitus_core::engine::pipeline;
use sonitus_core::events::{ActivityEvent, SpectrumEvent};
use sonitus_core::{LoudnessMetrics, Presence, PresenceDetector};

struct AlwaysPresent;

impl PresenceDetector for AlwaysPresent {
    fn classify(&mut self, _chunk: &AudioChunk) -> Presence {
        Presence::Present
    }

    fn reset(&mut self) {}
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

fn context(
    consumer: sonitus_core::buffering::AudioConsumer,
    running: Arc<AtomicBool>,
) -> (
    pipeline::PipelineContext,
    broadcast::Receiver<ActivityEvent>,
    broadcast::Receiver<SpectrumEvent>,
) {
    let (activity_tx, activity_rx) = broadcast::channel(64);
    let (spectrum_tx, spectrum_rx) = broadcast::channel(64);
    let (source_tx, _) = broadcast::channel(64);

    let ctx = pipeline::PipelineContext {
        config: DetectorConfig::default(),
        detector: Box::new(AlwaysPresent),
        consumer,
        running,
        activity_tx,
        spectrum_tx,
        source_tx,
        seq: Arc::new(AtomicU64::new(0)),
        capture_sample_rate: 16_000,
        metrics: Arc::new(Mutex::new(LoudnessMetrics::new())),
        diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
    };

    (ctx, activity_rx, spectrum_rx)
}

#[test]
fn first_activity_event_latency_under_500ms() {
    let (mut producer, consumer) = create_audio_ring();
    producer.push_slice(&vec![0.2f32; 960]);

    let running = Arc::new(AtomicBool::new(true));
    let (ctx, mut activity_rx, _spectrum_rx) = context(consumer, Arc::clone(&running));

    let start = Instant::now();
    let handle = thread::spawn(move || pipeline::run(ctx));

    let first = recv_with_timeout(&mut activity_rx, Duration::from_secs(2));
    let elapsed = start.elapsed();

    running.store(false, Ordering::SeqCst);
    handle.join().expect("pipeline thread panicked");

    assert!(first.present);
    assert!(
        elapsed < Duration::from_millis(500),
        "first activity event too slow: {:?} (target < 500ms)",
        elapsed
    );
}

#[test]
fn spectrum_event_arrives_once_a_frame_accumulates() {
    let (mut producer, consumer) = create_audio_ring();
    // Default fft_size is 1024; push two 960-sample chunks of a bin-100 tone.
    let tone: Vec<f32> = (0..1920)
        .map(|i| 0.4 * (2.0 * std::f32::consts::PI * 100.0 * i as f32 / 1024.0).sin())
        .collect();
    producer.push_slice(&tone);

    let running = Arc::new(AtomicBool::new(true));
    let (ctx, _activity_rx, mut spectrum_rx) = context(consumer, Arc::clone(&running));
    let metrics = Arc::clone(&ctx.metrics);

    let handle = thread::spawn(move || pipeline::run(ctx));

    let frame = recv_with_timeout(&mut spectrum_rx, Duration::from_secs(2));

    running.store(false, Ordering::SeqCst);
    handle.join().expect("pipeline thread panicked");

    assert!(
        (99..=101).contains(&frame.peak_bin),
        "peak_bin = {}",
        frame.peak_bin
    );
    assert!(frame.loudness_db.is_some());
    assert!(metrics.lock().snapshot().frames >= 1);
}
