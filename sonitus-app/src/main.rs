//! Sonitus CLI entry point.
//!
//! Loads a configuration document, builds the component registry, and runs
//! one detector engine per declared detector until Ctrl-C (or `--duration`).
//! Engine events are rendered as structured log lines.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use sonitus_core::audio::device::list_input_devices;
use sonitus_core::{ComponentRegistry, DetectorEngine, Document};

const DEFAULT_CONFIG_PATH: &str = "sonitus.json";

#[derive(Debug)]
struct Args {
    config: PathBuf,
    duration: Option<u64>,
    list_devices: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut config = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut duration = None;
    let mut list_devices = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => {
                let value = it.next().context("--config requires a file path")?;
                config = PathBuf::from(value);
            }
            "--duration" => {
                let value = it.next().context("--duration requires seconds")?;
                duration = Some(value.parse::<u64>().context("--duration must be a number")?);
            }
            "--list-devices" => list_devices = true,
            "--help" | "-h" => {
                eprintln!(
                    "usage: sonitus [--config FILE] [--duration SECS] [--list-devices]\n\
                     \n\
                     --config FILE    configuration document (default: {DEFAULT_CONFIG_PATH})\n\
                     --duration SECS  stop after SECS seconds (default: run until Ctrl-C)\n\
                     --list-devices   print available input devices and exit"
                );
                std::process::exit(0);
            }
            other => anyhow::bail!("unexpected argument: {other}"),
        }
    }

    Ok(Args {
        config,
        duration,
        list_devices,
    })
}

/// Forward one engine's events into the log.
///
/// Activity is chatty (one event per ~20 ms chunk), so presence is logged on
/// transitions only; per-frame spectrum data stays at debug level.
fn spawn_event_loggers(engine: &Arc<DetectorEngine>) {
    let detector = engine.detector_id().to_string();

    let mut activity_rx = engine.subscribe_activity();
    let id = detector.clone();
    tokio::spawn(async move {
        let mut was_present = false;
        loop {
            match activity_rx.recv().await {
                Ok(event) => {
                    if event.present != was_present {
                        info!(
                            detector = %id,
                            present = event.present,
                            rms = format_args!("{:.4}", event.rms),
                            "presence changed"
                        );
                        was_present = event.present;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(detector = %id, skipped, "activity events lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut spectrum_rx = engine.subscribe_spectrum();
    let id = detector.clone();
    tokio::spawn(async move {
        loop {
            match spectrum_rx.recv().await {
                Ok(event) => {
                    debug!(
                        detector = %id,
                        peak_bin = event.peak_bin,
                        loudness_db = ?event.loudness_db,
                        "spectrum frame"
                    );
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut source_rx = engine.subscribe_sources();
    let id = detector.clone();
    tokio::spawn(async move {
        let mut active: Vec<String> = Vec::new();
        loop {
            match source_rx.recv().await {
                Ok(event) => {
                    let was_active = active.contains(&event.source);
                    if event.detected && !was_active {
                        info!(detector = %id, source = %event.source, "source detected");
                        active.push(event.source);
                    } else if !event.detected && was_active {
                        info!(detector = %id, source = %event.source, "source cleared");
                        active.retain(|s| s != &event.source);
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut status_rx = engine.subscribe_status();
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(event) => {
                    info!(
                        detector = %detector,
                        status = ?event.status,
                        detail = ?event.detail,
                        "engine status"
                    );
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sonitus=info".parse().unwrap()),
        )
        .init();

    let args = parse_args()?;

    if args.list_devices {
        let devices = list_input_devices();
        if devices.is_empty() {
            println!("no input devices found");
        }
        for device in devices {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("{}{}", device.name, marker);
        }
        return Ok(());
    }

    info!("Sonitus starting");

    // ── Configuration → component graph ───────────────────────────────────
    let document = Document::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    let registry = ComponentRegistry::build(&document)?;

    if registry.detectors().is_empty() {
        anyhow::bail!(
            "configuration {} declares no detectors",
            args.config.display()
        );
    }

    for detector in registry.detectors() {
        info!(
            detector = detector.id(),
            microphone = ?detector.microphone(),
            sources = detector.config().sources.len(),
            fft_size = detector.config().fft_size,
            "component wired"
        );
    }

    // ── Engines ───────────────────────────────────────────────────────────
    let mut engines = Vec::new();
    for detector in registry.detectors() {
        let microphone = detector
            .microphone()
            .and_then(|id| registry.microphone(id))
            .context("registry invariant broken: detector bound to missing microphone")?;

        let engine = Arc::new(DetectorEngine::new(detector, microphone)?);
        spawn_event_loggers(&engine);
        engine.start()?;
        engines.push(engine);
    }

    // ── Wait for shutdown ─────────────────────────────────────────────────
    match args.duration {
        Some(secs) => {
            info!(secs, "running for fixed duration");
            tokio::time::sleep(Duration::from_secs(secs)).await;
        }
        None => {
            info!("running until Ctrl-C");
            tokio::signal::ctrl_c().await?;
            info!("Ctrl-C received");
        }
    }

    // ── Shutdown summary ──────────────────────────────────────────────────
    for engine in &engines {
        if let Err(e) = engine.stop() {
            warn!(detector = engine.detector_id(), "stop failed: {e}");
        }

        let metrics = engine.metrics_snapshot();
        let diagnostics = engine.diagnostics_snapshot();
        info!(
            detector = engine.detector_id(),
            frames = metrics.frames,
            current_db = ?metrics.current_db,
            min_db = ?metrics.min_db,
            max_db = ?metrics.max_db,
            chunks = diagnostics.chunks_classified,
            present_chunks = diagnostics.chunks_present,
            source_detections = diagnostics.source_detections,
            "session summary"
        );
    }

    Ok(())
}
