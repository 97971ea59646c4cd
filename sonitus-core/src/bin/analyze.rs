//! Offline analyzer — runs the detection path over a WAV file and prints a
//! JSON report.
//!
//! ```text
//! analyze <input.wav> [--config FILE] [--detector ID] [--output FILE]
//! ```
//!
//! With `--config`, the analysis parameters come from the named detector in
//! the document (or its first detector). Without it, defaults apply.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use sonitus_core::audio::{resample::RateConverter, wav};
use sonitus_core::buffering::chunk::AudioChunk;
use sonitus_core::config::{DetectorConfig, Document};
use sonitus_core::detect::{LevelDetector, PresenceDetector, SourceMatcher};
use sonitus_core::error::{Result, SonitusError};
use sonitus_core::metrics::{LoudnessMetrics, MetricsSnapshot};
use sonitus_core::spectrum::SpectrumAnalyzer;

/// Chunk stride fed through the presence detector, matching the live pipeline.
const CHUNK: usize = 960;

/// How many of the most frequent peak bins to report.
const TOP_PEAKS: usize = 8;

#[derive(Debug)]
struct Args {
    input: PathBuf,
    config: Option<PathBuf>,
    detector: Option<String>,
    output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceReport {
    name: String,
    bin: u32,
    detected_frames: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PeakReport {
    bin: u32,
    frames: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    input: String,
    file_sample_rate: u32,
    analysis_sample_rate: u32,
    fft_size: usize,
    chunks: usize,
    present_chunks: usize,
    presence_ratio: f64,
    frames: usize,
    loudness: MetricsSnapshot,
    sources: Vec<SourceReport>,
    top_peak_bins: Vec<PeakReport>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("analyze failed: {e}");
        std::process::exit(1);
    }
}

fn parse_args() -> Result<Args> {
    let mut input: Option<PathBuf> = None;
    let mut config: Option<PathBuf> = None;
    let mut detector: Option<String> = None;
    let mut output: Option<PathBuf> = None;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => {
                config = Some(PathBuf::from(expect_value(&mut it, "--config")?));
            }
            "--detector" => {
                detector = Some(expect_value(&mut it, "--detector")?);
            }
            "--output" => {
                output = Some(PathBuf::from(expect_value(&mut it, "--output")?));
            }
            "--help" | "-h" => {
                eprintln!("usage: analyze <input.wav> [--config FILE] [--detector ID] [--output FILE]");
                std::process::exit(0);
            }
            other if input.is_none() && !other.starts_with('-') => {
                input = Some(PathBuf::from(other));
            }
            other => {
                return Err(SonitusError::Other(anyhow::anyhow!(
                    "unexpected argument: {other}"
                )));
            }
        }
    }

    let input = input
        .ok_or_else(|| SonitusError::Other(anyhow::anyhow!("missing input WAV file argument")))?;

    Ok(Args {
        input,
        config,
        detector,
        output,
    })
}

fn expect_value(it: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    it.next()
        .ok_or_else(|| SonitusError::Other(anyhow::anyhow!("{flag} requires a value")))
}

fn detector_config(args: &Args) -> Result<DetectorConfig> {
    let Some(ref path) = args.config else {
        return Ok(DetectorConfig::default());
    };

    let document = Document::load(path)?;
    let resolved = document.resolve()?;

    let detector = match args.detector.as_deref() {
        Some(id) => resolved
            .detectors
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| SonitusError::Other(anyhow::anyhow!("no detector `{id}` in config")))?,
        None => resolved
            .detectors
            .first()
            .ok_or_else(|| SonitusError::Other(anyhow::anyhow!("config declares no detectors")))?,
    };

    Ok(detector.config.clone())
}

fn run() -> Result<()> {
    let args = parse_args()?;
    let config = detector_config(&args)?;

    let (samples, file_rate) = wav::read_mono_f32(&args.input)?;

    let mut resampler = RateConverter::new(file_rate, config.analysis_sample_rate, CHUNK)?;
    let mut analyzer = SpectrumAnalyzer::new(config.fft_size)?;
    let mut presence = LevelDetector::new(config.presence_threshold, config.hangover_chunks);
    let mut matchers: Vec<SourceMatcher> = config
        .sources
        .iter()
        .cloned()
        .map(SourceMatcher::new)
        .collect();
    let mut metrics = LoudnessMetrics::new();

    let mut chunks = 0usize;
    let mut present_chunks = 0usize;
    let mut frames = 0usize;
    let mut detected_frames = vec![0usize; matchers.len()];
    let mut peak_histogram: BTreeMap<u32, usize> = BTreeMap::new();
    let mut frame_buf: Vec<f32> = Vec::with_capacity(config.fft_size * 2);

    for raw in samples.chunks(CHUNK) {
        let resampled = resampler.process(raw);
        if resampled.is_empty() {
            continue;
        }

        let chunk = AudioChunk::new(resampled, config.analysis_sample_rate);
        chunks += 1;
        if presence.classify(&chunk).is_present() {
            present_chunks += 1;
        }

        frame_buf.extend_from_slice(&chunk.samples);
        while frame_buf.len() >= config.fft_size {
            let frame = analyzer.analyze(&frame_buf[..config.fft_size]);
            frames += 1;
            if let Some(loudness) = frame.loudness_db {
                metrics.update(loudness);
            }
            *peak_histogram.entry(frame.peak_bin).or_insert(0) += 1;
            for (matcher, count) in matchers.iter_mut().zip(detected_frames.iter_mut()) {
                if matcher.observe(frame.peak_bin) {
                    *count += 1;
                }
            }
            frame_buf.drain(..config.fft_size);
        }
    }

    let mut top_peak_bins: Vec<PeakReport> = peak_histogram
        .into_iter()
        .map(|(bin, frames)| PeakReport { bin, frames })
        .collect();
    top_peak_bins.sort_by(|a, b| b.frames.cmp(&a.frames).then(a.bin.cmp(&b.bin)));
    top_peak_bins.truncate(TOP_PEAKS);

    let report = Report {
        input: args.input.display().to_string(),
        file_sample_rate: file_rate,
        analysis_sample_rate: config.analysis_sample_rate,
        fft_size: config.fft_size,
        chunks,
        present_chunks,
        presence_ratio: if chunks == 0 {
            0.0
        } else {
            present_chunks as f64 / chunks as f64
        },
        frames,
        loudness: metrics.snapshot(),
        sources: matchers
            .iter()
            .zip(detected_frames)
            .map(|(matcher, count)| SourceReport {
                name: matcher.name().to_string(),
                bin: matcher.config().bin,
                detected_frames: count,
            })
            .collect(),
        top_peak_bins,
    };

    let json = serde_json::to_string_pretty(&report)?;
    match args.output {
        Some(ref path) => std::fs::write(path, json)?,
        None => println!("{json}"),
    }

    Ok(())
}
