//! Declarative configuration documents.
//!
//! A document declares microphone instances and audio detectors that bind to
//! them. Identifiers are opaque handles: unique per document, assigned at
//! load time when omitted, immutable afterwards.
//!
//! All rejection happens here, before any component is constructed —
//! `Document::resolve` either returns a fully validated, fully identified
//! view of the document or the first violation found.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SonitusError};

/// Smallest accepted FFT size. The nine octave bands cover bins 1..512, so
/// the half-spectrum must hold at least 512 bins.
pub const MIN_FFT_SIZE: usize = 1024;

/// Width of a source's match-history register in analysis frames.
pub const MATCH_HISTORY_FRAMES: u32 = 32;

fn default_presence_threshold() -> f32 {
    0.01
}

fn default_hangover_chunks() -> u32 {
    8
}

fn default_fft_size() -> usize {
    MIN_FFT_SIZE
}

fn default_analysis_sample_rate() -> u32 {
    16_000
}

fn default_min_match() -> u32 {
    15
}

fn default_wide() -> bool {
    true
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct Document {
    pub microphones: Vec<MicrophoneDecl>,
    pub detectors: Vec<DetectorDecl>,
}

/// A declared microphone instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct MicrophoneDecl {
    /// Component identifier. Auto-generated (`microphone_N`) when omitted.
    pub id: Option<String>,
    /// Preferred OS input device name. `None` selects the system default.
    pub device: Option<String>,
}

/// A declared audio detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct DetectorDecl {
    /// Component identifier. Auto-generated (`detect_audio_N`) when omitted.
    pub id: Option<String>,
    /// Identifier of the microphone to bind. May be omitted when exactly one
    /// microphone is declared.
    pub microphone: Option<String>,
    /// RMS level above which a chunk counts as audio present.
    pub presence_threshold: f32,
    /// How many consecutive below-threshold chunks still report presence.
    pub hangover_chunks: u32,
    /// Analysis frame length in samples. Power of two, ≥ [`MIN_FFT_SIZE`].
    pub fft_size: usize,
    /// Sample rate the analysis runs at (capture is resampled to this).
    pub analysis_sample_rate: u32,
    /// Sound sources matched against the per-frame peak bin.
    pub sources: Vec<SourceDecl>,
}

impl Default for DetectorDecl {
    fn default() -> Self {
        Self {
            id: None,
            microphone: None,
            presence_threshold: default_presence_threshold(),
            hangover_chunks: default_hangover_chunks(),
            fft_size: default_fft_size(),
            analysis_sample_rate: default_analysis_sample_rate(),
            sources: Vec::new(),
        }
    }
}

/// A declared sound source: a named frequency bin to watch for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDecl {
    pub name: String,
    /// Target frequency bin of the analysis frame (bin width =
    /// `analysis_sample_rate / fft_size` Hz).
    pub bin: u32,
    /// Minimum matching frames within the 32-frame history to report
    /// the source as detected.
    #[serde(default = "default_min_match")]
    pub min_match: u32,
    /// Also accept peaks in the bins directly adjacent to the target.
    #[serde(default = "default_wide")]
    pub wide: bool,
}

// ---------------------------------------------------------------------------
// Resolved view
// ---------------------------------------------------------------------------

/// Runtime parameters of one detector, after validation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorConfig {
    pub presence_threshold: f32,
    pub hangover_chunks: u32,
    pub fft_size: usize,
    pub analysis_sample_rate: u32,
    pub sources: Vec<SourceConfig>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorDecl::default().runtime_config()
    }
}

/// Validated sound-source parameters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub name: String,
    pub bin: u32,
    pub min_match: u32,
    pub wide: bool,
}

/// A fully identified, fully validated document.
#[derive(Debug, Clone)]
pub struct ResolvedDocument {
    pub microphones: Vec<ResolvedMicrophone>,
    pub detectors: Vec<ResolvedDetector>,
}

#[derive(Debug, Clone)]
pub struct ResolvedMicrophone {
    pub id: String,
    pub device: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedDetector {
    pub id: String,
    /// Identifier of the bound microphone. Always resolves to an entry in
    /// `ResolvedDocument::microphones`.
    pub microphone: String,
    pub config: DetectorConfig,
}

impl DetectorDecl {
    fn runtime_config(&self) -> DetectorConfig {
        DetectorConfig {
            presence_threshold: self.presence_threshold,
            hangover_chunks: self.hangover_chunks,
            fft_size: self.fft_size,
            analysis_sample_rate: self.analysis_sample_rate,
            sources: self
                .sources
                .iter()
                .map(|s| SourceConfig {
                    name: s.name.trim().to_string(),
                    bin: s.bin,
                    min_match: s.min_match,
                    wide: s.wide,
                })
                .collect(),
        }
    }
}

impl Document {
    /// Parse a document from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a document from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Validate the document and assign identifiers.
    ///
    /// Returns the first violation found:
    /// duplicate ids, unknown / missing / ambiguous microphone references,
    /// invalid FFT sizes, out-of-range source bins, malformed sources.
    pub fn resolve(&self) -> Result<ResolvedDocument> {
        let mut seen_ids: HashSet<String> = HashSet::new();

        let mut claim_id = |id: String| -> Result<String> {
            if !seen_ids.insert(id.clone()) {
                return Err(SonitusError::DuplicateId { id });
            }
            Ok(id)
        };

        let mut microphones = Vec::with_capacity(self.microphones.len());
        for (index, decl) in self.microphones.iter().enumerate() {
            let id = claim_id(normalized_or_generated(
                decl.id.as_deref(),
                "microphone",
                index,
            ))?;
            let device = decl
                .device
                .as_ref()
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty());
            microphones.push(ResolvedMicrophone { id, device });
        }

        let mut detectors = Vec::with_capacity(self.detectors.len());
        for (index, decl) in self.detectors.iter().enumerate() {
            let id = claim_id(normalized_or_generated(
                decl.id.as_deref(),
                "detect_audio",
                index,
            ))?;

            let microphone = resolve_microphone_ref(&id, decl.microphone.as_deref(), &microphones)?;
            validate_detector(&id, decl)?;

            detectors.push(ResolvedDetector {
                id,
                microphone,
                config: decl.runtime_config(),
            });
        }

        Ok(ResolvedDocument {
            microphones,
            detectors,
        })
    }
}

fn normalized_or_generated(id: Option<&str>, prefix: &str, index: usize) -> String {
    match id.map(str::trim).filter(|s| !s.is_empty()) {
        Some(explicit) => explicit.to_string(),
        None => format!("{prefix}_{index}"),
    }
}

fn resolve_microphone_ref(
    detector: &str,
    reference: Option<&str>,
    microphones: &[ResolvedMicrophone],
) -> Result<String> {
    match reference.map(str::trim).filter(|s| !s.is_empty()) {
        Some(named) => {
            if microphones.iter().any(|m| m.id == named) {
                Ok(named.to_string())
            } else {
                Err(SonitusError::UnknownMicrophone {
                    detector: detector.to_string(),
                    microphone: named.to_string(),
                })
            }
        }
        // An omitted reference binds to the sole declared microphone.
        None => match microphones {
            [] => Err(SonitusError::MissingMicrophone {
                detector: detector.to_string(),
            }),
            [only] => Ok(only.id.clone()),
            several => Err(SonitusError::AmbiguousMicrophone {
                detector: detector.to_string(),
                count: several.len(),
            }),
        },
    }
}

fn validate_detector(id: &str, decl: &DetectorDecl) -> Result<()> {
    if !decl.fft_size.is_power_of_two() || decl.fft_size < MIN_FFT_SIZE {
        return Err(SonitusError::InvalidFftSize {
            size: decl.fft_size,
            min: MIN_FFT_SIZE,
        });
    }
    if !(decl.presence_threshold.is_finite() && decl.presence_threshold > 0.0) {
        return Err(SonitusError::InvalidDetector {
            detector: id.to_string(),
            reason: format!("presenceThreshold must be positive, got {}", decl.presence_threshold),
        });
    }
    if decl.analysis_sample_rate == 0 {
        return Err(SonitusError::InvalidDetector {
            detector: id.to_string(),
            reason: "analysisSampleRate must be positive".into(),
        });
    }

    let half_spectrum = (decl.fft_size / 2) as u32;
    let mut seen_names: HashSet<&str> = HashSet::new();
    for source in &decl.sources {
        let name = source.name.trim();
        if name.is_empty() {
            return Err(SonitusError::InvalidSource {
                name: source.name.clone(),
                reason: "source name must not be empty".into(),
            });
        }
        if !seen_names.insert(name) {
            return Err(SonitusError::InvalidSource {
                name: name.to_string(),
                reason: "duplicate source name".into(),
            });
        }
        if source.bin == 0 || source.bin >= half_spectrum {
            return Err(SonitusError::InvalidSource {
                name: name.to_string(),
                reason: format!(
                    "bin {} outside 1..{} for fftSize {}",
                    source.bin, half_spectrum, decl.fft_size
                ),
            });
        }
        if source.min_match == 0 || source.min_match > MATCH_HISTORY_FRAMES {
            return Err(SonitusError::InvalidSource {
                name: name.to_string(),
                reason: format!(
                    "minMatch {} outside 1..={}",
                    source.min_match, MATCH_HISTORY_FRAMES
                ),
            });
        }
    }

    Ok(())
}
