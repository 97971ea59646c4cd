//! Event types broadcast by the engine.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so hosts can
//! forward them over whatever transport they use (log lines, sockets, UI
//! bridges) without re-mapping.

use serde::{Deserialize, Serialize};

use crate::spectrum::OCTAVES;

// ---------------------------------------------------------------------------
// Activity events
// ---------------------------------------------------------------------------

/// Emitted for each processed audio chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Root-mean-square level of the chunk in [0.0, 1.0].
    pub rms: f32,
    /// Presence decision for the current chunk.
    pub present: bool,
}

// ---------------------------------------------------------------------------
// Spectrum events
// ---------------------------------------------------------------------------

/// Emitted for each completed analysis frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectrumEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Interpolated energy-maximal bin of the frame.
    pub peak_bin: u32,
    /// A-weighted loudness in dB; `None` for an all-zero frame.
    pub loudness_db: Option<f32>,
    /// Per-octave energy in dB.
    pub octave_db: [f32; OCTAVES],
}

/// Emitted per declared sound source for each completed analysis frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Name of the declared source.
    pub source: String,
    /// Whether the source currently reads as detected.
    pub detected: bool,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted when the engine state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of a detector engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created but `start()` not yet called.
    Idle,
    /// Actively capturing audio and analyzing.
    Listening,
    /// Capture stopped; engine may be restarted.
    Stopped,
    /// Unrecoverable error — restart required.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_event_serializes_with_camel_case_fields() {
        let event = ActivityEvent {
            seq: 3,
            rms: 0.18,
            present: true,
        };

        let json = serde_json::to_value(&event).expect("serialize activity event");
        assert_eq!(json["seq"], 3);
        let rms = json["rms"].as_f64().expect("rms should serialize as number");
        assert!((rms - 0.18).abs() < 1e-5);
        assert_eq!(json["present"], true);

        let round_trip: ActivityEvent =
            serde_json::from_value(json).expect("deserialize activity event");
        assert_eq!(round_trip.seq, 3);
        assert!(round_trip.present);
    }

    #[test]
    fn spectrum_event_round_trips() {
        let event = SpectrumEvent {
            seq: 7,
            peak_bin: 54,
            loudness_db: Some(-18.5),
            octave_db: [-120.0; OCTAVES],
        };

        let json = serde_json::to_value(&event).expect("serialize spectrum event");
        assert_eq!(json["seq"], 7);
        assert_eq!(json["peakBin"], 54);
        assert_eq!(json["octaveDb"].as_array().unwrap().len(), OCTAVES);

        let round_trip: SpectrumEvent =
            serde_json::from_value(json).expect("deserialize spectrum event");
        assert_eq!(round_trip.peak_bin, 54);
        assert_eq!(round_trip.loudness_db, Some(-18.5));
    }

    #[test]
    fn silent_spectrum_event_has_null_loudness() {
        let event = SpectrumEvent {
            seq: 0,
            peak_bin: 1,
            loudness_db: None,
            octave_db: [-120.0; OCTAVES],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json["loudnessDb"].is_null());
    }

    #[test]
    fn source_event_round_trips() {
        let event = SourceEvent {
            seq: 11,
            source: "doorbell".into(),
            detected: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["source"], "doorbell");
        assert_eq!(json["detected"], true);

        let round_trip: SourceEvent = serde_json::from_value(json).unwrap();
        assert!(round_trip.detected);
    }

    #[test]
    fn engine_status_event_serializes_with_lowercase_status() {
        let event = EngineStatusEvent {
            status: EngineStatus::Listening,
            detail: Some("capture open".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "listening");
        assert_eq!(json["detail"], "capture open");

        let round_trip: EngineStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.status, EngineStatus::Listening);
        assert_eq!(round_trip.detail.as_deref(), Some("capture open"));
    }

    #[test]
    fn engine_status_rejects_non_lowercase_values() {
        let invalid = r#""Listening""#;
        let err = serde_json::from_str::<EngineStatus>(invalid);
        assert!(err.is_err(), "expected invalid casing to fail");
    }
}
