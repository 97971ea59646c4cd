//! Running loudness metrics.
//!
//! Tracks the A-weighted loudness stream produced by the spectrum stage:
//! current value, minimum, maximum, running sum and frame count. `clear`
//! restarts tracking without touching the engine.

use serde::Serialize;

/// Aggregated loudness statistics since the last clear.
#[derive(Debug, Clone)]
pub struct LoudnessMetrics {
    current_db: Option<f32>,
    min_db: f32,
    max_db: f32,
    sum_db: f64,
    frames: u64,
}

/// Serializable snapshot of [`LoudnessMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Loudness of the most recent frame, if any.
    pub current_db: Option<f32>,
    /// Quietest frame seen, if any.
    pub min_db: Option<f32>,
    /// Loudest frame seen, if any.
    pub max_db: Option<f32>,
    /// Sum of all frame loudness values.
    pub sum_db: f64,
    /// Number of frames folded in.
    pub frames: u64,
}

impl Default for LoudnessMetrics {
    fn default() -> Self {
        Self {
            current_db: None,
            min_db: f32::INFINITY,
            max_db: f32::NEG_INFINITY,
            sum_db: 0.0,
            frames: 0,
        }
    }
}

impl LoudnessMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one frame's loudness. Non-finite values are skipped.
    pub fn update(&mut self, loudness_db: f32) {
        if !loudness_db.is_finite() {
            return;
        }
        self.current_db = Some(loudness_db);
        self.min_db = self.min_db.min(loudness_db);
        self.max_db = self.max_db.max(loudness_db);
        self.sum_db += f64::from(loudness_db);
        self.frames += 1;
    }

    /// Restart tracking.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            current_db: self.current_db,
            min_db: self.min_db.is_finite().then_some(self.min_db),
            max_db: self.max_db.is_finite().then_some(self.max_db),
            sum_db: self.sum_db,
            frames: self.frames,
        }
    }
}
