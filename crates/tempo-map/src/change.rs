use serde::{Deserialize, Serialize};

/// Interpolation curve for a gradual tempo change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TempoCurve {
    Linear,
    EaseIn,
    EaseOut,
}

impl Default for TempoCurve {
    fn default() -> Self {
        TempoCurve::Linear
    }
}

impl TempoCurve {
    /// Integral of the curve from 0 to `p`, for exact elapsed-time sums over
    /// partial ramps. `integral(1.0)` is the curve's mean progress: 1/2 for
    /// linear, 1/3 and 2/3 for the eased variants.
    pub(crate) fn integral(&self, p: f64) -> f64 {
        match self {
            TempoCurve::Linear => p * p / 2.0,
            TempoCurve::EaseIn => p * p * p / 3.0,
            TempoCurve::EaseOut => p - 1.0 / 3.0 + (1.0 - p).powi(3) / 3.0,
        }
    }

    /// Curve value at normalized progress `p` in [0, 1].
    pub(crate) fn apply(&self, p: f64) -> f64 {
        match self {
            TempoCurve::Linear => p,
            TempoCurve::EaseIn => p * p,
            TempoCurve::EaseOut => 1.0 - (1.0 - p) * (1.0 - p),
        }
    }
}

/// How a tempo change takes effect at its tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TempoChangeKind {
    /// Tempo switches instantly at the change tick.
    Immediate,
    /// Tempo ramps from the previous value over `duration_ticks`.
    Linear {
        duration_ticks: u64,
        #[serde(default)]
        curve: TempoCurve,
    },
}

impl TempoChangeKind {
    pub fn is_immediate(&self) -> bool {
        matches!(self, TempoChangeKind::Immediate)
    }

    /// True when two kinds are the same shape (duration/curve aside), the
    /// test used to reject conflicting re-insertions at one tick.
    pub(crate) fn same_shape(&self, other: &TempoChangeKind) -> bool {
        matches!(
            (self, other),
            (TempoChangeKind::Immediate, TempoChangeKind::Immediate)
                | (TempoChangeKind::Linear { .. }, TempoChangeKind::Linear { .. })
        )
    }
}

/// A single tempo event. Immutable once accepted by the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoChange {
    pub tick: u64,
    /// Microseconds per quarter note.
    pub tempo: u32,
    pub kind: TempoChangeKind,
}

impl TempoChange {
    pub fn immediate(tick: u64, tempo: u32) -> Self {
        Self {
            tick,
            tempo,
            kind: TempoChangeKind::Immediate,
        }
    }

    pub fn linear(tick: u64, tempo: u32, duration_ticks: u64) -> Self {
        Self {
            tick,
            tempo,
            kind: TempoChangeKind::Linear {
                duration_ticks,
                curve: TempoCurve::Linear,
            },
        }
    }

    pub fn bpm(&self) -> f64 {
        60_000_000.0 / self.tempo as f64
    }
}

/// Limits applied when inserting tempo changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoValidationConfig {
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// Bounds on an interpolated change's span, measured in frames.
    pub min_duration_frames: u64,
    pub max_duration_frames: u64,
    /// Largest tick displacement frame-aligned optimization may apply.
    pub max_snap_ticks: u64,
}

impl Default for TempoValidationConfig {
    fn default() -> Self {
        Self {
            min_bpm: 40.0,
            max_bpm: 250.0,
            min_duration_frames: 2,
            // five minutes of ramp is already absurd
            max_duration_frames: 60 * 300,
            max_snap_ticks: 24,
        }
    }
}
