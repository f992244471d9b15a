pub mod change;
pub mod map;

pub use change::{TempoChange, TempoChangeKind, TempoCurve, TempoValidationConfig};
pub use map::{TempoMap, TempoOptimizationStrategy, TempoPoint, TempoState};

/// Frame cadence of the NES NMI: one audio register refresh every ~16.7 ms.
pub const FRAME_RATE_HZ: u32 = 60;
/// Microseconds per frame used for tick→frame conversion.
pub const FRAME_DURATION_US: f64 = 16_667.0;

/// Default MIDI tempo (120 BPM) applied until the first `set_tempo` meta.
pub const DEFAULT_TEMPO: u32 = 500_000;

/// Errors from tempo map insertion and validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TempoError {
    #[error("tempo {bpm:.1} BPM at tick {tick} outside allowed range [{min_bpm:.1}, {max_bpm:.1}]")]
    BpmOutOfRange {
        tick: u64,
        bpm: f64,
        min_bpm: f64,
        max_bpm: f64,
    },
    #[error(
        "interpolated tempo change at tick {tick} spans {frames} frames, outside [{min_frames}, {max_frames}]"
    )]
    DurationOutOfRange {
        tick: u64,
        frames: u64,
        min_frames: u64,
        max_frames: u64,
    },
    #[error("tempo change at tick {tick} conflicts with an existing change of a different kind")]
    KindConflict { tick: u64 },
}

pub type Result<T> = std::result::Result<T, TempoError>;
