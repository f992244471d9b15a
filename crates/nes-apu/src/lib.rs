pub mod channel;
pub mod envelope;
pub mod frame;
pub mod pitch;

pub use channel::{ChannelKind, NoiseMode};
pub use envelope::{
    control_byte, duty_from_sequence, envelope_volume, pitch_modification, EnvelopeKind,
    NoteEffects, Tremolo, Vibrato,
};
pub use frame::{triangle_control, ChannelFrames, FrameMap, FrameRecord};
pub use pitch::{timer_for_note, PitchError};

/// NTSC CPU clock in Hz, the base of every APU timer computation.
pub const CPU_CLOCK_HZ: f64 = 1_789_773.0;

pub type Result<T> = std::result::Result<T, PitchError>;
