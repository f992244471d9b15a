use crate::channel::ChannelKind;
use crate::CPU_CLOCK_HZ;

/// Smallest timer value the pulse channels can produce audibly; below 8 the
/// sweep unit mutes the channel.
pub const MIN_TIMER: u16 = 8;
/// 11-bit timer ceiling shared by pulse and triangle.
pub const MAX_TIMER: u16 = 2047;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PitchError {
    #[error("MIDI note {note} maps to timer {timer} outside [8, 2047] on {channel}")]
    OutOfRange {
        note: u8,
        timer: i32,
        channel: ChannelKind,
    },
    #[error("channel {0} has no pitch timer")]
    Unpitched(ChannelKind),
}

/// Equal-tempered frequency of a MIDI note, A4 = 440 Hz.
pub fn note_frequency(note: u8) -> f64 {
    440.0 * 2f64.powf((note as f64 - 69.0) / 12.0)
}

/// Map a MIDI note to the channel's 11-bit timer value.
///
/// Pulse channels clock their sequencer every 16 CPU cycles, the triangle
/// every 32, so the triangle sounds an octave below a pulse at the same
/// timer. Values outside `[8, 2047]` are reported `OutOfRange`; the caller
/// substitutes silence.
pub fn timer_for_note(note: u8, channel: ChannelKind) -> Result<u16, PitchError> {
    let divisor = match channel {
        ChannelKind::Pulse1 | ChannelKind::Pulse2 => 16.0,
        ChannelKind::Triangle => 32.0,
        ChannelKind::Noise | ChannelKind::Dpcm => return Err(PitchError::Unpitched(channel)),
    };

    let freq = note_frequency(note);
    let timer = (CPU_CLOCK_HZ / (divisor * freq) - 1.0).round() as i32;

    if !(MIN_TIMER as i32..=MAX_TIMER as i32).contains(&timer) {
        return Err(PitchError::OutOfRange {
            note,
            timer,
            channel,
        });
    }
    Ok(timer as u16)
}
