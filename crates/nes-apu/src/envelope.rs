use serde::{Deserialize, Serialize};

/// ADSR shape selector for pulse-channel notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Constant full volume, no shaping.
    Default,
    /// Quick attack, some decay to a strong sustain.
    Piano,
    /// Slow swell and long decay.
    Pad,
    /// Immediate hit that dies away.
    Pluck,
    /// Full-volume transient.
    Percussion,
}

impl Default for EnvelopeKind {
    fn default() -> Self {
        EnvelopeKind::Default
    }
}

/// (attack, decay, sustain, release); attack/decay/release in frames,
/// sustain as a 0..=15 volume level.
type Adsr = (u32, u32, u8, u32);

impl EnvelopeKind {
    fn adsr(&self) -> Adsr {
        match self {
            EnvelopeKind::Default => (0, 0, 15, 0),
            EnvelopeKind::Piano => (1, 3, 10, 2),
            EnvelopeKind::Pad => (5, 10, 8, 5),
            EnvelopeKind::Pluck => (0, 8, 0, 0),
            EnvelopeKind::Percussion => (0, 15, 0, 0),
        }
    }
}

/// Additive volume wobble: `sin(2π · offset / speed) · depth`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tremolo {
    pub speed: u32,
    pub depth: f32,
}

/// Periodic pitch-timer wobble, applied after an optional onset delay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vibrato {
    /// Frames per full cycle.
    pub speed: u32,
    /// Peak timer displacement in timer units.
    pub depth: f32,
    /// Frames to hold the note steady before the wobble starts.
    #[serde(default)]
    pub delay_frames: u32,
}

/// Per-note effect selections carried on mapped events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteEffects {
    /// Named duty sequence; overrides the channel's default duty per frame.
    pub duty_sequence: Option<String>,
    pub tremolo: Option<Tremolo>,
    pub vibrato: Option<Vibrato>,
}

impl NoteEffects {
    pub fn is_empty(&self) -> bool {
        self.duty_sequence.is_none() && self.tremolo.is_none() && self.vibrato.is_none()
    }
}

/// Signed timer displacement from vibrato at a frame offset. Zero during
/// the onset delay and without the effect.
pub fn pitch_modification(effects: &NoteEffects, frame_offset: u32) -> i16 {
    let Some(v) = effects.vibrato else {
        return 0;
    };
    if v.speed == 0 || frame_offset < v.delay_frames {
        return 0;
    }
    let phase =
        ((frame_offset - v.delay_frames) as f64 / v.speed as f64) * std::f64::consts::TAU;
    (phase.sin() * v.depth as f64).round() as i16
}

/// A named duty-cycle sequence: `(duty, frames)` runs that repeat.
struct DutySequence {
    name: &'static str,
    steps: &'static [(u8, u32)],
}

/// Tim Follin-style duty tricks. The cycle length of each sequence is the
/// sum of its run lengths.
static DUTY_SEQUENCES: &[DutySequence] = &[
    DutySequence {
        name: "follin_lead",
        steps: &[(2, 4), (1, 4), (2, 4), (3, 4)],
    },
    DutySequence {
        name: "follin_sweep",
        steps: &[(0, 2), (1, 2), (2, 2), (3, 2)],
    },
    DutySequence {
        name: "follin_pulse",
        steps: &[(2, 8), (3, 8)],
    },
];

const DEFAULT_DUTY: u8 = 2;

/// Volume (0..=15) of an envelope at `frame_offset` within a note lasting
/// `duration` frames.
///
/// Phases are laid out as attack, decay, sustain until `duration - release`,
/// then release down to zero. Offsets at or past the duration are silent.
pub fn envelope_volume(kind: EnvelopeKind, frame_offset: u32, duration: u32) -> u8 {
    if frame_offset >= duration {
        return 0;
    }

    let (attack, decay, sustain, release) = kind.adsr();
    let attack_end = attack;
    let decay_end = attack_end + decay;
    let sustain_end = duration.saturating_sub(release);

    if frame_offset < attack_end && attack > 0 {
        ((frame_offset * 15) / attack) as u8
    } else if frame_offset < decay_end && decay > 0 {
        let progress = (frame_offset - attack_end) as f64 / decay as f64;
        (15.0 - (15 - sustain) as f64 * progress) as u8
    } else if frame_offset < sustain_end {
        sustain
    } else if release == 0 || sustain_end >= duration {
        0
    } else {
        let progress = (frame_offset - sustain_end) as f64 / release as f64;
        (sustain as f64 * (1.0 - progress)) as u8
    }
}

/// Envelope volume with effects applied, clamped to the 4-bit range.
fn effected_volume(
    kind: EnvelopeKind,
    frame_offset: u32,
    duration: u32,
    effects: &NoteEffects,
) -> u8 {
    let base = envelope_volume(kind, frame_offset, duration) as f64;
    let modulated = match effects.tremolo {
        Some(t) if t.speed > 0 => {
            let phase = (frame_offset as f64 / t.speed as f64) * std::f64::consts::TAU;
            base + phase.sin() * t.depth as f64
        }
        _ => base,
    };
    modulated.clamp(0.0, 15.0) as u8
}

/// Duty value at `frame_offset` within a named sequence.
///
/// The sequence repeats with period equal to its total frame count; an
/// unknown name falls back to the default duty.
pub fn duty_from_sequence(name: &str, frame_offset: u32) -> u8 {
    let Some(seq) = DUTY_SEQUENCES.iter().find(|s| s.name == name) else {
        return DEFAULT_DUTY;
    };

    let cycle: u32 = seq.steps.iter().map(|&(_, frames)| frames).sum();
    if cycle == 0 {
        return DEFAULT_DUTY;
    }

    let mut position = frame_offset % cycle;
    for &(duty, frames) in seq.steps {
        if position < frames {
            return duty;
        }
        position -= frames;
    }
    DEFAULT_DUTY
}

/// Compose the $4000/$4004 control byte for a pulse-channel frame.
///
/// Layout is `DDLC VVVV`: duty in bits 6-7, bit 5 (length-counter halt) and
/// bit 4 (constant volume) always set so the hardware envelope stays out of
/// the way, volume in the low nibble. Velocity scales the envelope volume
/// in eighths and the result clamps to 15.
pub fn control_byte(
    kind: EnvelopeKind,
    frame_offset: u32,
    duration: u32,
    duty: u8,
    effects: &NoteEffects,
    velocity: u8,
) -> u8 {
    let duty = match &effects.duty_sequence {
        Some(name) => duty_from_sequence(name, frame_offset),
        None => duty,
    };

    let envelope = effected_volume(kind, frame_offset, duration, effects) as u32;
    let volume = (envelope * (velocity as u32 / 8)).min(15) as u8;

    ((duty & 0x03) << 6) | 0x30 | (volume & 0x0F)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_envelope_is_flat_fifteen() {
        for offset in 0..8 {
            assert_eq!(envelope_volume(EnvelopeKind::Default, offset, 8), 15);
        }
    }

    #[test]
    fn past_duration_is_silent() {
        assert_eq!(envelope_volume(EnvelopeKind::Default, 8, 8), 0);
        assert_eq!(envelope_volume(EnvelopeKind::Piano, 100, 8), 0);
    }

    #[test]
    fn piano_attacks_then_decays_to_sustain() {
        // attack=1, decay=3, sustain=10, release=2; duration long enough
        // that every phase is visible.
        let d = 20;
        assert_eq!(envelope_volume(EnvelopeKind::Piano, 0, d), 0); // ramping up
        assert_eq!(envelope_volume(EnvelopeKind::Piano, 1, d), 15); // decay start
        assert_eq!(envelope_volume(EnvelopeKind::Piano, 4, d), 10); // sustain
        assert_eq!(envelope_volume(EnvelopeKind::Piano, 10, d), 10);
    }

    #[test]
    fn pluck_decays_to_zero() {
        let d = 10;
        assert_eq!(envelope_volume(EnvelopeKind::Pluck, 0, d), 15);
        let mid = envelope_volume(EnvelopeKind::Pluck, 4, d);
        assert!(mid < 15 && mid > 0, "mid={mid}");
        assert_eq!(envelope_volume(EnvelopeKind::Pluck, 9, d), 0);
    }

    #[test]
    fn control_byte_default_duty2_full_velocity_region() {
        // Default envelope, velocity 100: 15 * 12 clamps to 15.
        let b = control_byte(EnvelopeKind::Default, 0, 4, 2, &NoteEffects::default(), 100);
        assert_eq!(b, 0xBF);
    }

    #[test]
    fn control_byte_clamps_at_velocity_127() {
        let b = control_byte(EnvelopeKind::Default, 0, 4, 2, &NoteEffects::default(), 127);
        assert_eq!(b & 0x0F, 15);
    }

    #[test]
    fn control_byte_silent_at_tiny_velocity() {
        // velocity < 8 scales everything to zero volume.
        let b = control_byte(EnvelopeKind::Default, 0, 4, 2, &NoteEffects::default(), 5);
        assert_eq!(b, 0xB0);
    }

    #[test]
    fn constant_volume_flag_always_set() {
        for velocity in [0u8, 1, 64, 127] {
            for duty in 0..4 {
                let b = control_byte(
                    EnvelopeKind::Piano,
                    2,
                    6,
                    duty,
                    &NoteEffects::default(),
                    velocity,
                );
                assert_eq!(b & 0x30, 0x30);
                assert_eq!(b >> 6, duty);
            }
        }
    }

    #[test]
    fn duty_sequence_walks_runs() {
        // follin_lead: 2,2,2,2, 1,1,1,1, 2,2,2,2, 3,3,3,3 then repeats
        assert_eq!(duty_from_sequence("follin_lead", 0), 2);
        assert_eq!(duty_from_sequence("follin_lead", 4), 1);
        assert_eq!(duty_from_sequence("follin_lead", 8), 2);
        assert_eq!(duty_from_sequence("follin_lead", 12), 3);
        assert_eq!(duty_from_sequence("follin_lead", 16), 2); // wrapped
    }

    #[test]
    fn unknown_sequence_defaults() {
        assert_eq!(duty_from_sequence("no_such_sequence", 7), 2);
    }

    #[test]
    fn duty_sequence_overrides_argument() {
        let effects = NoteEffects {
            duty_sequence: Some("follin_sweep".into()),
            ..Default::default()
        };
        let b = control_byte(EnvelopeKind::Default, 0, 4, 2, &effects, 127);
        assert_eq!(b >> 6, 0); // sweep starts at duty 0
    }

    #[test]
    fn vibrato_waits_out_its_delay() {
        let effects = NoteEffects {
            vibrato: Some(Vibrato {
                speed: 8,
                depth: 4.0,
                delay_frames: 4,
            }),
            ..Default::default()
        };
        for offset in 0..4 {
            assert_eq!(pitch_modification(&effects, offset), 0, "offset {offset}");
        }
        // Quarter cycle after the delay: full positive depth.
        assert_eq!(pitch_modification(&effects, 6), 4);
        // Three quarters: full negative depth.
        assert_eq!(pitch_modification(&effects, 10), -4);
    }

    #[test]
    fn no_vibrato_means_no_pitch_change() {
        assert_eq!(pitch_modification(&NoteEffects::default(), 17), 0);
    }

    #[test]
    fn tremolo_stays_in_range() {
        let effects = NoteEffects {
            tremolo: Some(Tremolo {
                speed: 4,
                depth: 8.0,
            }),
            ..Default::default()
        };
        for offset in 0..32 {
            let b = control_byte(EnvelopeKind::Default, offset, 32, 2, &effects, 127);
            assert!(b & 0x0F <= 15);
            assert_eq!(b & 0x30, 0x30);
        }
    }
}
