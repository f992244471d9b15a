use std::fmt;

use serde::Serialize;

use nes_apu::pitch::{MAX_TIMER, MIN_TIMER};
use nes_apu::{ChannelFrames, ChannelKind, FrameRecord};

/// A single suspicious frame record found during validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub channel: ChannelKind,
    pub frame: u32,
    pub problem: Problem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Problem {
    TimerOutOfRange { timer: u16 },
    VolumeOutOfRange { volume: u8 },
    /// Pulse control byte without the constant-volume/halt bits.
    BadControlFlags { control: u8 },
    /// A triangle record with volume 0: silence should be an absent frame,
    /// not a record, or the emitter risks a non-zero linear counter byte.
    ExplicitTriangleSilence,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} frame {}: ", self.channel, self.frame)?;
        match self.problem {
            Problem::TimerOutOfRange { timer } => write!(f, "timer {timer} outside 8..=2047"),
            Problem::VolumeOutOfRange { volume } => write!(f, "volume {volume} above 15"),
            Problem::BadControlFlags { control } => {
                write!(f, "control byte {control:#04X} lacks the $30 flags")
            }
            Problem::ExplicitTriangleSilence => write!(f, "explicit zero-volume triangle record"),
        }
    }
}

/// Structural summary of a compiled song.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameReport {
    pub total_frames: usize,
    pub populated_frames: usize,
    /// `(channel, populated, first_frame, last_frame)` per non-empty channel.
    pub channels: Vec<(ChannelKind, usize, u32, u32)>,
    pub issues: Vec<ValidationIssue>,
}

impl FrameReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Check every compiled frame record against the hardware's ranges.
///
/// The compiler upholds these by construction; the check exists so a bad
/// upstream change surfaces as a diagnostic instead of a corrupted table.
pub fn validate_frames(frames: &ChannelFrames) -> FrameReport {
    let mut report = FrameReport {
        total_frames: frames.max_frame().map(|f| f as usize + 1).unwrap_or(0),
        populated_frames: frames.populated_len(),
        ..Default::default()
    };

    for (&channel, map) in &frames.channels {
        if map.is_empty() {
            continue;
        }
        let first = *map.keys().next().expect("non-empty");
        let last = *map.keys().next_back().expect("non-empty");
        report.channels.push((channel, map.len(), first, last));

        for (&frame, record) in map {
            let mut push = |problem| {
                report.issues.push(ValidationIssue {
                    channel,
                    frame,
                    problem,
                })
            };

            match record {
                FrameRecord::Pulse {
                    timer,
                    control,
                    volume,
                    ..
                } => {
                    if !(MIN_TIMER..=MAX_TIMER).contains(timer) {
                        push(Problem::TimerOutOfRange { timer: *timer });
                    }
                    if control & 0x30 != 0x30 {
                        push(Problem::BadControlFlags { control: *control });
                    }
                    if *volume > 15 {
                        push(Problem::VolumeOutOfRange { volume: *volume });
                    }
                }
                FrameRecord::Triangle { timer, volume, .. } => {
                    if !(MIN_TIMER..=MAX_TIMER).contains(timer) {
                        push(Problem::TimerOutOfRange { timer: *timer });
                    }
                    if *volume > 15 {
                        push(Problem::VolumeOutOfRange { volume: *volume });
                    } else if *volume == 0 {
                        push(Problem::ExplicitTriangleSilence);
                    }
                }
                FrameRecord::Noise { volume, .. } => {
                    if *volume > 15 {
                        push(Problem::VolumeOutOfRange { volume: *volume });
                    }
                }
                FrameRecord::Dpcm { .. } => {}
            }
        }
    }

    report
}
