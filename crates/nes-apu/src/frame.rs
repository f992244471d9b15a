use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelKind, NoiseMode};

/// Linear-counter byte for the triangle channel.
///
/// Volume 0 MUST produce 0x00: writing 0x80 with a zero count still reloads
/// the counter and the triangle drones on. Nonzero volumes set the control
/// flag and scale the reload value so louder notes ring longer.
pub fn triangle_control(volume: u8) -> u8 {
    if volume == 0 {
        0x00
    } else {
        0x80 | (volume.min(15) * 7)
    }
}

/// One non-silent frame on one channel. Frames absent from a [`FrameMap`]
/// are silence and are emitted as the channel's quiet byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameRecord {
    Pulse {
        note: u8,
        /// 11-bit APU timer.
        timer: u16,
        /// `DDLC VVVV` control byte, constant-volume flag set.
        control: u8,
        /// 0..=15, kept beside the control byte for pattern matching and
        /// text exports.
        volume: u8,
    },
    Triangle {
        note: u8,
        timer: u16,
        volume: u8,
    },
    Noise {
        mode: NoiseMode,
        volume: u8,
    },
    Dpcm {
        sample_id: u8,
        enabled: bool,
    },
}

impl FrameRecord {
    /// MIDI note for tonal records, 0 otherwise (the emitter's note tables
    /// use 0 as the rest marker).
    pub fn note(&self) -> u8 {
        match self {
            FrameRecord::Pulse { note, .. } | FrameRecord::Triangle { note, .. } => *note,
            FrameRecord::Noise { .. } | FrameRecord::Dpcm { .. } => 0,
        }
    }

    pub fn volume(&self) -> u8 {
        match self {
            FrameRecord::Pulse { volume, .. }
            | FrameRecord::Triangle { volume, .. }
            | FrameRecord::Noise { volume, .. } => *volume,
            FrameRecord::Dpcm { enabled, .. } => {
                if *enabled {
                    15
                } else {
                    0
                }
            }
        }
    }
}

/// Dense frame index → record map for a single channel.
pub type FrameMap = BTreeMap<u32, FrameRecord>;

/// The compiled output of the frame compiler: one map per channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelFrames {
    pub channels: BTreeMap<ChannelKind, FrameMap>,
}

impl ChannelFrames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self, kind: ChannelKind) -> Option<&FrameMap> {
        self.channels.get(&kind)
    }

    pub fn insert(&mut self, kind: ChannelKind, frames: FrameMap) {
        self.channels.insert(kind, frames);
    }

    /// Highest frame index across every channel, if any frame exists.
    pub fn max_frame(&self) -> Option<u32> {
        self.channels
            .values()
            .filter_map(|m| m.keys().next_back().copied())
            .max()
    }

    /// Total number of populated (non-silent) frames across all channels.
    pub fn populated_len(&self) -> usize {
        self.channels.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.values().all(|m| m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn triangle_control_table() {
        // The volume-0 row is the one that bites: 0x80 there leaves the
        // linear counter reloading forever.
        for (volume, expected) in [(0u8, 0x00u8), (1, 0x87), (5, 0xA3), (10, 0xC6), (15, 0xE9)] {
            assert_eq!(triangle_control(volume), expected, "volume {volume}");
        }
    }

    #[test]
    fn triangle_control_nonzero_always_has_flag() {
        for volume in 1..=15u8 {
            assert_eq!(triangle_control(volume) & 0x80, 0x80);
        }
    }

    #[test]
    fn max_frame_spans_channels() {
        let mut frames = ChannelFrames::new();
        let mut pulse = FrameMap::new();
        pulse.insert(
            10,
            FrameRecord::Pulse {
                note: 60,
                timer: 427,
                control: 0xBF,
                volume: 12,
            },
        );
        let mut noise = FrameMap::new();
        noise.insert(
            25,
            FrameRecord::Noise {
                mode: NoiseMode::White,
                volume: 15,
            },
        );
        frames.insert(ChannelKind::Pulse1, pulse);
        frames.insert(ChannelKind::Noise, noise);

        assert_eq!(frames.max_frame(), Some(25));
        assert_eq!(frames.populated_len(), 2);
    }

    #[test]
    fn empty_channel_frames() {
        let frames = ChannelFrames::new();
        assert_eq!(frames.max_frame(), None);
        assert!(frames.is_empty());
    }
}
