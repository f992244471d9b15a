pub mod validate;

pub use validate::{validate_frames, FrameReport, ValidationIssue};

use serde::{Deserialize, Serialize};
use tracing::debug;

use dpcm_bank::DpcmEvent;
use nes_apu::{
    control_byte, pitch_modification, timer_for_note, ChannelFrames, ChannelKind, FrameMap,
    FrameRecord, NoiseMode,
};
use nes_apu::pitch::{MAX_TIMER, MIN_TIMER};
use track_map::{MappedNote, NesTracks};

/// Frame expansion knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Frames a note sustains when nothing interrupts it.
    pub sustain_frames: u32,
    /// Duty used for pulse notes without a duty sequence.
    pub default_duty: u8,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            sustain_frames: 4,
            default_duty: 2,
        }
    }
}

/// Diagnostics from frame compilation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompileStats {
    /// NoteOns whose pitch had no valid timer; dropped whole.
    pub pitch_out_of_range: u32,
    pub compiled_notes: u32,
}

/// Expands per-channel note events into dense frame records.
///
/// Each sounding note covers `[start, start + sustain_frames)`, trimmed at
/// the next event's frame: whatever comes next owns its start frame, and a
/// note-off cuts the tail the same way a new note does.
#[derive(Debug, Clone, Default)]
pub struct FrameCompiler {
    config: CompilerConfig,
}

impl FrameCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    /// Compile every channel of a mapped song.
    pub fn compile(&self, tracks: &NesTracks) -> (ChannelFrames, CompileStats) {
        let mut stats = CompileStats::default();
        let mut frames = ChannelFrames::new();

        frames.insert(
            ChannelKind::Pulse1,
            self.compile_tonal(&tracks.pulse1, ChannelKind::Pulse1, &mut stats),
        );
        frames.insert(
            ChannelKind::Pulse2,
            self.compile_tonal(&tracks.pulse2, ChannelKind::Pulse2, &mut stats),
        );
        frames.insert(
            ChannelKind::Triangle,
            self.compile_tonal(&tracks.triangle, ChannelKind::Triangle, &mut stats),
        );
        frames.insert(ChannelKind::Noise, compile_noise(&tracks.noise));
        frames.insert(ChannelKind::Dpcm, compile_dpcm(&tracks.dpcm));

        (frames, stats)
    }

    /// Expand one tonal channel's events.
    pub fn compile_tonal(
        &self,
        events: &[MappedNote],
        kind: ChannelKind,
        stats: &mut CompileStats,
    ) -> FrameMap {
        let mut events: Vec<&MappedNote> = events.iter().collect();
        events.sort_by_key(|e| e.frame);

        let mut map = FrameMap::new();

        for (i, event) in events.iter().enumerate() {
            if event.velocity == 0 {
                continue;
            }

            let start = event.frame;
            let mut end = start + self.config.sustain_frames;
            // The next event (on or off) claims its own start frame.
            if let Some(next) = events[i + 1..].iter().find(|n| n.frame > start) {
                end = end.min(next.frame);
            }

            let timer = match timer_for_note(event.note, kind) {
                Ok(timer) => timer,
                Err(e) => {
                    debug!(note = event.note, %kind, error = %e, "dropping unplayable note");
                    stats.pitch_out_of_range += 1;
                    continue;
                }
            };

            let volume = (event.velocity / 8).min(15);
            for frame in start..end {
                let offset = frame - start;
                let wobble = pitch_modification(&event.effects, offset);
                let timer = (timer as i32 + wobble as i32)
                    .clamp(MIN_TIMER as i32, MAX_TIMER as i32) as u16;
                let record = if kind.is_pulse() {
                    FrameRecord::Pulse {
                        note: event.note,
                        timer,
                        control: control_byte(
                            event.envelope,
                            offset,
                            end - start,
                            self.config.default_duty,
                            &event.effects,
                            event.velocity,
                        ),
                        volume,
                    }
                } else {
                    FrameRecord::Triangle {
                        note: event.note,
                        timer,
                        volume,
                    }
                };
                map.insert(frame, record);
            }
            stats.compiled_notes += 1;
        }

        map
    }
}

/// Noise strikes map one-to-one: full volume while struck, an explicit
/// zero-volume record when a silent strike stops the channel.
fn compile_noise(events: &[MappedNote]) -> FrameMap {
    let mut map = FrameMap::new();
    for e in events {
        map.insert(
            e.frame,
            FrameRecord::Noise {
                mode: NoiseMode::White,
                volume: if e.velocity > 0 { 15 } else { 0 },
            },
        );
    }
    map
}

fn compile_dpcm(events: &[DpcmEvent]) -> FrameMap {
    let mut map = FrameMap::new();
    for e in events {
        map.insert(
            e.frame,
            FrameRecord::Dpcm {
                sample_id: e.sample_id,
                enabled: e.velocity > 0,
            },
        );
    }
    map
}
