use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use midly::{MetaMessage, MidiMessage, Smf, TrackEventKind};
use serde::Serialize;
use tracing::{debug, warn};

use tempo_map::{TempoChange, TempoMap, DEFAULT_TEMPO};

use crate::event::{NoteEvent, NoteKind};
use crate::{IngestError, Result};

/// Per-file ingestion diagnostics. Nothing is dropped without a count here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Tempo cues rejected by tempo map validation and skipped.
    pub invalid_tempo_changes: u32,
    /// Events that could not be interpreted (e.g. a NoteOff with no
    /// matching NoteOn) and were dropped.
    pub malformed_events: u32,
    /// Note events that survived into the output.
    pub note_events: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MidiMetadata {
    pub ticks_per_quarter: u32,
    pub track_names: Vec<String>,
}

/// Structural facts about one source track the channel mapper can use.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackProfile {
    /// MIDI channels this track's messages use, sorted.
    pub channels: Vec<u8>,
    /// Programs selected on the track, in order of first appearance.
    pub programs: Vec<u8>,
    /// Channel 10 (index 9) is the General MIDI percussion channel.
    pub is_percussion: bool,
    pub note_count: usize,
}

impl TrackProfile {
    fn absorb(&mut self, other: TrackProfile) {
        for ch in other.channels {
            if !self.channels.contains(&ch) {
                self.channels.push(ch);
            }
        }
        self.channels.sort_unstable();
        for p in other.programs {
            if !self.programs.contains(&p) {
                self.programs.push(p);
            }
        }
        self.is_percussion = self.is_percussion || other.is_percussion;
        self.note_count += other.note_count;
    }
}

/// The boundary handed to the compiler core: frame-stamped events grouped
/// by sanitized track name, plus the tempo map that stamped them.
#[derive(Debug, Serialize)]
pub struct ParsedMidi {
    pub events: BTreeMap<String, Vec<NoteEvent>>,
    pub profiles: BTreeMap<String, TrackProfile>,
    pub metadata: MidiMetadata,
    pub tempo_map: TempoMap,
    pub stats: IngestStats,
}

/// Parse a MIDI file from disk.
pub fn parse_midi(path: impl AsRef<Path>) -> Result<ParsedMidi> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| IngestError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let smf = Smf::parse(&bytes).map_err(|e| IngestError::MalformedFile(e.to_string()))?;
    parse_smf(&smf)
}

/// Parse an in-memory SMF.
///
/// Two passes: tempo metas first so every note can be frame-stamped against
/// the complete map, then the notes themselves. Invalid tempo cues are
/// counted and skipped; the tempo map itself never drops one silently.
pub fn parse_smf(smf: &Smf) -> Result<ParsedMidi> {
    let ticks_per_quarter = match smf.header.timing {
        midly::Timing::Metrical(ticks) => ticks.as_int() as u32,
        midly::Timing::Timecode(_, _) => return Err(IngestError::TimecodeTiming),
    };

    let mut stats = IngestStats::default();
    let mut tempo_map = TempoMap::new(DEFAULT_TEMPO, ticks_per_quarter);

    for track in &smf.tracks {
        let mut current_tick: u64 = 0;
        for event in track {
            current_tick += event.delta.as_int() as u64;
            if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                let change = TempoChange::immediate(current_tick, tempo.as_int());
                if let Err(e) = tempo_map.add_tempo_change(change) {
                    warn!(tick = current_tick, error = %e, "skipping invalid tempo cue");
                    stats.invalid_tempo_changes += 1;
                }
            }
        }
    }

    let mut events: BTreeMap<String, Vec<NoteEvent>> = BTreeMap::new();
    let mut profiles: BTreeMap<String, TrackProfile> = BTreeMap::new();
    let mut track_names = Vec::new();

    for (track_index, track) in smf.tracks.iter().enumerate() {
        let mut current_tick: u64 = 0;
        let mut name = format!("track_{track_index}");
        let mut named = false;
        let mut track_events = Vec::new();
        let mut profile = TrackProfile::default();
        // Pitches currently sounding, to spot orphan NoteOffs.
        let mut active: HashMap<u8, u32> = HashMap::new();

        for event in track {
            current_tick += event.delta.as_int() as u64;

            match event.kind {
                TrackEventKind::Meta(MetaMessage::TrackName(raw)) => {
                    if !named {
                        if let Some(sanitized) = sanitize_track_name(raw) {
                            name = sanitized;
                            named = true;
                        }
                    }
                }
                TrackEventKind::Midi { channel, message } => {
                    let ch = channel.as_int();
                    if !profile.channels.contains(&ch) {
                        profile.channels.push(ch);
                    }
                    if let MidiMessage::ProgramChange { program } = message {
                        let program = program.as_int();
                        if !profile.programs.contains(&program) {
                            profile.programs.push(program);
                        }
                    }
                    let frame = tempo_map.frame_for_tick(current_tick);
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            let note = key.as_int();
                            *active.entry(note).or_insert(0) += 1;
                            track_events.push(NoteEvent {
                                frame,
                                tick: current_tick,
                                note,
                                velocity: vel.as_int(),
                                kind: NoteKind::On,
                            });
                            stats.note_events += 1;
                        }
                        // NoteOn with velocity 0 is a NoteOff by convention.
                        MidiMessage::NoteOff { key, .. } | MidiMessage::NoteOn { key, .. } => {
                            let note = key.as_int();
                            match active.get_mut(&note) {
                                Some(count) if *count > 0 => {
                                    *count -= 1;
                                    track_events.push(NoteEvent {
                                        frame,
                                        tick: current_tick,
                                        note,
                                        velocity: 0,
                                        kind: NoteKind::Off,
                                    });
                                    stats.note_events += 1;
                                }
                                _ => {
                                    debug!(note, tick = current_tick, "NoteOff without NoteOn");
                                    stats.malformed_events += 1;
                                }
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        if !track_events.is_empty() {
            profile.channels.sort_unstable();
            profile.is_percussion = profile.channels.contains(&9);
            profile.note_count = track_events.iter().filter(|e| e.is_on()).count();

            track_names.push(name.clone());
            events.entry(name.clone()).or_default().extend(track_events);
            profiles.entry(name).or_default().absorb(profile);
        }
    }

    for track in events.values_mut() {
        track.sort_by_key(|e| (e.tick, e.note));
    }

    Ok(ParsedMidi {
        events,
        profiles,
        metadata: MidiMetadata {
            ticks_per_quarter,
            track_names,
        },
        tempo_map,
        stats,
    })
}

/// Reduce a raw track name to an ASCII identifier: whitespace becomes
/// underscores, anything else non-alphanumeric is dropped.
fn sanitize_track_name(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let mut out = String::with_capacity(text.len());
    for c in text.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else if c.is_whitespace() {
            out.push('_');
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::num::{u15, u24, u28, u4, u7};
    use midly::{Format, Header, Timing, TrackEvent};
    use pretty_assertions::assert_eq;

    fn note_on(delta: u32, note: u8, vel: u8) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOn {
                    key: u7::new(note),
                    vel: u7::new(vel),
                },
            },
        }
    }

    fn note_off(delta: u32, note: u8) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOff {
                    key: u7::new(note),
                    vel: u7::new(0),
                },
            },
        }
    }

    fn tempo(delta: u32, us_per_quarter: u32) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(us_per_quarter))),
        }
    }

    fn smf(tracks: Vec<Vec<TrackEvent<'static>>>) -> Smf<'static> {
        let mut smf = Smf::new(Header::new(
            Format::Parallel,
            Timing::Metrical(u15::new(480)),
        ));
        smf.tracks = tracks;
        smf
    }

    #[test]
    fn frames_follow_default_tempo() {
        let parsed = parse_smf(&smf(vec![vec![
            note_on(0, 60, 100),
            note_off(480, 60),
        ]]))
        .unwrap();

        let events = &parsed.events["track_0"];
        assert_eq!(events[0].frame, 0);
        assert_eq!(events[1].frame, 30); // one quarter at 120 BPM
        assert_eq!(parsed.stats.note_events, 2);
    }

    #[test]
    fn velocity_zero_note_on_becomes_off() {
        let parsed = parse_smf(&smf(vec![vec![
            note_on(0, 60, 100),
            note_on(240, 60, 0),
        ]]))
        .unwrap();

        let events = &parsed.events["track_0"];
        assert_eq!(events[1].kind, NoteKind::Off);
        assert_eq!(events[1].velocity, 0);
    }

    #[test]
    fn track_names_are_sanitized() {
        let name_event = TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(b"Lead Guitar!")),
        };
        let parsed = parse_smf(&smf(vec![vec![
            name_event,
            note_on(0, 72, 90),
            note_off(120, 72),
        ]]))
        .unwrap();

        assert!(parsed.events.contains_key("Lead_Guitar"));
        assert_eq!(parsed.metadata.track_names, vec!["Lead_Guitar".to_string()]);
    }

    #[test]
    fn invalid_tempo_is_counted_not_fatal() {
        // 2_000_000 us/quarter = 30 BPM, below the 40 BPM floor.
        let parsed = parse_smf(&smf(vec![vec![
            tempo(0, 2_000_000),
            note_on(0, 60, 100),
            note_off(480, 60),
        ]]))
        .unwrap();

        assert_eq!(parsed.stats.invalid_tempo_changes, 1);
        // Default tempo still applies.
        assert_eq!(parsed.events["track_0"][1].frame, 30);
    }

    #[test]
    fn orphan_note_off_is_malformed() {
        let parsed = parse_smf(&smf(vec![vec![note_off(0, 60), note_on(10, 62, 80)]])).unwrap();
        assert_eq!(parsed.stats.malformed_events, 1);
        assert_eq!(parsed.events["track_0"].len(), 1);
    }

    #[test]
    fn valid_tempo_changes_take_effect() {
        let parsed = parse_smf(&smf(vec![vec![
            tempo(0, 250_000),
            note_on(0, 60, 100),
            note_off(480, 60),
        ]]))
        .unwrap();

        // 240 BPM: a quarter note is 15 frames.
        assert_eq!(parsed.events["track_0"][1].frame, 15);
    }

    #[test]
    fn tempo_track_governs_other_tracks_in_parallel_format() {
        // Format-1 files carry tempo in a conductor track; notes in later
        // tracks must still be stamped against it.
        let parsed = parse_smf(&smf(vec![
            vec![tempo(0, 250_000)],
            vec![note_on(0, 60, 100), note_off(480, 60)],
        ]))
        .unwrap();

        assert_eq!(parsed.events["track_1"][1].frame, 15);
    }

    #[test]
    fn profiles_capture_channels_programs_and_percussion() {
        let program_change = TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::ProgramChange {
                    program: u7::new(33),
                },
            },
        };
        let drum_hit = TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Midi {
                channel: u4::new(9),
                message: MidiMessage::NoteOn {
                    key: u7::new(36),
                    vel: u7::new(100),
                },
            },
        };

        let parsed = parse_smf(&smf(vec![
            vec![program_change, note_on(0, 40, 90), note_off(120, 40)],
            vec![drum_hit],
        ]))
        .unwrap();

        let melodic = &parsed.profiles["track_0"];
        assert_eq!(melodic.programs, vec![33]);
        assert!(!melodic.is_percussion);
        assert_eq!(melodic.note_count, 1);

        let drums = &parsed.profiles["track_1"];
        assert!(drums.is_percussion);
        assert_eq!(drums.channels, vec![9]);
    }

    #[test]
    fn empty_tracks_are_skipped() {
        let parsed = parse_smf(&smf(vec![vec![tempo(0, 400_000)], vec![
            note_on(0, 60, 100),
            note_off(240, 60),
        ]]))
        .unwrap();

        assert_eq!(parsed.events.len(), 1);
        assert!(parsed.events.contains_key("track_1"));
    }
}
