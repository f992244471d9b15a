use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use dpcm_bank::{DpcmEvent, DrumMapper, SampleManager};
use midi_ingest::{GmFamily, NoteEvent, TrackProfile};
use nes_apu::{EnvelopeKind, NoteEffects};

use crate::arpeggio::{apply_arpeggio_fallback, ArpeggioInfo, ArpeggioStyle};

/// Envelope shape for a General MIDI program, by family.
pub fn envelope_for_program(program: u8) -> EnvelopeKind {
    use GmFamily::*;
    match midi_ingest::family(program) {
        Piano => EnvelopeKind::Piano,
        ChromaticPercussion | Guitar | Bass | Ethnic => EnvelopeKind::Pluck,
        Organ | Strings | Ensemble | Pipe | SynthPad => EnvelopeKind::Pad,
        Percussive => EnvelopeKind::Percussion,
        Brass | Reed | SynthLead | SynthEffects | SoundEffects => EnvelopeKind::Default,
    }
}

/// A note event bound for one NES channel, carrying the expression data the
/// frame compiler needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedNote {
    pub frame: u32,
    pub note: u8,
    /// 0 marks a note-off; the frame compiler only trims on it.
    pub velocity: u8,
    pub envelope: EnvelopeKind,
    pub effects: NoteEffects,
    pub arpeggio: Option<ArpeggioInfo>,
}

impl MappedNote {
    pub fn plain(frame: u32, note: u8, velocity: u8) -> Self {
        Self {
            frame,
            note,
            velocity,
            envelope: EnvelopeKind::Default,
            effects: NoteEffects::default(),
            arpeggio: None,
        }
    }

    fn from_event(e: &NoteEvent) -> Self {
        Self::plain(e.frame, e.note, e.velocity)
    }
}

/// How the mapper carved the input into channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    /// One polyphonic source split by pitch register.
    PitchSplit,
    /// Multiple sources ranked by average pitch.
    TrackRanking,
}

/// Mapping diagnostics; the mapper itself never fails.
#[derive(Debug, Clone, Serialize)]
pub struct MappingSummary {
    pub split_mode: SplitMode,
    /// Events discarded with no channel assignment (note-offs shed during
    /// splitting included).
    pub dropped_events: usize,
    pub arpeggiated_chords: usize,
    /// Source tracks with no sounding notes.
    pub silent_tracks: usize,
    pub pulse1_events: usize,
    pub pulse2_events: usize,
    pub triangle_events: usize,
    pub noise_events: usize,
    pub dpcm_events: usize,
}

/// Events assigned to the five NES channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NesTracks {
    pub pulse1: Vec<MappedNote>,
    pub pulse2: Vec<MappedNote>,
    pub triangle: Vec<MappedNote>,
    pub noise: Vec<MappedNote>,
    pub dpcm: Vec<DpcmEvent>,
}

fn average_pitch(events: &[NoteEvent]) -> Option<f64> {
    let notes: Vec<f64> = events
        .iter()
        .filter(|e| e.is_on())
        .map(|e| e.note as f64)
        .collect();
    if notes.is_empty() {
        None
    } else {
        Some(notes.iter().sum::<f64>() / notes.len() as f64)
    }
}

/// Split one polyphonic track by register: melody on pulse1 (>= 60),
/// harmony on pulse2 (48..60), bass on the triangle (< 48). Note-offs are
/// shed here; sustain rules re-create the durations.
fn split_polyphonic(events: &[NoteEvent], tracks: &mut NesTracks, dropped: &mut usize) {
    for e in events {
        if !e.is_on() {
            *dropped += 1;
            continue;
        }
        let target = if e.note >= 60 {
            &mut tracks.pulse1
        } else if e.note >= 48 {
            &mut tracks.pulse2
        } else {
            &mut tracks.triangle
        };
        target.push(MappedNote::from_event(e));
    }
}

/// Set every note's envelope from the track's first program selection.
fn apply_track_envelope(notes: &mut [MappedNote], profile: Option<&TrackProfile>) {
    let Some(program) = profile.and_then(|p| p.programs.first().copied()) else {
        return;
    };
    let envelope = envelope_for_program(program);
    for note in notes {
        note.envelope = envelope;
    }
}

/// Assign source tracks to the five NES channels.
///
/// Percussion tracks (GM channel 10) sit out the tonal assignment. A
/// single melodic source is pitch-split; several are ranked by average
/// pitch (melody highest), with each track's envelope chosen from its
/// program. The drum mapper always runs — over the percussion tracks when
/// any are flagged, over everything otherwise — and its DPCM events
/// replace any melodic DPCM fallback, while its noise events fill the
/// noise channel when nothing else claimed it.
pub fn assign_tracks(
    events: &BTreeMap<String, Vec<NoteEvent>>,
    profiles: &BTreeMap<String, TrackProfile>,
    drums: &DrumMapper,
    bank: &mut SampleManager,
    style: ArpeggioStyle,
) -> (NesTracks, MappingSummary) {
    let mut tracks = NesTracks::default();
    let mut dropped = 0usize;
    let mut arpeggiated = 0usize;
    let mut silent_tracks = 0usize;

    let is_percussion =
        |name: &String| profiles.get(name).is_some_and(|p| p.is_percussion);
    let melodic: Vec<&String> = events.keys().filter(|n| !is_percussion(n)).collect();
    let any_percussion = melodic.len() != events.len();

    let split_mode = if melodic.len() == 1 {
        let name = melodic[0];
        let track = &events[name];
        debug!(track = %name, events = track.len(), "single polyphonic track, splitting by register");
        split_polyphonic(track, &mut tracks, &mut dropped);
        for channel in [&mut tracks.pulse1, &mut tracks.pulse2, &mut tracks.triangle] {
            apply_track_envelope(channel, profiles.get(name));
        }
        SplitMode::PitchSplit
    } else {
        let mut ranked: Vec<(&String, f64)> = Vec::new();
        for &name in &melodic {
            match average_pitch(&events[name]) {
                Some(avg) => ranked.push((name, avg)),
                None => silent_tracks += 1,
            }
        }
        // Highest average pitch first; name breaks ties deterministically.
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        let mut ranked: std::collections::VecDeque<&String> =
            ranked.into_iter().map(|(name, _)| name).collect();

        if let Some(name) = ranked.pop_front() {
            tracks.pulse1 = events[name].iter().map(MappedNote::from_event).collect();
            apply_track_envelope(&mut tracks.pulse1, profiles.get(name));
        }
        if let Some(name) = ranked.pop_front() {
            let (mut mapped, count) = apply_arpeggio_fallback(&events[name], 3, style);
            apply_track_envelope(&mut mapped, profiles.get(name));
            arpeggiated += count;
            tracks.pulse2 = mapped;
        }
        if let Some(name) = ranked.pop_back() {
            tracks.triangle = events[name].iter().map(MappedNote::from_event).collect();
            apply_track_envelope(&mut tracks.triangle, profiles.get(name));
        }
        for name in ranked {
            if name.to_lowercase().contains("drum") {
                tracks.noise = events[name].iter().map(MappedNote::from_event).collect();
            } else if tracks.dpcm.is_empty() {
                // Melodic fallback onto DPCM; the drum mapper usually
                // replaces this with real sample triggers.
                tracks.dpcm = events[name]
                    .iter()
                    .filter(|e| e.is_on())
                    .map(|e| DpcmEvent {
                        frame: e.frame,
                        sample_id: 0,
                        velocity: e.velocity,
                    })
                    .collect();
            } else {
                dropped += events[name].len();
            }
        }
        SplitMode::TrackRanking
    };

    // Drum pass: the flagged percussion tracks when the file marks any,
    // the whole input otherwise.
    let mut drum_tracks = BTreeMap::new();
    for (name, track) in events {
        if any_percussion && !is_percussion(name) {
            continue;
        }
        let hits: Vec<dpcm_bank::drums::DrumHit> = track
            .iter()
            .filter(|e| e.is_on())
            .map(|e| dpcm_bank::drums::DrumHit {
                frame: e.frame,
                note: e.note,
                velocity: e.velocity,
            })
            .collect();
        if !hits.is_empty() {
            drum_tracks.insert(name.clone(), hits);
        }
    }
    let (dpcm_events, noise_events) = drums.map(&drum_tracks, bank);

    if !dpcm_events.is_empty() {
        tracks.dpcm = dpcm_events;
    }
    if tracks.noise.is_empty() && !noise_events.is_empty() {
        tracks.noise = noise_events
            .iter()
            .map(|e| MappedNote::plain(e.frame, 0, e.velocity))
            .collect();
    }

    for channel in [
        &mut tracks.pulse1,
        &mut tracks.pulse2,
        &mut tracks.triangle,
        &mut tracks.noise,
    ] {
        channel.sort_by_key(|n| n.frame);
    }

    let summary = MappingSummary {
        split_mode,
        dropped_events: dropped,
        arpeggiated_chords: arpeggiated,
        silent_tracks,
        pulse1_events: tracks.pulse1.len(),
        pulse2_events: tracks.pulse2.len(),
        triangle_events: tracks.triangle.len(),
        noise_events: tracks.noise.len(),
        dpcm_events: tracks.dpcm.len(),
    };
    (tracks, summary)
}
