use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use midi_ingest::NoteEvent;

use crate::assign::MappedNote;
use crate::chord::{detect_chord, ChordType};

/// Musical flavor of arpeggio expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArpeggioStyle {
    Default,
    Heroic,
    Mysterious,
}

impl Default for ArpeggioStyle {
    fn default() -> Self {
        ArpeggioStyle::Default
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArpeggioPattern {
    Up,
    Down,
    UpDown,
    DownUp,
    Random,
}

/// Metadata attached to every note an arpeggio expansion produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArpeggioInfo {
    pub index: u8,
    pub total: u8,
    pub chord_type: ChordType,
}

/// Pattern for a chord quality under a style. Combinations the style table
/// does not cover fall back to a plain upward run.
pub fn pattern_for(chord_type: ChordType, style: ArpeggioStyle) -> ArpeggioPattern {
    use ArpeggioPattern::*;
    use ArpeggioStyle::*;

    match (chord_type, style) {
        (_, Mysterious) => Random,
        (ChordType::Major, Default) => Up,
        (ChordType::Major, Heroic) => UpDown,
        (ChordType::Minor, Default) => Down,
        (ChordType::Minor, Heroic) => DownUp,
        (ChordType::Augmented, Default) => UpDown,
        (ChordType::Diminished, Default) => DownUp,
        _ => Up,
    }
}

/// Expand sorted chord notes into a pattern sequence.
///
/// `up_down` and `down_up` revisit inner notes, so the output can be longer
/// than the chord; `random` is always a plain permutation with no
/// duplicates, seeded by the chord's frame so compiles are reproducible.
pub fn expand_pattern(notes: &[u8], pattern: ArpeggioPattern, frame: u32) -> Vec<u8> {
    if notes.len() <= 1 {
        return notes.to_vec();
    }

    match pattern {
        ArpeggioPattern::Up => notes.to_vec(),
        ArpeggioPattern::Down => notes.iter().rev().copied().collect(),
        ArpeggioPattern::UpDown => {
            let mut out = notes.to_vec();
            out.extend(notes[1..notes.len() - 1].iter().rev());
            out
        }
        ArpeggioPattern::DownUp => {
            let mut out: Vec<u8> = notes.iter().rev().copied().collect();
            out.extend(&notes[1..]);
            out
        }
        ArpeggioPattern::Random => {
            let mut rng = rand::rngs::StdRng::seed_from_u64(frame as u64);
            let mut out = notes.to_vec();
            out.shuffle(&mut rng);
            out
        }
    }
}

/// Convert chords in an event stream into arpeggio runs.
///
/// NoteOns are grouped per frame; a lone note passes through, while two or
/// more notes are truncated to `max_notes`, classified, and spread over
/// successive frames with the velocity easing off 5 per step. Returns the
/// expanded stream and the number of chords that were arpeggiated.
pub fn apply_arpeggio_fallback(
    events: &[NoteEvent],
    max_notes: usize,
    style: ArpeggioStyle,
) -> (Vec<MappedNote>, usize) {
    let mut grouped: BTreeMap<u32, Vec<u8>> = BTreeMap::new();
    for e in events {
        if e.is_on() {
            grouped.entry(e.frame).or_default().push(e.note);
        }
    }

    let mut out = Vec::new();
    let mut arpeggiated = 0;

    for (frame, mut notes) in grouped {
        notes.sort_unstable();
        notes.dedup();

        if notes.len() == 1 {
            out.push(MappedNote::plain(frame, notes[0], 100));
            continue;
        }
        notes.truncate(max_notes);

        let chord = detect_chord(&notes);
        let chord_type = chord.map(|c| c.chord_type).unwrap_or(ChordType::Unknown);
        let pattern = pattern_for(chord_type, style);
        let sequence = expand_pattern(&notes, pattern, frame);
        let total = sequence.len() as u8;
        arpeggiated += 1;

        for (i, note) in sequence.into_iter().enumerate() {
            let mut mapped =
                MappedNote::plain(frame + i as u32, note, 100u8.saturating_sub(5 * i as u8));
            mapped.arpeggio = Some(ArpeggioInfo {
                index: i as u8,
                total,
                chord_type,
            });
            out.push(mapped);
        }
    }

    out.sort_by_key(|n| n.frame);
    (out, arpeggiated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn style_table() {
        use ArpeggioPattern::*;
        assert_eq!(pattern_for(ChordType::Major, ArpeggioStyle::Default), Up);
        assert_eq!(pattern_for(ChordType::Minor, ArpeggioStyle::Default), Down);
        assert_eq!(
            pattern_for(ChordType::Augmented, ArpeggioStyle::Default),
            UpDown
        );
        assert_eq!(
            pattern_for(ChordType::Diminished, ArpeggioStyle::Default),
            DownUp
        );
        assert_eq!(pattern_for(ChordType::Major, ArpeggioStyle::Heroic), UpDown);
        assert_eq!(pattern_for(ChordType::Minor, ArpeggioStyle::Heroic), DownUp);
        assert_eq!(
            pattern_for(ChordType::Unknown, ArpeggioStyle::Mysterious),
            Random
        );
        // Combinations outside the table run upward.
        assert_eq!(pattern_for(ChordType::Augmented, ArpeggioStyle::Heroic), Up);
        assert_eq!(pattern_for(ChordType::Unknown, ArpeggioStyle::Default), Up);
    }

    #[test]
    fn pattern_shapes() {
        let notes = [60, 64, 67];
        assert_eq!(
            expand_pattern(&notes, ArpeggioPattern::Up, 0),
            vec![60, 64, 67]
        );
        assert_eq!(
            expand_pattern(&notes, ArpeggioPattern::Down, 0),
            vec![67, 64, 60]
        );
        assert_eq!(
            expand_pattern(&notes, ArpeggioPattern::UpDown, 0),
            vec![60, 64, 67, 64]
        );
        assert_eq!(
            expand_pattern(&notes, ArpeggioPattern::DownUp, 0),
            vec![67, 64, 60, 64, 67]
        );
    }

    #[test]
    fn random_is_a_permutation_and_deterministic() {
        let notes = [60, 64, 67];
        let a = expand_pattern(&notes, ArpeggioPattern::Random, 42);
        let b = expand_pattern(&notes, ArpeggioPattern::Random, 42);
        assert_eq!(a, b);

        let mut sorted = a.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![60, 64, 67]);
    }

    #[test]
    fn major_chord_expands_upward_with_decaying_velocity() {
        let events = vec![
            NoteEvent::on(0, 60, 100),
            NoteEvent::on(0, 64, 100),
            NoteEvent::on(0, 67, 100),
        ];
        let (mapped, arpeggiated) =
            apply_arpeggio_fallback(&events, 3, ArpeggioStyle::Default);

        assert_eq!(arpeggiated, 1);
        let shape: Vec<(u32, u8, u8)> =
            mapped.iter().map(|n| (n.frame, n.note, n.velocity)).collect();
        assert_eq!(shape, vec![(0, 60, 100), (1, 64, 95), (2, 67, 90)]);

        let info = mapped[0].arpeggio.unwrap();
        assert_eq!(info.chord_type, ChordType::Major);
        assert_eq!(info.total, 3);
    }

    #[test]
    fn single_notes_pass_through_unarpeggiated() {
        let events = vec![NoteEvent::on(0, 60, 90), NoteEvent::on(8, 62, 80)];
        let (mapped, arpeggiated) =
            apply_arpeggio_fallback(&events, 3, ArpeggioStyle::Default);

        assert_eq!(arpeggiated, 0);
        assert_eq!(mapped.len(), 2);
        assert!(mapped.iter().all(|n| n.arpeggio.is_none()));
    }

    #[test]
    fn chords_wider_than_max_notes_are_truncated() {
        let events = vec![
            NoteEvent::on(0, 60, 100),
            NoteEvent::on(0, 64, 100),
            NoteEvent::on(0, 67, 100),
            NoteEvent::on(0, 71, 100),
        ];
        let (mapped, _) = apply_arpeggio_fallback(&events, 3, ArpeggioStyle::Default);
        assert_eq!(mapped.len(), 3);
        assert!(mapped.iter().all(|n| n.note <= 67));
    }

    #[test]
    fn note_offs_are_dropped() {
        let events = vec![NoteEvent::on(0, 60, 100), NoteEvent::off(4, 60)];
        let (mapped, _) = apply_arpeggio_fallback(&events, 3, ArpeggioStyle::Default);
        assert_eq!(mapped.len(), 1);
    }
}
