use serde::{Deserialize, Serialize};

/// Triad qualities the arpeggiator distinguishes. Anything that is not a
/// recognizable three-note stack is `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChordType {
    Major,
    Minor,
    Augmented,
    Diminished,
    Unknown,
}

impl std::fmt::Display for ChordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChordType::Major => "major",
            ChordType::Minor => "minor",
            ChordType::Augmented => "augmented",
            ChordType::Diminished => "diminished",
            ChordType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chord {
    pub chord_type: ChordType,
    /// Lowest note of the stack.
    pub root: u8,
}

/// Classify a set of simultaneous notes by the intervals of its sorted
/// pitches: {4,3} major, {3,4} minor, {4,4} augmented, {3,3} diminished.
///
/// Fewer than two notes is no chord at all; anything else unrecognized is
/// `Unknown` rooted at the lowest note.
pub fn detect_chord(notes: &[u8]) -> Option<Chord> {
    if notes.len() < 2 {
        return None;
    }

    let mut sorted = notes.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let root = sorted[0];

    if sorted.len() == 3 {
        let intervals = [sorted[1] - sorted[0], sorted[2] - sorted[1]];
        let chord_type = match intervals {
            [4, 3] => ChordType::Major,
            [3, 4] => ChordType::Minor,
            [4, 4] => ChordType::Augmented,
            [3, 3] => ChordType::Diminished,
            _ => ChordType::Unknown,
        };
        return Some(Chord { chord_type, root });
    }

    Some(Chord {
        chord_type: ChordType::Unknown,
        root,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn triad_qualities() {
        assert_eq!(
            detect_chord(&[60, 64, 67]).unwrap().chord_type,
            ChordType::Major
        );
        assert_eq!(
            detect_chord(&[60, 63, 67]).unwrap().chord_type,
            ChordType::Minor
        );
        assert_eq!(
            detect_chord(&[60, 64, 68]).unwrap().chord_type,
            ChordType::Augmented
        );
        assert_eq!(
            detect_chord(&[60, 63, 66]).unwrap().chord_type,
            ChordType::Diminished
        );
    }

    #[test]
    fn order_does_not_matter() {
        let chord = detect_chord(&[67, 60, 64]).unwrap();
        assert_eq!(chord.chord_type, ChordType::Major);
        assert_eq!(chord.root, 60);
    }

    #[test]
    fn unrecognized_stacks_are_unknown() {
        assert_eq!(
            detect_chord(&[60, 62, 67]).unwrap().chord_type,
            ChordType::Unknown
        );
        // Dyads carry a root but no quality.
        assert_eq!(
            detect_chord(&[60, 67]).unwrap().chord_type,
            ChordType::Unknown
        );
        // Four-note stacks are out of scope for the triad table.
        assert_eq!(
            detect_chord(&[60, 64, 67, 71]).unwrap().chord_type,
            ChordType::Unknown
        );
    }

    #[test]
    fn single_note_is_no_chord() {
        assert_eq!(detect_chord(&[60]), None);
        assert_eq!(detect_chord(&[]), None);
    }
}
