use serde::Serialize;

use crate::drums::DrumHit;

/// A repeating span of drum hits. Positions index into the hit list, not
/// frames; the template holds `(note, velocity)` of the first occurrence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrumPattern {
    pub template: Vec<(u8, u8)>,
    /// Start indices of every occurrence, first occurrence included.
    pub positions: Vec<usize>,
}

impl DrumPattern {
    pub fn len(&self) -> usize {
        self.template.len()
    }

    pub fn is_empty(&self) -> bool {
        self.template.is_empty()
    }

    /// If `index` falls inside an occurrence, the offset within the
    /// template.
    pub fn offset_of(&self, index: usize) -> Option<usize> {
        self.positions
            .iter()
            .find(|&&p| p <= index && index < p + self.len())
            .map(|&p| index - p)
    }
}

const MIN_LEN: usize = 2;
const MAX_LEN: usize = 16;
const MIN_OCCURRENCES: usize = 2;

/// Velocity bin used during matching so small dynamics don't break repeats.
fn velocity_bin(velocity: u8) -> u8 {
    velocity / 16
}

/// Detect repeating drum phrases in one track's hit list.
///
/// Matching is exact on `(note, velocity_bin)`; occurrences never overlap
/// (a match advances the scan by the pattern length). Longer phrases are
/// claimed first and claimed indices block shorter sub-phrases.
pub fn detect_drum_patterns(hits: &[DrumHit]) -> Vec<DrumPattern> {
    if hits.len() < MIN_LEN * MIN_OCCURRENCES {
        return Vec::new();
    }

    let keys: Vec<(u8, u8)> = hits
        .iter()
        .map(|h| (h.note, velocity_bin(h.velocity)))
        .collect();

    let mut patterns = Vec::new();
    let mut claimed = vec![false; keys.len()];

    for length in (MIN_LEN..=MAX_LEN.min(keys.len() / MIN_OCCURRENCES)).rev() {
        for start in 0..=keys.len().saturating_sub(length) {
            if claimed[start..start + length].iter().any(|&c| c) {
                continue;
            }
            let window = &keys[start..start + length];

            let mut positions = vec![start];
            let mut pos = start + length;
            while pos + length <= keys.len() {
                if &keys[pos..pos + length] == window
                    && !claimed[pos..pos + length].iter().any(|&c| c)
                {
                    positions.push(pos);
                    pos += length;
                } else {
                    pos += 1;
                }
            }

            if positions.len() >= MIN_OCCURRENCES {
                for &p in &positions {
                    claimed[p..p + length].iter_mut().for_each(|c| *c = true);
                }
                patterns.push(DrumPattern {
                    template: hits[start..start + length]
                        .iter()
                        .map(|h| (h.note, h.velocity))
                        .collect(),
                    positions,
                });
            }
        }
    }

    patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hit(frame: u32, note: u8, velocity: u8) -> DrumHit {
        DrumHit {
            frame,
            note,
            velocity,
        }
    }

    #[test]
    fn repeated_phrase_is_detected() {
        // kick-snare four times
        let hits: Vec<DrumHit> = (0..8)
            .map(|i| hit(i * 4, if i % 2 == 0 { 36 } else { 38 }, 100))
            .collect();

        let patterns = detect_drum_patterns(&hits);
        assert_eq!(patterns.len(), 1);
        let longest = &patterns[0];
        // The longest claim wins: kick-snare-kick-snare twice.
        assert_eq!(longest.len(), 4);
        assert_eq!(longest.positions, vec![0, 4]);
    }

    #[test]
    fn velocity_wobble_within_bin_still_matches() {
        let hits = vec![
            hit(0, 36, 70),
            hit(4, 38, 100),
            hit(8, 36, 75),
            hit(12, 38, 98),
        ];
        let patterns = detect_drum_patterns(&hits);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].positions, vec![0, 2]);
        // Template carries the first occurrence's true velocities.
        assert_eq!(patterns[0].template, vec![(36, 70), (38, 100)]);
    }

    #[test]
    fn offset_lookup() {
        let pattern = DrumPattern {
            template: vec![(36, 100), (38, 100)],
            positions: vec![0, 2],
        };
        assert_eq!(pattern.offset_of(0), Some(0));
        assert_eq!(pattern.offset_of(3), Some(1));
        assert_eq!(pattern.offset_of(4), None);
    }

    #[test]
    fn too_few_hits_yield_nothing() {
        let hits = vec![hit(0, 36, 100), hit(4, 38, 100)];
        assert!(detect_drum_patterns(&hits).is_empty());
    }
}
