use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::detect::{Candidate, DetectionResult, SourceEvent};

/// A recorded non-exact occurrence of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternVariation {
    /// Frame where the variation starts.
    pub position: u32,
    pub transposition: i16,
    pub volume_delta: i16,
}

/// A canonicalized pattern as stored in the dictionary and the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub events: Vec<SourceEvent>,
    pub length: usize,
    /// Start frames of every exact occurrence, sorted.
    pub positions: Vec<u32>,
    #[serde(default)]
    pub variations: Vec<PatternVariation>,
}

/// Frame → (pattern id, offset inside the pattern). Only frames covered by
/// exactly one pattern instance get a reference.
pub type ReferenceTable = BTreeMap<u32, (String, u16)>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressionStats {
    pub original_size: usize,
    pub compressed_size: usize,
    pub compression_ratio: f64,
    pub unique_patterns: usize,
}

impl Default for CompressionStats {
    fn default() -> Self {
        Self {
            original_size: 0,
            compressed_size: 0,
            compression_ratio: 1.0,
            unique_patterns: 0,
        }
    }
}

/// Canonicalize detected patterns and build the playback reference table.
///
/// Patterns are ordered by descending coverage (`length × occurrences`) and
/// named `pattern_0`, `pattern_1`, … in that order, so ids are stable for
/// identical inputs. The reference table maps each frame covered by exactly
/// one instance to its `(pattern, offset)`.
pub fn compress_patterns(
    events: &[SourceEvent],
    detection: &DetectionResult,
) -> (BTreeMap<String, Pattern>, ReferenceTable, CompressionStats) {
    let mut ordered: Vec<&Candidate> = detection.selected.iter().collect();
    ordered.sort_by(|a, b| {
        let coverage_a = a.length * a.positions.len();
        let coverage_b = b.length * b.positions.len();
        coverage_b
            .cmp(&coverage_a)
            .then(b.length.cmp(&a.length))
            .then(a.start.cmp(&b.start))
    });

    // Count how many instances cover each event index.
    let mut coverage = vec![0u8; events.len()];
    for candidate in &ordered {
        for &p in &candidate.positions {
            for c in &mut coverage[p..p + candidate.length] {
                *c = c.saturating_add(1);
            }
        }
    }

    let mut patterns = BTreeMap::new();
    let mut references = ReferenceTable::new();
    let mut original_size = 0usize;
    let mut dictionary_size = 0usize;

    for (i, candidate) in ordered.iter().enumerate() {
        let id = format!("pattern_{i}");
        let length = candidate.length;

        for &p in &candidate.positions {
            for offset in 0..length {
                let idx = p + offset;
                if coverage[idx] == 1 {
                    references.insert(events[idx].frame, (id.clone(), offset as u16));
                }
            }
        }

        original_size += length * candidate.positions.len();
        dictionary_size += length;

        patterns.insert(
            id,
            Pattern {
                events: events[candidate.start..candidate.start + length].to_vec(),
                length,
                positions: candidate.positions.iter().map(|&p| events[p].frame).collect(),
                variations: candidate
                    .variations
                    .iter()
                    .map(|v| PatternVariation {
                        position: events[v.position].frame,
                        transposition: v.transposition,
                        volume_delta: v.volume_delta,
                    })
                    .collect(),
            },
        );
    }

    let compressed_size = dictionary_size + references.len();
    let stats = CompressionStats {
        original_size,
        compressed_size,
        compression_ratio: if compressed_size == 0 {
            1.0
        } else {
            original_size as f64 / compressed_size as f64
        },
        unique_patterns: patterns.len(),
    };

    (patterns, references, stats)
}
