use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use tempo_map::{TempoMap, TempoState};

use crate::compress::Pattern;

/// Playback strategy hint for a loop's runtime expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationHint {
    /// Long enough to be worth a subroutine call.
    Subroutine,
    Inline,
}

/// A selected self-similar region with its captured tempo endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopPoint {
    pub start_frame: u32,
    pub end_frame: u32,
    pub length: u32,
    pub repetitions: usize,
    pub tempo_state: TempoState,
}

/// Jump table entry, keyed by the loop's end frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpEntry {
    pub start_frame: u32,
    pub tempo_state: TempoState,
    pub hint: OptimizationHint,
}

/// Loop lengths that sit on musical grid sizes score a bonus.
const PREFERRED_LENGTHS: [u32; 4] = [4, 8, 16, 32];

/// Frames a loop must span before the runtime expands it as a subroutine.
const SUBROUTINE_THRESHOLD: u32 = 16;

fn loop_score(length: u32, repetitions: usize) -> f64 {
    let base = length as f64 * repetitions as f64;
    if PREFERRED_LENGTHS.contains(&length) {
        base * 1.25
    } else {
        base
    }
}

/// Derive loop points from pattern positions.
///
/// Each pattern occurring at least twice proposes the span from its
/// second-to-last occurrence to the end of its last one (with exactly two
/// occurrences that is first-to-last). Candidates are taken greedily by
/// score; overlapping or degenerate (end <= start) candidates are dropped
/// and counted. Tempo endpoints are captured per selected loop.
pub fn detect_loops(
    patterns: &BTreeMap<String, Pattern>,
    tempo_map: &TempoMap,
) -> (Vec<LoopPoint>, u32) {
    struct LoopCandidate {
        start: u32,
        end: u32,
        repetitions: usize,
        score: f64,
    }

    let mut invalid = 0u32;
    let mut candidates = Vec::new();

    for pattern in patterns.values() {
        let positions = &pattern.positions;
        if positions.len() < 2 {
            continue;
        }
        let start = positions[positions.len() - 2];
        // Positions are start frames; the last occurrence runs one pattern
        // length past its start.
        let end = positions[positions.len() - 1] + pattern.length as u32;

        if end <= start {
            invalid += 1;
            continue;
        }
        candidates.push(LoopCandidate {
            start,
            end,
            repetitions: positions.len(),
            score: loop_score(end - start, positions.len()),
        });
    }

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.start.cmp(&b.start))
    });

    let mut selected: Vec<LoopPoint> = Vec::new();
    for candidate in candidates {
        let overlaps = selected
            .iter()
            .any(|l| candidate.start < l.end_frame && l.start_frame < candidate.end);
        if overlaps {
            invalid += 1;
            continue;
        }

        let start_tick = tempo_map.tick_for_frame(candidate.start);
        let end_tick = tempo_map.tick_for_frame(candidate.end);
        selected.push(LoopPoint {
            start_frame: candidate.start,
            end_frame: candidate.end,
            length: candidate.end - candidate.start,
            repetitions: candidate.repetitions,
            tempo_state: tempo_map.capture_loop_state(start_tick, end_tick),
        });
    }

    selected.sort_by_key(|l| l.start_frame);
    debug!(loops = selected.len(), invalid, "loop detection done");
    (selected, invalid)
}

/// Build the jump table for the selected loops, keyed by end frame.
pub fn jump_table(loops: &[LoopPoint]) -> BTreeMap<u32, JumpEntry> {
    loops
        .iter()
        .filter(|l| l.end_frame > l.start_frame)
        .map(|l| {
            (
                l.end_frame,
                JumpEntry {
                    start_frame: l.start_frame,
                    tempo_state: l.tempo_state,
                    hint: if l.length >= SUBROUTINE_THRESHOLD {
                        OptimizationHint::Subroutine
                    } else {
                        OptimizationHint::Inline
                    },
                },
            )
        })
        .collect()
}
