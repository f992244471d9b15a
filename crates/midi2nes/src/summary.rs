use std::fmt;

use serde::Serialize;

/// Per-class counters for every recovered error in a compile.
///
/// Nothing in the pipeline is dropped silently: each recovery increments
/// exactly one of these, and the whole struct is printed to stderr at exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub invalid_tempo_changes: u32,
    pub malformed_events: u32,
    pub dropped_note_events: u32,
    pub pitch_out_of_range: u32,
    pub samples_evicted: u32,
    pub samples_aliased: u32,
    pub pattern_shard_timeouts: u32,
    pub invalid_loop_points: u32,
    pub frame_validation_issues: u32,
}

impl Diagnostics {
    pub fn any_recovered(&self) -> bool {
        *self != Self::default()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.any_recovered() {
            return writeln!(f, "no recovered errors");
        }
        writeln!(f, "recovered errors:")?;
        let rows = [
            ("invalid tempo changes", self.invalid_tempo_changes),
            ("malformed events", self.malformed_events),
            ("dropped note events", self.dropped_note_events),
            ("notes outside pitch range", self.pitch_out_of_range),
            ("DPCM samples evicted", self.samples_evicted),
            ("DPCM samples aliased", self.samples_aliased),
            ("pattern shards timed out", self.pattern_shard_timeouts),
            ("loop points discarded", self.invalid_loop_points),
            ("frame validation issues", self.frame_validation_issues),
        ];
        for (label, count) in rows {
            if count > 0 {
                writeln!(f, "  {label}: {count}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_compile_prints_no_errors() {
        let d = Diagnostics::default();
        assert!(!d.any_recovered());
        assert_eq!(d.to_string(), "no recovered errors\n");
    }

    #[test]
    fn only_nonzero_rows_are_listed() {
        let d = Diagnostics {
            pitch_out_of_range: 3,
            ..Default::default()
        };
        let text = d.to_string();
        assert!(text.contains("notes outside pitch range: 3"));
        assert!(!text.contains("malformed"));
    }
}
