use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::change::{TempoChange, TempoChangeKind, TempoValidationConfig};
use crate::{Result, TempoError, FRAME_DURATION_US};

/// Strategy for post-ingestion tempo map optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TempoOptimizationStrategy {
    /// Snap each change tick (within `max_snap_ticks`) to the tick whose
    /// elapsed time lands nearest a frame boundary.
    FrameAligned,
}

/// Tempo at a specific tick, as captured for loop records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoPoint {
    pub tick: u64,
    pub tempo: u32,
}

/// Tempo endpoints of a loop region, stored in the loop jump table so the
/// runtime restarts with the right timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoState {
    pub start: TempoPoint,
    pub end: TempoPoint,
}

/// Ordered, validated piecewise tempo function over MIDI ticks.
///
/// The change list always begins at tick 0 and its ticks are strictly
/// increasing. Elapsed microseconds at every change boundary are cached in
/// `cumulative_us` and rebuilt on each insertion, so lookups never rescan
/// earlier segments.
#[derive(Debug, Clone, Serialize)]
pub struct TempoMap {
    ticks_per_quarter: u32,
    changes: Vec<TempoChange>,
    config: TempoValidationConfig,
    #[serde(skip)]
    cumulative_us: Vec<f64>,
}

impl TempoMap {
    pub fn new(initial_tempo: u32, ticks_per_quarter: u32) -> Self {
        Self::with_config(initial_tempo, ticks_per_quarter, TempoValidationConfig::default())
    }

    pub fn with_config(
        initial_tempo: u32,
        ticks_per_quarter: u32,
        config: TempoValidationConfig,
    ) -> Self {
        let mut map = Self {
            ticks_per_quarter: ticks_per_quarter.max(1),
            changes: vec![TempoChange::immediate(0, initial_tempo)],
            config,
            cumulative_us: Vec::new(),
        };
        map.rebuild_cache();
        map
    }

    pub fn ticks_per_quarter(&self) -> u32 {
        self.ticks_per_quarter
    }

    pub fn changes(&self) -> &[TempoChange] {
        &self.changes
    }

    pub fn config(&self) -> &TempoValidationConfig {
        &self.config
    }

    /// Insert a tempo change, keeping the list sorted.
    ///
    /// Rejections are never silent: the caller decides whether to abort or
    /// to count and continue. A change at an existing tick with the same
    /// kind replaces that change's tempo; a different kind is a conflict.
    pub fn add_tempo_change(&mut self, change: TempoChange) -> Result<()> {
        self.validate(&change)?;

        match self.changes.binary_search_by_key(&change.tick, |c| c.tick) {
            Ok(i) => {
                if !self.changes[i].kind.same_shape(&change.kind) {
                    return Err(TempoError::KindConflict { tick: change.tick });
                }
                self.changes[i] = change;
            }
            Err(i) => self.changes.insert(i, change),
        }

        self.rebuild_cache();
        Ok(())
    }

    fn validate(&self, change: &TempoChange) -> Result<()> {
        let bpm = change.bpm();
        if bpm < self.config.min_bpm || bpm > self.config.max_bpm {
            return Err(TempoError::BpmOutOfRange {
                tick: change.tick,
                bpm,
                min_bpm: self.config.min_bpm,
                max_bpm: self.config.max_bpm,
            });
        }

        if let TempoChangeKind::Linear { duration_ticks, .. } = change.kind {
            let us = duration_ticks as f64 * change.tempo as f64 / self.ticks_per_quarter as f64;
            let frames = (us / FRAME_DURATION_US) as u64;
            if frames < self.config.min_duration_frames || frames > self.config.max_duration_frames
            {
                return Err(TempoError::DurationOutOfRange {
                    tick: change.tick,
                    frames,
                    min_frames: self.config.min_duration_frames,
                    max_frames: self.config.max_duration_frames,
                });
            }
        }

        Ok(())
    }

    /// Index of the change governing `tick`.
    fn segment_index(&self, tick: u64) -> usize {
        match self.changes.binary_search_by_key(&tick, |c| c.tick) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        }
    }

    /// Tempo fully in effect before change `i` starts (the ramp origin).
    fn tempo_before(&self, i: usize) -> u32 {
        if i == 0 {
            self.changes[0].tempo
        } else {
            self.changes[i - 1].tempo
        }
    }

    /// Tick span of change `i`'s ramp, clipped to the next change.
    fn ramp_span(&self, i: usize) -> u64 {
        match self.changes[i].kind {
            TempoChangeKind::Immediate => 0,
            TempoChangeKind::Linear { duration_ticks, .. } => {
                match self.changes.get(i + 1) {
                    Some(next) => duration_ticks.min(next.tick - self.changes[i].tick),
                    None => duration_ticks,
                }
            }
        }
    }

    /// Elapsed microseconds within segment `i`, from its start tick to `tick`.
    fn segment_us(&self, i: usize, tick: u64) -> f64 {
        let change = &self.changes[i];
        let dticks = tick.saturating_sub(change.tick);
        if dticks == 0 {
            return 0.0;
        }
        let tpq = self.ticks_per_quarter as f64;

        match change.kind {
            TempoChangeKind::Immediate => dticks as f64 * change.tempo as f64 / tpq,
            TempoChangeKind::Linear { curve, .. } => {
                let span = self.ramp_span(i);
                let from = self.tempo_before(i) as f64;
                let delta = change.tempo as f64 - from;

                let ramp_ticks = dticks.min(span);
                let ramp_us = if span == 0 {
                    0.0
                } else {
                    let p = ramp_ticks as f64 / span as f64;
                    span as f64 * (from * p + delta * curve.integral(p)) / tpq
                };

                let flat_ticks = dticks - ramp_ticks;
                ramp_us + flat_ticks as f64 * change.tempo as f64 / tpq
            }
        }
    }

    fn rebuild_cache(&mut self) {
        let mut cumulative = Vec::with_capacity(self.changes.len());
        let mut elapsed = 0.0;
        for i in 0..self.changes.len() {
            cumulative.push(elapsed);
            if let Some(next) = self.changes.get(i + 1) {
                elapsed += self.segment_us(i, next.tick);
            }
        }
        self.cumulative_us = cumulative;
    }

    /// Elapsed microseconds from tick 0.
    pub fn elapsed_us(&self, tick: u64) -> f64 {
        let i = self.segment_index(tick);
        self.cumulative_us[i] + self.segment_us(i, tick)
    }

    /// Effective tempo (µs per quarter) at `tick`, interpolating inside
    /// a ramp.
    pub fn tempo_at_tick(&self, tick: u64) -> u32 {
        let i = self.segment_index(tick);
        let change = &self.changes[i];
        match change.kind {
            TempoChangeKind::Immediate => change.tempo,
            TempoChangeKind::Linear { curve, .. } => {
                let span = self.ramp_span(i);
                let offset = tick - change.tick;
                if span == 0 || offset >= span {
                    change.tempo
                } else {
                    let from = self.tempo_before(i) as f64;
                    let delta = change.tempo as f64 - from;
                    (from + delta * curve.apply(offset as f64 / span as f64)).round() as u32
                }
            }
        }
    }

    /// 60 Hz frame index for a tick: per-segment elapsed time divided by the
    /// frame duration, rounded to nearest. Non-decreasing in `tick`.
    pub fn frame_for_tick(&self, tick: u64) -> u32 {
        (self.elapsed_us(tick) / FRAME_DURATION_US).round() as u32
    }

    /// Milliseconds between two ticks, summed across tempo segments.
    pub fn time_ms(&self, start_tick: u64, end_tick: u64) -> f64 {
        (self.elapsed_us(end_tick) - self.elapsed_us(start_tick)) / 1000.0
    }

    /// Inverse of [`frame_for_tick`]: the earliest tick whose elapsed time
    /// reaches the frame's timestamp.
    pub fn tick_for_frame(&self, frame: u32) -> u64 {
        let target_us = frame as f64 * FRAME_DURATION_US;

        // Segment holding the target, or past the last change.
        let mut i = self.changes.len() - 1;
        for (j, &cum) in self.cumulative_us.iter().enumerate() {
            if cum > target_us {
                i = j.saturating_sub(1);
                break;
            }
        }
        let seg_start = self.changes[i].tick;
        let remaining = target_us - self.cumulative_us[i];

        if let TempoChangeKind::Immediate = self.changes[i].kind {
            let tempo = self.changes[i].tempo as f64;
            return seg_start + (remaining * self.ticks_per_quarter as f64 / tempo) as u64;
        }

        // Ramp segment: elapsed time is monotone in tick, bisect.
        let mut lo = seg_start;
        let mut hi = match self.changes.get(i + 1) {
            Some(next) => next.tick,
            None => {
                // Open-ended: grow until we pass the target.
                let mut hi = seg_start + self.ticks_per_quarter as u64;
                while self.elapsed_us(hi) < target_us {
                    hi += self.ticks_per_quarter as u64;
                }
                hi
            }
        };
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.segment_us(i, mid) < remaining {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Snap change ticks toward frame boundaries.
    ///
    /// Each change after the first may move at most `max_snap_ticks`, never
    /// past a neighbor, to the candidate minimizing the distance between its
    /// elapsed time and the nearest frame edge. Ordering and validation are
    /// preserved by construction.
    pub fn optimize(&mut self, strategy: TempoOptimizationStrategy) {
        match strategy {
            TempoOptimizationStrategy::FrameAligned => self.frame_align(),
        }
    }

    fn frame_align(&mut self) {
        let snap = self.config.max_snap_ticks as i64;
        for i in 1..self.changes.len() {
            let tick = self.changes[i].tick as i64;
            let lower = self.changes[i - 1].tick as i64 + 1;
            let upper = match self.changes.get(i + 1) {
                Some(next) => next.tick as i64 - 1,
                None => i64::MAX,
            };

            let mut best_tick = self.changes[i].tick;
            let mut best_key = (f64::INFINITY, u64::MAX);
            for candidate in (tick - snap).max(lower)..=(tick + snap).min(upper) {
                let candidate = candidate as u64;
                let elapsed = self.elapsed_us(candidate);
                let remainder = elapsed.rem_euclid(FRAME_DURATION_US);
                let distance = remainder.min(FRAME_DURATION_US - remainder);
                let key = (distance, candidate.abs_diff(self.changes[i].tick));
                if key < best_key {
                    best_key = key;
                    best_tick = candidate;
                }
            }

            if best_tick != self.changes[i].tick {
                debug!(
                    from = self.changes[i].tick,
                    to = best_tick,
                    "frame-aligned tempo change"
                );
                self.changes[i].tick = best_tick;
                self.rebuild_cache();
            }
        }
    }

    /// Capture the tempo endpoints of a region, for loop records.
    pub fn capture_loop_state(&self, start_tick: u64, end_tick: u64) -> TempoState {
        TempoState {
            start: TempoPoint {
                tick: start_tick,
                tempo: self.tempo_at_tick(start_tick),
            },
            end: TempoPoint {
                tick: end_tick,
                tempo: self.tempo_at_tick(end_tick),
            },
        }
    }
}
