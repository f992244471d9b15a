use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DrumMapperConfig;
use crate::index::SampleIndex;
use crate::manager::SampleManager;
use crate::patterns::{detect_drum_patterns, DrumPattern};
use crate::{BankError, Result};

/// General MIDI percussion note → sample name.
pub static DEFAULT_DRUM_MAPPING: &[(u8, &str)] = &[
    (36, "kick"),
    (38, "snare"),
    (40, "snare"),
    (42, "hihat_closed"),
    (46, "hihat_open"),
    (49, "crash"),
    (51, "ride"),
];

/// One drum strike from the MIDI side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrumHit {
    pub frame: u32,
    pub note: u8,
    pub velocity: u8,
}

/// A scheduled DPCM trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpcmEvent {
    pub frame: u32,
    pub sample_id: u8,
    pub velocity: u8,
}

/// A drum strike that fell through to the noise channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoiseEvent {
    pub frame: u32,
    pub velocity: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VelocityRange {
    pub lo: u8,
    pub hi: u8,
    pub sample: String,
}

/// Per-note advanced mapping: a primary sample, optional velocity-switched
/// alternatives, and optional stacked layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrumNoteConfig {
    pub primary: String,
    #[serde(default)]
    pub velocity_ranges: Vec<VelocityRange>,
    #[serde(default)]
    pub layers: Vec<String>,
}

impl DrumNoteConfig {
    /// Velocity ranges must partition 0..=127 with no gaps or overlaps.
    fn validate(&self, note: u8) -> Result<()> {
        if self.velocity_ranges.is_empty() {
            return Ok(());
        }
        let mut ranges = self.velocity_ranges.clone();
        ranges.sort_by_key(|r| r.lo);

        if ranges[0].lo != 0 {
            return Err(BankError::VelocityRanges {
                note,
                reason: format!("first range starts at {}", ranges[0].lo),
            });
        }
        for pair in ranges.windows(2) {
            if pair[1].lo != pair[0].hi + 1 {
                return Err(BankError::VelocityRanges {
                    note,
                    reason: format!(
                        "range ending at {} is followed by one starting at {}",
                        pair[0].hi, pair[1].lo
                    ),
                });
            }
        }
        let last = ranges.last().expect("non-empty");
        if last.hi != 127 {
            return Err(BankError::VelocityRanges {
                note,
                reason: format!("last range ends at {}", last.hi),
            });
        }
        Ok(())
    }

    fn sample_for_velocity(&self, velocity: u8) -> &str {
        self.velocity_ranges
            .iter()
            .find(|r| r.lo <= velocity && velocity <= r.hi)
            .map(|r| r.sample.as_str())
            .unwrap_or(&self.primary)
    }
}

/// The stock advanced kit: kick and snare get velocity layers and sample
/// stacking, everything else falls through to the default table.
pub fn default_advanced_mapping() -> BTreeMap<u8, DrumNoteConfig> {
    let mut map = BTreeMap::new();
    map.insert(
        36,
        DrumNoteConfig {
            primary: "kick".into(),
            velocity_ranges: vec![
                VelocityRange {
                    lo: 0,
                    hi: 64,
                    sample: "kick_soft".into(),
                },
                VelocityRange {
                    lo: 65,
                    hi: 127,
                    sample: "kick_hard".into(),
                },
            ],
            layers: vec!["kick".into(), "kick_sub".into()],
        },
    );
    map.insert(
        38,
        DrumNoteConfig {
            primary: "snare".into(),
            velocity_ranges: vec![
                VelocityRange {
                    lo: 0,
                    hi: 64,
                    sample: "snare_soft".into(),
                },
                VelocityRange {
                    lo: 65,
                    hi: 127,
                    sample: "snare_hard".into(),
                },
            ],
            layers: vec!["snare".into(), "snare_rattle".into()],
        },
    );
    map
}

/// Routes drum hits to DPCM samples (through the bank) or to the noise
/// channel when no sample resolves.
pub struct DrumMapper {
    config: DrumMapperConfig,
    index: SampleIndex,
    advanced: BTreeMap<u8, DrumNoteConfig>,
}

impl DrumMapper {
    pub fn new(index: SampleIndex, config: DrumMapperConfig) -> Result<Self> {
        config.validate()?;
        let advanced = default_advanced_mapping();
        for (note, entry) in &advanced {
            entry.validate(*note)?;
        }
        Ok(Self {
            config,
            index,
            advanced,
        })
    }

    pub fn with_advanced_mapping(
        mut self,
        advanced: BTreeMap<u8, DrumNoteConfig>,
    ) -> Result<Self> {
        for (note, entry) in &advanced {
            entry.validate(*note)?;
        }
        self.advanced = advanced;
        Ok(self)
    }

    /// Map every track's hits, mutating the shared sample bank.
    ///
    /// Hits inside a detected drum phrase resolve through the phrase
    /// template so every occurrence reuses one sample. The post-pass
    /// collapses surplus sample ids (beyond the bank's count budget) into
    /// noise, least-used first.
    pub fn map(
        &self,
        tracks: &BTreeMap<String, Vec<DrumHit>>,
        bank: &mut SampleManager,
    ) -> (Vec<DpcmEvent>, Vec<NoiseEvent>) {
        let mut dpcm = Vec::new();
        let mut noise = Vec::new();

        for hits in tracks.values() {
            let patterns = if self.config.enable_pattern_detection {
                detect_drum_patterns(hits)
            } else {
                Vec::new()
            };

            for (i, hit) in hits.iter().enumerate() {
                if hit.velocity == 0 {
                    continue;
                }

                let (note, velocity) = template_key(&patterns, i).unwrap_or((hit.note, hit.velocity));
                let name = self.resolve(note, velocity);

                match name.and_then(|n| self.index.get(n).map(|d| (n, d))) {
                    Some((name, data)) => {
                        let info = bank.allocate(name, data);
                        dpcm.push(DpcmEvent {
                            frame: hit.frame,
                            sample_id: info.id,
                            velocity: hit.velocity,
                        });
                        self.stack_layers(note, hit, bank, &mut dpcm);
                    }
                    None => {
                        noise.push(NoiseEvent {
                            frame: hit.frame,
                            velocity: hit.velocity,
                        });
                    }
                }
            }
        }

        let collapsed = collapse_surplus_samples(
            &mut dpcm,
            &mut noise,
            self.config.sample_bank.max_samples,
        );
        if collapsed > 0 {
            debug!(collapsed, "collapsed surplus DPCM samples to noise");
        }

        dpcm.sort_by_key(|e| (e.frame, e.sample_id));
        noise.sort_by_key(|e| e.frame);
        (dpcm, noise)
    }

    fn resolve(&self, note: u8, velocity: u8) -> Option<&str> {
        if self.config.use_advanced_mapping {
            if let Some(entry) = self.advanced.get(&note) {
                return Some(entry.sample_for_velocity(velocity));
            }
        }
        DEFAULT_DRUM_MAPPING
            .iter()
            .find(|&&(n, _)| n == note)
            .map(|&(_, name)| name)
    }

    fn stack_layers(
        &self,
        note: u8,
        hit: &DrumHit,
        bank: &mut SampleManager,
        dpcm: &mut Vec<DpcmEvent>,
    ) {
        if !self.config.use_advanced_mapping {
            return;
        }
        let Some(entry) = self.advanced.get(&note) else {
            return;
        };
        for layer in entry.layers.iter().take(self.config.max_layers) {
            if let Some(data) = self.index.get(layer) {
                let info = bank.allocate(layer, data);
                dpcm.push(DpcmEvent {
                    frame: hit.frame,
                    sample_id: info.id,
                    velocity: hit.velocity,
                });
            }
        }
    }
}

/// Resolve a hit through its enclosing drum phrase, if any: the template's
/// note and velocity at the hit's offset decide the sample, keeping every
/// occurrence of the phrase on the same allocation.
fn template_key(patterns: &[DrumPattern], index: usize) -> Option<(u8, u8)> {
    patterns.iter().find_map(|p| {
        p.offset_of(index).map(|offset| p.template[offset])
    })
}

/// Keep only the `max_samples` most-used sample ids; strikes on the rest
/// become noise fallbacks.
fn collapse_surplus_samples(
    dpcm: &mut Vec<DpcmEvent>,
    noise: &mut Vec<NoiseEvent>,
    max_samples: usize,
) -> usize {
    let mut by_id: HashMap<u8, usize> = HashMap::new();
    for e in dpcm.iter() {
        *by_id.entry(e.sample_id).or_insert(0) += 1;
    }
    if by_id.len() <= max_samples {
        return 0;
    }

    let mut ranked: Vec<(u8, usize)> = by_id.into_iter().collect();
    // Most used first; ties keep the lower (older) id.
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let keep: Vec<u8> = ranked.iter().take(max_samples).map(|&(id, _)| id).collect();
    let dropped = ranked.len() - keep.len();

    let mut kept_events = Vec::with_capacity(dpcm.len());
    for e in dpcm.drain(..) {
        if keep.contains(&e.sample_id) {
            kept_events.push(e);
        } else {
            noise.push(NoiseEvent {
                frame: e.frame,
                velocity: e.velocity,
            });
        }
    }
    *dpcm = kept_events;
    dropped
}

/// Convenience entry point: default config plus the built-in kit when no
/// index file is available.
pub fn map_drums(
    tracks: &BTreeMap<String, Vec<DrumHit>>,
    index: Option<SampleIndex>,
    bank: &mut SampleManager,
) -> Result<(Vec<DpcmEvent>, Vec<NoiseEvent>)> {
    let index = index.unwrap_or_else(SampleIndex::builtin_kit);
    let mapper = DrumMapper::new(index, DrumMapperConfig::default())?;
    Ok(mapper.map(tracks, bank))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SampleBankConfig;
    use pretty_assertions::assert_eq;

    fn track(hits: Vec<DrumHit>) -> BTreeMap<String, Vec<DrumHit>> {
        let mut map = BTreeMap::new();
        map.insert("drums".to_string(), hits);
        map
    }

    fn hit(frame: u32, note: u8, velocity: u8) -> DrumHit {
        DrumHit {
            frame,
            note,
            velocity,
        }
    }

    fn basic_mapper() -> DrumMapper {
        let config = DrumMapperConfig {
            use_advanced_mapping: false,
            enable_pattern_detection: false,
            ..Default::default()
        };
        DrumMapper::new(SampleIndex::builtin_kit(), config).unwrap()
    }

    #[test]
    fn kick_routes_to_dpcm_unknown_to_noise() {
        let mut bank = SampleManager::new(SampleBankConfig::default());
        let (dpcm, noise) = basic_mapper().map(
            &track(vec![hit(0, 36, 100), hit(4, 37, 90)]),
            &mut bank,
        );

        assert_eq!(dpcm.len(), 1);
        assert_eq!(dpcm[0].frame, 0);
        assert_eq!(noise, vec![NoiseEvent {
            frame: 4,
            velocity: 90,
        }]);
    }

    #[test]
    fn silent_hits_are_dropped() {
        let mut bank = SampleManager::new(SampleBankConfig::default());
        let (dpcm, noise) = basic_mapper().map(&track(vec![hit(0, 36, 0)]), &mut bank);
        assert!(dpcm.is_empty());
        assert!(noise.is_empty());
    }

    #[test]
    fn advanced_mapping_switches_on_velocity_and_stacks_layers() {
        let config = DrumMapperConfig {
            enable_pattern_detection: false,
            ..Default::default()
        };
        let mapper = DrumMapper::new(SampleIndex::builtin_kit(), config).unwrap();
        let mut bank = SampleManager::new(SampleBankConfig::default());

        let (dpcm, _) = mapper.map(&track(vec![hit(0, 36, 30)]), &mut bank);

        // kick_soft + two layers (kick, kick_sub), all on frame 0.
        assert_eq!(dpcm.len(), 3);
        assert!(dpcm.iter().all(|e| e.frame == 0));
        let mut names: Vec<&str> = bank.active_names().collect();
        names.sort();
        assert_eq!(names, vec!["kick", "kick_soft", "kick_sub"]);
    }

    #[test]
    fn velocity_range_gap_is_rejected() {
        let entry = DrumNoteConfig {
            primary: "kick".into(),
            velocity_ranges: vec![
                VelocityRange {
                    lo: 0,
                    hi: 60,
                    sample: "kick_soft".into(),
                },
                VelocityRange {
                    lo: 65,
                    hi: 127,
                    sample: "kick_hard".into(),
                },
            ],
            layers: vec![],
        };
        let mut advanced = BTreeMap::new();
        advanced.insert(36u8, entry);

        let result = DrumMapper::new(SampleIndex::builtin_kit(), DrumMapperConfig::default())
            .unwrap()
            .with_advanced_mapping(advanced);
        assert!(matches!(result, Err(BankError::VelocityRanges { .. })));
    }

    #[test]
    fn surplus_samples_collapse_to_noise() {
        let mut dpcm = vec![
            DpcmEvent { frame: 0, sample_id: 0, velocity: 100 },
            DpcmEvent { frame: 1, sample_id: 0, velocity: 100 },
            DpcmEvent { frame: 2, sample_id: 1, velocity: 90 },
            DpcmEvent { frame: 3, sample_id: 1, velocity: 90 },
            DpcmEvent { frame: 4, sample_id: 2, velocity: 80 },
        ];
        let mut noise = Vec::new();

        let dropped = collapse_surplus_samples(&mut dpcm, &mut noise, 2);
        assert_eq!(dropped, 1);
        assert_eq!(dpcm.len(), 4);
        assert_eq!(noise, vec![NoiseEvent {
            frame: 4,
            velocity: 80,
        }]);
    }

    #[test]
    fn custom_advanced_mapping_with_valid_partition() {
        let entry = DrumNoteConfig {
            primary: "ride".into(),
            velocity_ranges: vec![
                VelocityRange {
                    lo: 0,
                    hi: 40,
                    sample: "hihat_closed".into(),
                },
                VelocityRange {
                    lo: 41,
                    hi: 90,
                    sample: "ride".into(),
                },
                VelocityRange {
                    lo: 91,
                    hi: 127,
                    sample: "crash".into(),
                },
            ],
            layers: vec![],
        };
        let mut advanced = BTreeMap::new();
        advanced.insert(51u8, entry);

        let mapper = DrumMapper::new(SampleIndex::builtin_kit(), DrumMapperConfig {
            enable_pattern_detection: false,
            ..Default::default()
        })
        .unwrap()
        .with_advanced_mapping(advanced)
        .unwrap();

        let mut bank = SampleManager::new(SampleBankConfig::default());
        let (dpcm, _) = mapper.map(
            &track(vec![hit(0, 51, 30), hit(4, 51, 60), hit(8, 51, 120)]),
            &mut bank,
        );

        assert_eq!(dpcm.len(), 3);
        let mut names: Vec<&str> = bank.active_names().collect();
        names.sort();
        assert_eq!(names, vec!["crash", "hihat_closed", "ride"]);
    }

    #[test]
    fn drum_note_config_roundtrips_as_json() {
        let entry = DrumNoteConfig {
            primary: "kick".into(),
            velocity_ranges: vec![VelocityRange {
                lo: 0,
                hi: 127,
                sample: "kick".into(),
            }],
            layers: vec!["kick_sub".into()],
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: DrumNoteConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn pattern_template_keeps_occurrences_on_one_sample() {
        // Kick velocities straddle the soft/hard boundary but sit in one
        // velocity bin, so the phrase template (vel 70 -> kick_hard) wins
        // for both occurrences.
        let mapper = DrumMapper::new(SampleIndex::builtin_kit(), DrumMapperConfig::default())
            .unwrap();
        let mut bank = SampleManager::new(SampleBankConfig::default());

        let (dpcm, _) = mapper.map(
            &track(vec![
                hit(0, 36, 70),
                hit(4, 38, 100),
                hit(8, 36, 75),
                hit(12, 38, 98),
            ]),
            &mut bank,
        );

        let kick_ids: Vec<u8> = dpcm
            .iter()
            .filter(|e| e.frame % 8 == 0)
            .map(|e| e.sample_id)
            .collect();
        // Both kicks resolve through the template to the same primary id.
        assert_eq!(kick_ids.len(), 6); // 2 hits x (primary + 2 layers)
        assert_eq!(kick_ids[0], kick_ids[3]);
    }
}
