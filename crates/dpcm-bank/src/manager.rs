use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SampleBankConfig;
use crate::index::SampleData;

/// Allocation result handed back to drum mapping; the id is what ends up in
/// DPCM events and the emitted sample table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleInfo {
    pub id: u8,
    pub name: String,
    pub size_bytes: usize,
    pub frequency_hz: u32,
}

#[derive(Debug, Clone)]
struct ActiveSample {
    info: SampleInfo,
    data: Vec<u8>,
}

/// Counters surfaced in the compile summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BankStats {
    pub evictions: u32,
    pub aliased: u32,
    pub allocated: u32,
}

/// Budgeted DPCM sample bank.
///
/// Samples are scored by usage, size and similarity degree; when the count
/// or byte budget is exceeded the lowest-scoring samples are evicted.
/// Allocated ids increase monotonically and are never reused, so an id
/// stays valid for the whole compile even after its sample is evicted.
#[derive(Debug)]
pub struct SampleManager {
    config: SampleBankConfig,
    active: BTreeMap<String, ActiveSample>,
    usage: HashMap<String, u32>,
    similarity: HashMap<String, HashMap<String, f32>>,
    alias_cache: HashMap<String, String>,
    next_id: u8,
    stats: BankStats,
}

impl SampleManager {
    pub fn new(config: SampleBankConfig) -> Self {
        Self {
            config,
            active: BTreeMap::new(),
            usage: HashMap::new(),
            similarity: HashMap::new(),
            alias_cache: HashMap::new(),
            next_id: 0,
            stats: BankStats::default(),
        }
    }

    pub fn config(&self) -> &SampleBankConfig {
        &self.config
    }

    pub fn stats(&self) -> BankStats {
        self.stats
    }

    pub fn active_names(&self) -> impl Iterator<Item = &str> {
        self.active.keys().map(String::as_str)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.active.values().map(|s| s.info.size_bytes).sum()
    }

    /// Samples currently in the bank, in id order, for emission.
    pub fn active_samples(&self) -> Vec<SampleInfo> {
        let mut samples: Vec<SampleInfo> =
            self.active.values().map(|s| s.info.clone()).collect();
        samples.sort_by_key(|s| s.id);
        samples
    }

    /// Sample metadata plus waveform bytes, in id order. Index-only
    /// samples export a zeroed body of their declared size.
    pub fn export_samples(&self) -> Vec<(SampleInfo, Vec<u8>)> {
        let mut samples: Vec<(SampleInfo, Vec<u8>)> = self
            .active
            .values()
            .map(|s| {
                let data = if s.data.is_empty() {
                    vec![0u8; s.info.size_bytes]
                } else {
                    s.data.clone()
                };
                (s.info.clone(), data)
            })
            .collect();
        samples.sort_by_key(|(info, _)| info.id);
        samples
    }

    /// Allocate (or re-find) a sample by name.
    ///
    /// Budget pressure first triggers a non-forced optimization pass; a full
    /// bank then tries aliasing to a sufficiently similar resident sample
    /// before forcing eviction.
    pub fn allocate(&mut self, name: &str, data: &SampleData) -> SampleInfo {
        *self.usage.entry(name.to_string()).or_insert(0) += 1;

        if let Some(existing) = self.active.get(name) {
            return existing.info.clone();
        }

        let required = data.size_bytes();
        if self.total_bytes() + required > self.config.memory_budget {
            self.optimize(false);
        }

        if self.active.len() >= self.config.max_samples {
            if let Some(info) = self.find_similar(name, data) {
                self.stats.aliased += 1;
                return info;
            }
            self.optimize(true);
        }

        let info = SampleInfo {
            id: self.next_id,
            name: name.to_string(),
            size_bytes: required,
            frequency_hz: data.frequency_hz(),
        };
        self.next_id = self.next_id.saturating_add(1);
        self.stats.allocated += 1;

        self.update_similarities(name, data);
        self.active.insert(
            name.to_string(),
            ActiveSample {
                info: info.clone(),
                data: data.data.clone(),
            },
        );
        info
    }

    /// Evict lowest-scoring samples until the bank fits its limits.
    ///
    /// Without `force`, a bank that is below both limits is left alone.
    /// Eviction never shrinks below `keep_minimum_samples`.
    pub fn optimize(&mut self, force: bool) {
        if !force
            && self.active.len() < self.config.max_samples
            && self.total_bytes() <= self.config.memory_budget
        {
            return;
        }

        while self.active.len() > self.config.keep_minimum_samples
            && (self.active.len() >= self.config.max_samples
                || self.total_bytes() > self.config.memory_budget)
        {
            let Some(victim) = self.lowest_scoring() else {
                break;
            };
            debug!(sample = %victim, "evicting DPCM sample");
            self.remove(&victim);
            self.stats.evictions += 1;
        }
    }

    fn score(&self, name: &str) -> f32 {
        let usage = self.usage.get(name).copied().unwrap_or(0) as f32;
        let size = self
            .active
            .get(name)
            .map(|s| s.info.size_bytes)
            .unwrap_or(0) as f32;
        let degree = self
            .similarity
            .get(name)
            .map(|m| m.len())
            .unwrap_or(0) as f32;

        self.config.usage_weight * usage
            + self.config.size_weight * (1.0 / (size + 1.0))
            + self.config.similarity_weight * degree
    }

    fn lowest_scoring(&self) -> Option<String> {
        self.active
            .keys()
            .min_by(|a, b| {
                self.score(a)
                    .partial_cmp(&self.score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.cmp(b))
            })
            .cloned()
    }

    fn remove(&mut self, name: &str) {
        self.active.remove(name);
        self.similarity.remove(name);
        for entries in self.similarity.values_mut() {
            entries.remove(name);
        }
        self.alias_cache.retain(|_, target| target != name);
    }

    /// Look for a resident sample similar enough to stand in for `name`.
    fn find_similar(&mut self, name: &str, data: &SampleData) -> Option<SampleInfo> {
        if let Some(target) = self.alias_cache.get(name) {
            if let Some(sample) = self.active.get(target) {
                return Some(sample.info.clone());
            }
            self.alias_cache.remove(name);
        }

        let mut best: Option<(&String, f32)> = None;
        for (other, sample) in &self.active {
            let similarity = sample_similarity(&self.config, data, &sample.data, sample.info.size_bytes);
            match best {
                Some((_, s)) if s >= similarity => {}
                _ => best = Some((other, similarity)),
            }
        }

        match best {
            Some((other, similarity)) if similarity >= self.config.similarity_threshold => {
                let other = other.clone();
                debug!(requested = name, aliased_to = %other, similarity, "aliasing DPCM sample");
                self.alias_cache.insert(name.to_string(), other.clone());
                Some(self.active[&other].info.clone())
            }
            _ => None,
        }
    }

    fn update_similarities(&mut self, name: &str, data: &SampleData) {
        let pairs: Vec<(String, f32)> = self
            .active
            .iter()
            .map(|(other, sample)| {
                (
                    other.clone(),
                    sample_similarity(&self.config, data, &sample.data, sample.info.size_bytes),
                )
            })
            .collect();

        for (other, similarity) in pairs {
            self.similarity
                .entry(name.to_string())
                .or_default()
                .insert(other.clone(), similarity);
            self.similarity
                .entry(other)
                .or_default()
                .insert(name.to_string(), similarity);
        }
    }
}

/// Weighted similarity of two samples: declared-length closeness plus
/// positionwise byte equality. Index-only entries (no waveform bytes)
/// compare by declared size alone.
fn sample_similarity(
    config: &SampleBankConfig,
    a: &SampleData,
    b_data: &[u8],
    b_size: usize,
) -> f32 {
    let a_size = a.size_bytes();
    let size_max = a_size.max(b_size);
    let length_similarity = if size_max == 0 {
        1.0
    } else {
        1.0 - (a_size.abs_diff(b_size) as f32 / size_max as f32)
    };

    let waveform_similarity = if a.data.is_empty() || b_data.is_empty() {
        length_similarity
    } else {
        let overlap = a.data.len().min(b_data.len());
        let matches = a
            .data
            .iter()
            .zip(b_data.iter())
            .filter(|(x, y)| x == y)
            .count();
        matches as f32 / overlap as f32
    };

    config.length_similarity_weight * length_similarity
        + config.waveform_similarity_weight * waveform_similarity
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sized(length: usize) -> SampleData {
        SampleData::with_length(length)
    }

    #[test]
    fn repeat_allocation_returns_same_id() {
        let mut bank = SampleManager::new(SampleBankConfig::default());
        let first = bank.allocate("kick", &sized(256));
        let second = bank.allocate("kick", &sized(256));
        assert_eq!(first.id, second.id);
        assert_eq!(bank.active_count(), 1);
        assert_eq!(bank.stats().allocated, 1);
    }

    #[test]
    fn eviction_under_budget_drops_lowest_score() {
        // The §8 scenario: budget 512, max 3 samples of 200 bytes each,
        // usage A=8, B=1, C=4, then D twice. B has the lowest score and is
        // the one evicted when D arrives.
        let config = SampleBankConfig {
            memory_budget: 512,
            max_samples: 3,
            ..Default::default()
        };
        let mut bank = SampleManager::new(config);

        for _ in 0..8 {
            bank.allocate("a", &sized(200));
        }
        bank.allocate("b", &sized(200));
        for _ in 0..4 {
            bank.allocate("c", &sized(200));
        }
        for _ in 0..2 {
            bank.allocate("d", &sized(200));
        }

        let mut names: Vec<&str> = bank.active_names().collect();
        names.sort();
        assert_eq!(names, vec!["a", "c", "d"]);
        assert_eq!(bank.stats().evictions, 1);
    }

    #[test]
    fn ids_are_never_reused_after_eviction() {
        let config = SampleBankConfig {
            memory_budget: 1024,
            max_samples: 2,
            ..Default::default()
        };
        let mut bank = SampleManager::new(config);

        let a = bank.allocate("a", &sized(100));
        let b = bank.allocate("b", &sized(700));
        let c = bank.allocate("c", &sized(700));
        assert_eq!(a.id, 0);
        assert_eq!(b.id, 1);
        // c forced an eviction but still gets a fresh id
        assert_eq!(c.id, 2);
    }

    #[test]
    fn similar_sample_is_aliased_when_bank_full() {
        let config = SampleBankConfig {
            max_samples: 2,
            ..Default::default()
        };
        let mut bank = SampleManager::new(config);

        let kick_data = SampleData {
            data: vec![0xAA; 64],
            length: Some(64),
            frequency: None,
        };
        let kick = bank.allocate("kick", &kick_data);
        bank.allocate(
            "crash",
            &SampleData {
                data: vec![0x55; 64],
                length: Some(64),
                frequency: None,
            },
        );

        // Identical waveform, bank already at capacity: aliased, not evicted.
        let clone = bank.allocate("kick_copy", &kick_data);
        assert_eq!(clone.id, kick.id);
        assert_eq!(bank.stats().aliased, 1);
        assert_eq!(bank.active_count(), 2);
    }

    #[test]
    fn count_limit_holds_after_allocation() {
        let config = SampleBankConfig {
            max_samples: 4,
            memory_budget: 16384,
            ..Default::default()
        };
        let mut bank = SampleManager::new(config);
        for i in 0..12 {
            // Distinct sizes keep similarity below the alias threshold.
            bank.allocate(&format!("s{i}"), &sized(64 + i * 97));
            assert!(bank.active_count() <= 4);
        }
    }

    #[test]
    fn forced_optimize_fits_budget() {
        let config = SampleBankConfig {
            memory_budget: 1024,
            max_samples: 8,
            ..Default::default()
        };
        let mut bank = SampleManager::new(config);
        for i in 0..6 {
            bank.allocate(&format!("s{i}"), &sized(400));
        }
        bank.optimize(true);
        assert!(bank.total_bytes() <= 1024);
        assert!(bank.active_count() >= bank.config().keep_minimum_samples);
    }

    #[test]
    fn keep_minimum_is_respected() {
        let config = SampleBankConfig {
            memory_budget: 256,
            max_samples: 4,
            keep_minimum_samples: 2,
            ..Default::default()
        };
        let mut bank = SampleManager::new(config);
        bank.allocate("a", &sized(300));
        bank.allocate("b", &sized(300));
        bank.optimize(true);
        // Over budget, but eviction never goes below the floor.
        assert_eq!(bank.active_count(), 2);
    }
}
