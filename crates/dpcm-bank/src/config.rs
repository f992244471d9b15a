use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{BankError, Result};

/// Budget and scoring knobs for the DPCM sample bank.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleBankConfig {
    pub max_samples: usize,
    /// Total sample bytes allowed in the bank.
    pub memory_budget: usize,
    /// Similarity at or above which an allocation is aliased to an existing
    /// sample instead of evicting.
    pub similarity_threshold: f32,
    /// Eviction never shrinks the bank below this many samples.
    pub keep_minimum_samples: usize,

    // Eviction score weights; must sum to 1.
    pub usage_weight: f32,
    pub size_weight: f32,
    pub similarity_weight: f32,

    // Sample similarity weights; must sum to 1.
    pub length_similarity_weight: f32,
    pub waveform_similarity_weight: f32,
}

impl Default for SampleBankConfig {
    fn default() -> Self {
        Self {
            max_samples: 16,
            memory_budget: 4096,
            similarity_threshold: 0.85,
            keep_minimum_samples: 1,
            usage_weight: 0.5,
            size_weight: 0.3,
            similarity_weight: 0.2,
            length_similarity_weight: 0.4,
            waveform_similarity_weight: 0.6,
        }
    }
}

impl SampleBankConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_samples < 1 || self.max_samples > 64 {
            return Err(BankError::InvalidConfig {
                reason: format!("max_samples {} outside 1..=64", self.max_samples),
            });
        }
        if self.memory_budget < 256 || self.memory_budget > 16384 {
            return Err(BankError::InvalidConfig {
                reason: format!("memory_budget {} outside 256..=16384", self.memory_budget),
            });
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(BankError::InvalidConfig {
                reason: "similarity_threshold outside 0..=1".into(),
            });
        }
        check_weights(
            "score",
            &[self.usage_weight, self.size_weight, self.similarity_weight],
        )?;
        check_weights(
            "similarity",
            &[
                self.length_similarity_weight,
                self.waveform_similarity_weight,
            ],
        )?;
        Ok(())
    }
}

fn check_weights(group: &str, weights: &[f32]) -> Result<()> {
    if weights.iter().any(|w| !(0.0..=1.0).contains(w)) {
        return Err(BankError::InvalidConfig {
            reason: format!("{group} weights must each lie in 0..=1"),
        });
    }
    let sum: f32 = weights.iter().sum();
    if (sum - 1.0).abs() > 0.001 {
        return Err(BankError::InvalidConfig {
            reason: format!("{group} weights sum to {sum}, expected 1"),
        });
    }
    Ok(())
}

/// Top-level drum mapping configuration, load/saveable as JSON so projects
/// can tune mappings without rebuilding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrumMapperConfig {
    pub sample_bank: SampleBankConfig,
    pub use_advanced_mapping: bool,
    pub enable_pattern_detection: bool,
    pub max_layers: usize,
}

impl Default for DrumMapperConfig {
    fn default() -> Self {
        Self {
            sample_bank: SampleBankConfig::default(),
            use_advanced_mapping: true,
            enable_pattern_detection: true,
            max_layers: 3,
        }
    }
}

impl DrumMapperConfig {
    pub fn validate(&self) -> Result<()> {
        self.sample_bank.validate()?;
        if self.max_layers < 1 {
            return Err(BankError::InvalidConfig {
                reason: "max_layers must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| BankError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&text).map_err(|source| BankError::ConfigParse {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).expect("config serializes");
        std::fs::write(path, text).map_err(|source| BankError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        SampleBankConfig::default().validate().unwrap();
        DrumMapperConfig::default().validate().unwrap();
    }

    #[test]
    fn bad_weights_rejected() {
        let config = SampleBankConfig {
            usage_weight: 0.9,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_budget_rejected() {
        let config = SampleBankConfig {
            memory_budget: 64,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_roundtrips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drums.json");
        let config = DrumMapperConfig {
            use_advanced_mapping: false,
            ..Default::default()
        };
        config.save(&path).unwrap();
        let loaded = DrumMapperConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_config_file_is_io_error() {
        let err = DrumMapperConfig::load("/no/such/drums.json").unwrap_err();
        assert!(matches!(err, BankError::Io { .. }));
    }
}
