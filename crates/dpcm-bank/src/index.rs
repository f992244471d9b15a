use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{BankError, Result};

/// Raw sample metadata as stored in the JSON index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleData {
    /// DPCM-encoded sample bytes. May be empty for index-only entries.
    #[serde(default)]
    pub data: Vec<u8>,
    /// Declared byte length; falls back to 1024 when absent.
    #[serde(default)]
    pub length: Option<usize>,
    /// Playback rate; defaults to the common $E speed.
    #[serde(default)]
    pub frequency: Option<u32>,
}

impl SampleData {
    pub fn with_length(length: usize) -> Self {
        Self {
            length: Some(length),
            ..Default::default()
        }
    }

    /// Bytes this sample occupies in the bank budget.
    pub fn size_bytes(&self) -> usize {
        self.length.unwrap_or(1024)
    }

    pub fn frequency_hz(&self) -> u32 {
        self.frequency.unwrap_or(33_144)
    }
}

/// On-disk index mapping sample names to their data, shared by drum
/// mappings and the bank.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleIndex {
    pub samples: BTreeMap<String, SampleData>,
}

impl SampleIndex {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BankError::IndexNotFound {
                path: path.display().to_string(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|source| BankError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| BankError::IndexParse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn get(&self, name: &str) -> Option<&SampleData> {
        self.samples.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.samples.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, data: SampleData) {
        self.samples.insert(name.into(), data);
    }

    /// A small built-in kit used when no index file is provided, so drum
    /// tracks still route to DPCM out of the box.
    pub fn builtin_kit() -> Self {
        let mut index = Self::default();
        for (name, length) in [
            ("kick", 352),
            ("kick_soft", 288),
            ("kick_hard", 416),
            ("kick_sub", 512),
            ("snare", 320),
            ("snare_soft", 256),
            ("snare_hard", 384),
            ("snare_rattle", 288),
            ("hihat_closed", 128),
            ("hihat_open", 256),
            ("crash", 768),
            ("ride", 512),
        ] {
            index.insert(name, SampleData::with_length(length));
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_index_is_reported() {
        let err = SampleIndex::load("/no/such/dpcm_index.json").unwrap_err();
        assert!(matches!(err, BankError::IndexNotFound { .. }));
    }

    #[test]
    fn index_parses_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dpcm_index.json");
        std::fs::write(
            &path,
            r#"{"kick": {"data": [1, 2, 3], "length": 3, "frequency": 33144}}"#,
        )
        .unwrap();

        let index = SampleIndex::load(&path).unwrap();
        let kick = index.get("kick").unwrap();
        assert_eq!(kick.data, vec![1, 2, 3]);
        assert_eq!(kick.size_bytes(), 3);
    }

    #[test]
    fn default_size_when_length_absent() {
        let data = SampleData::default();
        assert_eq!(data.size_bytes(), 1024);
        assert_eq!(data.frequency_hz(), 33_144);
    }

    #[test]
    fn builtin_kit_covers_default_mapping() {
        let kit = SampleIndex::builtin_kit();
        for name in ["kick", "snare", "hihat_closed", "hihat_open", "crash", "ride"] {
            assert!(kit.contains(name), "missing {name}");
        }
    }
}
