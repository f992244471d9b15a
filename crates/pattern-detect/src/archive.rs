use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compress::{CompressionStats, Pattern, ReferenceTable};
use crate::{PatternError, Result};

/// Cached pattern analysis: the dictionary, the per-frame reference table
/// and compression statistics, round-trippable as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternArchive {
    pub patterns: BTreeMap<String, Pattern>,
    pub references: ReferenceTable,
    pub stats: CompressionStats,
}

impl PatternArchive {
    pub fn new(
        patterns: BTreeMap<String, Pattern>,
        references: ReferenceTable,
        stats: CompressionStats,
    ) -> Self {
        Self {
            patterns,
            references,
            stats,
        }
    }

    pub fn empty() -> Self {
        Self {
            patterns: BTreeMap::new(),
            references: ReferenceTable::new(),
            stats: CompressionStats::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).expect("archive serializes");
        std::fs::write(path, text).map_err(|source| PatternError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| PatternError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| PatternError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}
