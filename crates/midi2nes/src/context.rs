use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use dpcm_bank::{DrumMapperConfig, SampleManager};
use frame_compile::CompilerConfig;
use pattern_detect::DetectorConfig;
use track_map::ArpeggioStyle;

use crate::summary::Diagnostics;

/// Everything tunable about one compile, with the defaults the CLI uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    pub arpeggio_style: ArpeggioStyle,
    pub compiler: CompilerConfig,
    pub detector: DetectorConfig,
    pub drums: DrumMapperConfig,
    /// Skip pattern detection and reference tables entirely.
    pub use_patterns: bool,
    /// Snap tempo changes onto frame boundaries before compiling.
    pub frame_align_tempo: bool,
    /// Optional JSON sample index; the built-in kit applies otherwise.
    pub dpcm_index: Option<PathBuf>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            arpeggio_style: ArpeggioStyle::Default,
            compiler: CompilerConfig::default(),
            detector: DetectorConfig::default(),
            drums: DrumMapperConfig::default(),
            use_patterns: true,
            frame_align_tempo: false,
            dpcm_index: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CompileConfig {
    /// Load a JSON config; absent fields keep their defaults.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).expect("config serializes");
        std::fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Shared state threaded through the pipeline stages: configuration, the
/// diagnostics sink and the DPCM sample bank. No global singletons.
pub struct CompileContext {
    pub config: CompileConfig,
    pub diagnostics: Diagnostics,
    pub samples: SampleManager,
}

impl CompileContext {
    pub fn new(config: CompileConfig) -> Self {
        let samples = SampleManager::new(config.drums.sample_bank);
        Self {
            config,
            diagnostics: Diagnostics::default(),
            samples,
        }
    }
}

impl Default for CompileContext {
    fn default() -> Self {
        Self::new(CompileConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context_carries_default_budget() {
        let ctx = CompileContext::default();
        assert_eq!(ctx.samples.config().max_samples, 16);
        assert!(ctx.config.use_patterns);
        assert!(!ctx.diagnostics.any_recovered());
    }

    #[test]
    fn config_roundtrips_and_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = CompileConfig {
            use_patterns: false,
            frame_align_tempo: true,
            ..Default::default()
        };
        config.save(&path).unwrap();
        let loaded = CompileConfig::load(&path).unwrap();
        assert!(!loaded.use_patterns);
        assert!(loaded.frame_align_tempo);

        // A sparse file only overrides what it names.
        std::fs::write(&path, r#"{"use_patterns": false}"#).unwrap();
        let sparse = CompileConfig::load(&path).unwrap();
        assert!(!sparse.use_patterns);
        assert_eq!(sparse.compiler.sustain_frames, 4);
    }

    #[test]
    fn bad_config_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            CompileConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
