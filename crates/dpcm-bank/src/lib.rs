pub mod config;
pub mod drums;
pub mod index;
pub mod manager;
pub mod patterns;

pub use config::{DrumMapperConfig, SampleBankConfig};
pub use drums::{map_drums, DpcmEvent, DrumHit, DrumMapper, DrumNoteConfig, NoiseEvent, VelocityRange};
pub use index::{SampleData, SampleIndex};
pub use manager::{SampleInfo, SampleManager};

/// Errors from sample bank configuration and index I/O.
#[derive(Debug, thiserror::Error)]
pub enum BankError {
    #[error("DPCM sample index not found: {path}")]
    IndexNotFound { path: String },
    #[error("invalid DPCM sample index {path}: {source}")]
    IndexParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid drum mapper config {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
    #[error("velocity ranges for note {note} do not partition 0..=127: {reason}")]
    VelocityRanges { note: u8, reason: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, BankError>;
