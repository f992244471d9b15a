pub mod archive;
pub mod compress;
pub mod detect;
pub mod loops;
pub mod records;

pub use archive::PatternArchive;
pub use compress::{compress_patterns, CompressionStats, Pattern, PatternVariation, ReferenceTable};
pub use detect::{detect_patterns, events_from_frames, DetectionResult, DetectorConfig, SourceEvent};
pub use loops::{detect_loops, jump_table, JumpEntry, LoopPoint, OptimizationHint};
pub use records::{compress_records, decompress_records, PatternEvent, RecordBlock};

/// Errors from pattern archive I/O. Detection itself never fails; shard
/// timeouts degrade to empty shard results and are counted.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("failed to read pattern archive {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid pattern archive {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, PatternError>;
