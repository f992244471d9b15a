pub mod event;
pub mod gm;
pub mod parse;

pub use event::{NoteEvent, NoteKind};
pub use gm::{family, program_name, GmFamily};
pub use parse::{parse_midi, parse_smf, IngestStats, MidiMetadata, ParsedMidi, TrackProfile};

/// Errors from MIDI ingestion.
///
/// Only structural problems are fatal here. Per-event trouble (bad tempo
/// cues, malformed messages) is counted in [`IngestStats`] and parsing
/// continues — the documented recovery policy for the front-end.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("not a standard MIDI file: {0}")]
    MalformedFile(String),
    #[error("SMPTE timecode timing is not supported")]
    TimecodeTiming,
}

pub type Result<T> = std::result::Result<T, IngestError>;
