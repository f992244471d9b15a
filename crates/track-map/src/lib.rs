pub mod arpeggio;
pub mod assign;
pub mod chord;

pub use arpeggio::{apply_arpeggio_fallback, ArpeggioInfo, ArpeggioPattern, ArpeggioStyle};
pub use assign::{
    assign_tracks, envelope_for_program, MappedNote, MappingSummary, NesTracks, SplitMode,
};
pub use chord::{detect_chord, Chord, ChordType};
