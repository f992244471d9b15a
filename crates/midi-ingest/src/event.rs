use serde::{Deserialize, Serialize};

/// Whether a note event starts or ends a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    On,
    Off,
}

/// A single time-ordered note event, stamped with both its MIDI tick and
/// the 60 Hz frame the tempo map resolved it to.
///
/// A NoteOn with velocity 0 never survives ingestion; it is normalized to
/// `NoteKind::Off` on the way in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub frame: u32,
    pub tick: u64,
    pub note: u8,
    pub velocity: u8,
    pub kind: NoteKind,
}

impl NoteEvent {
    pub fn on(frame: u32, note: u8, velocity: u8) -> Self {
        Self {
            frame,
            tick: 0,
            note,
            velocity,
            kind: NoteKind::On,
        }
    }

    pub fn off(frame: u32, note: u8) -> Self {
        Self {
            frame,
            tick: 0,
            note,
            velocity: 0,
            kind: NoteKind::Off,
        }
    }

    pub fn is_on(&self) -> bool {
        self.kind == NoteKind::On && self.velocity > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_off_constructors() {
        let on = NoteEvent::on(4, 60, 100);
        assert!(on.is_on());
        let off = NoteEvent::off(8, 60);
        assert!(!off.is_on());
        assert_eq!(off.velocity, 0);
    }
}
