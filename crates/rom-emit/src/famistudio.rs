use std::fmt::Write as _;

use nes_apu::{ChannelFrames, ChannelKind, FrameRecord};

const NOTE_NAMES: [&str; 12] = [
    "C-", "C#", "D-", "D#", "E-", "F-", "F#", "G-", "G#", "A-", "A#", "B-",
];

const BLANK_CELL: &str = "... .. ..";

fn note_name(note: u8) -> String {
    let octave = (note / 12) as i8 - 1;
    format!("{}{}", NOTE_NAMES[(note % 12) as usize], octave)
}

fn cell(channel: ChannelKind, record: &FrameRecord) -> String {
    match record {
        FrameRecord::Pulse { note, volume, .. } | FrameRecord::Triangle { note, volume, .. } => {
            if *volume == 0 {
                BLANK_CELL.to_string()
            } else {
                let instrument = if channel.is_pulse() { "00" } else { "01" };
                format!("{} {} {:02X}", note_name(*note), instrument, volume)
            }
        }
        FrameRecord::Noise { volume, .. } => {
            if *volume > 0 {
                format!("F#2 02 {volume:02X}")
            } else {
                BLANK_CELL.to_string()
            }
        }
        FrameRecord::Dpcm { sample_id, enabled } => {
            if *enabled {
                format!("C-3 03 {sample_id:02X}")
            } else {
                BLANK_CELL.to_string()
            }
        }
    }
}

/// Render compiled frames as FamiStudio/FamiTracker-style text: an order
/// list plus fixed-height patterns with one row per frame and one column
/// per channel.
pub fn famistudio_text(frames: &ChannelFrames, rows_per_pattern: usize) -> String {
    let rows = rows_per_pattern.max(1);
    let total_frames = frames.max_frame().map(|f| f as usize + 1).unwrap_or(0);
    let total_patterns = total_frames.div_ceil(rows).max(1);

    let mut out = String::new();
    out.push_str("# FamiTracker text export\n");
    out.push_str("# Song title: MIDI2NES\n");
    out.push_str("COLUMNS 1 1 1 1 1\n");
    let _ = writeln!(out, "ROWS {rows}");
    out.push_str("ORDER");
    for i in 0..total_patterns {
        let _ = write!(out, " {i:02X}");
    }
    out.push('\n');

    for pattern in 0..total_patterns {
        let _ = writeln!(out, "PATTERN {pattern:02X}");
        for row in 0..rows {
            let frame = (pattern * rows + row) as u32;
            let _ = write!(out, "{row:02X} |");
            for kind in ChannelKind::ALL {
                let text = frames
                    .channel(kind)
                    .and_then(|m| m.get(&frame))
                    .map(|r| cell(kind, r))
                    .unwrap_or_else(|| BLANK_CELL.to_string());
                let _ = write!(out, " {text}");
            }
            out.push('\n');
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use nes_apu::FrameMap;
    use pretty_assertions::assert_eq;

    #[test]
    fn note_names() {
        assert_eq!(note_name(60), "C-4");
        assert_eq!(note_name(69), "A-4");
        assert_eq!(note_name(61), "C#4");
    }

    #[test]
    fn export_places_notes_in_rows() {
        let mut frames = ChannelFrames::new();
        let mut p1 = FrameMap::new();
        p1.insert(
            0,
            FrameRecord::Pulse {
                note: 60,
                timer: 427,
                control: 0xBF,
                volume: 12,
            },
        );
        frames.insert(ChannelKind::Pulse1, p1);

        let text = famistudio_text(&frames, 64);
        assert!(text.contains("ROWS 64"));
        assert!(text.contains("PATTERN 00"));
        assert!(text.contains("00 | C-4 00 0C"));
        // Other channels blank on row 0.
        assert!(text.contains("C-4 00 0C ... .. .. ... .. .. ... .. .. ... .. .."));
    }

    #[test]
    fn long_songs_span_multiple_patterns() {
        let mut frames = ChannelFrames::new();
        let mut p1 = FrameMap::new();
        p1.insert(
            100,
            FrameRecord::Pulse {
                note: 72,
                timer: 200,
                control: 0xBF,
                volume: 10,
            },
        );
        frames.insert(ChannelKind::Pulse1, p1);

        let text = famistudio_text(&frames, 64);
        assert!(text.contains("ORDER 00 01"));
        assert!(text.contains("PATTERN 01"));
        // Frame 100 = pattern 1, row 36 (0x24).
        assert!(text.contains("24 | C-5 00 0A"));
    }

    #[test]
    fn noise_and_dpcm_cells() {
        use nes_apu::NoiseMode;

        let mut frames = ChannelFrames::new();
        let mut noise = FrameMap::new();
        noise.insert(
            0,
            FrameRecord::Noise {
                mode: NoiseMode::White,
                volume: 12,
            },
        );
        frames.insert(ChannelKind::Noise, noise);
        let mut dpcm = FrameMap::new();
        dpcm.insert(
            1,
            FrameRecord::Dpcm {
                sample_id: 3,
                enabled: true,
            },
        );
        frames.insert(ChannelKind::Dpcm, dpcm);

        let text = famistudio_text(&frames, 64);
        assert!(text.contains("F#2 02 0C"));
        assert!(text.contains("C-3 03 03"));
    }

    #[test]
    fn empty_song_still_has_one_pattern() {
        let text = famistudio_text(&ChannelFrames::new(), 64);
        assert!(text.contains("ORDER 00"));
        assert!(text.contains("PATTERN 00"));
    }
}
