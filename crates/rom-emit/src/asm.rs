use std::collections::BTreeMap;
use std::fmt::Write as _;

use tracing::debug;

use dpcm_bank::SampleInfo;
use nes_apu::{triangle_control, ChannelFrames, ChannelKind, FrameRecord};
use pattern_detect::{LoopPoint, OptimizationHint, Pattern, ReferenceTable};

use crate::mapper::Mapper;
use crate::{EmitError, Result};

/// Estimated bytes of playback code emitted alongside the data tables.
const ROUTINE_OVERHEAD: usize = 768;

/// Per-frame register data for one tonal channel, silence already encoded
/// as the channel's quiet bytes.
struct TonalTables {
    label: &'static str,
    note: Vec<u8>,
    timer_lo: Vec<u8>,
    timer_hi: Vec<u8>,
    control: Vec<u8>,
}

/// Renders the complete `music.asm` artifact: data tables for every
/// channel, the pattern dictionary and reference table, and the
/// `init_music` / `update_music` playback routines.
pub struct MusicAssembly<'a> {
    frames: &'a ChannelFrames,
    patterns: &'a BTreeMap<String, Pattern>,
    references: &'a ReferenceTable,
    samples: Vec<(SampleInfo, Vec<u8>)>,
    loops: Vec<LoopPoint>,
}

impl<'a> MusicAssembly<'a> {
    pub fn new(
        frames: &'a ChannelFrames,
        patterns: &'a BTreeMap<String, Pattern>,
        references: &'a ReferenceTable,
    ) -> Self {
        Self {
            frames,
            patterns,
            references,
            samples: Vec::new(),
            loops: Vec::new(),
        }
    }

    /// Attach DPCM sample bodies for the sample data segment.
    pub fn with_samples(mut self, samples: Vec<(SampleInfo, Vec<u8>)>) -> Self {
        self.samples = samples;
        self
    }

    /// Attach detected loops; they are emitted as the jump table.
    pub fn with_loops(mut self, loops: &[LoopPoint]) -> Self {
        self.loops = loops.to_vec();
        self
    }

    fn total_frames(&self) -> usize {
        self.frames.max_frame().map(|f| f as usize + 1).unwrap_or(0)
    }

    fn tonal_tables(&self, kind: ChannelKind, label: &'static str) -> TonalTables {
        let total = self.total_frames();
        let quiet = kind.quiet_byte();
        let mut tables = TonalTables {
            label,
            note: vec![0; total],
            timer_lo: vec![0; total],
            timer_hi: vec![0; total],
            control: vec![quiet; total],
        };

        if let Some(map) = self.frames.channel(kind) {
            for (&frame, record) in map {
                let i = frame as usize;
                match record {
                    FrameRecord::Pulse {
                        note,
                        timer,
                        control,
                        ..
                    } => {
                        tables.note[i] = *note;
                        tables.timer_lo[i] = (*timer & 0xFF) as u8;
                        tables.timer_hi[i] = (*timer >> 8) as u8;
                        tables.control[i] = *control;
                    }
                    FrameRecord::Triangle {
                        note,
                        timer,
                        volume,
                    } => {
                        tables.note[i] = *note;
                        tables.timer_lo[i] = (*timer & 0xFF) as u8;
                        tables.timer_hi[i] = (*timer >> 8) as u8;
                        tables.control[i] = triangle_control(*volume);
                    }
                    _ => {}
                }
            }
        }
        tables
    }

    fn noise_table(&self) -> Vec<u8> {
        let total = self.total_frames();
        let mut table = vec![0x30u8; total];
        if let Some(map) = self.frames.channel(ChannelKind::Noise) {
            for (&frame, record) in map {
                if let FrameRecord::Noise { volume, .. } = record {
                    table[frame as usize] = 0x30 | (volume & 0x0F);
                }
            }
        }
        table
    }

    /// DPCM trigger table: sample id + 1, 0 = no trigger.
    fn dpcm_table(&self) -> Vec<u8> {
        let total = self.total_frames();
        let mut table = vec![0u8; total];
        if let Some(map) = self.frames.channel(ChannelKind::Dpcm) {
            for (&frame, record) in map {
                if let FrameRecord::Dpcm {
                    sample_id,
                    enabled: true,
                } = record
                {
                    table[frame as usize] = sample_id.saturating_add(1);
                }
            }
        }
        table
    }

    fn data_size(&self) -> usize {
        let frames = self.total_frames();
        let tonal = 3 * 4 * frames;
        let noise_dpcm = 2 * frames;
        let refs = 3 * frames;
        let pattern_data: usize = self.patterns.values().map(|p| p.length * 2).sum();
        let sample_data: usize = self.samples.iter().map(|(_, d)| d.len()).sum();
        let loop_data = 1 + self.loops.len() * 5;
        tonal + noise_dpcm + refs + pattern_data + sample_data + loop_data + ROUTINE_OVERHEAD
    }

    /// Render the full assembly text.
    ///
    /// Fatal when the tables cannot fit the mapper's PRG layout; everything
    /// else renders, including an empty song (tables of length zero).
    pub fn render(&self, mapper: &dyn Mapper) -> Result<String> {
        let needed = self.data_size();
        let capacity = mapper.data_capacity();
        if needed > capacity {
            return Err(EmitError::TableSizeExceedsBank {
                needed,
                capacity,
                mapper: mapper.name(),
            });
        }
        debug!(needed, capacity, frames = self.total_frames(), "emitting music.asm");

        let mut out = String::new();
        out.push_str("; CA65 Assembly Export\n");
        out.push_str("; Frame-indexed music data and playback routines\n\n");
        out.push_str(".importzp ptr1, temp1, temp2, frame_counter\n\n");
        out.push_str(".global init_music\n.global update_music\n\n");

        out.push_str(".segment \"BSS\"\n\n");
        out.push_str("last_pulse1_note:   .res 1\n");
        out.push_str("last_pulse2_note:   .res 1\n");
        out.push_str("last_triangle_note: .res 1\n\n");

        out.push_str(".segment \"RODATA\"\n\n");
        for (kind, label) in [
            (ChannelKind::Pulse1, "pulse1"),
            (ChannelKind::Pulse2, "pulse2"),
            (ChannelKind::Triangle, "triangle"),
        ] {
            let tables = self.tonal_tables(kind, label);
            emit_byte_table(&mut out, &format!("{label}_note_table"), &tables.note);
            emit_byte_table(&mut out, &format!("{label}_timer_lo"), &tables.timer_lo);
            emit_byte_table(&mut out, &format!("{label}_timer_hi"), &tables.timer_hi);
            emit_byte_table(&mut out, &format!("{label}_control"), &tables.control);
        }
        emit_byte_table(&mut out, "noise_table", &self.noise_table());
        emit_byte_table(&mut out, "dpcm_table", &self.dpcm_table());

        self.emit_patterns(&mut out);
        self.emit_pattern_refs(&mut out);
        self.emit_loop_table(&mut out);
        self.emit_samples(&mut out);
        self.emit_routines(&mut out);

        Ok(out)
    }

    /// Jump table: end frame, restart frame and expansion hint per loop,
    /// ordered by start frame, with the captured tempo endpoints noted.
    fn emit_loop_table(&self, out: &mut String) {
        let _ = writeln!(out, "loop_count:\n    .byte ${:02X}\n", self.loops.len());
        out.push_str("loop_table:\n");
        for l in &self.loops {
            let hint: u8 = match jump_table_hint(l) {
                OptimizationHint::Subroutine => 1,
                OptimizationHint::Inline => 0,
            };
            let _ = writeln!(
                out,
                "    .word ${:04X}, ${:04X}\n    .byte ${:02X} ; tempo {} -> {} us/q",
                l.end_frame & 0xFFFF,
                l.start_frame & 0xFFFF,
                hint,
                l.tempo_state.start.tempo,
                l.tempo_state.end.tempo,
            );
        }
        out.push('\n');
    }

    /// Pattern bodies: note/volume byte pairs, one label per pattern.
    fn emit_patterns(&self, out: &mut String) {
        for (id, pattern) in self.patterns {
            let bytes: Vec<u8> = pattern
                .events
                .iter()
                .flat_map(|e| [e.note, e.volume.min(15)])
                .collect();
            emit_byte_table(out, id, &bytes);
        }
    }

    /// Reference table: three bytes per frame, pattern pointer plus offset.
    /// Frames without a reference get zeros.
    fn emit_pattern_refs(&self, out: &mut String) {
        out.push_str("pattern_refs:\n");
        for frame in 0..self.total_frames() as u32 {
            match self.references.get(&frame) {
                Some((id, offset)) => {
                    let _ = writeln!(out, "    .word {id}");
                    let _ = writeln!(out, "    .byte ${offset:02X}");
                }
                None => {
                    out.push_str("    .word $0000\n");
                    out.push_str("    .byte $00\n");
                }
            }
        }
        out.push('\n');
    }

    fn emit_samples(&self, out: &mut String) {
        if self.samples.is_empty() {
            return;
        }

        out.push_str(".segment \"DPCM\"\n\n");
        out.push_str(".align 64\n");
        for (info, data) in &self.samples {
            let _ = writeln!(out, "dpcm_sample_{}: ; {} ({} bytes)", info.id, info.name, data.len());
            emit_byte_rows(out, data);
            out.push_str(".align 64\n");
        }
        out.push('\n');

        // The play routine indexes these by sample id, so rows must line
        // up with ids even when eviction left gaps.
        let max_id = self.samples.iter().map(|(i, _)| i.id).max().unwrap_or(0);
        out.push_str(".segment \"RODATA\"\n\n");
        out.push_str("dpcm_addr_table:\n");
        for id in 0..=max_id {
            match self.samples.iter().find(|(i, _)| i.id == id) {
                Some((info, _)) => {
                    let _ =
                        writeln!(out, "    .byte <((dpcm_sample_{} - $C000) / 64)", info.id);
                }
                None => out.push_str("    .byte $00 ; evicted id\n"),
            }
        }
        out.push_str("dpcm_len_table:\n");
        for id in 0..=max_id {
            match self.samples.iter().find(|(i, _)| i.id == id) {
                Some((_, data)) => {
                    let _ = writeln!(
                        out,
                        "    .byte ${:02X} ; {} bytes / 16",
                        data.len() / 16,
                        data.len()
                    );
                }
                None => out.push_str("    .byte $00\n"),
            }
        }
        out.push('\n');
    }

    fn emit_routines(&self, out: &mut String) {
        out.push_str(".segment \"CODE\"\n\n");

        // APU power-on: enable the channels, park the pulses and noise at
        // constant-volume zero, disable sweeps, zero the triangle's linear
        // counter, and clear the note latches.
        out.push_str(
            "\
init_music:
    lda #$0F
    sta $4015
    lda #$30
    sta $4000
    sta $4004
    sta $400C
    lda #$08
    sta $4001
    sta $4005
    lda #$00
    sta $4008
    sta $400E
    sta last_pulse1_note
    sta last_pulse2_note
    sta last_triangle_note
    rts

",
        );

        // 16-bit frame counter with carry into the high byte.
        out.push_str(
            "\
update_music:
    inc frame_counter
    bne :+
    inc frame_counter+1
:
    jsr play_pulse1
    jsr play_pulse2
    jsr play_triangle
    jsr play_noise
    jsr play_dpcm
    rts

",
        );

        self.emit_pulse_routine(out, "pulse1", 0x4000);
        self.emit_pulse_routine(out, "pulse2", 0x4004);
        self.emit_triangle_routine(out);
        self.emit_noise_routine(out);
        self.emit_dpcm_routine(out);
        self.emit_pattern_lookup(out);
    }

    fn emit_pulse_routine(&self, out: &mut String, label: &str, base: u16) {
        let _ = writeln!(out, "play_{label}:");
        out.push_str("    ldy #$00\n");
        emit_indexed_load(out, &format!("{label}_note_table"));
        let _ = writeln!(out, "    cmp last_{label}_note");
        out.push_str("    beq @sustain\n");
        out.push_str("    cmp #$00\n");
        out.push_str("    beq @silence\n");
        let _ = writeln!(out, "    sta last_{label}_note");
        emit_indexed_load(out, &format!("{label}_control"));
        let _ = writeln!(out, "    sta ${base:04X}");
        emit_indexed_load(out, &format!("{label}_timer_lo"));
        let _ = writeln!(out, "    sta ${:04X}", base + 2);
        emit_indexed_load(out, &format!("{label}_timer_hi"));
        let _ = writeln!(out, "    sta ${:04X}", base + 3);
        out.push_str("    rts\n");
        out.push_str("@sustain:\n");
        emit_indexed_load(out, &format!("{label}_control"));
        let _ = writeln!(out, "    sta ${base:04X}");
        out.push_str("    rts\n");
        out.push_str("@silence:\n");
        out.push_str("    lda #$30\n");
        let _ = writeln!(out, "    sta ${base:04X}");
        out.push_str("    lda #$00\n");
        let _ = writeln!(out, "    sta last_{label}_note");
        out.push_str("    rts\n\n");
    }

    fn emit_triangle_routine(&self, out: &mut String) {
        out.push_str("play_triangle:\n");
        out.push_str("    ldy #$00\n");
        emit_indexed_load(out, "triangle_note_table");
        out.push_str("    cmp last_triangle_note\n");
        out.push_str("    beq @sustain\n");
        out.push_str("    cmp #$00\n");
        out.push_str("    beq @silence\n");
        out.push_str("    sta last_triangle_note\n");
        emit_indexed_load(out, "triangle_control");
        out.push_str("    sta $4008\n");
        emit_indexed_load(out, "triangle_timer_lo");
        out.push_str("    sta $400A\n");
        emit_indexed_load(out, "triangle_timer_hi");
        out.push_str("    sta $400B\n");
        out.push_str("    rts\n");
        out.push_str("@sustain:\n");
        emit_indexed_load(out, "triangle_control");
        out.push_str("    sta $4008\n");
        out.push_str("    rts\n");
        // A zero linear counter byte, never $80: the triangle keeps
        // sounding otherwise.
        out.push_str("@silence:\n");
        out.push_str("    lda #$00\n");
        out.push_str("    sta $4008\n");
        out.push_str("    sta last_triangle_note\n");
        out.push_str("    rts\n\n");
    }

    fn emit_noise_routine(&self, out: &mut String) {
        out.push_str("play_noise:\n");
        out.push_str("    ldy #$00\n");
        emit_indexed_load(out, "noise_table");
        out.push_str("    sta $400C\n");
        out.push_str("    rts\n\n");
    }

    fn emit_dpcm_routine(&self, out: &mut String) {
        out.push_str("play_dpcm:\n");
        if self.samples.is_empty() {
            out.push_str("    rts\n\n");
            return;
        }
        out.push_str("    ldy #$00\n");
        emit_indexed_load(out, "dpcm_table");
        out.push_str("    beq @done\n");
        out.push_str("    tax\n");
        out.push_str("    lda dpcm_addr_table-1,x\n");
        out.push_str("    sta $4012\n");
        out.push_str("    lda dpcm_len_table-1,x\n");
        out.push_str("    sta $4013\n");
        out.push_str("    lda #$0F\n");
        out.push_str("    sta $4010\n");
        out.push_str("    lda #$0F\n");
        out.push_str("    sta $4015\n");
        out.push_str("    lda #$1F\n");
        out.push_str("    sta $4015\n");
        out.push_str("@done:\n");
        out.push_str("    rts\n\n");
    }

    /// Fetch this frame's pattern reference: leaves the pattern pointer in
    /// ptr1 and the offset in A. Three bytes per pattern_refs entry.
    fn emit_pattern_lookup(&self, out: &mut String) {
        out.push_str(
            "\
play_pattern_frame:
    ; temp1:temp2 = frame_counter * 3
    lda frame_counter
    asl
    sta temp1
    lda frame_counter+1
    rol
    sta temp2
    lda temp1
    clc
    adc frame_counter
    sta temp1
    lda temp2
    adc frame_counter+1
    sta temp2
    ; ptr1 = pattern_refs + temp1:temp2
    lda #<pattern_refs
    clc
    adc temp1
    sta ptr1
    lda #>pattern_refs
    adc temp2
    sta ptr1+1
    ldy #$00
    lda (ptr1),y
    sta temp1
    iny
    lda (ptr1),y
    sta temp2
    iny
    lda (ptr1),y
    ldx temp1
    stx ptr1
    ldx temp2
    stx ptr1+1
    rts
",
        );
    }
}

fn jump_table_hint(l: &LoopPoint) -> OptimizationHint {
    if l.length >= 16 {
        OptimizationHint::Subroutine
    } else {
        OptimizationHint::Inline
    }
}

/// `ptr1 = table + frame_counter; A = (ptr1),y` with y preset to 0.
fn emit_indexed_load(out: &mut String, table: &str) {
    let _ = writeln!(out, "    lda #<{table}");
    out.push_str("    clc\n");
    out.push_str("    adc frame_counter\n");
    out.push_str("    sta ptr1\n");
    let _ = writeln!(out, "    lda #>{table}");
    out.push_str("    adc frame_counter+1\n");
    out.push_str("    sta ptr1+1\n");
    out.push_str("    lda (ptr1),y\n");
}

fn emit_byte_table(out: &mut String, label: &str, bytes: &[u8]) {
    let _ = writeln!(out, "{label}:");
    emit_byte_rows(out, bytes);
    out.push('\n');
}

fn emit_byte_rows(out: &mut String, bytes: &[u8]) {
    for row in bytes.chunks(16) {
        out.push_str("    .byte ");
        for (i, b) in row.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "${b:02X}");
        }
        out.push('\n');
    }
    if bytes.is_empty() {
        out.push_str("    ; empty\n");
    }
}
