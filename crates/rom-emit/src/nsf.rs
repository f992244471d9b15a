use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use nes_apu::{triangle_control, ChannelFrames, ChannelKind, FrameRecord};

use crate::{EmitError, Result};

/// NSF container magic: "NESM" plus an EOF byte.
pub const NSF_MAGIC: [u8; 5] = [0x4E, 0x45, 0x53, 0x4D, 0x1A];
/// ~60 Hz NTSC playback period in microseconds.
pub const NTSC_SPEED_US: u16 = 16_639;
/// ~50 Hz PAL period.
pub const PAL_SPEED_US: u16 = 19_997;

const LOAD_ADDRESS: u16 = 0x8000;

/// The fixed 128-byte NSF header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NsfHeader {
    pub total_songs: u8,
    pub starting_song: u8,
    pub load_address: u16,
    pub init_address: u16,
    pub play_address: u16,
    pub song_name: String,
    pub artist: String,
    pub copyright: String,
}

impl NsfHeader {
    pub fn new(song_name: impl Into<String>) -> Self {
        Self {
            total_songs: 1,
            starting_song: 1,
            load_address: LOAD_ADDRESS,
            init_address: LOAD_ADDRESS,
            play_address: LOAD_ADDRESS,
            song_name: song_name.into(),
            artist: String::new(),
            copyright: String::new(),
        }
    }

    pub fn pack(&self) -> [u8; 128] {
        let mut out = [0u8; 128];
        out[..5].copy_from_slice(&NSF_MAGIC);
        out[5] = 1; // version
        out[6] = self.total_songs;
        out[7] = self.starting_song;
        out[8..10].copy_from_slice(&self.load_address.to_le_bytes());
        out[10..12].copy_from_slice(&self.init_address.to_le_bytes());
        out[12..14].copy_from_slice(&self.play_address.to_le_bytes());
        pack_name(&mut out[14..46], &self.song_name);
        pack_name(&mut out[46..78], &self.artist);
        pack_name(&mut out[78..110], &self.copyright);
        out[110..112].copy_from_slice(&NTSC_SPEED_US.to_le_bytes());
        // 112..120: bankswitch init, all zero (no banking)
        out[120..122].copy_from_slice(&PAL_SPEED_US.to_le_bytes());
        // 122: NTSC, 123: no expansion chips, 124..128 reserved
        out
    }
}

fn pack_name(dest: &mut [u8], name: &str) {
    for (slot, byte) in dest.iter_mut().zip(name.bytes().filter(u8::is_ascii)) {
        *slot = byte;
    }
}

/// Desired APU register image for one frame: (register offset from $4000,
/// value) in write order.
fn frame_registers(frames: &ChannelFrames, frame: u32) -> Vec<(u8, u8)> {
    let mut writes = Vec::new();

    let record = |kind: ChannelKind| frames.channel(kind).and_then(|m| m.get(&frame));

    for (kind, base) in [(ChannelKind::Pulse1, 0x00u8), (ChannelKind::Pulse2, 0x04)] {
        match record(kind) {
            Some(FrameRecord::Pulse {
                timer, control, ..
            }) => {
                writes.push((base, *control));
                writes.push((base + 2, (*timer & 0xFF) as u8));
                writes.push((base + 3, (*timer >> 8) as u8));
            }
            _ => writes.push((base, 0x30)),
        }
    }

    match record(ChannelKind::Triangle) {
        Some(FrameRecord::Triangle { timer, volume, .. }) => {
            writes.push((0x08, triangle_control(*volume)));
            writes.push((0x0A, (*timer & 0xFF) as u8));
            writes.push((0x0B, (*timer >> 8) as u8));
        }
        _ => writes.push((0x08, 0x00)),
    }

    match record(ChannelKind::Noise) {
        Some(FrameRecord::Noise { volume, .. }) => {
            writes.push((0x0C, 0x30 | (volume & 0x0F)));
        }
        _ => writes.push((0x0C, 0x30)),
    }

    writes
}

const FRAME_END: u8 = 0xFF;
const SONG_END: u8 = 0xFE;

/// Register stream: per frame, `(offset, value)` pairs for registers that
/// changed since the previous frame, closed by 0xFF; the whole song is
/// closed by 0xFE, on which the play routine rewinds.
fn build_stream(frames: &ChannelFrames) -> Vec<u8> {
    let total = frames.max_frame().map(|f| f as usize + 1).unwrap_or(0);
    let mut last: [Option<u8>; 16] = [None; 16];
    let mut stream = Vec::new();

    for frame in 0..total as u32 {
        for (reg, value) in frame_registers(frames, frame) {
            if last[reg as usize] != Some(value) {
                last[reg as usize] = Some(value);
                stream.push(reg);
                stream.push(value);
            }
        }
        stream.push(FRAME_END);
    }
    stream.push(SONG_END);
    stream
}

/// Hand-assembled init routine: silence and enable the APU, point the
/// zero-page stream cursor ($00/$01) at the data.
fn init_routine(stream_address: u16) -> Vec<u8> {
    let [lo, hi] = stream_address.to_le_bytes();
    vec![
        0xA9, 0x00, // lda #$00
        0x8D, 0x15, 0x40, // sta $4015
        0xA9, 0x0F, // lda #$0F
        0x8D, 0x15, 0x40, // sta $4015
        0xA9, 0x30, // lda #$30
        0x8D, 0x00, 0x40, // sta $4000
        0x8D, 0x04, 0x40, // sta $4004
        0x8D, 0x0C, 0x40, // sta $400C
        0xA9, 0x00, // lda #$00
        0x8D, 0x08, 0x40, // sta $4008
        0xA9, lo, // lda #<stream
        0x85, 0x00, // sta $00
        0xA9, hi, // lda #>stream
        0x85, 0x01, // sta $01
        0x60, // rts
    ]
}

/// Hand-assembled play routine: drain one frame's `(reg, value)` pairs
/// from the cursor, advance it, rewind on the song-end marker.
fn play_routine(play_address: u16, stream_address: u16) -> Vec<u8> {
    let loop_target = play_address + 2;
    let [loop_lo, loop_hi] = loop_target.to_le_bytes();
    let [stream_lo, stream_hi] = stream_address.to_le_bytes();
    vec![
        0xA0, 0x00, // ldy #$00
        // loop:
        0xB1, 0x00, // lda ($00),y
        0xC9, FRAME_END, // cmp #$FF
        0xF0, 0x0F, // beq frame_done
        0xC9, SONG_END, // cmp #$FE
        0xF0, 0x17, // beq song_end
        0xAA, // tax
        0xC8, // iny
        0xB1, 0x00, // lda ($00),y
        0xC8, // iny
        0x9D, 0x00, 0x40, // sta $4000,x
        0x4C, loop_lo, loop_hi, // jmp loop
        // frame_done: advance cursor past the consumed pairs + marker
        0xC8, // iny
        0x98, // tya
        0x18, // clc
        0x65, 0x00, // adc $00
        0x85, 0x00, // sta $00
        0x90, 0x02, // bcc +2
        0xE6, 0x01, // inc $01
        0x60, // rts
        // song_end: rewind to the stream start
        0xA9, stream_lo, // lda #<stream
        0x85, 0x00, // sta $00
        0xA9, stream_hi, // lda #>stream
        0x85, 0x01, // sta $01
        0x60, // rts
    ]
}

/// Render an NSF image from compiled frames.
///
/// DPCM is left out of the stream: samples would need a fixed $C000 bank
/// image, which the ROM path provides; the NSF export covers the four
/// register-driven channels.
pub fn render_nsf(frames: &ChannelFrames, header: &NsfHeader) -> Vec<u8> {
    let init = init_routine(0); // placeholder, re-rendered below
    let init_len = init.len() as u16;
    let play_len = play_routine(0, 0).len() as u16;

    let init_address = LOAD_ADDRESS;
    let play_address = LOAD_ADDRESS + init_len;
    let stream_address = play_address + play_len;

    let mut header = header.clone();
    header.load_address = LOAD_ADDRESS;
    header.init_address = init_address;
    header.play_address = play_address;

    let mut image = Vec::new();
    image.extend_from_slice(&header.pack());
    image.extend(init_routine(stream_address));
    image.extend(play_routine(play_address, stream_address));
    image.extend(build_stream(frames));
    debug!(bytes = image.len(), "NSF image rendered");
    image
}

/// Write an NSF file next to the ROM output.
pub fn export_nsf(
    frames: &ChannelFrames,
    header: &NsfHeader,
    path: impl AsRef<Path>,
) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, render_nsf(frames, header)).map_err(|source| EmitError::Io {
        path: path.display().to_string(),
        source,
    })
}
