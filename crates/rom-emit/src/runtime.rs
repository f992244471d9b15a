use std::fmt::Write as _;

use crate::mapper::Mapper;

/// Generate the runtime glue (`main.asm`): iNES header, shared zero-page,
/// reset/NMI handlers and the interrupt vectors. The NMI drives
/// `update_music` at 60 Hz; that is the entire timing model.
pub fn main_asm(mapper: &dyn Mapper) -> String {
    let mut out = String::new();

    out.push_str(".segment \"HEADER\"\n");
    let header = mapper.header().to_bytes();
    out.push_str("    .byte ");
    for (i, b) in header.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "${b:02X}");
    }
    let _ = writeln!(out, " ; {} / {} KiB PRG", mapper.name(), mapper.prg_rom_size() / 1024);
    out.push('\n');

    out.push_str(
        "\
.segment \"ZEROPAGE\"

ptr1:          .res 2
temp1:         .res 1
temp2:         .res 1
frame_counter: .res 2

.exportzp ptr1, temp1, temp2, frame_counter

.segment \"CODE\"

.global init_music
.global update_music

reset:
    sei
    cld
    ldx #$FF
    txs

",
    );
    out.push_str(&mapper.init_code());
    out.push_str(
        "
    lda #$00
    sta frame_counter
    sta frame_counter+1

    jsr init_music

    ; NMI on: the 60 Hz interrupt is the music clock
    lda #$80
    sta $2000

mainloop:
    jmp mainloop

nmi:
    pha
    txa
    pha
    tya
    pha

    jsr update_music

    pla
    tay
    pla
    tax
    pla
    rti

irq:
    rti

.segment \"VECTORS\"
    .word nmi
    .word reset
    .word irq
",
    );

    out
}
