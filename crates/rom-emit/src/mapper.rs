use crate::ines::RomHeader;

/// A cartridge mapper: supplies the header, linker layout and reset-time
/// initialization the project builder stitches together.
pub trait Mapper {
    fn name(&self) -> &'static str;
    fn mapper_number(&self) -> u8;
    fn prg_rom_size(&self) -> usize;

    fn header(&self) -> RomHeader;

    /// Complete ld65 configuration for this layout.
    fn linker_config(&self) -> String;

    /// Assembly executed at reset before anything touches PRG banking.
    fn init_code(&self) -> String;

    /// Bytes available for music data after code and vectors.
    fn data_capacity(&self) -> usize {
        self.prg_rom_size().saturating_sub(2048)
    }
}

/// MMC1 with 128 KiB PRG-ROM and CHR-RAM, the default target.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mmc1;

impl Mapper for Mmc1 {
    fn name(&self) -> &'static str {
        "MMC1"
    }

    fn mapper_number(&self) -> u8 {
        1
    }

    fn prg_rom_size(&self) -> usize {
        128 * 1024
    }

    fn header(&self) -> RomHeader {
        RomHeader::mmc1_128k()
    }

    fn linker_config(&self) -> String {
        // One continuous 128 KiB PRG area after the 16-byte header; the
        // fixed bank logic lives in init_code.
        "\
MEMORY {
    ZP:       start = $0000, size = $0100, type = rw, define = yes;
    RAM:      start = $0300, size = $0500, type = rw, define = yes;

    # iNES header (16 bytes at file start)
    HEADER:   start = $0000, size = $0010, file = %O, fill = yes;

    # Full 128KB PRG ROM mapped after the header
    PRG:      start = $0010, size = $20000, file = %O, fill = yes, define = yes, fillval = $FF;
}

SEGMENTS {
    ZEROPAGE: load = ZP, type = zp;
    BSS:      load = RAM, type = bss, define = yes;
    HEADER:   load = HEADER, type = ro;
    CODE:     load = PRG, type = ro, start = $8000;
    RODATA:   load = PRG, type = ro;
    DPCM:     load = PRG, type = ro, start = $C000, optional = yes;
    VECTORS:  load = PRG, type = ro, start = $FFFA;
}
"
        .to_string()
    }

    fn init_code(&self) -> String {
        "\
    ; MMC1 reset, then 16KB banking with a fixed high bank
    lda #$80
    sta $8000
    lda #$0C
    sta $8000
"
        .to_string()
    }
}

/// NROM-128/256: no banking, for tiny test songs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Nrom;

impl Mapper for Nrom {
    fn name(&self) -> &'static str {
        "NROM"
    }

    fn mapper_number(&self) -> u8 {
        0
    }

    fn prg_rom_size(&self) -> usize {
        32 * 1024
    }

    fn header(&self) -> RomHeader {
        RomHeader {
            prg_banks: 2,
            chr_banks: 0,
            mapper: 0,
            vertical_mirroring: false,
        }
    }

    fn linker_config(&self) -> String {
        "\
MEMORY {
    ZP:       start = $0000, size = $0100, type = rw, define = yes;
    RAM:      start = $0300, size = $0500, type = rw, define = yes;

    HEADER:   start = $0000, size = $0010, file = %O, fill = yes;
    PRG:      start = $8000, size = $8000, file = %O, fill = yes, define = yes, fillval = $FF;
}

SEGMENTS {
    ZEROPAGE: load = ZP, type = zp;
    BSS:      load = RAM, type = bss, define = yes;
    HEADER:   load = HEADER, type = ro;
    CODE:     load = PRG, type = ro;
    RODATA:   load = PRG, type = ro;
    DPCM:     load = PRG, type = ro, start = $C000, optional = yes;
    VECTORS:  load = PRG, type = ro, start = $FFFA;
}
"
        .to_string()
    }

    fn init_code(&self) -> String {
        "    ; NROM needs no mapper init\n".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmc1_layout() {
        let m = Mmc1;
        assert_eq!(m.mapper_number(), 1);
        assert_eq!(m.prg_rom_size(), 131_072);
        assert_eq!(m.data_capacity(), 131_072 - 2048);
        assert!(m.linker_config().contains("size = $20000"));
        assert!(m.linker_config().contains("VECTORS"));
    }

    #[test]
    fn nrom_layout() {
        let m = Nrom;
        assert_eq!(m.mapper_number(), 0);
        assert_eq!(m.header().prg_banks, 2);
        assert!(m.linker_config().contains("start = $8000"));
    }
}
