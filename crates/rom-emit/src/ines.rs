use serde::{Deserialize, Serialize};

/// iNES magic: "NES" followed by an EOF byte.
pub const INES_MAGIC: [u8; 4] = [0x4E, 0x45, 0x53, 0x1A];
pub const PRG_BANK_SIZE: usize = 16 * 1024;
pub const HEADER_SIZE: usize = 16;

/// The 16-byte iNES header the toolchain bakes into the ROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RomHeader {
    /// PRG-ROM size in 16 KiB banks.
    pub prg_banks: u8,
    /// CHR-ROM size in 8 KiB banks; 0 means CHR-RAM.
    pub chr_banks: u8,
    pub mapper: u8,
    pub vertical_mirroring: bool,
}

impl RomHeader {
    /// MMC1, 8 x 16 KiB PRG, CHR-RAM, horizontal mirroring.
    pub fn mmc1_128k() -> Self {
        Self {
            prg_banks: 8,
            chr_banks: 0,
            mapper: 1,
            vertical_mirroring: false,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[..4].copy_from_slice(&INES_MAGIC);
        header[4] = self.prg_banks;
        header[5] = self.chr_banks;
        header[6] = (self.mapper << 4) | u8::from(self.vertical_mirroring);
        header[7] = self.mapper & 0xF0;
        header
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE || bytes[..4] != INES_MAGIC {
            return None;
        }
        Some(Self {
            prg_banks: bytes[4],
            chr_banks: bytes[5],
            mapper: (bytes[6] >> 4) | (bytes[7] & 0xF0),
            vertical_mirroring: bytes[6] & 1 == 1,
        })
    }

    pub fn rom_size(&self) -> usize {
        HEADER_SIZE + self.prg_banks as usize * PRG_BANK_SIZE + self.chr_banks as usize * 8192
    }
}

/// Check that a built ROM image matches its declared header.
pub fn validate_rom(bytes: &[u8]) -> std::result::Result<RomHeader, String> {
    let header = RomHeader::parse(bytes).ok_or_else(|| "missing iNES header".to_string())?;
    let expected = header.rom_size();
    if bytes.len() != expected {
        return Err(format!(
            "ROM is {} bytes, header declares {expected}",
            bytes.len()
        ));
    }
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mmc1_header_bytes() {
        let bytes = RomHeader::mmc1_128k().to_bytes();
        assert_eq!(&bytes[..4], b"NES\x1a");
        assert_eq!(bytes[4], 8); // 8 x 16 KiB PRG
        assert_eq!(bytes[5], 0); // CHR-RAM
        assert_eq!(bytes[6], 0x10); // mapper 1, horizontal mirroring
        assert_eq!(&bytes[7..], &[0u8; 9]);
    }

    #[test]
    fn header_roundtrip() {
        let header = RomHeader::mmc1_128k();
        let parsed = RomHeader::parse(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn rom_validation() {
        let header = RomHeader::mmc1_128k();
        let mut rom = header.to_bytes().to_vec();
        rom.resize(header.rom_size(), 0xFF);
        assert_eq!(validate_rom(&rom).unwrap(), header);

        rom.pop();
        assert!(validate_rom(&rom).is_err());
        assert!(validate_rom(b"junk").is_err());
    }
}
