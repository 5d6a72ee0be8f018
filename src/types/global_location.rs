use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::io::{BinaryReader, BinaryWriter};

/// An address qualified by which cartridge bank it lives in. Equality and
/// ordering ignore whichever of `prg_rom_bank`/`chr_rom_bank` isn't selected
/// by `is_chr`.
#[derive(Clone, Copy, Debug)]
pub struct GlobalMemoryLocation {
    pub address: u16,
    pub is_chr: bool,
    pub prg_rom_bank: u16,
    pub chr_rom_bank: u16,
}

impl GlobalMemoryLocation {
    pub fn prg(address: u16, bank: u16) -> GlobalMemoryLocation {
        GlobalMemoryLocation { address, is_chr: false, prg_rom_bank: bank, chr_rom_bank: 0 }
    }

    pub fn chr(address: u16, bank: u16) -> GlobalMemoryLocation {
        GlobalMemoryLocation { address, is_chr: true, prg_rom_bank: 0, chr_rom_bank: bank }
    }

    fn active_bank(&self) -> u16 {
        if self.is_chr { self.chr_rom_bank } else { self.prg_rom_bank }
    }

    pub fn save(&self, writer: &mut BinaryWriter) {
        writer.write_u16(self.address);
        writer.write_bool(self.is_chr);
        writer.write_u16(self.prg_rom_bank);
        writer.write_u16(self.chr_rom_bank);
    }

    pub fn load(reader: &mut BinaryReader) -> Result<GlobalMemoryLocation, String> {
        let address = reader.read_u16()?;
        let is_chr = reader.read_bool()?;
        let prg_rom_bank = reader.read_u16()?;
        let chr_rom_bank = reader.read_u16()?;
        Ok(GlobalMemoryLocation { address, is_chr, prg_rom_bank, chr_rom_bank })
    }
}

impl PartialEq for GlobalMemoryLocation {
    fn eq(&self, other: &Self) -> bool {
        self.is_chr == other.is_chr
            && self.active_bank() == other.active_bank()
            && self.address == other.address
    }
}

impl Eq for GlobalMemoryLocation {}

impl Hash for GlobalMemoryLocation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.is_chr.hash(state);
        self.active_bank().hash(state);
        self.address.hash(state);
    }
}

impl PartialOrd for GlobalMemoryLocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GlobalMemoryLocation {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.is_chr, self.active_bank(), self.address)
            .cmp(&(other.is_chr, other.active_bank(), other.address))
    }
}

impl fmt::Display for GlobalMemoryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_chr {
            write!(f, "CHR[{}]:${:04X}", self.chr_rom_bank, self.address)
        } else {
            write!(f, "PRG[{}]:${:04X}", self.prg_rom_bank, self.address)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_unused_bank_field() {
        let a = GlobalMemoryLocation { address: 0x8000, is_chr: false, prg_rom_bank: 0, chr_rom_bank: 7 };
        let b = GlobalMemoryLocation { address: 0x8000, is_chr: false, prg_rom_bank: 0, chr_rom_bank: 99 };
        assert_eq!(a, b);
    }

    #[test]
    fn ordering_is_chr_then_bank_then_address() {
        let prg = GlobalMemoryLocation::prg(0x8000, 1);
        let chr = GlobalMemoryLocation::chr(0x0000, 0);
        assert!(prg < chr);
    }
}
