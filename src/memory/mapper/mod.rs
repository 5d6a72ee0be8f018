pub mod nrom;
pub mod mmc1;
pub mod uxrom;

pub use mmc1::Mmc1;
pub use nrom::Nrom;
pub use uxrom::UxRom;

use crate::io::{BinaryReader, BinaryWriter};
use crate::types::NameTableMirroring;

/// A window-based view onto cartridge PRG/CHR ROM: every mapper boils
/// down to picking, for a given cartridge-space address, which ROM bank
/// (and offset within it) currently backs it, and whether writes to that
/// address reconfigure banking instead of touching memory.
pub trait CartridgeMapper: Send {
    fn read_prg(&self, address: u16) -> u8;
    fn write_prg(&mut self, address: u16, value: u8);
    fn read_chr(&self, address: u16) -> u8;
    fn write_chr(&mut self, address: u16, value: u8);
    fn mirroring(&self) -> NameTableMirroring;

    /// Which PRG ROM bank (and byte offset within it) backs `address`,
    /// for the disassembler and listing to report bank-qualified
    /// addresses rather than raw cartridge-space ones.
    fn prg_bank_for(&self, address: u16) -> (u16, u32);
    fn chr_bank_for(&self, address: u16) -> (u16, u32);

    /// Persists whatever bank-select registers and RAM-backed CHR this
    /// mapper owns. PRG/CHR ROM contents themselves are never written,
    /// since they're reloaded from the cartridge image on project open.
    fn save(&self, writer: &mut BinaryWriter);
    fn load(&mut self, reader: &mut BinaryReader) -> Result<(), String>;
}

/// A fixed-size slice of a ROM image selected by a mapper register. Bank
/// numbers are always relative to the ROM's natural bank size (16 KiB
/// PRG, 8 KiB or 4 KiB CHR).
#[derive(Clone, Copy, Debug)]
pub struct Window {
    pub start: u16,
    pub size: u16,
    pub bank: u16,
}

impl Window {
    pub fn contains(&self, address: u16) -> bool {
        address >= self.start && (address as u32) < self.start as u32 + self.size as u32
    }

    pub fn offset_in_bank(&self, address: u16, bank_size: u32) -> u32 {
        (self.bank as u32) * bank_size + (address - self.start) as u32
    }
}

pub fn read_window(rom: &[u8], windows: &[Window], bank_size: u32, address: u16) -> u8 {
    let window = windows.iter().find(|w| w.contains(address)).expect("address must fall in some configured window");
    let offset = window.offset_in_bank(address, bank_size) as usize % rom.len().max(1);
    rom.get(offset).copied().unwrap_or(0)
}
