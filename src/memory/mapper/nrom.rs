use super::{read_window, CartridgeMapper, Window};
use crate::types::NameTableMirroring;

const PRG_BANK_SIZE: u32 = 16 * 1024;
const CHR_BANK_SIZE: u32 = 8 * 1024;

/// Mapper 0. PRG is one or two fixed 16 KiB banks: a single bank mirrors
/// to both `$8000` and `$C000`; two banks map straight through. CHR is a
/// single fixed 8 KiB bank, RAM-backed when the cartridge carries none.
pub struct Nrom {
    prg_rom: Vec<u8>,
    chr: Vec<u8>,
    chr_is_ram: bool,
    mirroring: NameTableMirroring,
    windows: Vec<Window>,
}

impl Nrom {
    pub fn new(prg_rom: Vec<u8>, chr_rom: Vec<u8>, mirroring: NameTableMirroring) -> Nrom {
        let bank_count = (prg_rom.len() as u32 / PRG_BANK_SIZE).max(1);
        let windows = if bank_count == 1 {
            vec![
                Window { start: 0x8000, size: 0x4000, bank: 0 },
                Window { start: 0xC000, size: 0x4000, bank: 0 },
            ]
        } else {
            vec![
                Window { start: 0x8000, size: 0x4000, bank: 0 },
                Window { start: 0xC000, size: 0x4000, bank: 1 },
            ]
        };
        let chr_is_ram = chr_rom.is_empty();
        let chr = if chr_is_ram { vec![0u8; CHR_BANK_SIZE as usize] } else { chr_rom };
        Nrom { prg_rom, chr, chr_is_ram, mirroring, windows }
    }
}

impl CartridgeMapper for Nrom {
    fn read_prg(&self, address: u16) -> u8 {
        // $4020-$7FFF is unmapped on an NROM board; open-bus decay isn't
        // modeled, so it reads as zero.
        if address < 0x8000 {
            return 0;
        }
        read_window(&self.prg_rom, &self.windows, PRG_BANK_SIZE, address)
    }

    fn write_prg(&mut self, _address: u16, _value: u8) {
        // NROM has no PRG-side registers; writes to cartridge space are ignored.
    }

    fn read_chr(&self, address: u16) -> u8 {
        self.chr.get(address as usize % self.chr.len().max(1)).copied().unwrap_or(0)
    }

    fn write_chr(&mut self, address: u16, value: u8) {
        if self.chr_is_ram {
            let len = self.chr.len();
            if len > 0 {
                self.chr[address as usize % len] = value;
            }
        }
    }

    fn mirroring(&self) -> NameTableMirroring {
        self.mirroring
    }

    fn prg_bank_for(&self, address: u16) -> (u16, u32) {
        match self.windows.iter().find(|w| w.contains(address)) {
            Some(window) => (window.bank, window.offset_in_bank(address, PRG_BANK_SIZE)),
            None => (0, 0),
        }
    }

    fn chr_bank_for(&self, address: u16) -> (u16, u32) {
        (0, address as u32 % self.chr.len().max(1) as u32)
    }

    fn save(&self, writer: &mut crate::io::BinaryWriter) {
        writer.write_bool(self.chr_is_ram);
        if self.chr_is_ram {
            writer.write_bytes(&self.chr);
        }
    }

    fn load(&mut self, reader: &mut crate::io::BinaryReader) -> Result<(), String> {
        self.chr_is_ram = reader.read_bool()?;
        if self.chr_is_ram {
            self.chr = reader.read_bytes(self.chr.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_bank_mirrors_to_both_windows() {
        let mut prg = vec![0u8; PRG_BANK_SIZE as usize];
        prg[0] = 0xAB;
        let mapper = Nrom::new(prg, vec![0u8; CHR_BANK_SIZE as usize], NameTableMirroring::Horizontal);
        assert_eq!(mapper.read_prg(0x8000), 0xAB);
        assert_eq!(mapper.read_prg(0xC000), 0xAB);
    }

    #[test]
    fn two_banks_map_through_without_mirroring() {
        let mut prg = vec![0u8; (PRG_BANK_SIZE * 2) as usize];
        prg[0] = 0x11;
        prg[PRG_BANK_SIZE as usize] = 0x22;
        let mapper = Nrom::new(prg, Vec::new(), NameTableMirroring::Vertical);
        assert_eq!(mapper.read_prg(0x8000), 0x11);
        assert_eq!(mapper.read_prg(0xC000), 0x22);
    }

    #[test]
    fn missing_chr_rom_becomes_writable_ram() {
        let mut mapper = Nrom::new(vec![0u8; PRG_BANK_SIZE as usize], Vec::new(), NameTableMirroring::Horizontal);
        mapper.write_chr(0x10, 0x42);
        assert_eq!(mapper.read_chr(0x10), 0x42);
    }
}
