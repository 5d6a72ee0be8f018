use super::CartridgeMapper;
use crate::types::NameTableMirroring;

const PRG_BANK_SIZE: u32 = 16 * 1024;

/// Mapper 2. A single 8-bit bank register selects the 16 KiB window at
/// `$8000`; the last bank is permanently fixed at `$C000`. CHR is always
/// RAM (UxROM boards have no CHR ROM).
pub struct UxRom {
    prg_rom: Vec<u8>,
    chr_ram: Vec<u8>,
    bank: u8,
    mirroring: NameTableMirroring,
    last_bank: u16,
}

impl UxRom {
    pub fn new(prg_rom: Vec<u8>, mirroring: NameTableMirroring) -> UxRom {
        let last_bank = ((prg_rom.len() as u32 / PRG_BANK_SIZE).max(1) - 1) as u16;
        UxRom { prg_rom, chr_ram: vec![0u8; 8 * 1024], bank: 0, mirroring, last_bank }
    }

    fn bank_for(&self, address: u16) -> u16 {
        if address < 0xC000 { self.bank as u16 } else { self.last_bank }
    }
}

impl CartridgeMapper for UxRom {
    fn read_prg(&self, address: u16) -> u8 {
        if address < 0x8000 {
            return 0;
        }
        let bank = self.bank_for(address) as u32;
        let offset = bank * PRG_BANK_SIZE + (address as u32 - 0x8000) % PRG_BANK_SIZE;
        self.prg_rom.get(offset as usize).copied().unwrap_or(0)
    }

    fn write_prg(&mut self, address: u16, value: u8) {
        // The bank latch only responds in ROM space.
        if address >= 0x8000 {
            self.bank = value;
        }
    }

    fn read_chr(&self, address: u16) -> u8 {
        self.chr_ram[address as usize % self.chr_ram.len()]
    }

    fn write_chr(&mut self, address: u16, value: u8) {
        let len = self.chr_ram.len();
        self.chr_ram[address as usize % len] = value;
    }

    fn mirroring(&self) -> NameTableMirroring {
        self.mirroring
    }

    fn prg_bank_for(&self, address: u16) -> (u16, u32) {
        if address < 0x8000 {
            return (0, 0);
        }
        (self.bank_for(address), (address as u32 - 0x8000) % PRG_BANK_SIZE)
    }

    fn chr_bank_for(&self, address: u16) -> (u16, u32) {
        (0, address as u32 % self.chr_ram.len() as u32)
    }

    fn save(&self, writer: &mut crate::io::BinaryWriter) {
        writer.write_u8(self.bank);
        writer.write_bytes(&self.chr_ram);
    }

    fn load(&mut self, reader: &mut crate::io::BinaryReader) -> Result<(), String> {
        self.bank = reader.read_u8()?;
        self.chr_ram = reader.read_bytes(self.chr_ram.len())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_bank_is_fixed_at_c000() {
        let mut prg = vec![0u8; PRG_BANK_SIZE as usize * 4];
        prg[3 * PRG_BANK_SIZE as usize] = 0x5A;
        let mapper = UxRom::new(prg, NameTableMirroring::Vertical);
        assert_eq!(mapper.read_prg(0xC000), 0x5A);
    }

    #[test]
    fn writing_any_address_selects_the_low_bank() {
        let mut prg = vec![0u8; PRG_BANK_SIZE as usize * 4];
        prg[2 * PRG_BANK_SIZE as usize] = 0x33;
        let mut mapper = UxRom::new(prg, NameTableMirroring::Vertical);
        mapper.write_prg(0xC000, 2);
        assert_eq!(mapper.read_prg(0x8000), 0x33);
    }
}
