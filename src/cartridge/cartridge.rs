use std::fmt;

use log::warn;
use splitbits::splitbits_named;

use crate::cartridge::header_db::HeaderDb;
use crate::io::{BinaryReader, BinaryWriter};
use crate::memory::mapper::{CartridgeMapper, Mmc1, Nrom, UxRom};
use crate::types::{MapperKind, NameTableMirroring};

const INES_HEADER_CONSTANT: &[u8] = &[0x4E, 0x45, 0x53, 0x1A];
const PRG_ROM_CHUNK_LENGTH: usize = 16 * 1024;
const CHR_ROM_CHUNK_LENGTH: usize = 8 * 1024;

/// A loaded iNES cartridge image: the raw PRG/CHR ROM plus the header
/// facts needed to build the right [`CartridgeMapper`]. Parsing never
/// consults a [`HeaderDb`] unless the header's own fields leave
/// submapper/RAM sizes unknown.
#[derive(Clone, Debug)]
pub struct Cartridge {
    name: String,
    mapper_number: u16,
    submapper_number: u8,
    name_table_mirroring: NameTableMirroring,
    has_persistent_memory: bool,
    prg_rom: Vec<u8>,
    prg_ram_size: u32,
    chr_rom: Vec<u8>,
    chr_ram_size: u32,
}

impl Cartridge {
    pub fn load(name: String, rom: &[u8], header_db: &HeaderDb) -> Result<Cartridge, String> {
        if rom.len() < 16 || &rom[0..4] != INES_HEADER_CONSTANT {
            return Err(format!("cannot load non-iNES ROM {name}: missing the 'NES\\x1A' header constant"));
        }

        let prg_rom_chunk_count = rom[4] as usize;
        let chr_rom_chunk_count = rom[5] as usize;

        let (lower_mapper_number, four_screen, trainer_enabled, has_persistent_memory, vertical_mirroring): (u8, bool, bool, bool, bool) =
            splitbits_named!(rom[6], "llllftpv");
        let (upper_mapper_number, ines2_bits, play_choice_enabled, vs_unisystem_enabled): (u8, u8, bool, bool) =
            splitbits_named!(rom[7], "uuuuiipv");

        if trainer_enabled {
            return Err("trainer-equipped ROMs aren't supported".to_string());
        }
        if ines2_bits == 0b10 {
            return Err("iNES 2.0 headers aren't supported yet".to_string());
        }
        if play_choice_enabled {
            return Err("PlayChoice ROMs aren't supported".to_string());
        }
        if vs_unisystem_enabled {
            return Err("VS Unisystem ROMs aren't supported".to_string());
        }

        let mapper_number = u16::from(upper_mapper_number << 4 | lower_mapper_number);
        let name_table_mirroring = if four_screen {
            NameTableMirroring::FourScreen
        } else if vertical_mirroring {
            NameTableMirroring::Vertical
        } else {
            NameTableMirroring::Horizontal
        };

        let prg_rom_start = 0x10;
        let prg_rom_end = prg_rom_start + PRG_ROM_CHUNK_LENGTH * prg_rom_chunk_count;
        let prg_rom = rom
            .get(prg_rom_start..prg_rom_end)
            .ok_or_else(|| format!("ROM {name} claims {prg_rom_chunk_count} PRG chunks but is too short"))?
            .to_vec();

        let chr_rom_start = prg_rom_end;
        let chr_rom_end = chr_rom_start + CHR_ROM_CHUNK_LENGTH * chr_rom_chunk_count;
        let chr_rom = match rom.get(chr_rom_start..chr_rom_end) {
            Some(chr) => chr.to_vec(),
            None => {
                warn!("ROM {name} claims {chr_rom_chunk_count} CHR chunks but is too short; truncating");
                rom[chr_rom_start.min(rom.len())..].to_vec()
            }
        };

        let mut cartridge = Cartridge {
            name,
            mapper_number,
            submapper_number: 0,
            name_table_mirroring,
            has_persistent_memory,
            prg_rom,
            prg_ram_size: 0,
            chr_rom,
            chr_ram_size: 0,
        };

        if let Some(header) = header_db.header_from_prg_rom(&cartridge.prg_rom) {
            cartridge.submapper_number = header.submapper_number;
            cartridge.prg_ram_size = header.prg_ram_size;
            cartridge.chr_ram_size = header.chr_ram_size;
        }

        Ok(cartridge)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mapper_number(&self) -> u16 {
        self.mapper_number
    }

    pub fn submapper_number(&self) -> u8 {
        self.submapper_number
    }

    pub fn name_table_mirroring(&self) -> NameTableMirroring {
        self.name_table_mirroring
    }

    pub fn prg_rom(&self) -> &[u8] {
        &self.prg_rom
    }

    pub fn chr_rom(&self) -> &[u8] {
        &self.chr_rom
    }

    /// The whole ROM image is embedded in the project file so a saved
    /// project opens without the original `.nes` file on disk.
    pub fn save(&self, writer: &mut BinaryWriter) {
        writer.write_string(&self.name);
        writer.write_u16(self.mapper_number);
        writer.write_u8(self.submapper_number);
        writer.write_u8(self.name_table_mirroring.as_tag());
        writer.write_bool(self.has_persistent_memory);
        writer.write_u32(self.prg_ram_size);
        writer.write_u32(self.chr_ram_size);
        writer.write_varint(self.prg_rom.len() as u64);
        writer.write_bytes(&self.prg_rom);
        writer.write_varint(self.chr_rom.len() as u64);
        writer.write_bytes(&self.chr_rom);
    }

    pub fn load_saved(reader: &mut BinaryReader) -> Result<Cartridge, String> {
        let name = reader.read_string()?;
        let mapper_number = reader.read_u16()?;
        let submapper_number = reader.read_u8()?;
        let name_table_mirroring = NameTableMirroring::from_tag(reader.read_u8()?)?;
        let has_persistent_memory = reader.read_bool()?;
        let prg_ram_size = reader.read_u32()?;
        let chr_ram_size = reader.read_u32()?;
        let prg_len = reader.read_varint()? as usize;
        let prg_rom = reader.read_bytes(prg_len)?;
        let chr_len = reader.read_varint()? as usize;
        let chr_rom = reader.read_bytes(chr_len)?;
        Ok(Cartridge {
            name,
            mapper_number,
            submapper_number,
            name_table_mirroring,
            has_persistent_memory,
            prg_rom,
            prg_ram_size,
            chr_rom,
            chr_ram_size,
        })
    }

    /// Builds the [`CartridgeMapper`] this cartridge's header selects.
    /// Only the mappers a disassembly target is realistically built
    /// around are supported; anything else is reported rather than
    /// silently treated as NROM.
    pub fn build_mapper(&self) -> Result<Box<dyn CartridgeMapper>, String> {
        Ok(match MapperKind::from_ines_number(self.mapper_number)? {
            MapperKind::Nrom => Box::new(Nrom::new(self.prg_rom.clone(), self.chr_rom.clone(), self.name_table_mirroring)),
            MapperKind::Mmc1 => Box::new(Mmc1::new(self.prg_rom.clone(), self.chr_rom.clone())),
            MapperKind::UxRom => Box::new(UxRom::new(self.prg_rom.clone(), self.name_table_mirroring)),
        })
    }
}

impl fmt::Display for Cartridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Name: {}", self.name)?;
        writeln!(f, "Mapper: {} (submapper {})", self.mapper_number, self.submapper_number)?;
        writeln!(f, "Nametable mirroring: {:?}", self.name_table_mirroring)?;
        writeln!(f, "Persistent memory: {}", self.has_persistent_memory)?;
        writeln!(f, "PRG ROM size: {}KiB", self.prg_rom.len() / 1024)?;
        writeln!(f, "CHR ROM size: {}KiB", self.chr_rom.len() / 1024)?;
        Ok(())
    }
}

/// Synthetic iNES images for unit and integration tests. Compiled into
/// the library (not gated on `cfg(test)`) so the `tests/` directory can
/// build cartridges without shipping binary ROM fixtures.
pub mod test_data {
    use super::*;

    pub fn raw_ines_rom(prg_chunks: u8, chr_chunks: u8, mapper_number: u8) -> Vec<u8> {
        let mut rom = vec![0u8; 16];
        rom[0..4].copy_from_slice(INES_HEADER_CONSTANT);
        rom[4] = prg_chunks;
        rom[5] = chr_chunks;
        rom[6] = (mapper_number & 0x0F) << 4;
        rom[7] = mapper_number & 0xF0;
        rom.extend(vec![0xEAu8; PRG_ROM_CHUNK_LENGTH * prg_chunks as usize]);
        rom.extend(vec![0x00u8; CHR_ROM_CHUNK_LENGTH * chr_chunks as usize]);
        rom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_single_bank_nrom_image() {
        let rom = test_data::raw_ines_rom(1, 1, 0);
        let cartridge = Cartridge::load("test".to_string(), &rom, &HeaderDb::new()).unwrap();
        assert_eq!(cartridge.mapper_number(), 0);
        assert_eq!(cartridge.prg_rom().len(), PRG_ROM_CHUNK_LENGTH);
        assert!(cartridge.build_mapper().is_ok());
    }

    #[test]
    fn rejects_a_missing_header_constant() {
        let rom = vec![0u8; 32];
        assert!(Cartridge::load("bad".to_string(), &rom, &HeaderDb::new()).is_err());
    }

    #[test]
    fn mapper_1_builds_an_mmc1_mapper() {
        let rom = test_data::raw_ines_rom(2, 0, 1);
        let cartridge = Cartridge::load("test".to_string(), &rom, &HeaderDb::new()).unwrap();
        assert!(cartridge.build_mapper().is_ok());
    }

    #[test]
    fn unsupported_mapper_is_reported() {
        let rom = test_data::raw_ines_rom(1, 1, 255);
        let cartridge = Cartridge::load("test".to_string(), &rom, &HeaderDb::new()).unwrap();
        assert!(cartridge.build_mapper().is_err());
    }
}
