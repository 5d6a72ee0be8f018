use crate::io::{BinaryReader, BinaryWriter};
use crate::memory::mapper::CartridgeMapper;
use crate::types::NameTableMirroring;

/// A byte-addressable view of one side of the system bus: CPU space
/// (`$0000-$FFFF`) or PPU space (`$0000-$3FFF`). `peek` must never have a
/// side effect (used by the disassembler/debugger to inspect state
/// without disturbing it); `read` is the side-effecting form used by
/// instruction execution (clears `$2002`'s vblank flag, etc).
pub trait MemoryView {
    fn peek(&self, address: u16) -> u8;
    fn read(&mut self, address: u16) -> u8 {
        self.peek(address)
    }
    fn write(&mut self, address: u16, value: u8);
}

/// The full CPU-side memory map for one running instance: 2 KiB of
/// internal RAM mirrored every `$0800` through `$1FFF`, PPU registers at
/// `$2000-$3FFF` mirrored every 8 bytes, APU/IO registers at
/// `$4000-$401F`, and the cartridge (PRG ROM/RAM plus mapper registers)
/// filling the rest.
pub struct SystemView {
    pub ram: [u8; 0x0800],
    pub ppu_registers: [u8; 8],
    pub apu_io_registers: [u8; 0x20],
    pub vram: [u8; 0x0800],
    pub palette_ram: [u8; 0x20],
    pub mapper: Box<dyn CartridgeMapper>,
}

impl std::fmt::Debug for SystemView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemView")
            .field("ram", &self.ram)
            .field("ppu_registers", &self.ppu_registers)
            .field("apu_io_registers", &self.apu_io_registers)
            .field("vram", &self.vram)
            .field("palette_ram", &self.palette_ram)
            .field("mapper", &"<dyn CartridgeMapper>")
            .finish()
    }
}

impl SystemView {
    pub fn new(mapper: Box<dyn CartridgeMapper>) -> SystemView {
        SystemView {
            ram: [0u8; 0x0800],
            ppu_registers: [0u8; 8],
            apu_io_registers: [0u8; 0x20],
            vram: [0u8; 0x0800],
            palette_ram: [0u8; 0x20],
            mapper,
        }
    }

    fn mirroring(&self) -> NameTableMirroring {
        self.mapper.mirroring()
    }

    /// Reads PPU-space (`$0000-$3FFF`): pattern tables from the cartridge,
    /// nametables through the active mirroring, palette RAM mirrored
    /// every 32 bytes with `$10`/`$14`/`$18`/`$1C` aliasing `$00`/`$04`/
    /// `$08`/`$0C`.
    pub fn peek_ppu(&self, address: u16) -> u8 {
        let address = address & 0x3FFF;
        match address {
            0x0000..=0x1FFF => self.mapper.read_chr(address),
            // Four-screen carts carry 2 extra KiB on the cartridge; this
            // view only has the internal 2 KiB, so mask down regardless.
            0x2000..=0x3EFF => self.vram[(self.mirroring().vram_offset(address) & 0x07FF) as usize],
            0x3F00..=0x3FFF => self.palette_ram[palette_index(address)],
            _ => 0,
        }
    }

    pub fn read_ppu(&mut self, address: u16) -> u8 {
        self.peek_ppu(address)
    }

    pub fn write_ppu(&mut self, address: u16, value: u8) {
        let address = address & 0x3FFF;
        match address {
            0x0000..=0x1FFF => self.mapper.write_chr(address, value),
            0x2000..=0x3EFF => {
                let offset = self.mirroring().vram_offset(address) & 0x07FF;
                self.vram[offset as usize] = value;
            }
            0x3F00..=0x3FFF => self.palette_ram[palette_index(address)] = value,
            _ => {}
        }
    }

    /// Serializes RAM, VRAM, palette RAM, and the mapper's own bank-select
    /// registers: everything a save state needs beyond the CPU/PPU
    /// themselves. Cartridge ROM contents are never written.
    pub fn save(&self, writer: &mut BinaryWriter) {
        writer.write_bytes(&self.ram);
        writer.write_bytes(&self.ppu_registers);
        writer.write_bytes(&self.apu_io_registers);
        writer.write_bytes(&self.vram);
        writer.write_bytes(&self.palette_ram);
        self.mapper.save(writer);
    }

    pub fn load(&mut self, reader: &mut BinaryReader) -> Result<(), String> {
        self.ram = reader.read_bytes(self.ram.len())?.try_into().map_err(|_| "corrupt RAM block".to_string())?;
        self.ppu_registers = reader.read_bytes(self.ppu_registers.len())?.try_into().map_err(|_| "corrupt PPU register block".to_string())?;
        self.apu_io_registers = reader.read_bytes(self.apu_io_registers.len())?.try_into().map_err(|_| "corrupt APU/IO register block".to_string())?;
        self.vram = reader.read_bytes(self.vram.len())?.try_into().map_err(|_| "corrupt VRAM block".to_string())?;
        self.palette_ram = reader.read_bytes(self.palette_ram.len())?.try_into().map_err(|_| "corrupt palette RAM block".to_string())?;
        self.mapper.load(reader)
    }
}

fn palette_index(address: u16) -> usize {
    let index = (address & 0x1F) as usize;
    if index % 4 == 0 { index & 0x0F } else { index }
}

impl MemoryView for SystemView {
    fn peek(&self, address: u16) -> u8 {
        match address {
            0x0000..=0x1FFF => self.ram[address as usize % 0x0800],
            0x2000..=0x3FFF => self.ppu_registers[address as usize % 8],
            0x4000..=0x401F => self.apu_io_registers[address as usize - 0x4000],
            0x4020..=0xFFFF => self.mapper.read_prg(address),
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x1FFF => self.ram[address as usize % 0x0800] = value,
            0x2000..=0x3FFF => self.ppu_registers[address as usize % 8] = value,
            0x4000..=0x401F => self.apu_io_registers[address as usize - 0x4000] = value,
            0x4020..=0xFFFF => self.mapper.write_prg(address, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::mapper::Nrom;

    fn view() -> SystemView {
        let prg = vec![0u8; 16 * 1024];
        let mapper = Nrom::new(prg, vec![0u8; 8 * 1024], NameTableMirroring::Vertical);
        SystemView::new(Box::new(mapper))
    }

    #[test]
    fn internal_ram_mirrors_every_0x800() {
        let mut v = view();
        v.write(0x0000, 0x42);
        assert_eq!(v.peek(0x0800), 0x42);
        assert_eq!(v.peek(0x1800), 0x42);
    }

    #[test]
    fn ppu_registers_mirror_every_8_bytes() {
        let mut v = view();
        v.write(0x2000, 0x11);
        assert_eq!(v.peek(0x2008), 0x11);
        assert_eq!(v.peek(0x3FF8), 0x11);
    }

    #[test]
    fn palette_background_color_mirrors_across_the_four_entries() {
        let mut v = view();
        v.write_ppu(0x3F00, 0x0F);
        assert_eq!(v.peek_ppu(0x3F10), 0x0F);
    }

    #[test]
    fn vertical_mirroring_maps_nametable_2800_onto_2000() {
        let mut v = view();
        v.write_ppu(0x2000, 0x77);
        assert_eq!(v.peek_ppu(0x2800), 0x77);
    }
}
