use crate::io::{BinaryReader, BinaryWriter};

const FIRST_REGISTER: u16 = 0x4000;
const REGISTER_COUNT: usize = 0x16;

/// The register-level surface of `$4000-$4015`: audio synthesis is an
/// explicit non-goal, so every channel/sweep/envelope register is a
/// writable latch that reads back whatever was last written rather than
/// shaping a waveform. `$4014`/`$4016`/`$4017` are handled by the bus that
/// owns this (OAM DMA trigger and joypad strobe/read respectively), not
/// here.
#[derive(Debug, Clone, Copy)]
pub struct ApuIo {
    registers: [u8; REGISTER_COUNT],
}

impl ApuIo {
    pub fn new() -> ApuIo {
        ApuIo { registers: [0u8; REGISTER_COUNT] }
    }

    fn offset(address: u16) -> Option<usize> {
        let offset = address.checked_sub(FIRST_REGISTER)? as usize;
        (offset < REGISTER_COUNT).then_some(offset)
    }

    pub fn read(&self, address: u16) -> u8 {
        Self::offset(address).map(|o| self.registers[o]).unwrap_or(0)
    }

    pub fn write(&mut self, address: u16, value: u8) {
        if let Some(offset) = Self::offset(address) {
            self.registers[offset] = value;
        }
    }

    pub fn save(&self, writer: &mut BinaryWriter) {
        writer.write_bytes(&self.registers);
    }

    pub fn load(&mut self, reader: &mut BinaryReader) -> Result<(), String> {
        self.registers = reader.read_bytes(REGISTER_COUNT)?.try_into().map_err(|_| "corrupt APU/IO register block".to_string())?;
        Ok(())
    }
}

impl Default for ApuIo {
    fn default() -> ApuIo {
        ApuIo::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_back_the_last_written_value() {
        let mut apu_io = ApuIo::new();
        apu_io.write(0x4000, 0x7F);
        assert_eq!(apu_io.read(0x4000), 0x7F);
    }

    #[test]
    fn addresses_outside_the_register_block_read_zero() {
        let apu_io = ApuIo::new();
        assert_eq!(apu_io.read(0x4016), 0);
    }

    #[test]
    fn save_and_load_round_trips_registers() {
        let mut apu_io = ApuIo::new();
        apu_io.write(0x4008, 0x55);
        let mut buf = Vec::new();
        apu_io.save(&mut BinaryWriter::new(&mut buf));
        let mut restored = ApuIo::new();
        let mut cursor = &buf[..];
        restored.load(&mut BinaryReader::new(&mut cursor)).unwrap();
        assert_eq!(restored.read(0x4008), 0x55);
    }
}
