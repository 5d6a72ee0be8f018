use crate::io::{BinaryReader, BinaryWriter};

/// One captured machine state: an opaque blob of the serialized CPU, PPU,
/// APU/IO latches, memory view (RAM, VRAM, palette, mapper registers),
/// DMA bookkeeping, scheduling phase, and framebuffer. The instance that
/// captured it is the only thing that knows the blob's layout; the
/// project file just carries the bytes.
#[derive(Clone, Debug)]
pub struct SaveStateInfo {
    pub name: String,
    /// Seconds since the Unix epoch, supplied by the host at capture time.
    pub timestamp: u64,
    pub blob: Vec<u8>,
}

impl SaveStateInfo {
    pub fn save(&self, writer: &mut BinaryWriter) {
        writer.write_string(&self.name);
        writer.write_varint(self.timestamp);
        writer.write_varint(self.blob.len() as u64);
        writer.write_bytes(&self.blob);
    }

    pub fn load(reader: &mut BinaryReader) -> Result<SaveStateInfo, String> {
        let name = reader.read_string()?;
        let timestamp = reader.read_varint()?;
        let len = reader.read_varint()? as usize;
        let blob = reader.read_bytes(len)?;
        Ok(SaveStateInfo { name, timestamp, blob })
    }
}
