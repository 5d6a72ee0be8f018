mod varint;

pub use varint::{read_signed_varint, read_unsigned_varint, write_signed_varint, write_unsigned_varint};

use std::io::{Read, Write};

/// Which on-disk layout a save-file version uses. Loaders branch on this
/// instead of rejecting old files outright: version 1 predates per-enum
/// sizes (every enum is assumed to span one byte) and predates per-region
/// flat memory (each backed object's bytes follow its record inline, and
/// the loader reassembles them into one buffer). Comments have been
/// length-prefixed plain text in every version, so no branch exists for
/// them. Writers always emit the current layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SaveFileLayout {
    pub enum_sizes: bool,
    pub inline_object_bytes: bool,
}

impl SaveFileLayout {
    pub const CURRENT: SaveFileLayout = SaveFileLayout { enum_sizes: true, inline_object_bytes: false };

    pub fn from_version(version: u64) -> Result<SaveFileLayout, String> {
        Ok(match version {
            1 => SaveFileLayout { enum_sizes: false, inline_object_bytes: true },
            2 => SaveFileLayout::CURRENT,
            other => return Err(format!("unsupported save file version {}", other)),
        })
    }
}

/// A thin wrapper over any `Read` implementing the project file's binary
/// primitives: varints, length-prefixed strings, and vectors. One reader
/// is threaded through every component's `load` so the stream position is
/// the only parse state.
pub struct BinaryReader<'a> {
    inner: &'a mut dyn Read,
}

impl<'a> BinaryReader<'a> {
    pub fn new(inner: &'a mut dyn Read) -> BinaryReader<'a> {
        BinaryReader { inner }
    }

    pub fn read_u8(&mut self) -> Result<u8, String> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf).map_err(|e| e.to_string())?;
        Ok(buf[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, String> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, String> {
        let mut buf = [0u8; 2];
        self.inner.read_exact(&mut buf).map_err(|e| e.to_string())?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32, String> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf).map_err(|e| e.to_string())?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64, String> {
        let mut buf = [0u8; 8];
        self.inner.read_exact(&mut buf).map_err(|e| e.to_string())?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_varint(&mut self) -> Result<u64, String> {
        read_unsigned_varint(self.inner)
    }

    pub fn read_signed_varint(&mut self) -> Result<i64, String> {
        read_signed_varint(self.inner)
    }

    pub fn read_string(&mut self) -> Result<String, String> {
        let len = self.read_varint()? as usize;
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf).map_err(|e| e.to_string())?;
        String::from_utf8(buf).map_err(|e| e.to_string())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, String> {
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf).map_err(|e| e.to_string())?;
        Ok(buf)
    }

    pub fn read_vec<T>(&mut self, mut read_one: impl FnMut(&mut Self) -> Result<T, String>) -> Result<Vec<T>, String> {
        let count = self.read_varint()? as usize;
        let mut out = Vec::with_capacity(count.min(1 << 20));
        for _ in 0..count {
            out.push(read_one(self)?);
        }
        Ok(out)
    }
}

pub struct BinaryWriter<'a> {
    inner: &'a mut dyn Write,
}

impl<'a> BinaryWriter<'a> {
    pub fn new(inner: &'a mut dyn Write) -> BinaryWriter<'a> {
        BinaryWriter { inner }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.inner.write_all(&[value]).expect("write to in-memory/file buffer");
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.inner.write_all(&value.to_le_bytes()).expect("write to in-memory/file buffer");
    }

    pub fn write_u32(&mut self, value: u32) {
        self.inner.write_all(&value.to_le_bytes()).expect("write to in-memory/file buffer");
    }

    pub fn write_u64(&mut self, value: u64) {
        self.inner.write_all(&value.to_le_bytes()).expect("write to in-memory/file buffer");
    }

    pub fn write_varint(&mut self, value: u64) {
        write_unsigned_varint(self.inner, value);
    }

    pub fn write_signed_varint(&mut self, value: i64) {
        write_signed_varint(self.inner, value);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_varint(value.len() as u64);
        self.inner.write_all(value.as_bytes()).expect("write to in-memory/file buffer");
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.inner.write_all(bytes).expect("write to in-memory/file buffer");
    }

    pub fn write_vec<T>(&mut self, items: &[T], mut write_one: impl FnMut(&mut Self, &T)) {
        self.write_varint(items.len() as u64);
        for item in items {
            write_one(self, item);
        }
    }
}
