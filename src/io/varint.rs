use std::io::{Read, Write};

// Values below 250 are encoded in a single byte; 252/253/254 introduce a
// little-endian u16/u32/u64 payload; 250 doubles as the "this is a
// negative signed value" marker; 251 and 255 are reserved.
const NEGATIVE_SENTINEL: u8 = 250;
const U16_SENTINEL: u8 = 252;
const U32_SENTINEL: u8 = 253;
const U64_SENTINEL: u8 = 254;
const SINGLE_BYTE_LIMIT: u64 = 250;

pub fn write_unsigned_varint(writer: &mut dyn Write, value: u64) {
    if value < SINGLE_BYTE_LIMIT {
        writer.write_all(&[value as u8]).expect("write varint byte");
    } else if let Ok(value) = u16::try_from(value) {
        writer.write_all(&[U16_SENTINEL]).expect("write varint sentinel");
        writer.write_all(&value.to_le_bytes()).expect("write varint payload");
    } else if let Ok(value) = u32::try_from(value) {
        writer.write_all(&[U32_SENTINEL]).expect("write varint sentinel");
        writer.write_all(&value.to_le_bytes()).expect("write varint payload");
    } else {
        writer.write_all(&[U64_SENTINEL]).expect("write varint sentinel");
        writer.write_all(&value.to_le_bytes()).expect("write varint payload");
    }
}

pub fn read_unsigned_varint(reader: &mut dyn Read) -> Result<u64, String> {
    let mut tag = [0u8; 1];
    reader.read_exact(&mut tag).map_err(|e| e.to_string())?;
    match tag[0] {
        U16_SENTINEL => {
            let mut buf = [0u8; 2];
            reader.read_exact(&mut buf).map_err(|e| e.to_string())?;
            Ok(u16::from_le_bytes(buf) as u64)
        }
        U32_SENTINEL => {
            let mut buf = [0u8; 4];
            reader.read_exact(&mut buf).map_err(|e| e.to_string())?;
            Ok(u32::from_le_bytes(buf) as u64)
        }
        U64_SENTINEL => {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf).map_err(|e| e.to_string())?;
            Ok(u64::from_le_bytes(buf))
        }
        NEGATIVE_SENTINEL | 251 | 255 => {
            Err(format!("Reserved varint tag byte {} used where an unsigned varint was expected.", tag[0]))
        }
        small => Ok(small as u64),
    }
}

pub fn write_signed_varint(writer: &mut dyn Write, value: i64) {
    if value >= 0 {
        write_unsigned_varint(writer, value as u64);
    } else {
        writer.write_all(&[NEGATIVE_SENTINEL]).expect("write varint sentinel");
        write_unsigned_varint(writer, value.unsigned_abs());
    }
}

pub fn read_signed_varint(reader: &mut dyn Read) -> Result<i64, String> {
    let mut tag = [0u8; 1];
    reader.read_exact(&mut tag).map_err(|e| e.to_string())?;
    if tag[0] == NEGATIVE_SENTINEL {
        let magnitude = read_unsigned_varint(reader)?;
        Ok(-(magnitude as i64))
    } else {
        // Put the tag byte back by re-dispatching through the same decode
        // table `read_unsigned_varint` uses, starting from the byte we
        // already consumed.
        match tag[0] {
            U16_SENTINEL => {
                let mut buf = [0u8; 2];
                reader.read_exact(&mut buf).map_err(|e| e.to_string())?;
                Ok(u16::from_le_bytes(buf) as i64)
            }
            U32_SENTINEL => {
                let mut buf = [0u8; 4];
                reader.read_exact(&mut buf).map_err(|e| e.to_string())?;
                Ok(u32::from_le_bytes(buf) as i64)
            }
            U64_SENTINEL => {
                let mut buf = [0u8; 8];
                reader.read_exact(&mut buf).map_err(|e| e.to_string())?;
                Ok(u64::from_le_bytes(buf) as i64)
            }
            251 | 255 => Err(format!("Reserved varint tag byte {} used where a signed varint was expected.", tag[0])),
            small => Ok(small as i64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_unsigned(value: u64) {
        let mut buf = Vec::new();
        write_unsigned_varint(&mut buf, value);
        let mut cursor = &buf[..];
        assert_eq!(read_unsigned_varint(&mut cursor).unwrap(), value);
    }

    fn roundtrip_signed(value: i64) {
        let mut buf = Vec::new();
        write_signed_varint(&mut buf, value);
        let mut cursor = &buf[..];
        assert_eq!(read_signed_varint(&mut cursor).unwrap(), value);
    }

    #[test]
    fn small_values_are_one_byte() {
        let mut buf = Vec::new();
        write_unsigned_varint(&mut buf, 249);
        assert_eq!(buf.len(), 1);
        roundtrip_unsigned(249);
    }

    #[test]
    fn boundary_values_use_sentinels() {
        for value in [250, 251, 255, 256, u16::MAX as u64, u16::MAX as u64 + 1, u32::MAX as u64, u32::MAX as u64 + 1, u64::MAX] {
            roundtrip_unsigned(value);
        }
    }

    #[test]
    fn signed_values_roundtrip() {
        for value in [0, 1, -1, 249, -249, 250, -250, i64::MIN + 1, i64::MAX] {
            roundtrip_signed(value);
        }
    }
}
