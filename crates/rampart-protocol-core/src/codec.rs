use bytes::{Buf, BufMut, BytesMut};
use rampart_types::ProfileProperty;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("VarInt too big")]
    VarIntTooBig,
    #[error("Not enough data")]
    NotEnoughData,
    #[error("String too long: {0} > {1}")]
    StringTooLong(usize, usize),
    #[error("Byte array too long: {0} > {1}")]
    ArrayTooLong(usize, usize),
    #[error("Negative length {0}")]
    NegativeLength(i32),
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("Bad packet data: {0}")]
    BadData(String),
    #[error("NBT error: {0}")]
    Nbt(#[from] rampart_nbt::NbtError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Default string cap used when a field has no tighter limit.
pub const DEFAULT_MAX_STRING: usize = 32767;

fn ensure(buf: &BytesMut, n: usize) -> CodecResult<()> {
    if buf.remaining() < n {
        return Err(CodecError::NotEnoughData);
    }
    Ok(())
}

/// Read a VarInt from the buffer.
pub fn read_varint(buf: &mut BytesMut) -> CodecResult<i32> {
    let mut result: i32 = 0;
    let mut shift: u32 = 0;
    loop {
        if !buf.has_remaining() {
            return Err(CodecError::NotEnoughData);
        }
        let byte = buf.get_u8();
        result |= ((byte & 0x7F) as i32) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 35 {
            return Err(CodecError::VarIntTooBig);
        }
    }
}

/// Write a VarInt to the buffer.
pub fn write_varint(buf: &mut BytesMut, mut value: i32) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value = ((value as u32) >> 7) as i32;
        if value != 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

/// Calculate the byte length of a VarInt.
pub fn varint_len(value: i32) -> usize {
    let mut val = value as u32;
    let mut len = 0;
    loop {
        len += 1;
        val >>= 7;
        if val == 0 {
            break;
        }
    }
    len
}

/// Read a VarLong from the buffer.
pub fn read_varlong(buf: &mut BytesMut) -> CodecResult<i64> {
    let mut result: i64 = 0;
    let mut shift: u32 = 0;
    loop {
        if !buf.has_remaining() {
            return Err(CodecError::NotEnoughData);
        }
        let byte = buf.get_u8();
        result |= ((byte & 0x7F) as i64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 70 {
            return Err(CodecError::VarIntTooBig);
        }
    }
}

/// Read a non-negative VarInt used as a length prefix.
pub fn read_len(buf: &mut BytesMut) -> CodecResult<usize> {
    let len = read_varint(buf)?;
    if len < 0 {
        return Err(CodecError::NegativeLength(len));
    }
    Ok(len as usize)
}

/// Read a protocol string (varint-prefixed UTF-8).
pub fn read_string(buf: &mut BytesMut, max_len: usize) -> CodecResult<String> {
    let len = read_len(buf)?;
    if len > max_len * 4 {
        return Err(CodecError::StringTooLong(len, max_len));
    }
    ensure(buf, len)?;
    let bytes = buf.split_to(len);
    let s = String::from_utf8(bytes.to_vec())
        .map_err(|e| CodecError::BadData(format!("invalid UTF-8 string: {}", e)))?;
    if s.chars().count() > max_len {
        return Err(CodecError::StringTooLong(s.chars().count(), max_len));
    }
    Ok(s)
}

/// Write a protocol string.
pub fn write_string(buf: &mut BytesMut, s: &str) {
    write_varint(buf, s.len() as i32);
    buf.put_slice(s.as_bytes());
}

/// Read a string with a u16 length prefix (Java's DataInput.readUTF).
pub fn read_utf(buf: &mut BytesMut) -> CodecResult<String> {
    let len = read_u16(buf)? as usize;
    ensure(buf, len)?;
    let bytes = buf.split_to(len);
    // modified UTF-8 encodes NUL as C0 80, which strict decoding rejects
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn write_utf(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

pub fn read_string_array(buf: &mut BytesMut) -> CodecResult<Vec<String>> {
    let count = read_len(buf)?;
    let mut out = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        out.push(read_string(buf, DEFAULT_MAX_STRING)?);
    }
    Ok(out)
}

pub fn write_string_array(buf: &mut BytesMut, items: &[String]) {
    write_varint(buf, items.len() as i32);
    for item in items {
        write_string(buf, item);
    }
}

/// Read a UUID (128 bits, big endian).
pub fn read_uuid(buf: &mut BytesMut) -> CodecResult<Uuid> {
    ensure(buf, 16)?;
    let mut bytes = [0u8; 16];
    buf.copy_to_slice(&mut bytes);
    Ok(Uuid::from_bytes(bytes))
}

/// Write a UUID.
pub fn write_uuid(buf: &mut BytesMut, uuid: &Uuid) {
    buf.put_slice(uuid.as_bytes());
}

/// Read a byte array with varint length prefix.
pub fn read_byte_array(buf: &mut BytesMut) -> CodecResult<Vec<u8>> {
    read_byte_array_max(buf, buf.remaining())
}

pub fn read_byte_array_max(buf: &mut BytesMut, max: usize) -> CodecResult<Vec<u8>> {
    let len = read_len(buf)?;
    if len > max {
        return Err(CodecError::ArrayTooLong(len, max));
    }
    ensure(buf, len)?;
    Ok(buf.split_to(len).to_vec())
}

/// Write a byte array with varint length prefix.
pub fn write_byte_array(buf: &mut BytesMut, data: &[u8]) {
    write_varint(buf, data.len() as i32);
    buf.put_slice(data);
}

/// 1.7 byte arrays carry a short length prefix.
pub fn read_byte_array_17(buf: &mut BytesMut) -> CodecResult<Vec<u8>> {
    let len = read_i16(buf)?;
    if len < 0 {
        return Err(CodecError::NegativeLength(len as i32));
    }
    ensure(buf, len as usize)?;
    Ok(buf.split_to(len as usize).to_vec())
}

pub fn write_byte_array_17(buf: &mut BytesMut, data: &[u8]) {
    buf.put_i16(data.len() as i16);
    buf.put_slice(data);
}

/// Forge's extended short: 15 bits, with one extra byte when the top bit is set.
pub fn read_extended_forge_short(buf: &mut BytesMut) -> CodecResult<usize> {
    let mut low = read_u16(buf)? as usize;
    let mut high = 0usize;
    if low & 0x8000 != 0 {
        low &= 0x7FFF;
        high = read_u8(buf)? as usize;
    }
    Ok((high << 15) | low)
}

pub fn write_extended_forge_short(buf: &mut BytesMut, value: usize) {
    let mut low = (value & 0x7FFF) as u16;
    let high = ((value & 0x7F8000) >> 15) as u8;
    if high != 0 {
        low |= 0x8000;
    }
    buf.put_u16(low);
    if high != 0 {
        buf.put_u8(high);
    }
}

/// Everything left in the buffer.
pub fn read_remaining(buf: &mut BytesMut) -> Vec<u8> {
    buf.split().to_vec()
}

pub fn read_bool(buf: &mut BytesMut) -> CodecResult<bool> {
    Ok(read_u8(buf)? != 0)
}

pub fn read_u8(buf: &mut BytesMut) -> CodecResult<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn read_i8(buf: &mut BytesMut) -> CodecResult<i8> {
    ensure(buf, 1)?;
    Ok(buf.get_i8())
}

pub fn read_i16(buf: &mut BytesMut) -> CodecResult<i16> {
    ensure(buf, 2)?;
    Ok(buf.get_i16())
}

pub fn read_u16(buf: &mut BytesMut) -> CodecResult<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn read_i32(buf: &mut BytesMut) -> CodecResult<i32> {
    ensure(buf, 4)?;
    Ok(buf.get_i32())
}

pub fn read_i64(buf: &mut BytesMut) -> CodecResult<i64> {
    ensure(buf, 8)?;
    Ok(buf.get_i64())
}

/// Read a game profile property list.
pub fn read_properties(buf: &mut BytesMut) -> CodecResult<Vec<ProfileProperty>> {
    let count = read_len(buf)?;
    let mut out = Vec::with_capacity(count.min(16));
    for _ in 0..count {
        let name = read_string(buf, DEFAULT_MAX_STRING)?;
        let value = read_string(buf, DEFAULT_MAX_STRING)?;
        let signature = if read_bool(buf)? {
            Some(read_string(buf, DEFAULT_MAX_STRING)?)
        } else {
            None
        };
        out.push(ProfileProperty {
            name,
            value,
            signature,
        });
    }
    Ok(out)
}

pub fn write_properties(buf: &mut BytesMut, properties: &[ProfileProperty]) {
    write_varint(buf, properties.len() as i32);
    for prop in properties {
        write_string(buf, &prop.name);
        write_string(buf, &prop.value);
        match &prop.signature {
            Some(sig) => {
                buf.put_u8(1);
                write_string(buf, sig);
            }
            None => buf.put_u8(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_roundtrip() {
        let test_cases = vec![
            (0, vec![0x00]),
            (1, vec![0x01]),
            (127, vec![0x7F]),
            (128, vec![0x80, 0x01]),
            (255, vec![0xFF, 0x01]),
            (25565, vec![0xDD, 0xC7, 0x01]),
            (2097151, vec![0xFF, 0xFF, 0x7F]),
            (i32::MAX, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x07]),
            (-1, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
            (i32::MIN, vec![0x80, 0x80, 0x80, 0x80, 0x08]),
        ];

        for (value, expected_bytes) in test_cases {
            let mut buf = BytesMut::new();
            write_varint(&mut buf, value);
            assert_eq!(
                buf.to_vec(),
                expected_bytes,
                "write_varint({}) failed",
                value
            );

            let mut buf = BytesMut::from(&expected_bytes[..]);
            let result = read_varint(&mut buf).unwrap();
            assert_eq!(result, value, "read_varint for {} failed", value);
        }
    }

    #[test]
    fn test_string_rejects_invalid_utf8() {
        let mut buf = BytesMut::from(&[0x03, b'a', 0xC3, 0x28][..]);
        assert!(matches!(read_string(&mut buf, 16), Err(CodecError::BadData(_))));

        let mut buf = BytesMut::new();
        write_string(&mut buf, "héllo");
        assert_eq!(read_string(&mut buf, 16).unwrap(), "héllo");
    }

    #[test]
    fn test_varint_rejects_six_bytes() {
        let mut buf = BytesMut::from(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01][..]);
        assert!(matches!(read_varint(&mut buf), Err(CodecError::VarIntTooBig)));
    }

    #[test]
    fn test_varint_len() {
        assert_eq!(varint_len(0), 1);
        assert_eq!(varint_len(127), 1);
        assert_eq!(varint_len(128), 2);
        assert_eq!(varint_len(25565), 3);
        assert_eq!(varint_len(-1), 5);
    }

    #[test]
    fn test_string_roundtrip() {
        let test_str = "Hello, Minecraft!";
        let mut buf = BytesMut::new();
        write_string(&mut buf, test_str);
        let result = read_string(&mut buf, DEFAULT_MAX_STRING).unwrap();
        assert_eq!(result, test_str);
    }

    #[test]
    fn test_string_limit() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "ThisNameIs17Chars");
        assert!(matches!(
            read_string(&mut buf, 16),
            Err(CodecError::StringTooLong(17, 16))
        ));
    }

    #[test]
    fn test_uuid_roundtrip() {
        let uuid = Uuid::new_v4();
        let mut buf = BytesMut::new();
        write_uuid(&mut buf, &uuid);
        let result = read_uuid(&mut buf).unwrap();
        assert_eq!(result, uuid);
    }

    #[test]
    fn test_extended_forge_short() {
        for value in [0usize, 0x7FFF, 0x8000, 0x12345] {
            let mut buf = BytesMut::new();
            write_extended_forge_short(&mut buf, value);
            assert_eq!(read_extended_forge_short(&mut buf).unwrap(), value);
        }
        let mut buf = BytesMut::new();
        write_extended_forge_short(&mut buf, 10);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_properties_roundtrip() {
        let props = vec![
            ProfileProperty {
                name: "textures".into(),
                value: "e30=".into(),
                signature: Some("c2ln".into()),
            },
            ProfileProperty::new("forgeClient", "true"),
        ];
        let mut buf = BytesMut::new();
        write_properties(&mut buf, &props);
        assert_eq!(read_properties(&mut buf).unwrap(), props);
        assert!(buf.is_empty());
    }
}
