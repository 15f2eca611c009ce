use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// NBT tag type IDs.
pub const TAG_END: u8 = 0;
pub const TAG_BYTE: u8 = 1;
pub const TAG_SHORT: u8 = 2;
pub const TAG_INT: u8 = 3;
pub const TAG_LONG: u8 = 4;
pub const TAG_FLOAT: u8 = 5;
pub const TAG_DOUBLE: u8 = 6;
pub const TAG_BYTE_ARRAY: u8 = 7;
pub const TAG_STRING: u8 = 8;
pub const TAG_LIST: u8 = 9;
pub const TAG_COMPOUND: u8 = 10;
pub const TAG_INT_ARRAY: u8 = 11;
pub const TAG_LONG_ARRAY: u8 = 12;

const MAX_DEPTH: usize = 512;

#[derive(Debug, Error)]
pub enum NbtError {
    #[error("Unexpected end of NBT data")]
    UnexpectedEnd,
    #[error("Unknown NBT tag type {0}")]
    UnknownTag(u8),
    #[error("NBT nesting deeper than {MAX_DEPTH}")]
    TooDeep,
    #[error("Negative NBT length {0}")]
    NegativeLength(i32),
}

pub type NbtResult<T> = Result<T, NbtError>;

/// An NBT value.
#[derive(Debug, Clone, PartialEq)]
pub enum NbtValue {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<i8>),
    String(String),
    List(Vec<NbtValue>),
    Compound(Vec<(String, NbtValue)>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
}

impl NbtValue {
    pub fn tag_id(&self) -> u8 {
        match self {
            NbtValue::Byte(_) => TAG_BYTE,
            NbtValue::Short(_) => TAG_SHORT,
            NbtValue::Int(_) => TAG_INT,
            NbtValue::Long(_) => TAG_LONG,
            NbtValue::Float(_) => TAG_FLOAT,
            NbtValue::Double(_) => TAG_DOUBLE,
            NbtValue::ByteArray(_) => TAG_BYTE_ARRAY,
            NbtValue::String(_) => TAG_STRING,
            NbtValue::List(_) => TAG_LIST,
            NbtValue::Compound(_) => TAG_COMPOUND,
            NbtValue::IntArray(_) => TAG_INT_ARRAY,
            NbtValue::LongArray(_) => TAG_LONG_ARRAY,
        }
    }

    /// Look up a key in a compound.
    pub fn get(&self, key: &str) -> Option<&NbtValue> {
        match self {
            NbtValue::Compound(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Write this value as a root tag without a name (network NBT since 1.20.2).
    pub fn write_root_network(&self, buf: &mut BytesMut) {
        buf.put_u8(self.tag_id());
        self.write_payload(buf);
    }

    /// Write this value as a named root tag (network NBT before 1.20.2).
    pub fn write_root_named(&self, name: &str, buf: &mut BytesMut) {
        buf.put_u8(self.tag_id());
        write_nbt_string(name, buf);
        self.write_payload(buf);
    }

    /// Write just the payload (no tag type or name).
    pub fn write_payload(&self, buf: &mut BytesMut) {
        match self {
            NbtValue::Byte(v) => buf.put_i8(*v),
            NbtValue::Short(v) => buf.put_i16(*v),
            NbtValue::Int(v) => buf.put_i32(*v),
            NbtValue::Long(v) => buf.put_i64(*v),
            NbtValue::Float(v) => buf.put_f32(*v),
            NbtValue::Double(v) => buf.put_f64(*v),
            NbtValue::ByteArray(v) => {
                buf.put_i32(v.len() as i32);
                for b in v {
                    buf.put_i8(*b);
                }
            }
            NbtValue::String(v) => write_nbt_string(v, buf),
            NbtValue::List(v) => {
                if v.is_empty() {
                    buf.put_u8(TAG_END);
                    buf.put_i32(0);
                } else {
                    buf.put_u8(v[0].tag_id());
                    buf.put_i32(v.len() as i32);
                    for item in v {
                        item.write_payload(buf);
                    }
                }
            }
            NbtValue::Compound(entries) => {
                for (name, value) in entries {
                    buf.put_u8(value.tag_id());
                    write_nbt_string(name, buf);
                    value.write_payload(buf);
                }
                buf.put_u8(TAG_END);
            }
            NbtValue::IntArray(v) => {
                buf.put_i32(v.len() as i32);
                for i in v {
                    buf.put_i32(*i);
                }
            }
            NbtValue::LongArray(v) => {
                buf.put_i32(v.len() as i32);
                for l in v {
                    buf.put_i64(*l);
                }
            }
        }
    }

    /// Read a root tag. `named` selects the pre-1.20.2 layout where the root
    /// carries a (usually empty) name. A lone `TAG_END` reads as `None`.
    pub fn read_root(buf: &mut impl Buf, named: bool) -> NbtResult<Option<NbtValue>> {
        let tag = read_u8(buf)?;
        if tag == TAG_END {
            return Ok(None);
        }
        if named {
            read_nbt_string(buf)?;
        }
        Self::read_payload(tag, buf, 0).map(Some)
    }

    fn read_payload(tag: u8, buf: &mut impl Buf, depth: usize) -> NbtResult<NbtValue> {
        if depth > MAX_DEPTH {
            return Err(NbtError::TooDeep);
        }
        Ok(match tag {
            TAG_BYTE => NbtValue::Byte({ need(&*buf, 1)?; buf.get_i8() }),
            TAG_SHORT => NbtValue::Short({ need(&*buf, 2)?; buf.get_i16() }),
            TAG_INT => NbtValue::Int({ need(&*buf, 4)?; buf.get_i32() }),
            TAG_LONG => NbtValue::Long({ need(&*buf, 8)?; buf.get_i64() }),
            TAG_FLOAT => NbtValue::Float({ need(&*buf, 4)?; buf.get_f32() }),
            TAG_DOUBLE => NbtValue::Double({ need(&*buf, 8)?; buf.get_f64() }),
            TAG_BYTE_ARRAY => {
                let len = read_len(buf)?;
                need(&*buf, len)?;
                NbtValue::ByteArray((0..len).map(|_| buf.get_i8()).collect())
            }
            TAG_STRING => NbtValue::String(read_nbt_string(buf)?),
            TAG_LIST => {
                let item_tag = read_u8(buf)?;
                let len = read_len(buf)?;
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    items.push(Self::read_payload(item_tag, buf, depth + 1)?);
                }
                NbtValue::List(items)
            }
            TAG_COMPOUND => {
                let mut entries = Vec::new();
                loop {
                    let entry_tag = read_u8(buf)?;
                    if entry_tag == TAG_END {
                        break;
                    }
                    let name = read_nbt_string(buf)?;
                    entries.push((name, Self::read_payload(entry_tag, buf, depth + 1)?));
                }
                NbtValue::Compound(entries)
            }
            TAG_INT_ARRAY => {
                let len = read_len(buf)?;
                need(&*buf, len * 4)?;
                NbtValue::IntArray((0..len).map(|_| buf.get_i32()).collect())
            }
            TAG_LONG_ARRAY => {
                let len = read_len(buf)?;
                need(&*buf, len * 8)?;
                NbtValue::LongArray((0..len).map(|_| buf.get_i64()).collect())
            }
            other => return Err(NbtError::UnknownTag(other)),
        })
    }

    /// Convert a JSON chat component into its NBT form (1.20.3+ wire format).
    pub fn from_json(value: &serde_json::Value) -> NbtValue {
        use serde_json::Value;
        match value {
            Value::Null => NbtValue::String(String::new()),
            Value::Bool(b) => NbtValue::Byte(*b as i8),
            Value::Number(n) => match n.as_i64() {
                Some(i) if i32::try_from(i).is_ok() => NbtValue::Int(i as i32),
                Some(i) => NbtValue::Long(i),
                None => NbtValue::Double(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => NbtValue::String(s.clone()),
            Value::Array(items) => {
                let converted: Vec<NbtValue> = items.iter().map(NbtValue::from_json).collect();
                let homogeneous = converted
                    .first()
                    .map(|first| converted.iter().all(|v| v.tag_id() == first.tag_id()))
                    .unwrap_or(true);
                if homogeneous {
                    NbtValue::List(converted)
                } else {
                    // Mixed lists are not representable; wrap scalars as text components.
                    NbtValue::List(
                        converted
                            .into_iter()
                            .map(|v| match v {
                                NbtValue::Compound(_) => v,
                                NbtValue::String(s) => {
                                    NbtValue::Compound(vec![("text".into(), NbtValue::String(s))])
                                }
                                other => NbtValue::Compound(vec![(String::new(), other)]),
                            })
                            .collect(),
                    )
                }
            }
            Value::Object(map) => NbtValue::Compound(
                map.iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k.clone(), NbtValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert an NBT chat component back to JSON.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            NbtValue::Byte(b) => Value::Bool(*b != 0),
            NbtValue::Short(v) => Value::from(*v),
            NbtValue::Int(v) => Value::from(*v),
            NbtValue::Long(v) => Value::from(*v),
            NbtValue::Float(v) => Value::from(*v as f64),
            NbtValue::Double(v) => Value::from(*v),
            NbtValue::String(s) => Value::String(s.clone()),
            NbtValue::ByteArray(v) => Value::from(v.clone()),
            NbtValue::IntArray(v) => Value::from(v.clone()),
            NbtValue::LongArray(v) => Value::from(v.clone()),
            NbtValue::List(items) => Value::Array(items.iter().map(NbtValue::to_json).collect()),
            NbtValue::Compound(entries) => {
                if let [(key, only)] = entries.as_slice() {
                    if key.is_empty() {
                        return only.to_json();
                    }
                }
                Value::Object(entries.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
        }
    }
}

fn need(buf: &impl Buf, n: usize) -> NbtResult<()> {
    if buf.remaining() < n {
        return Err(NbtError::UnexpectedEnd);
    }
    Ok(())
}

fn read_u8(buf: &mut impl Buf) -> NbtResult<u8> {
    need(&*buf, 1)?;
    Ok(buf.get_u8())
}

fn read_len(buf: &mut impl Buf) -> NbtResult<usize> {
    need(&*buf, 4)?;
    let len = buf.get_i32();
    if len < 0 {
        return Err(NbtError::NegativeLength(len));
    }
    Ok(len as usize)
}

fn read_nbt_string(buf: &mut impl Buf) -> NbtResult<String> {
    need(&*buf, 2)?;
    let len = buf.get_u16() as usize;
    need(&*buf, len)?;
    let bytes = buf.copy_to_bytes(len);
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn write_nbt_string(s: &str, buf: &mut BytesMut) {
    let bytes = s.as_bytes();
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
}

/// Helper macro for building compound tags.
#[macro_export]
macro_rules! nbt_compound {
    ($($key:expr => $val:expr),* $(,)?) => {
        $crate::NbtValue::Compound(vec![
            $(($key.into(), $val)),*
        ])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_simple_compound() {
        let nbt = nbt_compound! {
            "name" => NbtValue::String("test".into()),
            "value" => NbtValue::Int(42),
        };
        let mut buf = BytesMut::new();
        nbt.write_root_network(&mut buf);
        assert_eq!(buf[0], TAG_COMPOUND);
    }

    #[test]
    fn test_long_array() {
        let nbt = NbtValue::LongArray(vec![1, 2, 3]);
        let mut buf = BytesMut::new();
        nbt.write_payload(&mut buf);
        // 4 bytes length (3) + 3 * 8 bytes = 28 bytes
        assert_eq!(buf.len(), 28);
    }

    #[test]
    fn test_read_named_and_network_roots() {
        let nbt = nbt_compound! {
            "dims" => NbtValue::List(vec![NbtValue::String("minecraft:overworld".into())]),
            "height" => NbtValue::Short(384),
        };
        let mut named = BytesMut::new();
        nbt.write_root_named("", &mut named);
        assert_eq!(NbtValue::read_root(&mut named, true).unwrap(), Some(nbt.clone()));
        assert!(named.is_empty());

        let mut network = BytesMut::new();
        nbt.write_root_network(&mut network);
        assert_eq!(NbtValue::read_root(&mut network, false).unwrap(), Some(nbt));
    }

    #[test]
    fn test_truncated_input_is_an_error() {
        let mut buf = BytesMut::from(&[TAG_COMPOUND, TAG_INT, 0, 1, b'a', 0][..]);
        assert!(matches!(
            NbtValue::read_root(&mut buf, false),
            Err(NbtError::UnexpectedEnd)
        ));
    }

    #[test]
    fn test_json_component_conversion() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"text":"hi","bold":true,"extra":["a",{"text":"b"}]}"#).unwrap();
        let nbt = NbtValue::from_json(&json);
        assert_eq!(nbt.get("bold"), Some(&NbtValue::Byte(1)));
        match nbt.get("extra") {
            Some(NbtValue::List(items)) => {
                assert_eq!(items[0].get("text"), Some(&NbtValue::String("a".into())));
            }
            other => panic!("unexpected extra: {:?}", other),
        }
        let back = nbt.to_json();
        assert_eq!(back["text"], "hi");
        assert_eq!(back["bold"], true);
    }
}
