// PackStream v1 values
// Serialization format carried inside Bolt messages

use crate::errors::{HarnessError, Result};
use std::collections::BTreeMap;

const NULL: u8 = 0xC0;
const FLOAT_64: u8 = 0xC1;
const FALSE: u8 = 0xC2;
const TRUE: u8 = 0xC3;
const INT_8: u8 = 0xC8;
const INT_16: u8 = 0xC9;
const INT_32: u8 = 0xCA;
const INT_64: u8 = 0xCB;
const BYTES_8: u8 = 0xCC;
const BYTES_16: u8 = 0xCD;
const BYTES_32: u8 = 0xCE;
const STRING_8: u8 = 0xD0;
const STRING_16: u8 = 0xD1;
const STRING_32: u8 = 0xD2;
const LIST_8: u8 = 0xD4;
const LIST_16: u8 = 0xD5;
const LIST_32: u8 = 0xD6;
const MAP_8: u8 = 0xD8;
const MAP_16: u8 = 0xD9;
const MAP_32: u8 = 0xDA;

const TINY_STRING: u8 = 0x80;
const TINY_LIST: u8 = 0x90;
const TINY_MAP: u8 = 0xA0;
const TINY_STRUCT: u8 = 0xB0;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Bytes(Vec<u8>),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Structure { tag: u8, fields: Vec<Value> },
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a key when this value is a map
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

/// Build a map value from string keys
pub fn map<I, K>(entries: I) -> Value
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
}

/// Serialize a value, appending to `buf`
pub fn encode(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Null => buf.push(NULL),
        Value::Boolean(true) => buf.push(TRUE),
        Value::Boolean(false) => buf.push(FALSE),
        Value::Integer(i) => encode_int(*i, buf),
        Value::Float(f) => {
            buf.push(FLOAT_64);
            buf.extend_from_slice(&f.to_be_bytes());
        }
        Value::Bytes(bytes) => {
            write_size(buf, bytes.len(), None, [BYTES_8, BYTES_16, BYTES_32])?;
            buf.extend_from_slice(bytes);
        }
        Value::String(s) => {
            write_size(buf, s.len(), Some(TINY_STRING), [STRING_8, STRING_16, STRING_32])?;
            buf.extend_from_slice(s.as_bytes());
        }
        Value::List(items) => {
            write_size(buf, items.len(), Some(TINY_LIST), [LIST_8, LIST_16, LIST_32])?;
            for item in items {
                encode(item, buf)?;
            }
        }
        Value::Map(entries) => {
            write_size(buf, entries.len(), Some(TINY_MAP), [MAP_8, MAP_16, MAP_32])?;
            for (key, item) in entries {
                encode(&Value::String(key.clone()), buf)?;
                encode(item, buf)?;
            }
        }
        Value::Structure { tag, fields } => {
            if fields.len() > 15 {
                return Err(HarnessError::Protocol(format!(
                    "structure 0x{:02X} has {} fields, at most 15 are supported",
                    tag,
                    fields.len()
                )));
            }
            buf.push(TINY_STRUCT | fields.len() as u8);
            buf.push(*tag);
            for field in fields {
                encode(field, buf)?;
            }
        }
    }
    Ok(())
}

fn encode_int(i: i64, buf: &mut Vec<u8>) {
    if (-16..=127).contains(&i) {
        buf.push(i as i8 as u8);
    } else if (i8::MIN as i64..=i8::MAX as i64).contains(&i) {
        buf.push(INT_8);
        buf.push(i as i8 as u8);
    } else if (i16::MIN as i64..=i16::MAX as i64).contains(&i) {
        buf.push(INT_16);
        buf.extend_from_slice(&(i as i16).to_be_bytes());
    } else if (i32::MIN as i64..=i32::MAX as i64).contains(&i) {
        buf.push(INT_32);
        buf.extend_from_slice(&(i as i32).to_be_bytes());
    } else {
        buf.push(INT_64);
        buf.extend_from_slice(&i.to_be_bytes());
    }
}

fn write_size(buf: &mut Vec<u8>, len: usize, tiny: Option<u8>, markers: [u8; 3]) -> Result<()> {
    match tiny {
        Some(tiny) if len < 16 => buf.push(tiny | len as u8),
        _ if len <= u8::MAX as usize => {
            buf.push(markers[0]);
            buf.push(len as u8);
        }
        _ if len <= u16::MAX as usize => {
            buf.push(markers[1]);
            buf.extend_from_slice(&(len as u16).to_be_bytes());
        }
        _ if len <= u32::MAX as usize => {
            buf.push(markers[2]);
            buf.extend_from_slice(&(len as u32).to_be_bytes());
        }
        _ => {
            return Err(HarnessError::Protocol(format!(
                "value of length {} is too large to encode",
                len
            )))
        }
    }
    Ok(())
}

/// Deserialize exactly one value from `bytes`
pub fn decode(bytes: &[u8]) -> Result<Value> {
    let mut decoder = Decoder::new(bytes);
    let value = decoder.read_value()?;
    if decoder.remaining() != 0 {
        return Err(HarnessError::Protocol(format!(
            "{} trailing bytes after value",
            decoder.remaining()
        )));
    }
    Ok(value)
}

pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(HarnessError::Protocol(format!(
                "unexpected end of data: needed {} bytes, {} left",
                n,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_len(&mut self, width: usize) -> Result<usize> {
        Ok(match width {
            1 => self.read_u8()? as usize,
            2 => u16::from_be_bytes(self.take_array()?) as usize,
            _ => u32::from_be_bytes(self.take_array()?) as usize,
        })
    }

    pub fn read_value(&mut self) -> Result<Value> {
        let marker = self.read_u8()?;

        match marker {
            0x00..=0x7F => Ok(Value::Integer(marker as i64)),
            0xF0..=0xFF => Ok(Value::Integer(marker as i8 as i64)),
            0x80..=0x8F => self.read_string((marker & 0x0F) as usize),
            0x90..=0x9F => self.read_list((marker & 0x0F) as usize),
            0xA0..=0xAF => self.read_map((marker & 0x0F) as usize),
            0xB0..=0xBF => {
                let tag = self.read_u8()?;
                let fields = (0..(marker & 0x0F))
                    .map(|_| self.read_value())
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Structure { tag, fields })
            }
            NULL => Ok(Value::Null),
            TRUE => Ok(Value::Boolean(true)),
            FALSE => Ok(Value::Boolean(false)),
            FLOAT_64 => Ok(Value::Float(f64::from_be_bytes(self.take_array()?))),
            INT_8 => Ok(Value::Integer(self.read_u8()? as i8 as i64)),
            INT_16 => Ok(Value::Integer(i16::from_be_bytes(self.take_array()?) as i64)),
            INT_32 => Ok(Value::Integer(i32::from_be_bytes(self.take_array()?) as i64)),
            INT_64 => Ok(Value::Integer(i64::from_be_bytes(self.take_array()?))),
            BYTES_8 | BYTES_16 | BYTES_32 => {
                let len = self.read_len(1 << (marker - BYTES_8))?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            STRING_8 | STRING_16 | STRING_32 => {
                let len = self.read_len(1 << (marker - STRING_8))?;
                self.read_string(len)
            }
            LIST_8 | LIST_16 | LIST_32 => {
                let len = self.read_len(1 << (marker - LIST_8))?;
                self.read_list(len)
            }
            MAP_8 | MAP_16 | MAP_32 => {
                let len = self.read_len(1 << (marker - MAP_8))?;
                self.read_map(len)
            }
            other => Err(HarnessError::Protocol(format!(
                "unsupported PackStream marker 0x{:02X}",
                other
            ))),
        }
    }

    fn read_string(&mut self, len: usize) -> Result<Value> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map(Value::String)
            .map_err(|_| HarnessError::Protocol("string is not valid UTF-8".to_string()))
    }

    fn read_list(&mut self, len: usize) -> Result<Value> {
        let mut items = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            items.push(self.read_value()?);
        }
        Ok(Value::List(items))
    }

    fn read_map(&mut self, len: usize) -> Result<Value> {
        let mut entries = BTreeMap::new();
        for _ in 0..len {
            let key = match self.read_value()? {
                Value::String(key) => key,
                other => {
                    return Err(HarnessError::Protocol(format!(
                        "map key must be a string, got {:?}",
                        other
                    )))
                }
            };
            let value = self.read_value()?;
            entries.insert(key, value);
        }
        Ok(Value::Map(entries))
    }
}
