use byteorder::{ByteOrder, LittleEndian};

use super::{TERMINATOR, Value};
use crate::protocol::CodecError;

/// Decode one OPACK value from the front of `data`.
pub fn unpack(data: &[u8]) -> Result<Value, CodecError> {
    let mut unpacker = Unpacker {
        data,
        pos: 0,
        pool: Vec::new(),
    };
    unpacker.unpack_value()
}

/// Mirror of the encoder's pool: every multi-byte encoding claims the next
/// index as its first byte is consumed, containers before their children.
struct Unpacker<'a> {
    data: &'a [u8],
    pos: usize,
    pool: Vec<Option<Value>>,
}

impl Unpacker<'_> {
    fn unpack_value(&mut self) -> Result<Value, CodecError> {
        let start = self.pos;
        let tag = self.take(1)?[0];

        let value = match tag {
            0x01 => Value::Bool(true),
            0x02 => Value::Bool(false),
            0x04 => Value::Null,
            0x05 => {
                let bytes = self.take(16)?;
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(bytes);
                Value::Uuid(uuid)
            }
            // Absolute time; decoded as its raw integer value.
            0x06 => Value::Int(LittleEndian::read_u64(self.take(8)?)),
            0x08..=0x2F => Value::Int(u64::from(tag - 0x08)),
            0x30..=0x33 => {
                let width = 1usize << (tag - 0x30);
                Value::Int(read_uint(self.take(width)?))
            }
            0x35 => Value::Float32(f32::from_le_bytes(
                self.take(4)?.try_into().map_err(|_| CodecError::Truncated)?,
            )),
            0x36 => Value::Float64(f64::from_le_bytes(
                self.take(8)?.try_into().map_err(|_| CodecError::Truncated)?,
            )),
            0x40..=0x60 => self.read_string(usize::from(tag - 0x40))?,
            0x61..=0x64 => {
                let width = usize::from(tag - 0x60);
                let len = read_uint(self.take(width)?);
                let len = usize::try_from(len).map_err(|_| CodecError::Truncated)?;
                self.read_string(len)?
            }
            0x70..=0x90 => Value::Bytes(self.take(usize::from(tag - 0x70))?.to_vec()),
            0x91..=0x94 => {
                let width = 1usize << (tag - 0x91);
                let len = read_uint(self.take(width)?);
                let len = usize::try_from(len).map_err(|_| CodecError::Truncated)?;
                Value::Bytes(self.take(len)?.to_vec())
            }
            0xD0..=0xDF => return self.read_array(tag & 0x0F),
            0xE0..=0xEF => return self.read_dict(tag & 0x0F),
            0xA0..=0xC0 => return self.resolve_backref(usize::from(tag - 0xA0)),
            0xC1..=0xC4 => {
                let width = 1usize << (tag - 0xC1);
                let idx = read_uint(self.take(width)?);
                let idx = usize::try_from(idx).map_err(|_| CodecError::BadBackref(usize::MAX))?;
                return self.resolve_backref(idx);
            }
            other => return Err(CodecError::UnknownTag(other)),
        };

        self.register(start, value.clone());
        Ok(value)
    }

    fn read_string(&mut self, len: usize) -> Result<Value, CodecError> {
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(Value::String(s.to_string()))
    }

    fn read_array(&mut self, count_nibble: u8) -> Result<Value, CodecError> {
        if count_nibble == 0 {
            return Ok(Value::Array(Vec::new()));
        }
        let slot = self.pool.len();
        self.pool.push(None);

        let mut items = Vec::new();
        if count_nibble == 0x0F {
            while self.peek()? != TERMINATOR {
                items.push(self.unpack_value()?);
            }
            self.take(1)?;
        } else {
            for _ in 0..count_nibble {
                items.push(self.unpack_value()?);
            }
        }

        let value = Value::Array(items);
        self.pool[slot] = Some(value.clone());
        Ok(value)
    }

    fn read_dict(&mut self, count_nibble: u8) -> Result<Value, CodecError> {
        if count_nibble == 0 {
            return Ok(Value::Dict(Vec::new()));
        }
        let slot = self.pool.len();
        self.pool.push(None);

        let mut entries = Vec::new();
        if count_nibble == 0x0F {
            while self.peek()? != TERMINATOR {
                entries.push(self.read_entry()?);
            }
            self.take(1)?;
        } else {
            for _ in 0..count_nibble {
                entries.push(self.read_entry()?);
            }
        }

        let value = Value::Dict(entries);
        self.pool[slot] = Some(value.clone());
        Ok(value)
    }

    fn read_entry(&mut self) -> Result<(String, Value), CodecError> {
        let key = match self.unpack_value()? {
            Value::String(s) => s,
            _ => return Err(CodecError::Unsupported("non-string map key")),
        };
        let value = self.unpack_value()?;
        Ok((key, value))
    }

    fn resolve_backref(&self, idx: usize) -> Result<Value, CodecError> {
        match self.pool.get(idx) {
            Some(Some(value)) => Ok(value.clone()),
            // An index pointing at a container still being decoded (or past
            // the pool) cannot come from a conformant encoder.
            Some(None) | None => Err(CodecError::BadBackref(idx)),
        }
    }

    fn register(&mut self, start: usize, value: Value) {
        if self.pos - start > 1 {
            self.pool.push(Some(value));
        }
    }

    fn take(&mut self, len: usize) -> Result<&[u8], CodecError> {
        if self.pos + len > self.data.len() {
            return Err(CodecError::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn peek(&self) -> Result<u8, CodecError> {
        self.data.get(self.pos).copied().ok_or(CodecError::Truncated)
    }
}

fn read_uint(bytes: &[u8]) -> u64 {
    let mut value = 0u64;
    for (i, b) in bytes.iter().enumerate() {
        value |= u64::from(*b) << (8 * i);
    }
    value
}
