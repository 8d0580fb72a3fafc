use std::collections::HashMap;

use super::Plist;
use crate::protocol::CodecError;

/// Encode a value to binary plist format.
pub fn encode(value: &Plist) -> Result<Vec<u8>, CodecError> {
    let mut encoder = Encoder::new();
    encoder.encode(value)
}

/// Object references are two bytes, which caps an archive at 65535
/// objects; RTI payloads stay far below that.
const REF_SIZE: u8 = 2;
const MAX_OBJECTS: usize = 0xFFFF;

struct Encoder {
    objects: Vec<u8>,
    offsets: Vec<u64>,
    /// Already-encoded primitives, for reference deduplication.
    cache: HashMap<ObjectKey, usize>,
}

#[derive(Hash, Eq, PartialEq)]
enum ObjectKey {
    String(String),
    Data(Vec<u8>),
    Int(i64),
    Real(u64),
    Uid(u64),
}

impl Encoder {
    fn new() -> Self {
        Self {
            objects: Vec::new(),
            offsets: Vec::new(),
            cache: HashMap::new(),
        }
    }

    fn encode(&mut self, value: &Plist) -> Result<Vec<u8>, CodecError> {
        let mut output = Vec::new();
        output.extend_from_slice(b"bplist00");

        let root_index = self.encode_value(value)?;
        if self.offsets.len() > MAX_OBJECTS {
            return Err(CodecError::Unsupported("too many objects for 2-byte refs"));
        }

        let objects_start = output.len();
        output.extend_from_slice(&self.objects);

        let offset_table_offset = output.len();
        let offset_size = offset_width(objects_start + self.objects.len());
        for &offset in &self.offsets {
            write_sized_be(&mut output, objects_start as u64 + offset, offset_size);
        }

        // Trailer: 5 unused + sort version, then sizes, counts and offsets.
        output.extend_from_slice(&[0; 6]);
        output.push(offset_size);
        output.push(REF_SIZE);
        output.extend_from_slice(&(self.offsets.len() as u64).to_be_bytes());
        output.extend_from_slice(&(root_index as u64).to_be_bytes());
        output.extend_from_slice(&(offset_table_offset as u64).to_be_bytes());

        Ok(output)
    }

    fn encode_value(&mut self, value: &Plist) -> Result<usize, CodecError> {
        if let Some(key) = object_key(value) {
            if let Some(&index) = self.cache.get(&key) {
                return Ok(index);
            }
        }

        // Containers encode children first so their references are known.
        let body = match value {
            Plist::Array(items) => {
                let mut refs = Vec::with_capacity(items.len());
                for item in items {
                    refs.push(self.encode_value(item)?);
                }
                let mut body = Vec::new();
                write_marker(&mut body, 0xA, refs.len());
                for r in refs {
                    write_ref(&mut body, r);
                }
                Some(body)
            }
            Plist::Dict(dict) => {
                // Deterministic output: sort keys.
                let mut keys: Vec<&String> = dict.keys().collect();
                keys.sort();

                let mut key_refs = Vec::with_capacity(dict.len());
                let mut value_refs = Vec::with_capacity(dict.len());
                for key in &keys {
                    key_refs.push(self.encode_value(&Plist::String((*key).clone()))?);
                }
                for key in &keys {
                    value_refs.push(self.encode_value(&dict[*key])?);
                }

                let mut body = Vec::new();
                write_marker(&mut body, 0xD, key_refs.len());
                for r in key_refs.into_iter().chain(value_refs) {
                    write_ref(&mut body, r);
                }
                Some(body)
            }
            _ => None,
        };

        let index = self.offsets.len();
        self.offsets.push(self.objects.len() as u64);

        if let Some(body) = body {
            self.objects.extend_from_slice(&body);
        } else {
            self.encode_primitive(value);
        }

        if let Some(key) = object_key(value) {
            self.cache.insert(key, index);
        }
        Ok(index)
    }

    fn encode_primitive(&mut self, value: &Plist) {
        match value {
            Plist::Bool(false) => self.objects.push(0x08),
            Plist::Bool(true) => self.objects.push(0x09),
            Plist::Int(v) => self.encode_integer(*v),
            Plist::Real(v) => {
                self.objects.push(0x23);
                self.objects.extend_from_slice(&v.to_be_bytes());
            }
            Plist::String(s) => {
                if s.is_ascii() {
                    write_marker(&mut self.objects, 0x5, s.len());
                    self.objects.extend_from_slice(s.as_bytes());
                } else {
                    let units: Vec<u16> = s.encode_utf16().collect();
                    write_marker(&mut self.objects, 0x6, units.len());
                    for unit in units {
                        self.objects.extend_from_slice(&unit.to_be_bytes());
                    }
                }
            }
            Plist::Data(d) => {
                write_marker(&mut self.objects, 0x4, d.len());
                self.objects.extend_from_slice(d);
            }
            Plist::Uid(u) => self.encode_uid(*u),
            Plist::Array(_) | Plist::Dict(_) => unreachable!("containers handled earlier"),
        }
    }

    fn encode_integer(&mut self, value: i64) {
        if value < 0 {
            // Negative integers are always 8 bytes.
            self.objects.push(0x13);
            self.objects.extend_from_slice(&value.to_be_bytes());
        } else if value <= i64::from(u8::MAX) {
            self.objects.push(0x10);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            self.objects.push(value as u8);
        } else if value <= i64::from(u16::MAX) {
            self.objects.push(0x11);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            self.objects
                .extend_from_slice(&(value as u16).to_be_bytes());
        } else if value <= i64::from(u32::MAX) {
            self.objects.push(0x12);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            self.objects
                .extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.objects.push(0x13);
            self.objects.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn encode_uid(&mut self, value: u64) {
        let width: u8 = if value <= 0xFF {
            1
        } else if value <= 0xFFFF {
            2
        } else if value <= 0xFFFF_FFFF {
            4
        } else {
            8
        };
        self.objects.push(0x80 | (width - 1));
        write_sized_be(&mut self.objects, value, width);
    }
}

fn object_key(value: &Plist) -> Option<ObjectKey> {
    match value {
        Plist::String(s) => Some(ObjectKey::String(s.clone())),
        Plist::Data(d) => Some(ObjectKey::Data(d.clone())),
        Plist::Int(i) => Some(ObjectKey::Int(*i)),
        Plist::Real(f) => Some(ObjectKey::Real(f.to_bits())),
        Plist::Uid(u) => Some(ObjectKey::Uid(*u)),
        _ => None,
    }
}

fn write_marker(out: &mut Vec<u8>, kind: u8, len: usize) {
    if len < 0xF {
        #[allow(clippy::cast_possible_truncation)]
        out.push((kind << 4) | len as u8);
    } else {
        out.push((kind << 4) | 0xF);
        // The count follows as an integer object.
        let len = len as u64;
        if len <= u64::from(u8::MAX) {
            out.push(0x10);
            write_sized_be(out, len, 1);
        } else if len <= u64::from(u16::MAX) {
            out.push(0x11);
            write_sized_be(out, len, 2);
        } else if len <= u64::from(u32::MAX) {
            out.push(0x12);
            write_sized_be(out, len, 4);
        } else {
            out.push(0x13);
            write_sized_be(out, len, 8);
        }
    }
}

fn write_ref(out: &mut Vec<u8>, index: usize) {
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(index as u16).to_be_bytes());
}

fn write_sized_be(out: &mut Vec<u8>, value: u64, size: u8) {
    let bytes = value.to_be_bytes();
    out.extend_from_slice(&bytes[bytes.len() - size as usize..]);
}

fn offset_width(max_offset: usize) -> u8 {
    if max_offset <= 0xFF {
        1
    } else if max_offset <= 0xFFFF {
        2
    } else if max_offset <= 0xFFFF_FFFF {
        4
    } else {
        8
    }
}
