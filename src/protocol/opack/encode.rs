use byteorder::{ByteOrder, LittleEndian};

use super::{TERMINATOR, Value};

/// Encode a value to OPACK bytes.
pub fn pack(value: &Value) -> Vec<u8> {
    let mut packer = Packer { pool: Vec::new() };
    let mut out = Vec::new();
    packer.pack_value(value, &mut out);
    out
}

/// Ordered pool of previously emitted encodings.
///
/// Containers claim their index at header time and are back-filled once
/// complete; a `None` slot marks a container still being encoded and never
/// matches. Single-byte encodings are never pooled.
struct Packer {
    pool: Vec<Option<Vec<u8>>>,
}

impl Packer {
    fn pack_value(&mut self, value: &Value, out: &mut Vec<u8>) {
        match value {
            Value::Array(items) => {
                if items.is_empty() {
                    out.push(0xD0);
                    return;
                }
                let slot = self.pool.len();
                self.pool.push(None);

                let mut buf = Vec::new();
                if items.len() < 0xF {
                    #[allow(clippy::cast_possible_truncation)]
                    buf.push(0xD0 + items.len() as u8);
                    for item in items {
                        self.pack_value(item, &mut buf);
                    }
                } else {
                    buf.push(0xDF);
                    for item in items {
                        self.pack_value(item, &mut buf);
                    }
                    buf.push(TERMINATOR);
                }
                self.finish_container(slot, buf, out);
            }
            Value::Dict(entries) => {
                if entries.is_empty() {
                    out.push(0xE0);
                    return;
                }
                let slot = self.pool.len();
                self.pool.push(None);

                let mut buf = Vec::new();
                if entries.len() < 0xF {
                    #[allow(clippy::cast_possible_truncation)]
                    buf.push(0xE0 + entries.len() as u8);
                    for (key, item) in entries {
                        self.emit(encode_string(key), &mut buf);
                        self.pack_value(item, &mut buf);
                    }
                } else {
                    buf.push(0xEF);
                    for (key, item) in entries {
                        self.emit(encode_string(key), &mut buf);
                        self.pack_value(item, &mut buf);
                    }
                    buf.push(TERMINATOR);
                }
                self.finish_container(slot, buf, out);
            }
            leaf => self.emit(encode_leaf(leaf), out),
        }
    }

    /// Emit a completed encoding: back-reference if seen before, otherwise
    /// register it (when multi-byte) and write it out.
    fn emit(&mut self, buf: Vec<u8>, out: &mut Vec<u8>) {
        if buf.len() <= 1 {
            out.extend_from_slice(&buf);
            return;
        }
        if let Some(idx) = self.find(&buf) {
            push_backref(out, idx);
        } else {
            out.extend_from_slice(&buf);
            self.pool.push(Some(buf));
        }
    }

    fn finish_container(&mut self, slot: usize, buf: Vec<u8>, out: &mut Vec<u8>) {
        // A container whose bytes match an earlier completed entry emitted
        // only back-references while encoding, so the reserved slot is
        // still the last one and can be dropped.
        if let Some(idx) = self.find(&buf) {
            if self.pool.len() == slot + 1 {
                self.pool.truncate(slot);
                push_backref(out, idx);
                return;
            }
        }
        out.extend_from_slice(&buf);
        self.pool[slot] = Some(buf);
    }

    fn find(&self, buf: &[u8]) -> Option<usize> {
        self.pool
            .iter()
            .position(|entry| entry.as_deref() == Some(buf))
    }
}

fn push_backref(out: &mut Vec<u8>, idx: usize) {
    if idx <= 0x20 {
        #[allow(clippy::cast_possible_truncation)]
        out.push(0xA0 + idx as u8);
    } else if idx <= 0xFF {
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&[0xC1, idx as u8]);
    } else if idx <= 0xFFFF {
        out.push(0xC2);
        let mut field = [0u8; 2];
        #[allow(clippy::cast_possible_truncation)]
        LittleEndian::write_u16(&mut field, idx as u16);
        out.extend_from_slice(&field);
    } else if idx <= 0xFFFF_FFFF {
        out.push(0xC3);
        let mut field = [0u8; 4];
        #[allow(clippy::cast_possible_truncation)]
        LittleEndian::write_u32(&mut field, idx as u32);
        out.extend_from_slice(&field);
    } else {
        out.push(0xC4);
        let mut field = [0u8; 8];
        LittleEndian::write_u64(&mut field, idx as u64);
        out.extend_from_slice(&field);
    }
}

fn encode_leaf(value: &Value) -> Vec<u8> {
    match value {
        Value::Null => vec![0x04],
        Value::Bool(true) => vec![0x01],
        Value::Bool(false) => vec![0x02],
        Value::Int(n) => encode_int(*n),
        Value::Float32(f) => {
            let mut buf = vec![0x35];
            buf.extend_from_slice(&f.to_le_bytes());
            buf
        }
        Value::Float64(f) => {
            let mut buf = vec![0x36];
            buf.extend_from_slice(&f.to_le_bytes());
            buf
        }
        Value::String(s) => encode_string(s),
        Value::Bytes(b) => encode_bytes(b),
        Value::Uuid(u) => {
            let mut buf = vec![0x05];
            buf.extend_from_slice(u);
            buf
        }
        Value::Array(_) | Value::Dict(_) => unreachable!("containers handled by pack_value"),
    }
}

fn encode_int(n: u64) -> Vec<u8> {
    if n < 0x28 {
        #[allow(clippy::cast_possible_truncation)]
        return vec![0x08 + n as u8];
    }
    if n <= 0xFF {
        #[allow(clippy::cast_possible_truncation)]
        return vec![0x30, n as u8];
    }
    if n <= 0xFFFF {
        let mut buf = vec![0x31, 0, 0];
        #[allow(clippy::cast_possible_truncation)]
        LittleEndian::write_u16(&mut buf[1..], n as u16);
        return buf;
    }
    if n <= 0xFFFF_FFFF {
        let mut buf = vec![0x32, 0, 0, 0, 0];
        #[allow(clippy::cast_possible_truncation)]
        LittleEndian::write_u32(&mut buf[1..], n as u32);
        return buf;
    }
    let mut buf = vec![0x33, 0, 0, 0, 0, 0, 0, 0, 0];
    LittleEndian::write_u64(&mut buf[1..], n);
    buf
}

fn encode_string(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let len = bytes.len();
    let mut buf;
    if len <= 0x20 {
        #[allow(clippy::cast_possible_truncation)]
        {
            buf = vec![0x40 + len as u8];
        }
    } else if len <= 0xFF {
        #[allow(clippy::cast_possible_truncation)]
        {
            buf = vec![0x61, len as u8];
        }
    } else if len <= 0xFFFF {
        buf = vec![0x62, 0, 0];
        #[allow(clippy::cast_possible_truncation)]
        LittleEndian::write_u16(&mut buf[1..], len as u16);
    } else if len <= 0xFF_FFFF {
        buf = vec![0x63, 0, 0, 0];
        #[allow(clippy::cast_possible_truncation)]
        LittleEndian::write_u24(&mut buf[1..], len as u32);
    } else {
        buf = vec![0x64, 0, 0, 0, 0];
        #[allow(clippy::cast_possible_truncation)]
        LittleEndian::write_u32(&mut buf[1..], len as u32);
    }
    buf.extend_from_slice(bytes);
    buf
}

fn encode_bytes(b: &[u8]) -> Vec<u8> {
    let len = b.len();
    let mut buf;
    if len <= 0x20 {
        #[allow(clippy::cast_possible_truncation)]
        {
            buf = vec![0x70 + len as u8];
        }
    } else if len <= 0xFF {
        #[allow(clippy::cast_possible_truncation)]
        {
            buf = vec![0x91, len as u8];
        }
    } else if len <= 0xFFFF {
        buf = vec![0x92, 0, 0];
        #[allow(clippy::cast_possible_truncation)]
        LittleEndian::write_u16(&mut buf[1..], len as u16);
    } else if len <= 0xFFFF_FFFF {
        buf = vec![0x93, 0, 0, 0, 0];
        #[allow(clippy::cast_possible_truncation)]
        LittleEndian::write_u32(&mut buf[1..], len as u32);
    } else {
        buf = vec![0x94, 0, 0, 0, 0, 0, 0, 0, 0];
        LittleEndian::write_u64(&mut buf[1..], len as u64);
    }
    buf.extend_from_slice(b);
    buf
}
