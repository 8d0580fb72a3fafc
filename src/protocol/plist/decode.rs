use std::collections::{HashMap, HashSet};

use super::Plist;
use crate::protocol::CodecError;

const MAGIC: &[u8] = b"bplist00";
const TRAILER_LEN: usize = 32;

/// Decode binary plist data.
pub fn decode(data: &[u8]) -> Result<Plist, CodecError> {
    if data.len() < MAGIC.len() + TRAILER_LEN {
        return Err(CodecError::Truncated);
    }
    if &data[..MAGIC.len()] != MAGIC {
        return Err(CodecError::Unsupported("missing bplist00 magic"));
    }

    let trailer = Trailer::parse(data)?;
    let decoder = Decoder::new(data, &trailer)?;
    decoder.decode_object(trailer.root_object_index, &mut HashSet::new())
}

/// Last 32 bytes of the file.
struct Trailer {
    offset_size: u8,
    object_ref_size: u8,
    num_objects: u64,
    root_object_index: u64,
    offset_table_offset: u64,
}

impl Trailer {
    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let trailer = &data[data.len() - TRAILER_LEN..];
        let be_u64 =
            |range: std::ops::Range<usize>| u64::from_be_bytes(trailer[range].try_into().unwrap());

        let parsed = Self {
            offset_size: trailer[6],
            object_ref_size: trailer[7],
            num_objects: be_u64(8..16),
            root_object_index: be_u64(16..24),
            offset_table_offset: be_u64(24..32),
        };

        if !matches!(parsed.offset_size, 1 | 2 | 4 | 8)
            || !matches!(parsed.object_ref_size, 1 | 2 | 4 | 8)
        {
            return Err(CodecError::Unsupported("bad trailer field sizes"));
        }
        Ok(parsed)
    }
}

struct Decoder<'a> {
    data: &'a [u8],
    offset_table: Vec<u64>,
    object_ref_size: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8], trailer: &Trailer) -> Result<Self, CodecError> {
        let start =
            usize::try_from(trailer.offset_table_offset).map_err(|_| CodecError::Truncated)?;
        let entry_size = trailer.offset_size as usize;
        let count = usize::try_from(trailer.num_objects).map_err(|_| CodecError::Truncated)?;

        if start
            .checked_add(count.checked_mul(entry_size).ok_or(CodecError::Truncated)?)
            .ok_or(CodecError::Truncated)?
            > data.len()
        {
            return Err(CodecError::Truncated);
        }

        let mut offset_table = Vec::with_capacity(count);
        for i in 0..count {
            let pos = start + i * entry_size;
            offset_table.push(read_be_uint(&data[pos..pos + entry_size]));
        }

        Ok(Self {
            data,
            offset_table,
            object_ref_size: trailer.object_ref_size as usize,
        })
    }

    fn decode_object(&self, index: u64, seen: &mut HashSet<u64>) -> Result<Plist, CodecError> {
        if !seen.insert(index) {
            return Err(CodecError::Unsupported("circular object reference"));
        }

        let index_usize = usize::try_from(index).map_err(|_| CodecError::Truncated)?;
        let offset = *self
            .offset_table
            .get(index_usize)
            .ok_or(CodecError::Truncated)?;
        let pos = usize::try_from(offset).map_err(|_| CodecError::Truncated)?;
        if pos >= self.data.len() {
            return Err(CodecError::Truncated);
        }

        let marker = self.data[pos];
        let value = self.decode_value(marker, pos + 1, seen)?;

        seen.remove(&index);
        Ok(value)
    }

    fn decode_value(
        &self,
        marker: u8,
        pos: usize,
        seen: &mut HashSet<u64>,
    ) -> Result<Plist, CodecError> {
        let low = marker & 0x0F;
        match marker >> 4 {
            0x0 => match low {
                0x8 => Ok(Plist::Bool(false)),
                0x9 => Ok(Plist::Bool(true)),
                0x0 | 0xF => Ok(Plist::Data(vec![])),
                _ => Err(CodecError::UnknownTag(marker)),
            },
            0x1 => self.decode_integer(pos, low),
            0x2 => self.decode_real(pos, low),
            0x4 => self.decode_data(pos, low),
            0x5 => self.decode_ascii_string(pos, low),
            0x6 => self.decode_utf16_string(pos, low),
            0x8 => self.decode_uid(pos, low),
            0xA => self.decode_array(pos, low, seen),
            0xD => self.decode_dictionary(pos, low, seen),
            _ => Err(CodecError::UnknownTag(marker)),
        }
    }

    fn slice(&self, pos: usize, len: usize) -> Result<&[u8], CodecError> {
        if pos.checked_add(len).ok_or(CodecError::Truncated)? > self.data.len() {
            return Err(CodecError::Truncated);
        }
        Ok(&self.data[pos..pos + len])
    }

    fn decode_integer(&self, pos: usize, size_exp: u8) -> Result<Plist, CodecError> {
        let len = 1usize << size_exp;
        let bytes = self.slice(pos, len)?;
        match len {
            #[allow(clippy::cast_possible_wrap)]
            1 => Ok(Plist::Int(i64::from(bytes[0] as i8))),
            2 => Ok(Plist::Int(i64::from(i16::from_be_bytes(
                bytes.try_into().unwrap(),
            )))),
            4 => Ok(Plist::Int(i64::from(i32::from_be_bytes(
                bytes.try_into().unwrap(),
            )))),
            8 => Ok(Plist::Int(i64::from_be_bytes(bytes.try_into().unwrap()))),
            _ => Err(CodecError::Unsupported("integer wider than 8 bytes")),
        }
    }

    fn decode_real(&self, pos: usize, size_exp: u8) -> Result<Plist, CodecError> {
        let len = 1usize << size_exp;
        let bytes = self.slice(pos, len)?;
        match len {
            4 => Ok(Plist::Real(f64::from(f32::from_be_bytes(
                bytes.try_into().unwrap(),
            )))),
            8 => Ok(Plist::Real(f64::from_be_bytes(bytes.try_into().unwrap()))),
            _ => Err(CodecError::Unsupported("real size not 4 or 8")),
        }
    }

    /// Count nibble `0xF` means the real count follows as an integer
    /// object; returns `(count, payload_start)`.
    fn decode_size(&self, pos: usize, nibble: u8) -> Result<(usize, usize), CodecError> {
        if nibble != 0xF {
            return Ok((nibble as usize, pos));
        }

        let marker = *self.slice(pos, 1)?.first().ok_or(CodecError::Truncated)?;
        if marker >> 4 != 0x1 {
            return Err(CodecError::UnknownTag(marker));
        }
        let len = 1usize << (marker & 0x0F);
        let value = read_be_uint(self.slice(pos + 1, len)?);
        let size = usize::try_from(value).map_err(|_| CodecError::Truncated)?;
        Ok((size, pos + 1 + len))
    }

    fn decode_data(&self, pos: usize, nibble: u8) -> Result<Plist, CodecError> {
        let (len, start) = self.decode_size(pos, nibble)?;
        Ok(Plist::Data(self.slice(start, len)?.to_vec()))
    }

    fn decode_ascii_string(&self, pos: usize, nibble: u8) -> Result<Plist, CodecError> {
        let (len, start) = self.decode_size(pos, nibble)?;
        let s = std::str::from_utf8(self.slice(start, len)?)
            .map_err(|_| CodecError::InvalidUtf8)?;
        Ok(Plist::String(s.to_string()))
    }

    fn decode_utf16_string(&self, pos: usize, nibble: u8) -> Result<Plist, CodecError> {
        let (len, start) = self.decode_size(pos, nibble)?;
        let bytes = self.slice(start, len.checked_mul(2).ok_or(CodecError::Truncated)?)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes(c.try_into().unwrap()))
            .collect();
        let s = String::from_utf16(&units).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(Plist::String(s))
    }

    fn decode_uid(&self, pos: usize, nibble: u8) -> Result<Plist, CodecError> {
        let len = (nibble + 1) as usize;
        Ok(Plist::Uid(read_be_uint(self.slice(pos, len)?)))
    }

    fn decode_array(
        &self,
        pos: usize,
        nibble: u8,
        seen: &mut HashSet<u64>,
    ) -> Result<Plist, CodecError> {
        let (count, start) = self.decode_size(pos, nibble)?;
        let refs = self.slice(
            start,
            count
                .checked_mul(self.object_ref_size)
                .ok_or(CodecError::Truncated)?,
        )?;

        let mut items = Vec::with_capacity(count);
        for chunk in refs.chunks_exact(self.object_ref_size) {
            items.push(self.decode_object(read_be_uint(chunk), seen)?);
        }
        Ok(Plist::Array(items))
    }

    fn decode_dictionary(
        &self,
        pos: usize,
        nibble: u8,
        seen: &mut HashSet<u64>,
    ) -> Result<Plist, CodecError> {
        let (count, start) = self.decode_size(pos, nibble)?;
        let ref_bytes = count
            .checked_mul(self.object_ref_size)
            .ok_or(CodecError::Truncated)?;
        let keys = self.slice(start, ref_bytes)?;
        let values = self.slice(start + ref_bytes, ref_bytes)?;

        let mut dict = HashMap::with_capacity(count);
        for (key_ref, value_ref) in keys
            .chunks_exact(self.object_ref_size)
            .zip(values.chunks_exact(self.object_ref_size))
        {
            let key = match self.decode_object(read_be_uint(key_ref), seen)? {
                Plist::String(s) => s,
                _ => return Err(CodecError::Unsupported("non-string dictionary key")),
            };
            let value = self.decode_object(read_be_uint(value_ref), seen)?;
            dict.insert(key, value);
        }
        Ok(Plist::Dict(dict))
    }
}

fn read_be_uint(bytes: &[u8]) -> u64 {
    let mut value = 0u64;
    for b in bytes {
        value = (value << 8) | u64::from(*b);
    }
    value
}
