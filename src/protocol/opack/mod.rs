//! OPACK codec: Apple's tagged self-describing binary serialization
//!
//! Values are typed by their first byte; encodings longer than one byte
//! are pooled so later identical values can be emitted as back-references.

pub mod decode;
pub mod encode;

#[cfg(test)]
mod tests;

pub use decode::unpack;
pub use encode::pack;

/// Sentinel byte closing a count-`0xF` container.
pub(crate) const TERMINATOR: u8 = 0x03;

/// An OPACK value.
///
/// Maps preserve insertion order: some peer validators are order-sensitive
/// on nested identity dictionaries. Integral floats stay floats; surface
/// dimensions must go on the wire as `0x36` even when the value is whole,
/// which is why `Float64` is a distinct variant rather than a lossy
/// conversion from `Int`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null (`0x04`)
    Null,
    /// Boolean (`0x01`/`0x02`)
    Bool(bool),
    /// Unsigned integer up to 64 bits
    Int(u64),
    /// 32-bit float (`0x35`)
    Float32(f32),
    /// 64-bit float (`0x36`)
    Float64(f64),
    /// UTF-8 string
    String(String),
    /// Byte string
    Bytes(Vec<u8>),
    /// 16-byte UUID literal (`0x05`)
    Uuid([u8; 16]),
    /// Array of values
    Array(Vec<Value>),
    /// Insertion-ordered map with string keys
    Dict(Vec<(String, Value)>),
}

impl Value {
    /// Try to get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as u64
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get as string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as byte slice
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Try to get as array slice
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Try to get as dictionary entries
    pub fn as_dict(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Look up a key in a dictionary value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(u64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

/// Convenience macro for building ordered OPACK dictionaries
#[macro_export]
macro_rules! opack_dict {
    ($($key:expr => $value:expr),* $(,)?) => {
        $crate::protocol::opack::Value::Dict(vec![
            $(($key.to_string(), $crate::protocol::opack::Value::from($value)),)*
        ])
    };
}
