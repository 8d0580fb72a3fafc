//! Remote Text Input archives
//!
//! The Companion text-input sub-protocol carries NSKeyedArchiver binary
//! plists inside `_tiD` fields. This module reads the session archive the
//! device sends with `_tiStart` and builds the operation archives we send
//! back with `_tiC` events.

#[cfg(test)]
mod tests;

use std::collections::HashMap;

use crate::protocol::CodecError;
use crate::protocol::plist::{self, Plist};

const ARCHIVER: &str = "RTIKeyedArchiver";
const VERSION: i64 = 100_000;

/// Session state extracted from a device-sent `_tiD` archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSessionState {
    /// The RTI session this keyboard belongs to.
    pub session_uuid: [u8; 16],
    /// Text currently in the field before the insertion point.
    pub context: String,
}

/// Parse a device archive into the session UUID and current text.
///
/// The text path `documentState.docSt.contextBeforeInput` is lenient: a
/// missing hop or a non-string leaf yields an empty string, since firmware
/// revisions move this around.
///
/// # Errors
///
/// Returns an error if the plist is malformed or carries no session UUID.
pub fn parse_session_archive(data: &[u8]) -> Result<TextSessionState, CodecError> {
    let archive = KeyedArchive::parse(data)?;
    let root = archive.root()?;

    let session_uuid = archive
        .walk(root, &["sessionUUID"])
        .and_then(uuid_bytes)
        .ok_or(CodecError::Unsupported("archive has no session UUID"))?;

    let context = archive
        .walk(root, &["documentState", "docSt", "contextBeforeInput"])
        .and_then(Plist::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(TextSessionState {
        session_uuid,
        context,
    })
}

/// Build the archive inserting `text` into the given session.
///
/// # Errors
///
/// Returns an error if plist encoding fails.
pub fn build_text_archive(session_uuid: &[u8; 16], text: &str) -> Result<Vec<u8>, CodecError> {
    let mut builder = ArchiveBuilder::new();

    let uuid = builder.push(Plist::Data(session_uuid.to_vec()));
    let text = builder.push(Plist::from(text));
    let output_class = builder.push_class("TIKeyboardOutput");
    let output = builder.push(Plist::Dict(HashMap::from([
        ("$class".to_string(), Plist::Uid(output_class)),
        ("insertionText".to_string(), Plist::Uid(text)),
    ])));
    let ops_class = builder.push_class("RTITextOperations");

    builder.set_root(Plist::Dict(HashMap::from([
        ("$class".to_string(), Plist::Uid(ops_class)),
        ("targetSessionUUID".to_string(), Plist::Uid(uuid)),
        ("keyboardOutput".to_string(), Plist::Uid(output)),
    ])));

    builder.encode()
}

/// Build the archive clearing all text in the given session.
///
/// Asserting an empty string replaces whatever the field holds.
///
/// # Errors
///
/// Returns an error if plist encoding fails.
pub fn build_clear_archive(session_uuid: &[u8; 16]) -> Result<Vec<u8>, CodecError> {
    let mut builder = ArchiveBuilder::new();

    let uuid = builder.push(Plist::Data(session_uuid.to_vec()));
    let empty = builder.push(Plist::from(""));
    let ops_class = builder.push_class("RTITextOperations");

    builder.set_root(Plist::Dict(HashMap::from([
        ("$class".to_string(), Plist::Uid(ops_class)),
        ("targetSessionUUID".to_string(), Plist::Uid(uuid)),
        ("textToAssert".to_string(), Plist::Uid(empty)),
    ])));

    builder.encode()
}

/// A parsed NSKeyedArchiver archive: the `$objects` table plus `$top`.
pub(crate) struct KeyedArchive {
    objects: Vec<Plist>,
    top: HashMap<String, Plist>,
}

impl KeyedArchive {
    pub(crate) fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let value = plist::decode(data)?;
        let dict = value
            .as_dict()
            .ok_or(CodecError::Unsupported("archive root is not a dictionary"))?;

        let objects = dict
            .get("$objects")
            .and_then(Plist::as_array)
            .ok_or(CodecError::Unsupported("archive has no $objects"))?
            .to_vec();
        let top = dict
            .get("$top")
            .and_then(Plist::as_dict)
            .ok_or(CodecError::Unsupported("archive has no $top"))?
            .clone();

        Ok(Self { objects, top })
    }

    /// The object `$top.root` points at.
    pub(crate) fn root(&self) -> Result<&Plist, CodecError> {
        let root = self
            .top
            .get("root")
            .ok_or(CodecError::Unsupported("archive has no root"))?;
        self.resolve(root)
            .ok_or(CodecError::Unsupported("dangling root UID"))
    }

    /// Replace a UID with the `$objects` entry it points at, transitively.
    /// The `$null` placeholder resolves to nothing, like a nil field.
    pub(crate) fn resolve<'a>(&'a self, mut value: &'a Plist) -> Option<&'a Plist> {
        let mut hops = 0;
        while let Plist::Uid(idx) = value {
            value = self.objects.get(usize::try_from(*idx).ok()?)?;
            hops += 1;
            if hops > self.objects.len() {
                return None;
            }
        }
        match value {
            Plist::String(s) if s == "$null" => None,
            _ => Some(value),
        }
    }

    /// Follow dictionary keys from `start`, resolving UIDs at every hop.
    pub(crate) fn walk<'a>(&'a self, start: &'a Plist, path: &[&str]) -> Option<&'a Plist> {
        let mut current = self.resolve(start)?;
        for key in path {
            let next = current.as_dict()?.get(*key)?;
            current = self.resolve(next)?;
        }
        Some(current)
    }
}

/// Accept either raw 16-byte data or an `NSUUID`-style wrapper.
fn uuid_bytes(value: &Plist) -> Option<[u8; 16]> {
    let bytes = match value {
        Plist::Data(d) => d.as_slice(),
        Plist::Dict(d) => d.get("NS.uuidbytes")?.as_bytes()?,
        _ => return None,
    };
    bytes.try_into().ok()
}

/// Builds the `$objects` table for an outgoing archive.
///
/// Index 0 is always the `$null` placeholder and index 1 the root object.
struct ArchiveBuilder {
    objects: Vec<Plist>,
}

impl ArchiveBuilder {
    fn new() -> Self {
        Self {
            objects: vec![
                Plist::String("$null".into()),
                // Root placeholder, filled by set_root.
                Plist::String(String::new()),
            ],
        }
    }

    fn push(&mut self, object: Plist) -> u64 {
        self.objects.push(object);
        (self.objects.len() - 1) as u64
    }

    fn push_class(&mut self, name: &str) -> u64 {
        self.push(Plist::Dict(HashMap::from([
            ("$classname".to_string(), Plist::from(name)),
            (
                "$classes".to_string(),
                Plist::Array(vec![Plist::from(name), Plist::from("NSObject")]),
            ),
        ])))
    }

    fn set_root(&mut self, object: Plist) {
        self.objects[1] = object;
    }

    fn encode(self) -> Result<Vec<u8>, CodecError> {
        let archive = Plist::Dict(HashMap::from([
            ("$version".to_string(), Plist::Int(VERSION)),
            ("$archiver".to_string(), Plist::from(ARCHIVER)),
            (
                "$top".to_string(),
                Plist::Dict(HashMap::from([("root".to_string(), Plist::Uid(1))])),
            ),
            ("$objects".to_string(), Plist::Array(self.objects)),
        ]));
        plist::encode(&archive)
    }
}
