use std::collections::HashMap;

use super::*;
use crate::protocol::plist::{self, Plist};

const SESSION_UUID: [u8; 16] = [
    0x10, 0x21, 0x32, 0x43, 0x54, 0x65, 0x76, 0x87, 0x98, 0xA9, 0xBA, 0xCB, 0xDC, 0xED, 0xFE, 0x0F,
];

/// Build a device-style session archive, the shape `_tiStart` returns.
fn device_archive(context: Option<Plist>, uuid: Plist) -> Vec<u8> {
    let mut doc_st = HashMap::new();
    if let Some(context) = context {
        doc_st.insert("contextBeforeInput".to_string(), context);
    }

    let objects = vec![
        Plist::String("$null".into()),
        // root
        Plist::Dict(HashMap::from([
            ("$class".to_string(), Plist::Uid(5)),
            ("sessionUUID".to_string(), Plist::Uid(2)),
            ("documentState".to_string(), Plist::Uid(3)),
        ])),
        uuid,
        Plist::Dict(HashMap::from([
            ("$class".to_string(), Plist::Uid(5)),
            ("docSt".to_string(), Plist::Uid(4)),
        ])),
        Plist::Dict(doc_st),
        Plist::Dict(HashMap::from([
            (
                "$classname".to_string(),
                Plist::from("RTIInputSystemSourceSession"),
            ),
            (
                "$classes".to_string(),
                Plist::Array(vec![
                    Plist::from("RTIInputSystemSourceSession"),
                    Plist::from("NSObject"),
                ]),
            ),
        ])),
    ];

    let archive = Plist::Dict(HashMap::from([
        ("$version".to_string(), Plist::Int(100_000)),
        ("$archiver".to_string(), Plist::from("RTIKeyedArchiver")),
        (
            "$top".to_string(),
            Plist::Dict(HashMap::from([("root".to_string(), Plist::Uid(1))])),
        ),
        ("$objects".to_string(), Plist::Array(objects)),
    ]));
    plist::encode(&archive).unwrap()
}

#[test]
fn test_parse_session_archive() {
    let data = device_archive(
        Some(Plist::Uid(0)),
        Plist::Data(SESSION_UUID.to_vec()),
    );
    // contextBeforeInput -> $null resolves to nothing, so context is
    // empty but parsing succeeds.
    let state = parse_session_archive(&data).unwrap();
    assert_eq!(state.session_uuid, SESSION_UUID);
    assert_eq!(state.context, "");

    let data = device_archive(
        Some(Plist::from("already typed")),
        Plist::Data(SESSION_UUID.to_vec()),
    );
    let state = parse_session_archive(&data).unwrap();
    assert_eq!(state.context, "already typed");
}

#[test]
fn test_parse_accepts_nsuuid_wrapper() {
    let wrapped = Plist::Dict(HashMap::from([(
        "NS.uuidbytes".to_string(),
        Plist::Data(SESSION_UUID.to_vec()),
    )]));
    let data = device_archive(Some(Plist::from("ctx")), wrapped);
    let state = parse_session_archive(&data).unwrap();
    assert_eq!(state.session_uuid, SESSION_UUID);
}

#[test]
fn test_parse_missing_context_path_is_lenient() {
    let data = device_archive(None, Plist::Data(SESSION_UUID.to_vec()));
    let state = parse_session_archive(&data).unwrap();
    assert_eq!(state.context, "");
}

#[test]
fn test_parse_requires_session_uuid() {
    // A 4-byte blob is not a UUID.
    let data = device_archive(None, Plist::Data(vec![1, 2, 3, 4]));
    assert!(parse_session_archive(&data).is_err());
}

#[test]
fn test_parse_rejects_non_archive() {
    assert!(parse_session_archive(&[0u8; 4]).is_err());

    let plain = plist::encode(&Plist::from("just a string")).unwrap();
    assert!(parse_session_archive(&plain).is_err());
}

#[test]
fn test_text_archive_shape() {
    let data = build_text_archive(&SESSION_UUID, "hello world").unwrap();
    let archive = KeyedArchive::parse(&data).unwrap();
    let root = archive.root().unwrap();

    let class = archive
        .walk(root, &["$class", "$classname"])
        .and_then(Plist::as_str);
    assert_eq!(class, Some("RTITextOperations"));

    let uuid = archive
        .walk(root, &["targetSessionUUID"])
        .and_then(Plist::as_bytes);
    assert_eq!(uuid, Some(&SESSION_UUID[..]));

    let text = archive
        .walk(root, &["keyboardOutput", "insertionText"])
        .and_then(Plist::as_str);
    assert_eq!(text, Some("hello world"));

    // Archiver header fields.
    let top = plist::decode(&data).unwrap();
    assert_eq!(
        top.as_dict().unwrap().get("$archiver").unwrap().as_str(),
        Some("RTIKeyedArchiver")
    );
    assert_eq!(
        top.as_dict().unwrap().get("$version").unwrap().as_i64(),
        Some(100_000)
    );
    assert_eq!(
        top.as_dict()
            .unwrap()
            .get("$objects")
            .unwrap()
            .as_array()
            .unwrap()[0]
            .as_str(),
        Some("$null")
    );
}

#[test]
fn test_clear_archive_shape() {
    let data = build_clear_archive(&SESSION_UUID).unwrap();
    let archive = KeyedArchive::parse(&data).unwrap();
    let root = archive.root().unwrap();

    let asserted = archive
        .walk(root, &["textToAssert"])
        .and_then(Plist::as_str);
    assert_eq!(asserted, Some(""));

    let uuid = archive
        .walk(root, &["targetSessionUUID"])
        .and_then(Plist::as_bytes);
    assert_eq!(uuid, Some(&SESSION_UUID[..]));
}

#[test]
fn test_uid_resolution_is_transitive() {
    // root -> UID(1) -> dict whose field is UID -> UID -> value.
    let objects = vec![
        Plist::String("$null".into()),
        Plist::Dict(HashMap::from([(
            "sessionUUID".to_string(),
            Plist::Uid(2),
        )])),
        // Chained UID hop.
        Plist::Uid(3),
        Plist::Data(SESSION_UUID.to_vec()),
    ];
    let archive = Plist::Dict(HashMap::from([
        ("$version".to_string(), Plist::Int(100_000)),
        ("$archiver".to_string(), Plist::from("RTIKeyedArchiver")),
        (
            "$top".to_string(),
            Plist::Dict(HashMap::from([("root".to_string(), Plist::Uid(1))])),
        ),
        ("$objects".to_string(), Plist::Array(objects)),
    ]));
    let data = plist::encode(&archive).unwrap();

    let state = parse_session_archive(&data).unwrap();
    assert_eq!(state.session_uuid, SESSION_UUID);
}
