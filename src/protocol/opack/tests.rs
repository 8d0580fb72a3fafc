use super::*;
use crate::opack_dict;
use crate::protocol::CodecError;
use proptest::prelude::*;

fn roundtrip(value: &Value) -> Value {
    unpack(&pack(value)).unwrap()
}

// --- integers ---

#[test]
fn test_small_int_encoding() {
    assert_eq!(pack(&Value::Int(7)), vec![0x0F]);
    assert_eq!(pack(&Value::Int(0)), vec![0x08]);
    assert_eq!(pack(&Value::Int(40)), vec![0x30, 0x28]);
}

#[test]
fn test_int_width_boundaries() {
    let cases: &[(u64, Vec<u8>)] = &[
        (0x27, vec![0x2F]),
        (0x28, vec![0x30, 0x28]),
        (0xFF, vec![0x30, 0xFF]),
        (0x100, vec![0x31, 0x00, 0x01]),
        (0xFFFF, vec![0x31, 0xFF, 0xFF]),
        (0x10000, vec![0x32, 0x00, 0x00, 0x01, 0x00]),
        (0xFFFF_FFFF, vec![0x32, 0xFF, 0xFF, 0xFF, 0xFF]),
        (
            0x1_0000_0000,
            vec![0x33, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00],
        ),
    ];

    for (n, expected) in cases {
        let value = Value::Int(*n);
        assert_eq!(&pack(&value), expected, "encoding of {n:#x}");
        assert_eq!(roundtrip(&value), value, "roundtrip of {n:#x}");
    }
}

#[test]
fn test_absolute_time_decodes_as_int() {
    let data = [0x06, 0x2A, 0, 0, 0, 0, 0, 0, 0];
    assert_eq!(unpack(&data).unwrap(), Value::Int(42));
}

// --- primitives ---

#[test]
fn test_singletons() {
    assert_eq!(pack(&Value::Bool(true)), vec![0x01]);
    assert_eq!(pack(&Value::Bool(false)), vec![0x02]);
    assert_eq!(pack(&Value::Null), vec![0x04]);
    assert_eq!(unpack(&[0x01]).unwrap(), Value::Bool(true));
    assert_eq!(unpack(&[0x02]).unwrap(), Value::Bool(false));
    assert_eq!(unpack(&[0x04]).unwrap(), Value::Null);
}

#[test]
fn test_uuid_roundtrip() {
    let uuid = [0xAB; 16];
    let packed = pack(&Value::Uuid(uuid));
    assert_eq!(packed[0], 0x05);
    assert_eq!(packed.len(), 17);
    assert_eq!(roundtrip(&Value::Uuid(uuid)), Value::Uuid(uuid));
}

#[test]
fn test_floats_keep_their_width() {
    // Integral float64 values must stay 0x36 on the wire.
    let forced = Value::Float64(1000.0);
    let packed = pack(&forced);
    assert_eq!(packed[0], 0x36);
    assert_eq!(packed.len(), 9);
    assert_eq!(roundtrip(&forced), forced);

    let single = Value::Float32(1.5);
    let packed = pack(&single);
    assert_eq!(packed[0], 0x35);
    assert_eq!(packed.len(), 5);
    assert_eq!(roundtrip(&single), single);
}

#[test]
fn test_string_encodings() {
    let short = Value::String("abc".into());
    assert_eq!(pack(&short), vec![0x43, b'a', b'b', b'c']);

    // 32 bytes is the last inline form, 33 takes a length byte.
    let inline = Value::String("x".repeat(32));
    assert_eq!(pack(&inline)[0], 0x60);
    let sized = Value::String("x".repeat(33));
    assert_eq!(&pack(&sized)[..2], &[0x61, 33]);

    for len in [0usize, 1, 32, 33, 255, 256] {
        let value = Value::String("y".repeat(len));
        assert_eq!(roundtrip(&value), value, "string of length {len}");
    }
}

#[test]
fn test_byte_string_encodings() {
    let short = Value::Bytes(vec![0xEE; 3]);
    assert_eq!(pack(&short), vec![0x73, 0xEE, 0xEE, 0xEE]);

    let sized = Value::Bytes(vec![0xEE; 300]);
    assert_eq!(&pack(&sized)[..3], &[0x92, 0x2C, 0x01]);

    for len in [0usize, 32, 33, 255, 256] {
        let value = Value::Bytes(vec![0x55; len]);
        assert_eq!(roundtrip(&value), value, "bytes of length {len}");
    }
}

// --- containers ---

#[test]
fn test_container_count_boundaries() {
    for count in [14usize, 15, 16] {
        let array = Value::Array((0..count).map(|i| Value::Int(i as u64)).collect());
        let packed = pack(&array);
        if count < 15 {
            assert_eq!(packed[0], 0xD0 + count as u8);
            assert_ne!(*packed.last().unwrap(), 0x03);
        } else {
            assert_eq!(packed[0], 0xDF);
            assert_eq!(*packed.last().unwrap(), 0x03);
        }
        assert_eq!(roundtrip(&array), array);

        let dict = Value::Dict(
            (0..count)
                .map(|i| (format!("key{i:02}"), Value::Int(i as u64)))
                .collect(),
        );
        let packed = pack(&dict);
        if count < 15 {
            assert_eq!(packed[0], 0xE0 + count as u8);
        } else {
            assert_eq!(packed[0], 0xEF);
            assert_eq!(*packed.last().unwrap(), 0x03);
        }
        assert_eq!(roundtrip(&dict), dict);
    }
}

#[test]
fn test_empty_containers_are_single_byte() {
    assert_eq!(pack(&Value::Array(vec![])), vec![0xD0]);
    assert_eq!(pack(&Value::Dict(vec![])), vec![0xE0]);
}

#[test]
fn test_dict_preserves_insertion_order() {
    let dict = opack_dict! {
        "zeta" => 1u64,
        "alpha" => 2u64,
        "mid" => 3u64,
    };
    let decoded = roundtrip(&dict);
    let keys: Vec<&str> = decoded
        .as_dict()
        .unwrap()
        .iter()
        .map(|(k, _)| k.as_str())
        .collect();
    assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
}

// --- back-references ---

#[test]
fn test_backref_second_string_occurrence() {
    let value = Value::Array(vec![
        Value::String("abc".into()),
        Value::String("abc".into()),
    ]);
    // Index 0 is the array header, which is not pooled; "abc" is index 1.
    assert_eq!(pack(&value), vec![0xD2, 0x43, b'a', b'b', b'c', 0xA1]);
    assert_eq!(roundtrip(&value), value);
}

#[test]
fn test_backref_idempotent_across_nesting() {
    let inner = Value::Array(vec![Value::String("ab".into())]);
    let value = Value::Array(vec![inner.clone(), inner.clone(), inner.clone()]);
    let decoded = roundtrip(&value);
    assert_eq!(decoded, value);

    // The repeated string must be emitted exactly once.
    let packed = pack(&value);
    let literal = [0x42, b'a', b'b'];
    let occurrences = packed
        .windows(literal.len())
        .filter(|w| *w == literal)
        .count();
    assert_eq!(occurrences, 1);
}

#[test]
fn test_trivial_encodings_never_referenced() {
    let value = Value::Array(vec![
        Value::Int(7),
        Value::Int(7),
        Value::Bool(true),
        Value::Bool(true),
        Value::Null,
        Value::Null,
    ]);
    assert_eq!(
        pack(&value),
        vec![0xD6, 0x0F, 0x0F, 0x01, 0x01, 0x04, 0x04]
    );
    assert_eq!(roundtrip(&value), value);
}

#[test]
fn test_repeated_dict_keys_are_shared() {
    let value = Value::Array(vec![
        opack_dict! { "_i" => "first" },
        opack_dict! { "_i" => "second" },
    ]);
    let packed = pack(&value);
    let key_literal = [0x42, b'_', b'i'];
    let occurrences = packed
        .windows(key_literal.len())
        .filter(|w| *w == key_literal)
        .count();
    assert_eq!(occurrences, 1);
    assert_eq!(roundtrip(&value), value);
}

#[test]
fn test_bad_backref_rejected() {
    // Back-reference into an empty pool.
    assert_eq!(unpack(&[0xA5]), Err(CodecError::BadBackref(5)));
    // Self-referencing container: index 0 is the array itself, still
    // incomplete when the reference appears.
    assert_eq!(unpack(&[0xD1, 0xA0]), Err(CodecError::BadBackref(0)));
}

#[test]
fn test_wide_backref_decodes() {
    // 0xC1 with a one-byte index resolves the same as the inline form.
    let data = [0xD2, 0x43, b'a', b'b', b'c', 0xC1, 0x01];
    let decoded = unpack(&data).unwrap();
    assert_eq!(
        decoded,
        Value::Array(vec![
            Value::String("abc".into()),
            Value::String("abc".into()),
        ])
    );
}

// --- malformed input ---

#[test]
fn test_truncated_inputs() {
    assert_eq!(unpack(&[]), Err(CodecError::Truncated));
    assert_eq!(unpack(&[0x30]), Err(CodecError::Truncated));
    assert_eq!(unpack(&[0x43, b'a']), Err(CodecError::Truncated));
    assert_eq!(unpack(&[0x92, 0xFF, 0xFF, 0x00]), Err(CodecError::Truncated));
    // Sentinel-terminated array missing its terminator.
    assert_eq!(unpack(&[0xDF, 0x08]), Err(CodecError::Truncated));
}

#[test]
fn test_unknown_tag_rejected() {
    assert_eq!(unpack(&[0x07]), Err(CodecError::UnknownTag(0x07)));
    assert_eq!(unpack(&[0x34]), Err(CodecError::UnknownTag(0x34)));
    assert_eq!(unpack(&[0xFF]), Err(CodecError::UnknownTag(0xFF)));
}

#[test]
fn test_non_string_map_key_rejected() {
    // Map with an integer key.
    let data = [0xE1, 0x08, 0x08];
    assert_eq!(
        unpack(&data),
        Err(CodecError::Unsupported("non-string map key"))
    );
}

// --- message-shaped payloads ---

#[test]
fn test_message_roundtrip() {
    let message = opack_dict! {
        "_i" => "_systemInfo",
        "_t" => 2u64,
        "_c" => opack_dict! {
            "_idsID" => vec![0x11u8, 0x22, 0x33],
            "name" => "living room",
            "_width" => Value::Float64(1000.0),
        },
        "_x" => 0x1234u64,
    };
    assert_eq!(roundtrip(&message), message);
}

// --- property tests ---

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<u64>().prop_map(Value::Int),
        any::<f64>()
            .prop_filter("NaN breaks structural equality", |f| !f.is_nan())
            .prop_map(Value::Float64),
        "[a-z]{0,40}".prop_map(Value::String),
        proptest::collection::vec(any::<u8>(), 0..64).prop_map(Value::Bytes),
        any::<[u8; 16]>().prop_map(Value::Uuid),
    ];
    leaf.prop_recursive(3, 48, 8, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
            proptest::collection::vec(("[a-z]{1,8}", inner), 0..8)
                .prop_map(|entries| Value::Dict(entries)),
        ]
    })
}

proptest! {
    #[test]
    fn prop_pack_unpack_roundtrip(value in arb_value()) {
        prop_assert_eq!(unpack(&pack(&value)).unwrap(), value);
    }
}
