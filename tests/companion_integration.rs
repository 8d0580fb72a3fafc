//! Full-stack test against a mock Companion device on localhost:
//! pair-verify over the framed transport, session-key installation, the
//! encrypted post-connect sequence, and remote commands.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use atv_companion::protocol::crypto::{
    ChaCha20Poly1305Cipher, Ed25519KeyPair, Nonce, X25519KeyPair, derive_key, verify_signature,
};
use atv_companion::protocol::opack::{self, Value};
use atv_companion::protocol::pairing::{HapCredentials, TlvDecoder, TlvEncoder, TlvTag};
use atv_companion::protocol::plist::{self, Plist};
use atv_companion::{ClientConfig, CompanionClient, DeviceRecord, RemoteKey};

const DEVICE_ID: &[u8] = b"AA:BB:CC:DD:EE:FF";
const SESSION_UUID: [u8; 16] = [0x7E; 16];

async fn read_frame(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.ok()?;
    let len = BigEndian::read_u24(&header[1..]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.ok()?;
    Some((header[0], payload))
}

async fn write_frame(stream: &mut TcpStream, frame_type: u8, payload: &[u8]) {
    let mut header = [frame_type, 0, 0, 0];
    BigEndian::write_u24(&mut header[1..], payload.len() as u32);
    stream.write_all(&header).await.unwrap();
    stream.write_all(payload).await.unwrap();
}

/// Device-side frame encryption once verify completes.
struct DeviceChannel {
    stream: TcpStream,
    /// Decrypts client frames (client output direction).
    input: ChaCha20Poly1305Cipher,
    input_counter: u64,
    /// Encrypts device frames (client input direction).
    output: ChaCha20Poly1305Cipher,
    output_counter: u64,
}

impl DeviceChannel {
    async fn recv(&mut self) -> Option<(u8, Value)> {
        let (frame_type, payload) = read_frame(&mut self.stream).await?;
        let mut header = [frame_type, 0, 0, 0];
        BigEndian::write_u24(&mut header[1..], payload.len() as u32);

        let plaintext = self
            .input
            .open(&Nonce::from_counter(self.input_counter), &header, &payload)
            .expect("client frame must authenticate");
        self.input_counter += 1;
        Some((frame_type, opack::unpack(&plaintext).unwrap()))
    }

    async fn send(&mut self, frame_type: u8, message: &Value) {
        let plaintext = opack::pack(message);
        let mut header = [frame_type, 0, 0, 0];
        BigEndian::write_u24(&mut header[1..], (plaintext.len() + 16) as u32);

        let sealed = self
            .output
            .seal(&Nonce::from_counter(self.output_counter), &header, &plaintext)
            .unwrap();
        self.output_counter += 1;

        self.stream.write_all(&header).await.unwrap();
        self.stream.write_all(&sealed).await.unwrap();
    }
}

/// Archive the mock device hands out from `_tiStart`.
fn device_ti_archive(context: &str) -> Vec<u8> {
    let objects = vec![
        Plist::String("$null".into()),
        Plist::Dict(HashMap::from([
            ("sessionUUID".to_string(), Plist::Uid(2)),
            ("documentState".to_string(), Plist::Uid(3)),
        ])),
        Plist::Data(SESSION_UUID.to_vec()),
        Plist::Dict(HashMap::from([("docSt".to_string(), Plist::Uid(4))])),
        Plist::Dict(HashMap::from([(
            "contextBeforeInput".to_string(),
            Plist::Uid(5),
        )])),
        Plist::String(context.to_string()),
    ];
    plist::encode(&Plist::Dict(HashMap::from([
        ("$version".to_string(), Plist::Int(100_000)),
        ("$archiver".to_string(), Plist::from("RTIKeyedArchiver")),
        (
            "$top".to_string(),
            Plist::Dict(HashMap::from([("root".to_string(), Plist::Uid(1))])),
        ),
        ("$objects".to_string(), Plist::Array(objects)),
    ])))
    .unwrap()
}

fn tlv_payload(message: &Value) -> Vec<u8> {
    message
        .get("_pd")
        .and_then(Value::as_bytes)
        .expect("auth frame carries _pd")
        .to_vec()
}

fn auth_reply(tlv: Vec<u8>) -> Value {
    Value::Dict(vec![("_pd".to_string(), Value::Bytes(tlv))])
}

/// Serve pair-verify, then answer session requests until the client hangs
/// up. Returns the identifiers seen, in order.
async fn run_mock_device(
    listener: TcpListener,
    identity: Ed25519KeyPair,
    client_ltpk: Vec<u8>,
    log: Arc<Mutex<Vec<String>>>,
) {
    let (mut stream, _) = listener.accept().await.unwrap();

    // --- pair-verify ---

    let (frame_type, payload) = read_frame(&mut stream).await.unwrap();
    assert_eq!(frame_type, 5, "expected PV_Start");
    let m1 = TlvDecoder::decode(&tlv_payload(&opack::unpack(&payload).unwrap())).unwrap();
    assert_eq!(m1.seq_no().unwrap(), 1);
    let client_verify_pub = m1.get(TlvTag::PublicKey).unwrap().to_vec();

    let session = X25519KeyPair::generate();
    let shared = session.shared_secret(&client_verify_pub).unwrap();

    let verify_key = derive_key(
        b"Pair-Verify-Encrypt-Salt",
        &shared[..],
        b"Pair-Verify-Encrypt-Info",
    )
    .unwrap();
    let cipher = ChaCha20Poly1305Cipher::from_key(&verify_key);

    let mut sign_data = Vec::new();
    sign_data.extend_from_slice(&session.public_key());
    sign_data.extend_from_slice(DEVICE_ID);
    sign_data.extend_from_slice(&client_verify_pub);
    let signature = identity.sign(&sign_data);

    let inner = TlvEncoder::new()
        .add(TlvTag::Identifier, DEVICE_ID)
        .add(TlvTag::Signature, &signature)
        .build();
    let encrypted = cipher
        .seal(&Nonce::from_label(b"PV-Msg02"), &[], &inner)
        .unwrap();

    let m2 = TlvEncoder::new()
        .add_seq_no(2)
        .add(TlvTag::PublicKey, &session.public_key())
        .add(TlvTag::EncryptedData, &encrypted)
        .build();
    write_frame(&mut stream, 6, &opack::pack(&auth_reply(m2))).await;

    let (frame_type, payload) = read_frame(&mut stream).await.unwrap();
    assert_eq!(frame_type, 6, "expected PV_Next");
    let m3 = TlvDecoder::decode(&tlv_payload(&opack::unpack(&payload).unwrap())).unwrap();
    assert_eq!(m3.seq_no().unwrap(), 3);

    let decrypted = cipher
        .open(
            &Nonce::from_label(b"PV-Msg03"),
            &[],
            m3.get(TlvTag::EncryptedData).unwrap(),
        )
        .expect("client M3 must decrypt");
    let inner = TlvDecoder::decode(&decrypted).unwrap();
    let client_id = inner.get(TlvTag::Identifier).unwrap().to_vec();

    let mut device_info = Vec::new();
    device_info.extend_from_slice(&client_verify_pub);
    device_info.extend_from_slice(&client_id);
    device_info.extend_from_slice(&session.public_key());
    verify_signature(
        &client_ltpk,
        &device_info,
        inner.get(TlvTag::Signature).unwrap(),
    )
    .expect("client signature must verify");

    let m4 = TlvEncoder::new().add_seq_no(4).build();
    write_frame(&mut stream, 6, &opack::pack(&auth_reply(m4))).await;

    // --- encrypted session ---

    let client_key = derive_key(b"", &shared[..], b"ClientEncrypt-main").unwrap();
    let server_key = derive_key(b"", &shared[..], b"ServerEncrypt-main").unwrap();
    let mut channel = DeviceChannel {
        stream,
        input: ChaCha20Poly1305Cipher::from_key(&client_key),
        input_counter: 0,
        output: ChaCha20Poly1305Cipher::from_key(&server_key),
        output_counter: 0,
    };

    while let Some((_, message)) = channel.recv().await {
        let identifier = message
            .get("_i")
            .and_then(Value::as_str)
            .unwrap()
            .to_string();
        log.lock().unwrap().push(identifier.clone());

        // Only requests get responses.
        if message.get("_t").and_then(Value::as_u64) != Some(2) {
            continue;
        }
        let xid = message.get("_x").and_then(Value::as_u64).unwrap();

        let content = match identifier.as_str() {
            "_tiStart" => Value::Dict(vec![(
                "_tiD".to_string(),
                Value::Bytes(device_ti_archive("on screen")),
            )]),
            _ => Value::Dict(vec![]),
        };
        let response = Value::Dict(vec![
            ("_i".to_string(), Value::String(identifier)),
            ("_t".to_string(), Value::Int(3)),
            ("_c".to_string(), content),
            ("_x".to_string(), Value::Int(xid)),
        ]);
        channel.send(8, &response).await;
    }
}

#[tokio::test]
async fn test_connect_and_control_against_mock_device() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Fabricate the outcome of an earlier pair-setup.
    let client_identity = Ed25519KeyPair::generate();
    let device_identity = Ed25519KeyPair::generate();
    let credentials = HapCredentials {
        ltpk: device_identity.public_key().to_vec(),
        ltsk: client_identity.seed().to_vec(),
        atv_id: DEVICE_ID.to_vec(),
        client_id: b"11111111-2222-3333-4444-555555555555".to_vec(),
    };
    let credential_string = credentials.to_string();

    let log = Arc::new(Mutex::new(Vec::new()));
    let device = tokio::spawn(run_mock_device(
        listener,
        device_identity,
        client_identity.public_key().to_vec(),
        Arc::clone(&log),
    ));

    let record = DeviceRecord::new("127.0.0.1", port, 7000);
    let client = CompanionClient::new(
        ClientConfig::builder().device_name("integration test").build(),
    );

    let session = client.connect(&record, &credential_string).await.unwrap();
    assert!(session.is_connected());

    // The trailing _interest event is fire-and-forget; wait for the peer
    // to observe it.
    tokio::time::timeout(Duration::from_secs(2), async {
        while log.lock().unwrap().len() < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    // The post-connect sequence ran in strict order.
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "_systemInfo",
            "_touchStart",
            "_sessionStart",
            "_tiStart",
            "_interest"
        ]
    );

    // Remote key: down then up over the encrypted channel.
    session.press_key(RemoteKey::Menu).await.unwrap();
    {
        let log = log.lock().unwrap();
        let tail: Vec<String> = log[log.len() - 2..].to_vec();
        assert_eq!(tail, vec!["_hidC", "_hidC"]);
    }

    // Text input reads the archive the device serves.
    let text = session.get_text().await.unwrap();
    assert_eq!(text.as_deref(), Some("on screen"));

    let predicted = session.text_input_command("!", false).await.unwrap();
    assert_eq!(predicted.as_deref(), Some("on screen!"));

    session.disconnect().await;
    device.await.unwrap();
}

#[tokio::test]
async fn test_connect_rejects_malformed_credentials() {
    let client = CompanionClient::new(ClientConfig::default());
    let record = DeviceRecord::new("127.0.0.1", 1, 1);

    let result = client.connect(&record, "only:three:tokens").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_verify_fails_against_unknown_device() {
    // The device signs with a key the stored credentials do not match.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let client_identity = Ed25519KeyPair::generate();
    let real_device = Ed25519KeyPair::generate();
    let impostor = Ed25519KeyPair::generate();

    let credentials = HapCredentials {
        ltpk: real_device.public_key().to_vec(),
        ltsk: client_identity.seed().to_vec(),
        atv_id: DEVICE_ID.to_vec(),
        client_id: b"11111111-2222-3333-4444-555555555555".to_vec(),
    };

    let log = Arc::new(Mutex::new(Vec::new()));
    // The impostor signs the verify exchange; the client must abort at M2
    // before ever sending M3, so the mock side is expected to fail too.
    let device = tokio::spawn(run_mock_device(
        listener,
        impostor,
        client_identity.public_key().to_vec(),
        Arc::clone(&log),
    ));

    let record = DeviceRecord::new("127.0.0.1", port, 7000);
    let client = CompanionClient::new(ClientConfig::default());

    let result = client.connect(&record, &credentials.to_string()).await;
    assert!(result.is_err());
    assert!(log.lock().unwrap().is_empty());

    device.abort();
}
