//! TCP connection with Companion frame framing and session encryption
//!
//! Header is 4 bytes: type, then a 24-bit big-endian payload length. Once
//! pair-verify installs keys, payloads are sealed with ChaCha20-Poly1305
//! using per-direction frame counters and the header as associated data.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{Frame, FrameType};
use crate::error::TransportError;
use crate::protocol::crypto::{ChaCha20Poly1305Cipher, Nonce, lengths};
use crate::protocol::pairing::SessionKeys;

const HEADER_LEN: usize = 4;
const MAX_PAYLOAD: usize = 0xFF_FFFF;

/// Receives every decrypted frame from a connection's read task.
#[async_trait]
pub trait FrameListener: Send + Sync {
    /// A complete frame arrived.
    async fn on_frame(&self, frame: Frame);
    /// The connection closed; no further frames will arrive.
    async fn on_close(&self);
}

/// Listener that discards everything; installed while a connection sits in
/// the idle cache so stale events cannot surface.
pub struct NullListener;

#[async_trait]
impl FrameListener for NullListener {
    async fn on_frame(&self, _frame: Frame) {}
    async fn on_close(&self) {}
}

/// One AEAD direction: cipher plus frame counter.
struct DirectionCipher {
    cipher: ChaCha20Poly1305Cipher,
    counter: u64,
}

impl DirectionCipher {
    fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305Cipher::from_key(key),
            counter: 0,
        }
    }

    fn seal(&mut self, aad: &[u8], plaintext: &[u8]) -> Option<Vec<u8>> {
        let sealed = self
            .cipher
            .seal(&Nonce::from_counter(self.counter), aad, plaintext)
            .ok()?;
        self.counter += 1;
        Some(sealed)
    }

    fn open(&mut self, aad: &[u8], ciphertext: &[u8]) -> Option<Vec<u8>> {
        let opened = self
            .cipher
            .open(&Nonce::from_counter(self.counter), aad, ciphertext)
            .ok()?;
        self.counter += 1;
        Some(opened)
    }
}

struct Inner {
    writer: Mutex<Option<OwnedWriteHalf>>,
    send: Mutex<Option<DirectionCipher>>,
    recv: Mutex<Option<DirectionCipher>>,
    listener: Mutex<Arc<dyn FrameListener>>,
    connected: AtomicBool,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

/// A framed Companion connection. Cheap to clone; the socket has exactly
/// one owner shared by the clones.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Connect to a Companion endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if the TCP connection fails.
    pub async fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an established stream (used by tests with a local listener).
    #[must_use]
    pub fn from_stream(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();

        let inner = Arc::new(Inner {
            writer: Mutex::new(Some(writer)),
            send: Mutex::new(None),
            recv: Mutex::new(None),
            listener: Mutex::new(Arc::new(NullListener) as Arc<dyn FrameListener>),
            connected: AtomicBool::new(true),
            read_task: Mutex::new(None),
        });

        let task = tokio::spawn(read_loop(Arc::clone(&inner), reader));
        // The task slot is only contended here, right after spawn.
        if let Ok(mut slot) = inner.read_task.try_lock() {
            *slot = Some(task);
        }

        Self { inner }
    }

    /// Replace the frame listener.
    pub async fn set_listener(&self, listener: Arc<dyn FrameListener>) {
        *self.inner.listener.lock().await = listener;
    }

    /// Install the session keys; every subsequent frame is encrypted.
    pub async fn enable_encryption(&self, keys: &SessionKeys) {
        *self.inner.send.lock().await = Some(DirectionCipher::new(&keys.output_key));
        *self.inner.recv.lock().await = Some(DirectionCipher::new(&keys.input_key));
    }

    /// Whether the socket is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Send one frame: header and (possibly sealed) payload in one write.
    ///
    /// # Errors
    ///
    /// Returns error if not connected, the payload is too large, or the
    /// socket write fails.
    pub async fn send_frame(
        &self,
        frame_type: FrameType,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mut writer_guard = self.inner.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(TransportError::NotConnected)?;

        let mut send = self.inner.send.lock().await;
        let cipher = send.as_mut().filter(|_| !payload.is_empty());
        let encrypted = cipher.is_some();

        let wire_len = if encrypted {
            payload.len() + lengths::CHACHA_TAG
        } else {
            payload.len()
        };
        if wire_len > MAX_PAYLOAD {
            return Err(TransportError::PayloadTooLarge(payload.len()));
        }

        let mut header = [frame_type as u8, 0, 0, 0];
        #[allow(clippy::cast_possible_truncation)]
        BigEndian::write_u24(&mut header[1..], wire_len as u32);

        let mut buf = Vec::with_capacity(HEADER_LEN + wire_len);
        buf.extend_from_slice(&header);
        match cipher {
            Some(cipher) => {
                let sealed = cipher
                    .seal(&header, payload)
                    .ok_or(TransportError::PayloadTooLarge(payload.len()))?;
                buf.extend_from_slice(&sealed);
            }
            None => buf.extend_from_slice(payload),
        }
        drop(send);

        tracing::debug!(
            frame_type = ?frame_type,
            len = payload.len(),
            encrypted,
            "sending frame"
        );
        writer.write_all(&buf).await?;
        Ok(())
    }

    /// Close the connection and stop the read task.
    pub async fn close(&self) {
        self.inner.connected.store(false, Ordering::Release);
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(task) = self.inner.read_task.lock().await.take() {
            task.abort();
        }
    }
}

async fn read_loop(inner: Arc<Inner>, mut reader: OwnedReadHalf) {
    let mut buf = BytesMut::with_capacity(8192);

    'io: loop {
        // Peel every complete frame from the buffer.
        while buf.len() >= HEADER_LEN {
            let wire_len = BigEndian::read_u24(&buf[1..HEADER_LEN]) as usize;
            if buf.len() < HEADER_LEN + wire_len {
                break;
            }

            let mut header = [0u8; HEADER_LEN];
            header.copy_from_slice(&buf[..HEADER_LEN]);
            buf.advance(HEADER_LEN);
            let payload = buf.split_to(wire_len).to_vec();

            handle_frame(&inner, header, payload).await;
        }

        match reader.read_buf(&mut buf).await {
            Ok(0) => break 'io,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "read failed, closing connection");
                break 'io;
            }
        }
    }

    inner.connected.store(false, Ordering::Release);
    *inner.writer.lock().await = None;
    let listener = Arc::clone(&*inner.listener.lock().await);
    listener.on_close().await;
}

async fn handle_frame(inner: &Arc<Inner>, header: [u8; HEADER_LEN], payload: Vec<u8>) {
    let plaintext = if payload.is_empty() {
        payload
    } else {
        let mut recv = inner.recv.lock().await;
        match recv.as_mut() {
            Some(cipher) => match cipher.open(&header, &payload) {
                Some(plaintext) => plaintext,
                None => {
                    // Frames from before key installation may still be in
                    // flight; drop them and keep the connection up.
                    tracing::debug!(frame_type = header[0], "dropping undecryptable frame");
                    return;
                }
            },
            None => payload,
        }
    };

    let Some(frame_type) = FrameType::from_byte(header[0]) else {
        tracing::debug!(frame_type = header[0], "dropping frame of unknown type");
        return;
    };

    tracing::debug!(?frame_type, len = plaintext.len(), "received frame");
    let listener = Arc::clone(&*inner.listener.lock().await);
    listener
        .on_frame(Frame {
            frame_type,
            payload: plaintext,
        })
        .await;
}
