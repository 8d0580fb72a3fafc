//! HAP pair-setup over the device's `AirPlay` HTTP endpoint
//!
//! The `AirPlay` service accepts the same TLV exchange as the Companion
//! transport, carried in `POST /pair-setup` bodies on a keep-alive
//! HTTP/1.1 connection. `POST /pair-pin-start` makes the device show its
//! PIN.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{CompanionError, TransportError};
use crate::protocol::pairing::{HapCredentials, PairSetup};
use crate::types::{ClientConfig, DeviceRecord};

const USER_AGENT: &str = "AirPlay/320.20";
const MAX_HEADER_BYTES: usize = 4096;

/// An in-progress PIN pairing over `AirPlay` HTTP.
///
/// [`AirPlayPairing::start`] makes the device display its PIN;
/// [`AirPlayPairing::finish`] runs the SRP exchange with it.
pub struct AirPlayPairing {
    stream: TcpStream,
    setup: PairSetup,
}

impl AirPlayPairing {
    /// Connect to the device's `AirPlay` port and trigger PIN display.
    ///
    /// # Errors
    ///
    /// Returns error if the connection or the pin-start request fails.
    pub async fn start(
        device: &DeviceRecord,
        config: &ClientConfig,
    ) -> Result<Self, CompanionError> {
        let connect = TcpStream::connect((device.address.as_str(), device.airplay_port));
        let stream = tokio::time::timeout(config.connect_timeout, connect)
            .await
            .map_err(|_| CompanionError::timeout("AirPlay connection"))?
            .map_err(TransportError::from)?;

        let mut pairing = Self {
            stream,
            setup: PairSetup::new(&config.device_name),
        };
        pairing.post("/pair-pin-start", &[]).await?;
        Ok(pairing)
    }

    /// Run the SRP exchange with the PIN now shown on screen.
    ///
    /// # Errors
    ///
    /// Returns error on a wrong PIN, a peer-reported pairing error, or an
    /// HTTP failure.
    pub async fn finish(mut self, pin: &str) -> Result<HapCredentials, CompanionError> {
        let m1 = self.setup.m1()?;
        let m2 = self.post("/pair-setup", &m1).await?;
        let m3 = self.setup.process_m2(pin, &m2)?;
        let m4 = self.post("/pair-setup", &m3).await?;
        let m5 = self.setup.process_m4(&m4)?;
        let m6 = self.post("/pair-setup", &m5).await?;
        Ok(self.setup.process_m6(&m6)?)
    }

    /// One keep-alive POST; returns the response body.
    async fn post(&mut self, path: &str, body: &[u8]) -> Result<Vec<u8>, CompanionError> {
        let request = format!(
            "POST {path} HTTP/1.1\r\n\
             User-Agent: {USER_AGENT}\r\n\
             Connection: keep-alive\r\n\
             X-Apple-HKP: 3\r\n\
             Content-Type: application/octet-stream\r\n\
             Content-Length: {}\r\n\
             \r\n",
            body.len()
        );

        self.stream
            .write_all(request.as_bytes())
            .await
            .map_err(TransportError::from)?;
        self.stream
            .write_all(body)
            .await
            .map_err(TransportError::from)?;
        self.stream.flush().await.map_err(TransportError::from)?;

        self.read_response().await
    }

    async fn read_response(&mut self) -> Result<Vec<u8>, CompanionError> {
        // Accumulate until the blank line; whatever follows is body.
        let mut buf = Vec::new();
        let header_end = loop {
            if let Some(pos) = find_header_end(&buf) {
                break pos;
            }
            if buf.len() > MAX_HEADER_BYTES {
                return Err(CompanionError::Protocol("oversized HTTP headers".into()));
            }

            let mut chunk = [0u8; 512];
            let n = self
                .stream
                .read(&mut chunk)
                .await
                .map_err(TransportError::from)?;
            if n == 0 {
                return Err(TransportError::Closed.into());
            }
            buf.extend_from_slice(&chunk[..n]);
        };

        let headers = std::str::from_utf8(&buf[..header_end])
            .map_err(|_| CompanionError::Protocol("non-UTF-8 HTTP headers".into()))?;

        let status = headers
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| CompanionError::Protocol("malformed HTTP status line".into()))?;
        if status != 200 {
            return Err(CompanionError::Protocol(format!(
                "pairing endpoint returned HTTP {status}"
            )));
        }

        let content_length = headers
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())?
            })
            .unwrap_or(0);

        let mut body = buf[header_end + 4..].to_vec();
        if body.len() < content_length {
            let missing = content_length - body.len();
            let mut rest = vec![0u8; missing];
            self.stream
                .read_exact(&mut rest)
                .await
                .map_err(TransportError::from)?;
            body.extend_from_slice(&rest);
        }
        body.truncate(content_length);

        Ok(body)
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn serve_one(
        listener: TcpListener,
        status: &'static str,
        body: Vec<u8>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            // Read until the request body has fully arrived.
            loop {
                let mut chunk = [0u8; 512];
                let n = stream.read(&mut chunk).await.unwrap();
                request.extend_from_slice(&chunk[..n]);
                if let Some(pos) = find_header_end(&request) {
                    let headers = String::from_utf8_lossy(&request[..pos]).to_string();
                    let content_length = headers
                        .lines()
                        .find_map(|l| l.strip_prefix("Content-Length: "))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= pos + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\n\r\n",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.write_all(&body).await.unwrap();

            // Keep the connection open briefly so keep-alive reads work.
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        })
    }

    #[tokio::test]
    async fn test_post_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = serve_one(listener, "200 OK", vec![0x06, 0x01, 0x02]);

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut pairing = AirPlayPairing {
            stream,
            setup: PairSetup::new("test"),
        };

        let body = pairing.post("/pair-setup", &[0x06, 0x01, 0x01]).await.unwrap();
        assert_eq!(body, vec![0x06, 0x01, 0x02]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_non_200_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = serve_one(listener, "470 Connection Authorization Required", vec![]);

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut pairing = AirPlayPairing {
            stream,
            setup: PairSetup::new("test"),
        };

        let result = pairing.post("/pair-pin-start", &[]).await;
        assert!(matches!(result, Err(CompanionError::Protocol(_))));
        server.await.unwrap();
    }
}
