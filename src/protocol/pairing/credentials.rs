//! Durable pairing credentials

use std::fmt;
use std::str::FromStr;

use super::PairingError;

/// The durable output of pair-setup.
///
/// Serialized as four hex tokens joined by `:`; the round-trip through the
/// string form is exact. Produced by pair-setup, consumed by pair-verify,
/// never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HapCredentials {
    /// Device's long-term Ed25519 public key (32 bytes).
    pub ltpk: Vec<u8>,
    /// Our long-term Ed25519 private seed (32 bytes).
    pub ltsk: Vec<u8>,
    /// Device identifier as sent during setup.
    pub atv_id: Vec<u8>,
    /// Our identifier: a UUID in canonical text form, as bytes.
    pub client_id: Vec<u8>,
}

impl fmt::Display for HapCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            hex_encode(&self.ltpk),
            hex_encode(&self.ltsk),
            hex_encode(&self.atv_id),
            hex_encode(&self.client_id)
        )
    }
}

impl FromStr for HapCredentials {
    type Err = PairingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split(':').collect();
        let [ltpk, ltsk, atv_id, client_id] = tokens.as_slice() else {
            return Err(PairingError::InvalidCredentials);
        };

        Ok(Self {
            ltpk: hex_decode(ltpk)?,
            ltsk: hex_decode(ltsk)?,
            atv_id: hex_decode(atv_id)?,
            client_id: hex_decode(client_id)?,
        })
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Result<Vec<u8>, PairingError> {
    if s.len() % 2 != 0 || s.is_empty() {
        return Err(PairingError::InvalidCredentials);
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(s.get(i..i + 2).ok_or(PairingError::InvalidCredentials)?, 16)
                .map_err(|_| PairingError::InvalidCredentials)
        })
        .collect()
}

/// Generate a fresh client identifier: a random version-4 UUID in canonical
/// uppercase text form.
pub(crate) fn generate_client_id() -> Vec<u8> {
    use rand::RngCore;

    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes[6] = (bytes[6] & 0x0F) | 0x40;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;

    let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02X}")).collect();
    let hex = hex.concat();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_string_roundtrip() {
        let credentials = HapCredentials {
            ltpk: vec![0xAA; 32],
            ltsk: vec![0x01; 32],
            atv_id: b"4D6F636B-ATV".to_vec(),
            client_id: generate_client_id(),
        };

        let text = credentials.to_string();
        let parsed: HapCredentials = text.parse().unwrap();
        assert_eq!(parsed, credentials);
    }

    #[test]
    fn test_credentials_rejects_wrong_token_count() {
        assert!("aa:bb:cc".parse::<HapCredentials>().is_err());
        assert!("aa:bb:cc:dd:ee".parse::<HapCredentials>().is_err());
        assert!("".parse::<HapCredentials>().is_err());
    }

    #[test]
    fn test_credentials_rejects_bad_hex() {
        assert!("zz:bb:cc:dd".parse::<HapCredentials>().is_err());
        assert!("abc:ab:ab:ab".parse::<HapCredentials>().is_err());
    }

    #[test]
    fn test_client_id_is_canonical_uuid() {
        let id = generate_client_id();
        assert_eq!(id.len(), 36);
        let text = String::from_utf8(id).unwrap();
        let groups: Vec<&str> = text.split('-').collect();
        let lengths: Vec<usize> = groups.iter().map(|g| g.len()).collect();
        assert_eq!(lengths, vec![8, 4, 4, 4, 12]);
        assert!(text.chars().all(|c| c == '-' || c.is_ascii_hexdigit()));
        // Version nibble is 4.
        assert_eq!(&text[14..15], "4");
    }
}
