use std::collections::HashMap;

/// A Companion-capable device on the local network.
///
/// Usually produced by [`crate::discovery::scan`], but any source works:
/// the client only needs the host and the two service ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Human-readable device name (e.g. "Living Room")
    pub name: String,

    /// Host address (IP literal or resolvable name)
    pub address: String,

    /// Companion service port
    pub companion_port: u16,

    /// `AirPlay` service port, used for HTTP pair-setup
    pub airplay_port: u16,

    /// Unique device identifier from discovery
    pub identifier: String,

    /// Device model identifier (e.g. "AppleTV11,1")
    pub model: Option<String>,

    /// Raw TXT record data
    pub properties: HashMap<String, String>,
}

impl DeviceRecord {
    /// Build a record from the bare essentials.
    #[must_use]
    pub fn new(address: impl Into<String>, companion_port: u16, airplay_port: u16) -> Self {
        let address = address.into();
        Self {
            name: address.clone(),
            identifier: address.clone(),
            address,
            companion_port,
            airplay_port,
            model: None,
            properties: HashMap::new(),
        }
    }
}
