//! # atv-companion
//!
//! A pure Rust client library for the Apple TV Companion protocol.
//!
//! ## Features
//!
//! - Device discovery via mDNS
//! - `HomeKit` pair-setup (PIN) over `AirPlay` HTTP or the Companion transport
//! - Pair-verify and an encrypted Companion session
//! - Remote-control buttons, media commands and text input
//!
//! ## Example
//!
//! ```rust,no_run
//! use atv_companion::{CompanionClient, ClientConfig, RemoteKey};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), atv_companion::CompanionError> {
//! // Discover devices
//! let devices = atv_companion::scan(Duration::from_secs(5)).await?;
//!
//! if let Some(device) = devices.first() {
//!     // Connect with previously stored credentials
//!     let client = CompanionClient::new(ClientConfig::default());
//!     let session = client.connect(device, "..credentials..").await?;
//!     session.press_key(RemoteKey::Menu).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
/// Error types
pub mod error;
/// Core types
pub mod types;

// Internal modules
pub mod client;
pub mod connection;
pub mod discovery;
pub mod protocol;
/// Credential storage
pub mod storage;

// Re-exports
pub use client::{AirPlayPairing, CompanionClient, CompanionPairing, CompanionSession};
pub use client::{FocusState, MediaCommand, RemoteKey};
pub use error::{CompanionError, TransportError};
pub use protocol::pairing::HapCredentials;
pub use types::{ClientConfig, DeviceRecord};

// Discovery functions
pub use discovery::scan;
