//! Core types

mod config;
mod device;

pub use config::{ClientConfig, ClientConfigBuilder};
pub use device::DeviceRecord;
