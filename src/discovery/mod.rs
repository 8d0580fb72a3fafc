//! mDNS discovery of Companion-capable devices
//!
//! Browses the Companion and `AirPlay` services and merges the results by
//! host, so one record carries both ports. The rest of the crate does not
//! depend on this module; any [`DeviceRecord`] works.

use std::collections::HashMap;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent};

use crate::error::CompanionError;
use crate::types::DeviceRecord;

/// Companion service type
pub const COMPANION_SERVICE: &str = "_companion-link._tcp.local.";
/// `AirPlay` service type
pub const AIRPLAY_SERVICE: &str = "_airplay._tcp.local.";

/// Default `AirPlay` port when the service was not advertised.
const FALLBACK_AIRPLAY_PORT: u16 = 7000;

#[derive(Default)]
struct Candidate {
    name: Option<String>,
    companion_port: Option<u16>,
    airplay_port: Option<u16>,
    model: Option<String>,
    identifier: Option<String>,
    properties: HashMap<String, String>,
}

/// Scan the local network for the given duration.
///
/// # Errors
///
/// Returns error if the mDNS daemon cannot be started.
pub async fn scan(timeout: Duration) -> Result<Vec<DeviceRecord>, CompanionError> {
    let mdns = ServiceDaemon::new()
        .map_err(|e| CompanionError::Discovery(format!("failed to start mDNS daemon: {e}")))?;

    let companion = mdns
        .browse(COMPANION_SERVICE)
        .map_err(|e| CompanionError::Discovery(format!("failed to browse: {e}")))?;
    let airplay = mdns
        .browse(AIRPLAY_SERVICE)
        .map_err(|e| CompanionError::Discovery(format!("failed to browse: {e}")))?;

    let mut candidates: HashMap<String, Candidate> = HashMap::new();
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let event = tokio::select! {
            () = tokio::time::sleep_until(deadline) => break,
            event = companion.recv_async() => event.map(|e| (true, e)),
            event = airplay.recv_async() => event.map(|e| (false, e)),
        };
        let (is_companion, event) = match event {
            Ok(pair) => pair,
            Err(_) => break,
        };
        let ServiceEvent::ServiceResolved(info) = event else {
            continue;
        };

        let Some(address) = info.get_addresses().iter().find(|a| a.is_ipv4()).copied() else {
            continue;
        };
        let candidate = candidates.entry(address.to_string()).or_default();

        if is_companion {
            candidate.companion_port = Some(info.get_port());
            candidate.name = Some(display_name(info.get_fullname(), COMPANION_SERVICE));
            for prop in info.get_properties().iter() {
                candidate
                    .properties
                    .insert(prop.key().to_string(), prop.val_str().to_string());
            }
            candidate.model = candidate.properties.get("rpMd").cloned();
            candidate.identifier = candidate
                .properties
                .get("rpMRtID")
                .cloned()
                .or_else(|| Some(info.get_fullname().to_string()));
        } else {
            candidate.airplay_port = Some(info.get_port());
        }
    }

    let _ = mdns.shutdown();

    let records = candidates
        .into_iter()
        .filter_map(|(address, candidate)| {
            // Companion is what we talk to; AirPlay-only hosts are not
            // controllable here.
            let companion_port = candidate.companion_port?;
            Some(DeviceRecord {
                name: candidate.name.unwrap_or_else(|| address.clone()),
                identifier: candidate.identifier.unwrap_or_else(|| address.clone()),
                address,
                companion_port,
                airplay_port: candidate.airplay_port.unwrap_or(FALLBACK_AIRPLAY_PORT),
                model: candidate.model,
                properties: candidate.properties,
            })
        })
        .collect();

    Ok(records)
}

fn display_name(fullname: &str, service: &str) -> String {
    fullname
        .strip_suffix(service)
        .map_or(fullname, |name| name.trim_end_matches('.'))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_strips_service_suffix() {
        assert_eq!(
            display_name("Living Room._companion-link._tcp.local.", COMPANION_SERVICE),
            "Living Room"
        );
        assert_eq!(display_name("oddball", COMPANION_SERVICE), "oddball");
    }
}
