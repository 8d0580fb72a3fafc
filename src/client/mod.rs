//! Public client façade

mod airplay;
mod companion;
mod session;


pub use airplay::AirPlayPairing;
pub use session::{CompanionSession, FocusState, MediaCommand, RemoteKey};

use std::sync::Arc;

use crate::connection::{Connection, ConnectionCache, Router};
use crate::error::{CompanionError, TransportError};
use crate::protocol::pairing::HapCredentials;
use crate::types::{ClientConfig, DeviceRecord};

/// Entry point: pairs with and connects to Companion devices.
///
/// Holds the pairing-connection cache, so two-phase flows (setup now,
/// verify in a moment) reuse one socket.
pub struct CompanionClient {
    config: ClientConfig,
    cache: Arc<ConnectionCache>,
}

impl CompanionClient {
    /// Create a client.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let cache = Arc::new(ConnectionCache::new(config.idle_timeout));
        Self { config, cache }
    }

    /// Start PIN pairing over the device's `AirPlay` HTTP endpoint.
    ///
    /// The device shows its PIN once this returns; pass it to
    /// [`AirPlayPairing::finish`].
    ///
    /// # Errors
    ///
    /// Returns error if the device is unreachable.
    pub async fn pair_airplay(&self, device: &DeviceRecord) -> Result<AirPlayPairing, CompanionError> {
        AirPlayPairing::start(device, &self.config).await
    }

    /// Start PIN pairing over the Companion transport.
    ///
    /// The device shows its PIN once this returns; pass it to
    /// [`CompanionPairing::finish`].
    ///
    /// # Errors
    ///
    /// Returns error if the device is unreachable or rejects the attempt.
    pub async fn pair_companion(
        &self,
        device: &DeviceRecord,
    ) -> Result<CompanionPairing, CompanionError> {
        let connection = self.acquire_connection(device).await?;
        let router = Router::attach(connection.clone(), self.config.command_timeout).await;

        match companion::SetupExchange::start(router, &self.config.device_name).await {
            Ok((exchange, m2)) => Ok(CompanionPairing {
                exchange,
                m2,
                connection,
                device: device.clone(),
                cache: Arc::clone(&self.cache),
            }),
            Err(e) => {
                connection.close().await;
                Err(e)
            }
        }
    }

    /// Connect with stored credentials: pair-verify, install the session
    /// keys, and run the post-connect sequence.
    ///
    /// # Errors
    ///
    /// Returns error if verification or any session-start step fails.
    pub async fn connect(
        &self,
        device: &DeviceRecord,
        credentials: &str,
    ) -> Result<CompanionSession, CompanionError> {
        let credentials: HapCredentials = credentials
            .parse()
            .map_err(CompanionError::Pairing)?;

        let connection = self.acquire_connection(device).await?;
        match self.connect_inner(connection.clone(), credentials).await {
            Ok(session) => Ok(session),
            Err(e) => {
                connection.close().await;
                Err(e)
            }
        }
    }

    async fn connect_inner(
        &self,
        connection: Connection,
        credentials: HapCredentials,
    ) -> Result<CompanionSession, CompanionError> {
        let router = Router::attach(connection.clone(), self.config.command_timeout).await;

        let keys = companion::pair_verify(&router, credentials.clone()).await?;
        connection.enable_encryption(&keys).await;

        let session = CompanionSession::new(router, connection, self.config.clone());
        session.begin(&credentials.client_id).await?;
        Ok(session)
    }

    /// Reuse a cached pairing connection or open a fresh one.
    async fn acquire_connection(&self, device: &DeviceRecord) -> Result<Connection, CompanionError> {
        if let Some(connection) = self
            .cache
            .take(&device.address, device.companion_port)
            .await
        {
            return Ok(connection);
        }

        let connect = Connection::connect(&device.address, device.companion_port);
        let connection = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| CompanionError::timeout("Companion connection"))?
            .map_err(TransportError::from)?;
        Ok(connection)
    }
}

/// An in-progress PIN pairing over the Companion transport.
pub struct CompanionPairing {
    exchange: companion::SetupExchange,
    m2: Vec<u8>,
    connection: Connection,
    device: DeviceRecord,
    cache: Arc<ConnectionCache>,
}

impl CompanionPairing {
    /// Finish pairing with the on-screen PIN.
    ///
    /// On success the connection is parked in the cache so the follow-up
    /// [`CompanionClient::connect`] does not reopen it, and the credential
    /// string to persist is returned.
    ///
    /// # Errors
    ///
    /// Returns error on a wrong PIN or peer-reported failure.
    pub async fn finish(self, pin: &str) -> Result<String, CompanionError> {
        let result = self.exchange.finish(pin, &self.m2).await;
        match result {
            Ok(credentials) => {
                self.cache
                    .store(
                        &self.device.address,
                        self.device.companion_port,
                        self.connection,
                    )
                    .await;
                Ok(credentials.to_string())
            }
            Err(e) => {
                self.connection.close().await;
                Err(e)
            }
        }
    }
}
