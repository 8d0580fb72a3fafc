//! Idle connection cache for two-phase pairing
//!
//! Pair-setup and pair-verify run as separate operations, often seconds
//! apart; the cache keeps the Companion socket alive in between so the
//! second phase does not reopen it. Released connections get a reaper
//! listener so stale events never surface and errored sockets are removed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::transport::{Connection, FrameListener};
use super::Frame;

/// Default time a released connection stays alive.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

type CacheKey = (String, u16);
type Entries = Mutex<HashMap<CacheKey, CacheEntry>>;

struct CacheEntry {
    connection: Connection,
    /// Distinguishes this occupancy from a replacement under the same key.
    token: u64,
    timer: JoinHandle<()>,
}

/// Cache of idle Companion connections keyed by `(host, port)`.
pub struct ConnectionCache {
    idle_timeout: Duration,
    entries: Arc<Entries>,
    next_token: AtomicU64,
}

impl ConnectionCache {
    /// Create a cache with the given idle timeout.
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(0),
        }
    }

    /// Take a cached connection if one is still alive.
    pub async fn take(&self, host: &str, port: u16) -> Option<Connection> {
        let entry = self
            .entries
            .lock()
            .await
            .remove(&(host.to_string(), port))?;
        entry.timer.abort();

        if entry.connection.is_connected() {
            tracing::debug!(host, port, "reusing cached connection");
            Some(entry.connection)
        } else {
            None
        }
    }

    /// Release a connection into the cache.
    ///
    /// Its listener is replaced immediately; after the idle timeout the
    /// connection is closed and dropped.
    pub async fn store(&self, host: &str, port: u16, connection: Connection) {
        let key = (host.to_string(), port);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        connection
            .set_listener(Arc::new(CacheReaper {
                key: key.clone(),
                token,
                entries: Arc::downgrade(&self.entries),
            }))
            .await;

        let timer = tokio::spawn(expire_after(
            Arc::downgrade(&self.entries),
            key.clone(),
            token,
            self.idle_timeout,
        ));

        let replaced = self.entries.lock().await.insert(
            key,
            CacheEntry {
                connection,
                token,
                timer,
            },
        );
        if let Some(old) = replaced {
            old.timer.abort();
            old.connection.close().await;
        }
    }
}

impl Default for ConnectionCache {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

async fn expire_after(entries: Weak<Entries>, key: CacheKey, token: u64, after: Duration) {
    tokio::time::sleep(after).await;
    let Some(entries) = entries.upgrade() else {
        return;
    };

    let expired = {
        let mut entries = entries.lock().await;
        match entries.get(&key) {
            Some(entry) if entry.token == token => entries.remove(&key),
            _ => None,
        }
    };
    if let Some(entry) = expired {
        tracing::debug!(host = %entry_host(&key), port = key.1, "closing idle cached connection");
        entry.connection.close().await;
    }
}

fn entry_host(key: &CacheKey) -> &str {
    &key.0
}

/// Listener installed on cached connections: drops frames, removes the
/// entry when the socket dies underneath the cache.
struct CacheReaper {
    key: CacheKey,
    token: u64,
    entries: Weak<Entries>,
}

#[async_trait]
impl FrameListener for CacheReaper {
    async fn on_frame(&self, _frame: Frame) {}

    async fn on_close(&self) {
        let Some(entries) = self.entries.upgrade() else {
            return;
        };
        let mut entries = entries.lock().await;
        if let Some(entry) = entries.get(&self.key) {
            if entry.token == self.token {
                if let Some(entry) = entries.remove(&self.key) {
                    entry.timer.abort();
                }
            }
        }
    }
}
