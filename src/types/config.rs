use std::time::Duration;

/// Configuration for Companion client behavior
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name announced to the device during pairing (default: hostname-ish)
    pub device_name: String,

    /// Model string sent in `_systemInfo`
    pub device_model: String,

    /// Timeout for connection attempts (default: 10 seconds)
    pub connect_timeout: Duration,

    /// Per-operation reply deadline (default: 5 seconds)
    pub command_timeout: Duration,

    /// Interval between text-focus polls (default: 1000 ms)
    pub focus_poll_interval: Duration,

    /// How long released pairing connections stay cached (default: 120 s)
    pub idle_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            device_name: "atv-companion".to_string(),
            device_model: "PC".to_string(),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(5),
            focus_poll_interval: Duration::from_millis(1000),
            idle_timeout: Duration::from_secs(120),
        }
    }
}

impl ClientConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for `ClientConfig`
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the name announced during pairing
    #[must_use]
    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.config.device_name = name.into();
        self
    }

    /// Set the model string
    #[must_use]
    pub fn device_model(mut self, model: impl Into<String>) -> Self {
        self.config.device_model = model.into();
        self
    }

    /// Set the connection timeout
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the per-operation reply deadline
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Set the focus polling interval
    #[must_use]
    pub fn focus_poll_interval(mut self, interval: Duration) -> Self {
        self.config.focus_poll_interval = interval;
        self
    }

    /// Set the idle timeout for cached pairing connections
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Build the config
    #[must_use]
    pub fn build(self) -> ClientConfig {
        self.config
    }
}
