//! Link configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::codec::{Codec, JsonCodec};
use crate::protocol::{ClientSeq, ServerSeq};

/// Default time a call may wait for its result.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(15_000);
/// Default maximum number of scheduled reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Default base delay for reconnect backoff.
pub const DEFAULT_BASE_RECONNECT_DELAY: Duration = Duration::from_millis(1_000);
/// Default cap on the reconnect backoff delay.
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_millis(30_000);
/// Default jitter band applied to reconnect delays.
pub const DEFAULT_JITTER_BAND: (f64, f64) = (0.85, 1.15);

/// Connection status surfaced through the status callback.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    /// A connection attempt is in flight.
    Connecting,
    /// Connected and ready.
    Connected,
    /// Waiting to retry after a dropped connection.
    Reconnecting {
        /// The upcoming attempt number (1-based).
        attempt: u32,
    },
    /// Not connected; no attempt in flight.
    Disconnected,
}

/// Callback invoked for every server ack of an optimistic mutation.
/// Typically wired to [`SyncCoordinator::confirm_mutation`].
///
/// [`SyncCoordinator::confirm_mutation`]: crate::SyncCoordinator::confirm_mutation
pub type AckCallback = Arc<dyn Fn(ClientSeq, ServerSeq) + Send + Sync>;

/// Callback invoked on connection status transitions.
pub type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Configuration for a [`LinkClient`].
///
/// [`LinkClient`]: crate::LinkClient
#[derive(Clone)]
pub struct LinkConfig {
    /// WebSocket URL of the server (e.g. "wss://api.example.com/link").
    pub url: String,
    /// How long a call may wait for its result.
    pub request_timeout: Duration,
    /// Scheduled reconnect attempts before the link gives up.
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential reconnect backoff.
    pub base_reconnect_delay: Duration,
    /// Cap on the reconnect delay.
    pub max_reconnect_delay: Duration,
    /// Multiplicative jitter band sampled uniformly per reconnect, to avoid
    /// thundering-herd reconnection.
    pub jitter_band: (f64, f64),
    /// Wire codec. Defaults to [`JsonCodec`].
    pub codec: Arc<dyn Codec>,
    /// Invoked for every mutation ack the server sends.
    pub on_ack: Option<AckCallback>,
    /// Invoked on connection status transitions.
    pub on_status: Option<StatusCallback>,
}

impl LinkConfig {
    /// Configuration with defaults for everything but the URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_reconnect_delay: DEFAULT_BASE_RECONNECT_DELAY,
            max_reconnect_delay: DEFAULT_MAX_RECONNECT_DELAY,
            jitter_band: DEFAULT_JITTER_BAND,
            codec: Arc::new(JsonCodec),
            on_ack: None,
            on_status: None,
        }
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the reconnect policy.
    pub fn with_reconnect(
        mut self,
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.base_reconnect_delay = base_delay;
        self.max_reconnect_delay = max_delay;
        self
    }

    /// Set the jitter band (e.g. `(0.85, 1.15)`). `(1.0, 1.0)` disables
    /// jitter.
    pub fn with_jitter_band(mut self, band: (f64, f64)) -> Self {
        self.jitter_band = band;
        self
    }

    /// Override the wire codec.
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Set the mutation-ack callback.
    pub fn with_ack_callback(mut self, callback: AckCallback) -> Self {
        self.on_ack = Some(callback);
        self
    }

    /// Set the status callback.
    pub fn with_status_callback(mut self, callback: StatusCallback) -> Self {
        self.on_status = Some(callback);
        self
    }
}

impl std::fmt::Debug for LinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkConfig")
            .field("url", &self.url)
            .field("request_timeout", &self.request_timeout)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("base_reconnect_delay", &self.base_reconnect_delay)
            .field("max_reconnect_delay", &self.max_reconnect_delay)
            .field("jitter_band", &self.jitter_band)
            .finish()
    }
}
