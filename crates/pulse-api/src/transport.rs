// Shared transport configuration for building reqwest::Client instances.
//
// The database, identity, and streaming clients share timeout and
// user-agent settings through this module, avoiding duplicated builder logic.

use std::time::Duration;

const USER_AGENT: &str = concat!("pulse/", env!("CARGO_PKG_VERSION"));

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-request timeout for one-shot calls. Not applied to streams.
    pub timeout: Duration,
    /// Connect timeout, applied to every client including streams.
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` for request/response calls.
    pub fn build_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(crate::error::Error::Transport)
    }

    /// Build a `reqwest::Client` for long-lived event streams.
    ///
    /// No overall timeout: the stream stays open until the server closes it
    /// or the caller cancels. Keep-alive events arrive every ~30s.
    pub fn build_streaming_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(crate::error::Error::Transport)
    }
}
