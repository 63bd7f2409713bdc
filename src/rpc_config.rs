//! Public, transport-agnostic RPC configuration.
//!
//! This type intentionally contains no transport-specific concepts.
//! Transports interpret their own connection settings; the config here
//! only covers the engine's behavior.

use std::time::Duration;

/// Engine configuration shared by the client and server facades.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    // ---
    /// Timeout applied by `call_sync` when no explicit timeout is given.
    ///
    /// Default: 30 seconds
    pub call_timeout: Duration,

    /// Capacity of the client's mailbox for unsolicited inbound messages.
    ///
    /// When the mailbox is full, new deliveries are dropped (with a warning)
    /// rather than stalling the connection's read task.
    ///
    /// Default: 1024
    pub mailbox_capacity: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            mailbox_capacity: 1024,
        }
    }
}

impl RpcConfig {
    /// Set the default synchronous-call timeout.
    ///
    /// # Example
    ///
    /// ```
    /// use duplex_rpc::RpcConfig;
    /// use std::time::Duration;
    ///
    /// let config = RpcConfig::default().with_call_timeout(Duration::from_secs(5));
    /// ```
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the mailbox capacity for unsolicited inbound messages.
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }
}
