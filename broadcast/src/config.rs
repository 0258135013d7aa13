//! Broadcast configuration.

/// Configuration for client sessions.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Outbound frames buffered per session before sends start failing.
    pub session_buffer: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            session_buffer: 256,
        }
    }
}

impl BroadcastConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(buffer) = std::env::var("FX_BROADCAST_SESSION_BUFFER") {
            if let Ok(buffer) = buffer.parse() {
                config.session_buffer = buffer;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.session_buffer == 0 {
            return Err("Session buffer cannot be zero".to_string());
        }
        Ok(())
    }
}
