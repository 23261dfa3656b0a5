use serde::{Deserialize, Serialize};

/// Broker and wire-adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    /// Largest wire frame the codec will accept, in bytes.
    pub max_frame_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 61613,
            max_connections: 1000,
            max_frame_size: 1024 * 1024, // 1MB
        }
    }
}

impl BrokerConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Validate configuration bounds before binding anything to them.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be > 0".to_string());
        }
        if self.max_frame_size == 0 {
            return Err("max_frame_size must be > 0".to_string());
        }
        Ok(())
    }
}
