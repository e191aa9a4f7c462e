//! Monitor configuration.
//!
//! Loaded from JSON; every key is optional and falls back to its default.
//!
//! # Example
//!
//! ```
//! use a800mon_client::MonitorConfig;
//!
//! let config = MonitorConfig::from_json_str(r#"{ "socket": "tcp:127.0.0.1:6502" }"#).unwrap();
//! assert_eq!(config.socket, "tcp:127.0.0.1:6502");
//! assert_eq!(config.max_read_chunk, 1024);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::{ClientBuilder, RpcClient, DEFAULT_MAX_READ_CHUNK};
use crate::error::{MonitorError, Result};
use crate::monitor::StatusIntervals;
use crate::transport::SocketTransport;

/// Default emulator socket.
pub const DEFAULT_SOCKET: &str = "/tmp/atari.sock";

/// All tunables of the monitor client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// `tcp:HOST:PORT` or a Unix socket path.
    pub socket: String,
    pub connect_timeout_ms: u64,
    /// Deadline for each write and each exact read.
    pub io_timeout_ms: u64,
    /// Largest memory read issued in one call.
    pub max_read_chunk: usize,
    pub paused_interval_ms: u64,
    pub running_interval_ms: u64,
    /// Status poll interval while the last call failed.
    pub error_interval_ms: u64,
    /// How long one blocking input poll may wait.
    pub input_timeout_ms: u64,
    /// Rows in the disassembly view.
    pub viewport_height: usize,
    /// 0 disables the decode cache.
    pub decode_cache_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            socket: DEFAULT_SOCKET.to_string(),
            connect_timeout_ms: 500,
            io_timeout_ms: 500,
            max_read_chunk: DEFAULT_MAX_READ_CHUNK,
            paused_interval_ms: 1000,
            running_interval_ms: 50,
            error_interval_ms: 1000,
            input_timeout_ms: 200,
            viewport_height: 20,
            decode_cache_capacity: 64,
        }
    }
}

impl MonitorConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            MonitorError::Config(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values the client cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.socket.trim().is_empty() {
            return Err(MonitorError::Config("socket must not be empty".to_string()));
        }
        if self.max_read_chunk == 0 || self.max_read_chunk > 0xFFFF {
            return Err(MonitorError::Config(format!(
                "max_read_chunk must be in 1..=65535, got {}",
                self.max_read_chunk
            )));
        }
        if self.viewport_height == 0 {
            return Err(MonitorError::Config(
                "viewport_height must be at least 1".to_string(),
            ));
        }
        if self.running_interval_ms == 0 {
            return Err(MonitorError::Config(
                "running_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn input_timeout(&self) -> Duration {
        Duration::from_millis(self.input_timeout_ms)
    }

    pub fn status_intervals(&self) -> StatusIntervals {
        StatusIntervals {
            paused: Duration::from_millis(self.paused_interval_ms),
            running: Duration::from_millis(self.running_interval_ms),
            error: Duration::from_millis(self.error_interval_ms),
        }
    }

    /// Client builder preloaded with the transport settings.
    pub fn client_builder(&self) -> ClientBuilder {
        ClientBuilder::new()
            .socket(&self.socket)
            .connect_timeout(self.connect_timeout())
            .io_timeout(self.io_timeout())
            .max_read_chunk(self.max_read_chunk)
    }

    pub fn build_client(&self) -> Result<RpcClient<SocketTransport>> {
        self.client_builder().build()
    }
}
