use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub io: IoConfig,
    pub logging: Option<LoggingConfig>,
}

/// The four timeout knobs guarding every suspension point of the
/// pipelines, in seconds.
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct TimeoutConfig {
    /// Opening a connection to a blob server.
    pub connection: f64,
    /// One framed write to, or one body read from, a blob server.
    pub chunk: f64,
    /// One read from the caller-supplied source.
    pub client: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct IoConfig {
    /// Upper bound on one read step of the read pipelines, in bytes.
    pub read_chunk_size: usize,
    /// Upper bound on one source read of the write pipelines, in bytes.
    pub write_chunk_size: usize,
    /// Depth of each per-writer frame queue.
    pub put_queue_depth: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    /// Extra comma-separated tracing directives, applied on top of
    /// `level`.
    pub filters: Option<String>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connection: 2.0,
            chunk: 3.0,
            client: 60.0,
        }
    }
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: 65536,
            write_chunk_size: 65536,
            put_queue_depth: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connection)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.chunk)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.client)
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_str = std::fs::read_to_string("config.toml").unwrap_or_else(|_| "".to_string());
        if config_str.is_empty() {
            return Err("config.toml not found or empty".into());
        }
        let config: Config = toml::from_str(&config_str)?;
        Ok(config)
    }
}
