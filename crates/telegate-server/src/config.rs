//! Gateway configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How parsed messages reach the application handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DispatchMode {
    /// Invoke the handler on each connection's reader task
    #[default]
    Inline,
    /// Queue per connection, with at most `workers` handler invocations in
    /// flight across all connections
    Pooled {
        /// Concurrency cap across connections
        workers: usize,
    },
}

/// Gateway server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind_addr: String,
    /// Connections idle longer than this are closed by the sweep
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Interval between idle sweeps
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Capacity of each connection's outbound frame queue
    pub outbound_queue: usize,
    /// Capacity of each connection's dispatch queue (pooled mode only)
    pub dispatch_queue: usize,
    /// Handler dispatch mode
    pub dispatch: DispatchMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9010".to_string(),
            idle_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(1),
            outbound_queue: 1024,
            dispatch_queue: 1024,
            dispatch: DispatchMode::Inline,
        }
    }
}
