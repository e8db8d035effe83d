//! Process settings - fixed for the lifetime of a plumber run.

use serde::{Deserialize, Serialize};

/// How the plumber registers itself with the audio server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Client name shown in the server's graph.
    /// Default: jack-plumber
    #[serde(default = "SessionConfig::default_client_name")]
    pub client_name: String,

    /// Start a server if none is running.
    /// Default: false
    #[serde(default)]
    pub start_server: bool,
}

impl SessionConfig {
    fn default_client_name() -> String {
        "jack-plumber".to_string()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_name: Self::default_client_name(),
            start_server: false,
        }
    }
}

/// Notification queue and worker pacing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Bounded queue between server callbacks and the worker.
    /// Default: 1024
    #[serde(default = "DispatchConfig::default_queue_capacity")]
    pub queue_capacity: usize,

    /// Most notifications coalesced into one batch.
    /// Default: 256
    #[serde(default = "DispatchConfig::default_max_batch")]
    pub max_batch: usize,

    /// How often the idle worker checks the session-lost and overflow flags.
    /// Default: 250
    #[serde(default = "DispatchConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Full re-enumeration period, 0 disables it.
    /// Default: 0
    #[serde(default)]
    pub resync_interval_secs: u64,

    /// Session calls slower than this are logged.
    /// Default: 50
    #[serde(default = "DispatchConfig::default_slow_call_ms")]
    pub slow_call_ms: u64,
}

impl DispatchConfig {
    fn default_queue_capacity() -> usize {
        1024
    }

    fn default_max_batch() -> usize {
        256
    }

    fn default_poll_interval_ms() -> u64 {
        250
    }

    fn default_slow_call_ms() -> u64 {
        50
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: Self::default_queue_capacity(),
            max_batch: Self::default_max_batch(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            resync_interval_secs: 0,
            slow_call_ms: Self::default_slow_call_ms(),
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive (trace, debug, info, warn, error, or per-target).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_defaults() {
        let session = SessionConfig::default();
        assert_eq!(session.client_name, "jack-plumber");
        assert!(!session.start_server);
    }

    #[test]
    fn test_dispatch_defaults() {
        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.queue_capacity, 1024);
        assert_eq!(dispatch.max_batch, 256);
        assert_eq!(dispatch.resync_interval_secs, 0);
    }

    #[test]
    fn test_serde_fills_missing_fields() {
        let dispatch: DispatchConfig = toml::from_str("queue_capacity = 8").unwrap();
        assert_eq!(dispatch.queue_capacity, 8);
        assert_eq!(dispatch.poll_interval_ms, 250);
    }
}
