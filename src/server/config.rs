//! Server configuration types
//!
//! Mirrors `config/default.toml`. Every section has serde defaults so a
//! partial override file is enough.

use std::time::Duration;

use gasoline_core::{BrokerConfig, BufferCapacities, RateLimitConfig};
use gasoline_tools::ToolConfig;
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub buffers: BufferCapacities,
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub logs: LogSettings,
    #[serde(default)]
    pub limits: LimitSettings,
    #[serde(default)]
    pub upload: UploadSettings,
}

impl AppConfig {
    /// Broker timing knobs
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            max_pending: self.broker.max_pending,
            query_timeout: Duration::from_millis(self.broker.query_timeout_ms),
            async_command_timeout: Duration::from_secs(self.broker.async_command_timeout_secs),
            result_ttl: Duration::from_secs(self.broker.result_ttl_secs),
        }
    }

    /// Tool-level knobs; the sync wait follows the query timeout
    pub fn tool_config(&self) -> ToolConfig {
        ToolConfig {
            sync_wait: Duration::from_millis(self.broker.query_timeout_ms),
            os_upload_automation: self.upload.os_automation,
            ..ToolConfig::default()
        }
    }

    /// Per-minute tool call budget
    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::new(self.limits.tool_calls_per_minute, Duration::from_secs(60))
    }

    /// Console log TTL; `None` when disabled
    pub fn log_ttl(&self) -> Option<Duration> {
        (self.logs.ttl_secs > 0).then(|| Duration::from_secs(self.logs.ttl_secs))
    }

    /// Shutdown drain bound
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.server.drain_timeout_ms)
    }

    /// Background sweep period
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.broker.cleanup_interval_secs.max(1))
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long shutdown waits for in-flight tool calls
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7890
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

/// Pending-query broker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "default_async_command_timeout")]
    pub async_command_timeout_secs: u64,
    #[serde(default = "default_result_ttl")]
    pub result_ttl_secs: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            max_pending: default_max_pending(),
            query_timeout_ms: default_query_timeout_ms(),
            async_command_timeout_secs: default_async_command_timeout(),
            result_ttl_secs: default_result_ttl(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

fn default_max_pending() -> usize {
    5
}
fn default_query_timeout_ms() -> u64 {
    15_000
}
fn default_async_command_timeout() -> u64 {
    300
}
fn default_result_ttl() -> u64 {
    60
}
fn default_cleanup_interval() -> u64 {
    30
}

/// Console log store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogSettings {
    /// 0 disables TTL filtering
    #[serde(default)]
    pub ttl_secs: u64,
}

/// Request limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitSettings {
    #[serde(default = "default_tool_calls_per_minute")]
    pub tool_calls_per_minute: u32,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            tool_calls_per_minute: default_tool_calls_per_minute(),
        }
    }
}

fn default_tool_calls_per_minute() -> u32 {
    500
}

/// File upload settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadSettings {
    /// Allow OS-level file dialog automation
    #[serde(default)]
    pub os_automation: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_broker_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 7890);
        assert_eq!(config.broker_config(), BrokerConfig::default());
        assert_eq!(config.log_ttl(), None);
        assert!(!config.tool_config().os_upload_automation);
        assert_eq!(
            config.drain_timeout(),
            gasoline_core::shutdown::DEFAULT_DRAIN_TIMEOUT
        );
    }

    #[test]
    fn test_cleanup_interval_never_zero() {
        let mut config = AppConfig::default();
        config.broker.cleanup_interval_secs = 0;
        assert_eq!(config.cleanup_interval(), Duration::from_secs(1));
    }
}
