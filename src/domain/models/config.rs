//! Configuration model.
//!
//! Loaded by the figment-based loader in `infrastructure::config`, merging
//! programmatic defaults, a project YAML file, and `ARGUS_`-prefixed
//! environment variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LogConfig,
    pub pipeline: PipelineConfig,
    pub retention: RetentionConfig,
    pub slo: SloConfig,
    pub mcp: McpConfig,
    pub hooks: HookOrderConfig,
    pub alerting: AlertingConfig,
    pub scheduler: SchedulerConfig,
    pub quota: QuotaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".argus/argus.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    pub format: LogFormat,
    /// Directory for rolling log files; stdout-only when unset.
    pub log_dir: Option<PathBuf>,
    pub enable_stdout: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            log_dir: None,
            enable_stdout: true,
        }
    }
}

/// Metric ingestion pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ring buffer capacity; rounded up to the next power of two.
    pub ring_buffer_size: usize,
    pub flush_interval_ms: u64,
    pub batch_size: usize,
    pub writer_threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ring_buffer_size: 8192,
            flush_interval_ms: 1000,
            batch_size: 1000,
            writer_threads: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub raw_days: i64,
    pub audit_years: i64,
    pub compression_after_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            raw_days: 90,
            audit_years: 7,
            compression_after_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SloConfig {
    pub default_availability: f64,
    pub default_latency_p99_ms: i64,
}

impl Default for SloConfig {
    fn default() -> Self {
        Self {
            default_availability: 0.995,
            default_latency_p99_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub connection_timeout_ms: u64,
    /// Tool output beyond this many characters is truncated with a marker.
    pub max_tool_output_length: usize,
    /// Exact-match server name allowlist; empty allows everything.
    pub server_allowlist: Vec<String>,
    pub reconnection: ReconnectionConfig,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: 30_000,
            max_tool_output_length: 50_000,
            server_allowlist: Vec::new(),
            reconnection: ReconnectionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay_ms: 5_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

/// Fixed ordering of the built-in hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HookOrderConfig {
    pub quota_enforcer_order: i32,
    pub metric_collector_order: i32,
}

impl Default for HookOrderConfig {
    fn default() -> Self {
        Self {
            quota_enforcer_order: 5,
            metric_collector_order: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Seconds between alert evaluation cycles.
    pub interval_seconds: u64,
    /// Seconds a cached baseline stays fresh.
    pub baseline_ttl_seconds: u64,
    /// Webhook URLs that receive fired alerts as JSON.
    pub webhook_urls: Vec<String>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 600,
            baseline_ttl_seconds: 3600,
            webhook_urls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Milliseconds between scheduler ticks.
    pub tick_interval_ms: u64,
    /// Slack webhook used for job notifications (`slack_channel_id` selects
    /// the channel inside the posted payload).
    pub slack_webhook_url: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            slack_webhook_url: None,
        }
    }
}

/// Circuit breaker settings for the quota enforcer's usage lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub breaker_failure_threshold: u32,
    pub breaker_reset_timeout_ms: u64,
    pub breaker_half_open_trials: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            breaker_failure_threshold: 5,
            breaker_reset_timeout_ms: 30_000,
            breaker_half_open_trials: 2,
        }
    }
}
