//! Engine configuration types.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls the
//! HTTP server, dispatch and watchdog cadence, execution timeouts, and the
//! external collaborators. Every field has a default so an empty file (or no
//! file) yields a working configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration for a cronflow instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Dispatch job cadence and fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_dispatch_interval")]
    pub interval_secs: u64,
    /// Schedules processed concurrently within one pass.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Upper bound for a single pass; the next tick never overlaps it.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
}

fn default_dispatch_interval() -> u64 {
    60
}

fn default_max_concurrent() -> usize {
    4
}

fn default_job_timeout() -> u64 {
    600
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_dispatch_interval(),
            max_concurrent: default_max_concurrent(),
            job_timeout_secs: default_job_timeout(),
        }
    }
}

/// Stale execution recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_watchdog_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold_minutes: u64,
    /// Operator distribution list for stale execution alerts.
    #[serde(default)]
    pub operator_emails: Vec<String>,
    /// Upper bound for a single recovery pass.
    #[serde(default = "default_watchdog_job_timeout")]
    pub job_timeout_secs: u64,
}

fn default_watchdog_interval() -> u64 {
    900
}

fn default_stale_threshold() -> u64 {
    60
}

fn default_watchdog_job_timeout() -> u64 {
    300
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_watchdog_interval(),
            stale_threshold_minutes: default_stale_threshold(),
            operator_emails: Vec::new(),
            job_timeout_secs: default_watchdog_job_timeout(),
        }
    }
}

/// Per-node and per-call timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_node_timeout() -> u64 {
    300
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            node_timeout_secs: default_node_timeout(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

/// Notification delivery. Without a webhook, notifications are logged only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

/// Data resolution for DATA_PROCESSOR queries.
///
/// With `base_url`, queries are POSTed to `{base_url}/{prebuilt_key}`;
/// otherwise `static_results` answers by prebuilt key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub static_results: BTreeMap<String, serde_json::Value>,
}
