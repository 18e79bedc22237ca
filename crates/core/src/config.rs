use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    /// Dispatcher WebSocket endpoint. Empty disables the transport.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_backoff_floor_ms")]
    pub backoff_floor_ms: u64,
    #[serde(default = "default_backoff_ceil_ms")]
    pub backoff_ceil_ms: u64,
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_backoff_floor_ms() -> u64 {
    1_000
}

fn default_backoff_ceil_ms() -> u64 {
    30_000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            heartbeat_secs: default_heartbeat_secs(),
            backoff_floor_ms: default_backoff_floor_ms(),
            backoff_ceil_ms: default_backoff_ceil_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneConfig {
    /// Control-plane base URL. None means fully offline/self-hosted:
    /// every client call returns its safe default without touching the network.
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub deployment_id: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    5
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            deployment_id: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    /// Concurrent jobs against the browser session. Anything below 1 is
    /// clamped up to 1. Raising this requires multiple independent sessions.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_tracked_jobs")]
    pub max_tracked_jobs: usize,
    #[serde(default = "default_completed_ttl_mins")]
    pub completed_ttl_mins: u64,
    #[serde(default = "default_sweep_interval_mins")]
    pub sweep_interval_mins: u64,
    /// Heap-pressure ratio (used/total) that triggers aggressive eviction.
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: f64,
}

fn default_concurrency() -> usize {
    1
}

fn default_max_tracked_jobs() -> usize {
    1000
}

fn default_completed_ttl_mins() -> u64 {
    30
}

fn default_sweep_interval_mins() -> u64 {
    5
}

fn default_memory_threshold() -> f64 {
    0.8
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_tracked_jobs: default_max_tracked_jobs(),
            completed_ttl_mins: default_completed_ttl_mins(),
            sweep_interval_mins: default_sweep_interval_mins(),
            memory_threshold: default_memory_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    #[serde(default = "default_health_host")]
    pub host: String,
    #[serde(default = "default_health_port")]
    pub port: u16,
}

fn default_health_host() -> String {
    "127.0.0.1".to_string()
}

fn default_health_port() -> u16 {
    9188
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            host: default_health_host(),
            port: default_health_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn control_plane_url(&self) -> Option<String> {
        if let Some(url) = self.control_plane.api_url.as_ref() {
            let url = url.trim();
            if !url.is_empty() {
                return Some(url.trim_end_matches('/').to_string());
            }
        }
        None
    }
}
