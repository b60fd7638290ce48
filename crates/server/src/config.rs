use anyhow::{Context, Result};
use mcphub_mcp::{Host, HostSettings, RouterConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_host_id")]
    pub host_id: String,

    #[serde(default)]
    pub router: RouterSection,

    #[serde(default)]
    pub context: ContextSection,

    #[serde(default)]
    pub events: EventsSection,

    #[serde(default)]
    pub liveness: LivenessSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSection {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default = "default_max_transport_retries")]
    pub max_transport_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSection {
    /// Exchanges kept per client; 0 keeps everything
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsSection {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Directory for the gzip JSONL event log; no log when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessSection {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_liveness_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host_id() -> String {
    "mcphub".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_transport_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_history_capacity() -> usize {
    256
}

fn default_buffer_size() -> usize {
    1024
}

fn default_interval_secs() -> u64 {
    15
}

fn default_liveness_timeout_secs() -> u64 {
    60
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_transport_retries: default_max_transport_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
        }
    }
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            log_dir: None,
        }
    }
}

impl Default for LivenessSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: default_liveness_timeout_secs(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host_id: default_host_id(),
            router: RouterSection::default(),
            context: ContextSection::default(),
            events: EventsSection::default(),
            liveness: LivenessSection::default(),
        }
    }
}

impl HostConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        // Load config file if it exists, otherwise use defaults
        if !config_path.exists() {
            tracing::info!(
                "Configuration file {} not found, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .context("Failed to read configuration file")?;
        let config: Self = toml::from_str(&content).context("Failed to parse configuration file")?;

        if config.liveness.interval_secs == 0 {
            anyhow::bail!("liveness.interval_secs must be greater than zero");
        }

        Ok(config)
    }

    pub fn settings(&self) -> HostSettings {
        HostSettings {
            host_id: self.host_id.clone(),
            router: RouterConfig {
                default_timeout: Duration::from_millis(self.router.default_timeout_ms),
                max_transport_retries: self.router.max_transport_retries,
                retry_backoff: Duration::from_millis(self.router.retry_backoff_ms),
            },
            history_capacity: self.context.history_capacity,
            event_buffer: self.events.buffer_size,
        }
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness.interval_secs)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness.timeout_secs)
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub host: Arc<Host>,
}

impl AppState {
    pub fn new(config: &HostConfig) -> Self {
        Self {
            host: Arc::new(Host::new(config.settings())),
        }
    }
}
