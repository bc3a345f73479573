//! Agent configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name from Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics/readiness
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// JSON manifest holding the pods to probe
    #[serde(default)]
    pub pods_file: Option<PathBuf>,

    /// Container runtime CLI used for exec probes
    #[serde(default = "default_exec_runtime")]
    pub exec_runtime: String,

    /// How often the pod manifest is re-read, in seconds
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_exec_runtime() -> String {
    "crictl".to_string()
}

fn default_resync_interval() -> u64 {
    30
}

impl AgentConfig {
    /// Load configuration from `AGENT_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_env(config::Environment::with_prefix("AGENT"))
    }

    fn from_env(env: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(env.try_parsing(true))
            .build()
            .context("Failed to read agent configuration")?;

        config
            .try_deserialize()
            .context("Invalid agent configuration")
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs.max(1))
    }
}
