use crate::error::Result;
use crate::paths;
use crate::retry::RetryPolicy;
use crate::schema::Server;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
}

fn default_max_retries() -> u32 {
    4
}

fn default_base_delay() -> u64 {
    1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_secs(self.base_delay_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// AuditConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_retention")]
    pub retention_days: u32,
}

fn default_retention() -> u32 {
    90
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention(),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub stop_on_first_error: bool,
    /// Wall-clock budget for one batch, in seconds.
    #[serde(default = "default_batch_budget")]
    pub batch_budget_secs: u64,
}

fn default_batch_budget() -> u64 {
    900
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            stop_on_first_error: false,
            batch_budget_secs: default_batch_budget(),
        }
    }
}

// ---------------------------------------------------------------------------
// AdapterEndpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterEndpoint {
    pub endpoint: String,
    /// Name of the environment variable holding the bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Treat 404 on a read operation as an empty result instead of an error.
    #[serde(default)]
    pub empty_on_not_found: bool,
}

fn default_timeout() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Identity written to the `actor` field of audit entries.
    #[serde(default = "default_actor")]
    pub actor: String,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub adapters: BTreeMap<String, AdapterEndpoint>,
}

fn default_version() -> u32 {
    1
}

fn default_actor() -> String {
    "steward".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            actor: default_actor(),
            retry: RetryConfig::default(),
            audit: AuditConfig::default(),
            executor: ExecutorConfig::default(),
            adapters: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load `.steward/config.yaml`, falling back to defaults when absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Config::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Config::default());
        }
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn adapter(&self, server: Server) -> Option<&AdapterEndpoint> {
        self.adapters.get(server.as_str())
    }

    pub fn batch_budget(&self) -> Duration {
        Duration::from_secs(self.executor.batch_budget_secs)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        for (name, endpoint) in &self.adapters {
            if !Server::is_valid(name) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("unknown adapter '{name}' in adapters"),
                });
            }
            if !(endpoint.endpoint.starts_with("http://")
                || endpoint.endpoint.starts_with("https://"))
            {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!(
                        "adapter '{name}' endpoint '{}' is not an http(s) URL",
                        endpoint.endpoint
                    ),
                });
            }
            if endpoint.timeout_secs == 0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("adapter '{name}' has timeout_secs=0 (no timeout)"),
                });
            }
        }

        if self.retry.max_retries > 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "retry.max_retries={} (>10 means waits of over half an hour)",
                    self.retry.max_retries
                ),
            });
        }

        if self.executor.batch_budget_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "executor.batch_budget_secs is 0: every action would time out"
                    .to_string(),
            });
        }

        if self.actor.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "actor is empty; audit entries will carry no identity".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
