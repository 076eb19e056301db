//! Configuration for minidomain controllers

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides (`MINIDOMAIN__CONTROLLER__NAME=...`)
pub const ENV_PREFIX: &str = "MINIDOMAIN";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// This controller's identity and topology
    pub controller: ControllerConfig,

    /// Wait budgets for the two-phase protocol
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Version transformation rules applied to operations sent to older controllers
    #[serde(default)]
    pub transformers: Vec<TransformerRule>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            timeouts: TimeoutConfig::default(),
            transformers: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load `minidomain.toml` from the working directory (if any), then env overrides.
    pub fn load() -> crate::Result<Self> {
        Self::build(None)
    }

    /// Load an explicit config file, then env overrides.
    pub fn load_from(path: impl AsRef<Path>) -> crate::Result<Self> {
        Self::build(Some(path.as_ref()))
    }

    fn build(path: Option<&Path>) -> crate::Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name("minidomain").required(false),
        };
        let loaded = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        let config: Config = loaded.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the coordinator cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.controller.name.is_empty() {
            return Err(crate::Error::InvalidConfig(
                "controller.name cannot be empty".into(),
            ));
        }
        if self.controller.peers.contains_key(&self.controller.name) {
            return Err(crate::Error::InvalidConfig(format!(
                "controller {} lists itself as a peer",
                self.controller.name
            )));
        }
        if !self.controller.primary && self.controller.primary_name.is_none() {
            return Err(crate::Error::InvalidConfig(
                "a non-primary controller must name its primary".into(),
            ));
        }
        if self.timeouts.max_concurrent_worker_requests == 0 {
            return Err(crate::Error::InvalidConfig(
                "timeouts.max_concurrent_worker_requests must be at least 1".into(),
            ));
        }
        crate::common::utils::ModelVersion::parse(&self.controller.model_version)?;
        for rule in &self.transformers {
            crate::common::utils::ModelVersion::parse(&rule.since)?;
        }
        Ok(())
    }
}

/// Controller identity and peer topology
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Controller name (unique in the domain)
    pub name: String,

    /// Is this the primary (domain) controller?
    #[serde(default)]
    pub primary: bool,

    /// Name of the primary controller when this one is subordinate
    #[serde(default)]
    pub primary_name: Option<String>,

    /// Bind address for the HTTP API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Known peers (name → base URL and model version)
    #[serde(default)]
    pub peers: BTreeMap<String, PeerConfig>,

    /// Management model version spoken by this controller
    #[serde(default = "default_model_version")]
    pub model_version: String,

    /// JSON file holding the initial configuration model
    #[serde(default)]
    pub model_path: Option<PathBuf>,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9990))
}

fn default_model_version() -> String {
    "2.0".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: "primary".to_string(),
            primary: true,
            primary_name: None,
            bind_addr: default_bind_addr(),
            peers: BTreeMap::new(),
            model_version: default_model_version(),
            model_path: None,
        }
    }
}

/// A peer controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub url: String,
    #[serde(default = "default_model_version")]
    pub model_version: String,
}

/// Wait budgets used by the prepare barrier and final-result collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Upper bound on any blocking wait for a remote result
    #[serde(default = "default_blocking_timeout")]
    pub blocking_timeout_ms: u64,

    /// Per-connection budget handed back by the worker dispatch callback
    #[serde(default = "default_connection_budget")]
    pub connection_budget_ms: u64,

    /// Patience for final results once the waiting task was interrupted
    #[serde(default = "default_interrupted_patience")]
    pub interrupted_patience_ms: u64,

    /// Worker requests in flight at once during rollout
    #[serde(default = "default_max_concurrent_worker_requests")]
    pub max_concurrent_worker_requests: usize,

    /// Prepared transactions held for a coordinator are rolled back after this long
    #[serde(default = "default_pending_tx_expiry")]
    pub pending_tx_expiry_ms: u64,
}

fn default_blocking_timeout() -> u64 {
    300_000
}
fn default_connection_budget() -> u64 {
    30_000
}
fn default_interrupted_patience() -> u64 {
    50
}
fn default_max_concurrent_worker_requests() -> usize {
    16
}
fn default_pending_tx_expiry() -> u64 {
    600_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            blocking_timeout_ms: default_blocking_timeout(),
            connection_budget_ms: default_connection_budget(),
            interrupted_patience_ms: default_interrupted_patience(),
            max_concurrent_worker_requests: default_max_concurrent_worker_requests(),
            pending_tx_expiry_ms: default_pending_tx_expiry(),
        }
    }
}

impl TimeoutConfig {
    pub fn blocking_timeout(&self) -> Duration {
        Duration::from_millis(self.blocking_timeout_ms)
    }

    pub fn connection_budget(&self) -> Duration {
        Duration::from_millis(self.connection_budget_ms)
    }

    pub fn interrupted_patience(&self) -> Duration {
        Duration::from_millis(self.interrupted_patience_ms)
    }

    pub fn pending_tx_expiry(&self) -> Duration {
        Duration::from_millis(self.pending_tx_expiry_ms)
    }
}

/// What happens to an operation on a resource kind a peer's model version predates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformAction {
    /// Drop the operation (or composite step) entirely
    Discard,
    /// Send it, but treat a successful outcome as a failure
    Reject,
    /// Refuse to transform
    Fail,
}

/// A version transformation rule, keyed on a resource kind anywhere in the address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerRule {
    pub kind: String,
    /// First model version that understands `kind`
    pub since: String,
    pub action: TransformAction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.controller.primary);
        assert_eq!(config.timeouts.blocking_timeout(), Duration::from_secs(300));
        assert_eq!(config.timeouts.interrupted_patience(), Duration::from_millis(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[controller]
name = "host-b"
primary = false
primary_name = "host-a"
bind_addr = "127.0.0.1:9991"

[controller.peers.host-a]
url = "http://127.0.0.1:9990"

[timeouts]
blocking_timeout_ms = 1000

[[transformers]]
kind = "deployment-overlay"
since = "1.4"
action = "discard"
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.controller.name, "host-b");
        assert!(!config.controller.primary);
        assert_eq!(config.controller.peers["host-a"].model_version, "2.0");
        assert_eq!(config.timeouts.blocking_timeout_ms, 1000);
        assert_eq!(config.timeouts.max_concurrent_worker_requests, 16);
        assert_eq!(config.transformers[0].action, TransformAction::Discard);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_validate_rejects_orphan_subordinate() {
        let mut config = Config::default();
        config.controller.primary = false;
        assert!(config.validate().is_err());
        config.controller.primary_name = Some("host-a".into());
        assert!(config.validate().is_ok());
    }
}
