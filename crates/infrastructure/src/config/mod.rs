//! Agent configuration: structs, parsing, and validation.
//!
//! The config module is split across sub-modules:
//! - `common`: shared helpers and `ConfigError`
//! - `dscp`: policy tables

mod common;
mod dscp;

// ── Public re-exports ─────────────────────────────────────────────

pub use common::{ConfigError, parse_addr};
pub use dscp::{DscpConfig, DscpPolicyConfig, DscpValueConfig, PortRangeConfig, ProtocolConfig};

use std::path::{Path, PathBuf};

use domain::dscp::entity::{DscpPolicy, IpFamily};
use serde::{Deserialize, Serialize};

use crate::constants::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH, DEFAULT_WORKERS};
use common::{MAX_WORKERS, warn_if_world_readable};

// ── Top-level config ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentInfo,

    #[serde(default)]
    pub dscp: DscpConfig,
}

impl AgentConfig {
    /// Load config from a YAML file.
    ///
    /// On Unix, logs a warning if the config file is world-readable.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        warn_if_world_readable(path, "config file");
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the config after deserialization.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.workers == 0 || self.agent.workers > MAX_WORKERS {
            return Err(ConfigError::Validation {
                field: "agent.workers".to_string(),
                message: format!(
                    "{} is out of range, expected 1-{MAX_WORKERS}",
                    self.agent.workers
                ),
            });
        }
        self.dscp.validate()
    }

    /// Domain policies of `family`, in slot order.
    pub fn dscp_policies(&self, family: IpFamily) -> Result<Vec<DscpPolicy>, ConfigError> {
        self.dscp.policies(family)
    }
}

/// Config file to load: the explicit path if given, then the
/// `DSCP_CONFIG` environment variable, then the default location.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

// ── Agent info ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentInfo {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Number of classifier shards. Each owns a private flow cache.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            workers: default_workers(),
        }
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}
fn default_log_format() -> LogFormat {
    LogFormat::Json
}
fn default_workers() -> usize {
    DEFAULT_WORKERS
}

// ── Log level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Error => tracing::Level::ERROR,
            Self::Warn => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
            Self::Trace => tracing::Level::TRACE,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(format!(
                "invalid log level '{s}': expected error|warn|info|debug|trace"
            )),
        }
    }
}

// ── Log format ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "pretty" => Ok(Self::Text),
            _ => Err(format!("invalid log format '{s}': expected json|text")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::dscp::entity::{Dscp, DscpAction, PortRange};

    #[test]
    fn empty_document_uses_defaults() {
        let config = AgentConfig::from_yaml("{}").unwrap();
        assert_eq!(config.agent.log_level, LogLevel::Info);
        assert_eq!(config.agent.log_format, LogFormat::Json);
        assert_eq!(config.agent.workers, DEFAULT_WORKERS);
        assert!(config.dscp.enabled);
        assert!(config.dscp_policies(IpFamily::V4).unwrap().is_empty());
    }

    #[test]
    fn load_full_dscp_config() {
        let yaml = r#"
agent:
  log_level: debug
  log_format: text
  workers: 4
dscp:
  enabled: true
  ipv4_policies:
    - ifindex: 2
      protocol: udp
      src_ip: 192.0.2.1
      dst_port: 5060
      dscp: 46
    - ifindex: 2
      dst_port: "1000-2000"
      dscp: none
  ipv6_policies:
    - ifindex: 3
      protocol: tcp
      dst_ip: "2001:db8::10"
      dst_port: { start: 443, end: 443 }
      dscp: 18
"#;
        let config = AgentConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.agent.log_level, LogLevel::Debug);
        assert_eq!(config.agent.log_format, LogFormat::Text);
        assert_eq!(config.agent.workers, 4);

        let v4 = config.dscp_policies(IpFamily::V4).unwrap();
        assert_eq!(v4.len(), 2);
        assert_eq!(v4[0].action, DscpAction::Mark(Dscp::new(46).unwrap()));
        assert_eq!(v4[0].dst_ports, PortRange::single(5060));
        assert_eq!(v4[1].action, DscpAction::Keep);
        assert_eq!(
            v4[1].dst_ports,
            PortRange {
                start: 1000,
                end: 2000
            }
        );

        let v6 = config.dscp_policies(IpFamily::V6).unwrap();
        assert_eq!(v6[0].if_index, 3);
        assert_eq!(v6[0].protocol, Some(6));
        assert_eq!(v6[0].dst_ports, PortRange::single(443));
    }

    #[test]
    fn zero_workers_fails() {
        let err = AgentConfig::from_yaml("agent:\n  workers: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "agent.workers"));
    }

    #[test]
    fn wrong_family_address_fails() {
        let yaml = r#"
dscp:
  ipv6_policies:
    - ifindex: 3
      src_ip: 10.0.0.1
      dscp: 1
"#;
        assert!(matches!(
            AgentConfig::from_yaml(yaml),
            Err(ConfigError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn seventeen_policies_fail() {
        let mut yaml = String::from("dscp:\n  ipv4_policies:\n");
        for i in 0..17 {
            yaml.push_str(&format!("    - {{ ifindex: 1, dst_port: {}, dscp: 8 }}\n", 1000 + i));
        }
        assert!(matches!(
            AgentConfig::from_yaml(&yaml),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn unknown_top_level_key_fails() {
        assert!(matches!(
            AgentConfig::from_yaml("firewall: {}\n"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn invalid_log_level_fails() {
        assert!(AgentConfig::from_yaml("agent:\n  log_level: loud\n").is_err());
    }

    #[test]
    fn load_from_file() {
        let path = std::env::temp_dir().join(format!("dscp-config-{}.yaml", std::process::id()));
        std::fs::write(&path, "agent:\n  workers: 2\n").unwrap();
        let config = AgentConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.agent.workers, 2);
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            AgentConfig::load(Path::new("/nonexistent/dscp/config.yaml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn explicit_config_path_wins() {
        let p = config_path(Some(Path::new("/tmp/x.yaml")));
        assert_eq!(p, PathBuf::from("/tmp/x.yaml"));
    }

    #[test]
    fn log_level_as_str() {
        assert_eq!(LogLevel::Error.as_str(), "error");
        assert_eq!(LogLevel::Trace.as_str(), "trace");
    }

    #[test]
    fn log_level_to_tracing() {
        assert_eq!(LogLevel::Warn.to_tracing_level(), tracing::Level::WARN);
        assert_eq!(LogLevel::Debug.to_tracing_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn log_level_from_str() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn log_format_from_str() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
