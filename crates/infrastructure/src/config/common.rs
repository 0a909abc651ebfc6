//! Shared parsing helpers and error types used across config modules.

use std::net::{IpAddr, Ipv6Addr};
use std::path::Path;

use tracing::warn;

use domain::dscp::entity::{IpFamily, PROTO_TCP, PROTO_UDP, PROTO_UDPLITE, normalize_addr};
use domain::dscp::table::POLICY_CAPACITY;

// ── Limits ─────────────────────────────────────────────────────────

/// Policies per family list (must match `ebpf_common::dscp::MAX_DSCP_POLICIES`).
pub(super) const MAX_DSCP_POLICIES: usize = POLICY_CAPACITY;
/// Upper bound on classifier shards.
pub(super) const MAX_WORKERS: usize = 1024;

// ── Config errors ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(String),

    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("invalid port range '{value}': {reason}")]
    InvalidPortRange { value: String, reason: String },

    #[error("invalid value '{value}' for field '{field}': expected one of {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("invalid address '{value}' for field '{field}': {reason}")]
    InvalidAddress {
        field: String,
        value: String,
        reason: String,
    },
}

impl From<serde_yaml_ng::Error> for ConfigError {
    fn from(e: serde_yaml_ng::Error) -> Self {
        Self::Yaml(e.to_string())
    }
}

// ── Shared serde defaults ──────────────────────────────────────────

pub(super) fn default_true() -> bool {
    true
}

// ── Parsing helpers ────────────────────────────────────────────────

/// Parse a transport protocol name to its IP protocol number.
pub(super) fn parse_protocol(s: &str) -> Result<u8, ()> {
    match s.to_lowercase().as_str() {
        "tcp" => Ok(PROTO_TCP),
        "udp" => Ok(PROTO_UDP),
        "udplite" | "udp-lite" | "udp_lite" => Ok(PROTO_UDPLITE),
        other => other.parse::<u8>().map_err(|_| ()),
    }
}

/// Parse a single host address for a policy in the `family` list and
/// normalize it (IPv4 becomes `::ffff:a.b.c.d`).
pub fn parse_addr(s: &str, family: IpFamily, field: &str) -> Result<Ipv6Addr, ConfigError> {
    let addr: IpAddr = s.trim().parse().map_err(|e| ConfigError::InvalidAddress {
        field: field.to_string(),
        value: s.to_string(),
        reason: format!("{e}"),
    })?;

    let matches_family = match (family, addr) {
        (IpFamily::V4, IpAddr::V4(_)) => true,
        // An IPv4-mapped literal would be classified as IPv4 on the wire.
        (IpFamily::V6, IpAddr::V6(v6)) => v6.to_ipv4_mapped().is_none(),
        _ => false,
    };
    if !matches_family {
        return Err(ConfigError::InvalidAddress {
            field: field.to_string(),
            value: s.to_string(),
            reason: format!("not an {family} address"),
        });
    }
    Ok(normalize_addr(addr))
}

/// Log a warning if a file is world-readable (Unix only).
#[cfg(unix)]
pub(super) fn warn_if_world_readable(path: &Path, label: &str) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode();
        if mode & 0o004 != 0 {
            warn!(
                path = %path.display(),
                mode = format!("{mode:04o}"),
                "{label} is world-readable, consider chmod 640 or stricter",
            );
        }
    }
}

#[cfg(not(unix))]
pub(super) fn warn_if_world_readable(_path: &Path, _label: &str) {}

/// Enforce a maximum count on a config collection.
pub(super) fn check_limit(field: &str, count: usize, max: usize) -> Result<(), ConfigError> {
    if count > max {
        return Err(ConfigError::Validation {
            field: field.to_string(),
            message: format!("count {count} exceeds maximum {max}"),
        });
    }
    Ok(())
}
