//! DSCP marking configuration structs and conversion logic.

use domain::dscp::entity::{Dscp, DscpAction, DscpPolicy, IpFamily, PortRange};
use serde::{Deserialize, Serialize};

use super::common::{
    ConfigError, MAX_DSCP_POLICIES, check_limit, default_true, parse_addr, parse_protocol,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DscpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Slot order of the IPv4 table: entry `i` lands in slot `i`.
    #[serde(default)]
    pub ipv4_policies: Vec<DscpPolicyConfig>,

    #[serde(default)]
    pub ipv6_policies: Vec<DscpPolicyConfig>,
}

impl Default for DscpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ipv4_policies: Vec::new(),
            ipv6_policies: Vec::new(),
        }
    }
}

impl DscpConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        for family in [IpFamily::V4, IpFamily::V6] {
            check_limit(
                &Self::list_name(family),
                self.list(family).len(),
                MAX_DSCP_POLICIES,
            )?;
            self.policies(family)?;
        }
        Ok(())
    }

    /// Convert the `family` list to domain policies, in slot order.
    pub fn policies(&self, family: IpFamily) -> Result<Vec<DscpPolicy>, ConfigError> {
        let name = Self::list_name(family);
        self.list(family)
            .iter()
            .enumerate()
            .map(|(idx, p)| p.to_domain_policy(family, &format!("{name}[{idx}]")))
            .collect()
    }

    fn list(&self, family: IpFamily) -> &[DscpPolicyConfig] {
        match family {
            IpFamily::V4 => &self.ipv4_policies,
            IpFamily::V6 => &self.ipv6_policies,
        }
    }

    fn list_name(family: IpFamily) -> String {
        format!("dscp.{family}_policies")
    }
}

// ── Policy config (YAML-friendly) ──────────────────────────────────

/// One policy entry. Omitted match fields are disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DscpPolicyConfig {
    pub ifindex: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<ProtocolConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_port: Option<u16>,

    /// Omitted means the full `0-65535` range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<PortRangeConfig>,

    pub dscp: DscpValueConfig,
}

impl DscpPolicyConfig {
    /// Convert to a domain `DscpPolicy` for the `family` table.
    /// `prefix` names the entry in error messages.
    pub fn to_domain_policy(
        &self,
        family: IpFamily,
        prefix: &str,
    ) -> Result<DscpPolicy, ConfigError> {
        if self.ifindex == 0 {
            return Err(ConfigError::Validation {
                field: format!("{prefix}.ifindex"),
                message: "interface index must be non-zero".to_string(),
            });
        }

        let protocol = self
            .protocol
            .as_ref()
            .map(|p| p.to_number(&format!("{prefix}.protocol")))
            .transpose()?;

        let src_ip = self
            .src_ip
            .as_deref()
            .map(|s| parse_addr(s, family, &format!("{prefix}.src_ip")))
            .transpose()?;

        let dst_ip = self
            .dst_ip
            .as_deref()
            .map(|s| parse_addr(s, family, &format!("{prefix}.dst_ip")))
            .transpose()?;

        let dst_ports = self
            .dst_port
            .as_ref()
            .map(PortRangeConfig::to_domain)
            .transpose()?
            .unwrap_or(PortRange::FULL);

        Ok(DscpPolicy {
            if_index: self.ifindex,
            protocol,
            src_ip,
            dst_ip,
            src_port: self.src_port,
            dst_ports,
            action: self.dscp.to_action(&format!("{prefix}.dscp"))?,
        })
    }
}

// ── Protocol config ────────────────────────────────────────────────

/// `protocol: tcp` or `protocol: 17`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProtocolConfig {
    Number(u8),
    Name(String),
}

impl ProtocolConfig {
    fn to_number(&self, field: &str) -> Result<u8, ConfigError> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Name(s) => parse_protocol(s).map_err(|()| ConfigError::InvalidValue {
                field: field.to_string(),
                value: s.clone(),
                expected: "tcp, udp, udplite, 0-255".to_string(),
            }),
        }
    }
}

// ── DSCP value config ──────────────────────────────────────────────

/// `dscp: 46`, `dscp: -1` or `dscp: none`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DscpValueConfig {
    Number(i16),
    Name(String),
}

impl DscpValueConfig {
    fn to_action(&self, field: &str) -> Result<DscpAction, ConfigError> {
        let invalid = |value: String| ConfigError::InvalidValue {
            field: field.to_string(),
            value,
            expected: "-1, 0-63, none".to_string(),
        };
        match self {
            Self::Number(-1) => Ok(DscpAction::Keep),
            Self::Number(n) => u8::try_from(*n)
                .ok()
                .and_then(|v| Dscp::new(v).ok())
                .map(DscpAction::Mark)
                .ok_or_else(|| invalid(n.to_string())),
            Self::Name(s) => match s.to_lowercase().as_str() {
                "none" | "keep" => Ok(DscpAction::Keep),
                _ => Err(invalid(s.clone())),
            },
        }
    }
}

// ── Port range config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortRangeConfig {
    Single(u16),
    Range(String),
    Explicit { start: u16, end: u16 },
}

impl PortRangeConfig {
    pub fn to_domain(&self) -> Result<PortRange, ConfigError> {
        match self {
            Self::Single(port) => Ok(PortRange::single(*port)),
            Self::Range(s) => {
                // A single port as a string ("9999") or a range ("80-443").
                if let Ok(port) = s.trim().parse::<u16>() {
                    return Ok(PortRange::single(port));
                }
                let (start_str, end_str) =
                    s.split_once('-')
                        .ok_or_else(|| ConfigError::InvalidPortRange {
                            value: s.clone(),
                            reason: "expected format 'start-end' (e.g. '80-443')".to_string(),
                        })?;
                let start =
                    start_str
                        .trim()
                        .parse::<u16>()
                        .map_err(|_| ConfigError::InvalidPortRange {
                            value: s.clone(),
                            reason: format!("invalid start port: '{start_str}'"),
                        })?;
                let end =
                    end_str
                        .trim()
                        .parse::<u16>()
                        .map_err(|_| ConfigError::InvalidPortRange {
                            value: s.clone(),
                            reason: format!("invalid end port: '{end_str}'"),
                        })?;
                Self::checked(start, end, s)
            }
            Self::Explicit { start, end } => Self::checked(*start, *end, &format!("{start}-{end}")),
        }
    }

    fn checked(start: u16, end: u16, raw: &str) -> Result<PortRange, ConfigError> {
        let range = PortRange { start, end };
        range
            .validate()
            .map_err(|_| ConfigError::InvalidPortRange {
                value: raw.to_string(),
                reason: format!("start ({start}) must be <= end ({end})"),
            })?;
        Ok(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_yaml(yaml: &str) -> DscpPolicyConfig {
        serde_yaml_ng::from_str(yaml).unwrap()
    }

    // ── Port range config ─────────────────────────────────────────

    #[test]
    fn port_range_single() {
        let pr = PortRangeConfig::Single(80).to_domain().unwrap();
        assert_eq!(pr, PortRange::single(80));
    }

    #[test]
    fn port_range_string() {
        let pr = PortRangeConfig::Range("1000-2000".to_string())
            .to_domain()
            .unwrap();
        assert_eq!(
            pr,
            PortRange {
                start: 1000,
                end: 2000
            }
        );
    }

    #[test]
    fn port_range_explicit() {
        let pr = PortRangeConfig::Explicit {
            start: 1024,
            end: 65535,
        }
        .to_domain()
        .unwrap();
        assert_eq!(pr.width(), 65535 - 1024);
    }

    #[test]
    fn port_range_invalid() {
        assert!(
            PortRangeConfig::Range("443-80".to_string())
                .to_domain()
                .is_err()
        );
        assert!(
            PortRangeConfig::Explicit { start: 2, end: 1 }
                .to_domain()
                .is_err()
        );
        assert!(
            PortRangeConfig::Range("http".to_string())
                .to_domain()
                .is_err()
        );
    }

    // ── Policy conversion ─────────────────────────────────────────

    #[test]
    fn minimal_policy_disables_every_match() {
        let p = policy_yaml("ifindex: 3\ndscp: 10\n")
            .to_domain_policy(IpFamily::V4, "p")
            .unwrap();
        assert_eq!(p.if_index, 3);
        assert_eq!(p.protocol, None);
        assert_eq!(p.src_ip, None);
        assert_eq!(p.dst_ip, None);
        assert_eq!(p.src_port, None);
        assert_eq!(p.dst_ports, PortRange::FULL);
        assert_eq!(p.action, DscpAction::Mark(Dscp::new(10).unwrap()));
    }

    #[test]
    fn full_policy_converts() {
        let yaml = r#"
ifindex: 2
protocol: udp
src_ip: 192.0.2.1
dst_ip: 198.51.100.7
src_port: 5000
dst_port: "6000-6100"
dscp: 46
"#;
        let p = policy_yaml(yaml)
            .to_domain_policy(IpFamily::V4, "p")
            .unwrap();
        assert_eq!(p.protocol, Some(17));
        assert_eq!(
            p.src_ip.map(|a| a.to_string()).as_deref(),
            Some("::ffff:192.0.2.1")
        );
        assert_eq!(p.src_port, Some(5000));
        assert_eq!(
            p.dst_ports,
            PortRange {
                start: 6000,
                end: 6100
            }
        );
        assert!(p.validate(IpFamily::V4).is_ok());
    }

    #[test]
    fn numeric_protocol_and_map_port_range() {
        let yaml = "ifindex: 2\nprotocol: 136\ndst_port: {start: 1, end: 9}\ndscp: 0\n";
        let p = policy_yaml(yaml)
            .to_domain_policy(IpFamily::V6, "p")
            .unwrap();
        assert_eq!(p.protocol, Some(136));
        assert_eq!(p.dst_ports, PortRange { start: 1, end: 9 });
    }

    #[test]
    fn dscp_none_and_minus_one_mean_keep() {
        for v in ["none", "-1", "NONE"] {
            let p = policy_yaml(&format!("ifindex: 2\ndscp: {v}\n"))
                .to_domain_policy(IpFamily::V4, "p")
                .unwrap();
            assert_eq!(p.action, DscpAction::Keep, "dscp: {v}");
        }
    }

    #[test]
    fn dscp_out_of_range_fails() {
        for v in ["64", "-2", "ef"] {
            let err = policy_yaml(&format!("ifindex: 2\ndscp: {v}\n"))
                .to_domain_policy(IpFamily::V4, "dscp.ipv4_policies[0]")
                .unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "dscp.ipv4_policies[0].dscp"),
                "dscp: {v} gave {err}"
            );
        }
    }

    #[test]
    fn zero_ifindex_fails() {
        assert!(matches!(
            policy_yaml("ifindex: 0\ndscp: 1\n").to_domain_policy(IpFamily::V4, "p"),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn unknown_protocol_fails() {
        assert!(
            policy_yaml("ifindex: 1\nprotocol: sctp\ndscp: 1\n")
                .to_domain_policy(IpFamily::V4, "p")
                .is_err()
        );
    }

    #[test]
    fn address_family_is_enforced() {
        let cfg = policy_yaml("ifindex: 1\ndst_ip: \"2001:db8::1\"\ndscp: 1\n");
        assert!(cfg.to_domain_policy(IpFamily::V6, "p").is_ok());
        assert!(matches!(
            cfg.to_domain_policy(IpFamily::V4, "p"),
            Err(ConfigError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let res: Result<DscpPolicyConfig, _> =
            serde_yaml_ng::from_str("ifindex: 1\ndscp: 1\npriority: 3\n");
        assert!(res.is_err());
    }

    // ── Section ───────────────────────────────────────────────────

    #[test]
    fn default_section_is_enabled_and_empty() {
        let cfg = DscpConfig::default();
        assert!(cfg.enabled);
        assert!(cfg.policies(IpFamily::V4).unwrap().is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn too_many_policies_fails() {
        let one = policy_yaml("ifindex: 1\ndscp: 1\n");
        let cfg = DscpConfig {
            ipv6_policies: vec![one; MAX_DSCP_POLICIES + 1],
            ..DscpConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Validation { ref field, .. }) if field == "dscp.ipv6_policies"
        ));
    }
}
