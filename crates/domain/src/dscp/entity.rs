use std::fmt;
use std::net::{IpAddr, Ipv6Addr};

use ebpf_common::dscp::{DSCP_MAX, DSCP_NONE, DscpPolicyEntry};
use serde::{Deserialize, Serialize};

use super::error::DscpError;

// ── Protocol numbers ────────────────────────────────────────────────

pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;
pub const PROTO_UDPLITE: u8 = 136;

// ── Address family ──────────────────────────────────────────────────

/// Address family of a packet, and of the policy table that serves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    /// EtherType carried by an untagged Ethernet frame of this family.
    pub fn ether_type(self) -> u16 {
        match self {
            Self::V4 => 0x0800,
            Self::V6 => 0x86DD,
        }
    }

    /// Value of the IP header version nibble.
    pub fn ip_version(self) -> u8 {
        match self {
            Self::V4 => 4,
            Self::V6 => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::V4 => "ipv4",
            Self::V6 => "ipv6",
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize any address to the 128-bit form used for comparisons
/// (IPv4 becomes `::ffff:a.b.c.d`).
pub fn normalize_addr(addr: IpAddr) -> Ipv6Addr {
    match addr {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

// ── DSCP value and action ───────────────────────────────────────────

/// A 6-bit differentiated services codepoint (0..=63).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Dscp(u8);

impl Dscp {
    pub fn new(value: u8) -> Result<Self, DscpError> {
        if value > DSCP_MAX {
            return Err(DscpError::InvalidDscp {
                value: i16::from(value),
            });
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Dscp {
    type Error = DscpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Dscp> for u8 {
    fn from(d: Dscp) -> Self {
        d.0
    }
}

/// What a matching policy does to the traffic-class field.
///
/// Stored on the wire as an `i8`: `-1` is [`DscpAction::Keep`], `0..=63`
/// is [`DscpAction::Mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DscpAction {
    /// Match, but leave the packet untouched.
    #[default]
    Keep,
    /// Rewrite the DSCP to this value.
    Mark(Dscp),
}

impl DscpAction {
    pub fn from_raw(raw: i8) -> Result<Self, DscpError> {
        if raw == DSCP_NONE {
            return Ok(Self::Keep);
        }
        match u8::try_from(raw) {
            Ok(v) => Dscp::new(v).map(Self::Mark),
            Err(_) => Err(DscpError::InvalidDscp {
                value: i16::from(raw),
            }),
        }
    }

    pub fn to_raw(self) -> i8 {
        match self {
            Self::Keep => DSCP_NONE,
            // Dscp is at most 63, always fits.
            Self::Mark(d) => d.0 as i8,
        }
    }

    pub fn dscp(self) -> Option<Dscp> {
        match self {
            Self::Keep => None,
            Self::Mark(d) => Some(d),
        }
    }
}

// ── Port range ──────────────────────────────────────────────────────

/// Inclusive destination port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub const FULL: Self = Self {
        start: 0,
        end: u16::MAX,
    };

    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    /// Number of ports beyond the first (0 for a single port).
    pub fn width(&self) -> u16 {
        self.end.saturating_sub(self.start)
    }

    pub fn validate(&self) -> Result<(), DscpError> {
        if self.start > self.end {
            return Err(DscpError::InvalidPortRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::FULL
    }
}

// ── Flow key ────────────────────────────────────────────────────────

/// Normalized 5-tuple plus egress interface, derived from one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src_ip: Ipv6Addr,
    pub dst_ip: Ipv6Addr,
    pub if_index: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
}

// ── Policy ──────────────────────────────────────────────────────────

/// One administrator-supplied slot of the policy table.
///
/// Every `Option` field is a match that can be switched off: `None` means
/// the field is ignored when scoring. `if_index` and `dst_ports` are
/// always checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DscpPolicy {
    pub if_index: u32,
    pub protocol: Option<u8>,
    pub src_ip: Option<Ipv6Addr>,
    pub dst_ip: Option<Ipv6Addr>,
    pub src_port: Option<u16>,
    pub dst_ports: PortRange,
    pub action: DscpAction,
}

impl DscpPolicy {
    /// Value of a cleared slot. Interface index 0 never names a real
    /// interface, so this policy is never eligible.
    pub const fn noop() -> Self {
        Self {
            if_index: 0,
            protocol: None,
            src_ip: None,
            dst_ip: None,
            src_port: None,
            dst_ports: PortRange::FULL,
            action: DscpAction::Keep,
        }
    }

    /// Check the policy can live in the table for `family`.
    pub fn validate(&self, family: IpFamily) -> Result<(), DscpError> {
        self.dst_ports.validate()?;
        for (field, addr) in [("src_ip", self.src_ip), ("dst_ip", self.dst_ip)] {
            let Some(addr) = addr else { continue };
            let mapped = addr.to_ipv4_mapped().is_some();
            if mapped != (family == IpFamily::V4) {
                return Err(DscpError::FamilyMismatch {
                    family,
                    field,
                    addr,
                });
            }
        }
        Ok(())
    }

    /// Convert to the kernel map layout.
    pub fn to_ebpf_entry(&self) -> DscpPolicyEntry {
        DscpPolicyEntry {
            src_ip: self.src_ip.map_or([0; 16], |a| a.octets()),
            dst_ip: self.dst_ip.map_or([0; 16], |a| a.octets()),
            ifindex: self.if_index,
            src_port: self.src_port.unwrap_or(0),
            dst_port_start: self.dst_ports.start,
            dst_port_end: self.dst_ports.end,
            proto: self.protocol.unwrap_or(0),
            dscp_val: self.action.to_raw(),
            match_src_ip: u8::from(self.src_ip.is_some()),
            match_dst_ip: u8::from(self.dst_ip.is_some()),
            match_src_port: u8::from(self.src_port.is_some()),
            match_proto: u8::from(self.protocol.is_some()),
        }
    }

    /// Build from the kernel map layout. Fails on an out-of-range DSCP.
    pub fn from_ebpf_entry(entry: &DscpPolicyEntry) -> Result<Self, DscpError> {
        Ok(Self {
            if_index: entry.ifindex,
            protocol: (entry.match_proto != 0).then_some(entry.proto),
            src_ip: (entry.match_src_ip != 0).then(|| Ipv6Addr::from(entry.src_ip)),
            dst_ip: (entry.match_dst_ip != 0).then(|| Ipv6Addr::from(entry.dst_ip)),
            src_port: (entry.match_src_port != 0).then_some(entry.src_port),
            dst_ports: PortRange {
                start: entry.dst_port_start,
                end: entry.dst_port_end,
            },
            action: DscpAction::from_raw(entry.dscp_val)?,
        })
    }
}

impl Default for DscpPolicy {
    fn default() -> Self {
        Self::noop()
    }
}
