//! Zero-copy header parser for the egress classifier.
//!
//! Only the fixed, option-free header stack is understood:
//! Ethernet (untagged) + IPv4 (IHL 5) or IPv6 (no extension headers)
//! + TCP, UDP or UDP-Lite. Anything else is rejected so the packet can
//! pass through untouched.

use std::net::{Ipv4Addr, Ipv6Addr};

use super::entity::{FlowKey, IpFamily, PROTO_TCP, PROTO_UDP, PROTO_UDPLITE};

pub const ETH_HLEN: usize = 14;
pub const IPV4_HLEN: usize = 20;
pub const IPV6_HLEN: usize = 40;
const TCP_HLEN: usize = 20;
const UDP_HLEN: usize = 8;

const ETH_TYPE_OFFSET: usize = 12;
const IPV4_TOS_OFFSET: usize = 1;
const IPV4_PROTO_OFFSET: usize = 9;
const IPV4_CSUM_OFFSET: usize = 10;
const IPV4_SRC_OFFSET: usize = 12;
const IPV4_DST_OFFSET: usize = 16;
const IPV6_NEXT_HDR_OFFSET: usize = 6;
const IPV6_SRC_OFFSET: usize = 8;
const IPV6_DST_OFFSET: usize = 24;

/// IHL value of an IPv4 header without options (in 32-bit words).
const IPV4_IHL_NO_OPTIONS: u8 = 5;

/// Why a packet was not classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseReject {
    /// Buffer ends before the fixed header stack does.
    Truncated,
    /// EtherType is not the one of the expected family (includes VLAN tags).
    EtherTypeMismatch(u16),
    /// IP version nibble disagrees with the expected family.
    VersionMismatch(u8),
    /// IPv4 header length is not 20 bytes.
    Ipv4Options { ihl: u8 },
    /// Transport is not TCP, UDP or UDP-Lite (includes IPv6 extension headers).
    UnsupportedTransport(u8),
}

/// Location and current value of the traffic-class field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficClassField {
    /// The IPv4 TOS byte and the header checksum that covers it.
    Ipv4 {
        tos_offset: usize,
        checksum_offset: usize,
        tos: u8,
    },
    /// The first 32-bit word of the IPv6 header (version, traffic class,
    /// flow label), host byte order.
    Ipv6 { word_offset: usize, first_word: u32 },
}

impl TrafficClassField {
    /// DSCP currently carried by the packet.
    pub fn current_dscp(&self) -> u8 {
        match *self {
            Self::Ipv4 { tos, .. } => tos >> 2,
            Self::Ipv6 { first_word, .. } => ((first_word >> 22) & 0x3F) as u8,
        }
    }
}

/// Parsed view of one packet: the flow key plus the offsets the rewriter
/// needs. Holds no reference to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderView {
    pub family: IpFamily,
    pub key: FlowKey,
    pub field: TrafficClassField,
}

impl HeaderView {
    /// Parse `packet` (starting at the Ethernet header) as `family`.
    ///
    /// The slice length is the packet's declared length.
    pub fn parse(packet: &[u8], family: IpFamily, if_index: u32) -> Result<Self, ParseReject> {
        let l3 = ETH_HLEN;
        let l3_len = match family {
            IpFamily::V4 => IPV4_HLEN,
            IpFamily::V6 => IPV6_HLEN,
        };
        if packet.len() < l3 + l3_len {
            return Err(ParseReject::Truncated);
        }

        let ether_type = read_u16(packet, ETH_TYPE_OFFSET)?;
        if ether_type != family.ether_type() {
            return Err(ParseReject::EtherTypeMismatch(ether_type));
        }

        let ver_byte = read_u8(packet, l3)?;
        let version = ver_byte >> 4;
        if version != family.ip_version() {
            return Err(ParseReject::VersionMismatch(version));
        }

        let (src_ip, dst_ip, protocol, field) = match family {
            IpFamily::V4 => {
                let ihl = ver_byte & 0x0F;
                if ihl != IPV4_IHL_NO_OPTIONS {
                    return Err(ParseReject::Ipv4Options { ihl });
                }
                let src = Ipv4Addr::from(read_array::<4>(packet, l3 + IPV4_SRC_OFFSET)?);
                let dst = Ipv4Addr::from(read_array::<4>(packet, l3 + IPV4_DST_OFFSET)?);
                let field = TrafficClassField::Ipv4 {
                    tos_offset: l3 + IPV4_TOS_OFFSET,
                    checksum_offset: l3 + IPV4_CSUM_OFFSET,
                    tos: read_u8(packet, l3 + IPV4_TOS_OFFSET)?,
                };
                (
                    src.to_ipv6_mapped(),
                    dst.to_ipv6_mapped(),
                    read_u8(packet, l3 + IPV4_PROTO_OFFSET)?,
                    field,
                )
            }
            IpFamily::V6 => {
                let src = Ipv6Addr::from(read_array::<16>(packet, l3 + IPV6_SRC_OFFSET)?);
                let dst = Ipv6Addr::from(read_array::<16>(packet, l3 + IPV6_DST_OFFSET)?);
                let field = TrafficClassField::Ipv6 {
                    word_offset: l3,
                    first_word: u32::from_be_bytes(read_array::<4>(packet, l3)?),
                };
                (src, dst, read_u8(packet, l3 + IPV6_NEXT_HDR_OFFSET)?, field)
            }
        };

        let l4 = l3 + l3_len;
        let l4_len = match protocol {
            PROTO_TCP => TCP_HLEN,
            PROTO_UDP | PROTO_UDPLITE => UDP_HLEN,
            other => return Err(ParseReject::UnsupportedTransport(other)),
        };
        if packet.len() < l4 + l4_len {
            return Err(ParseReject::Truncated);
        }

        Ok(Self {
            family,
            key: FlowKey {
                src_ip,
                dst_ip,
                if_index,
                src_port: read_u16(packet, l4)?,
                dst_port: read_u16(packet, l4 + 2)?,
                protocol,
            },
            field,
        })
    }
}

// ── Bounds-checked reads ────────────────────────────────────────────

#[inline]
fn read_array<const N: usize>(packet: &[u8], offset: usize) -> Result<[u8; N], ParseReject> {
    packet
        .get(offset..offset + N)
        .and_then(|s| s.try_into().ok())
        .ok_or(ParseReject::Truncated)
}

#[inline]
fn read_u8(packet: &[u8], offset: usize) -> Result<u8, ParseReject> {
    packet.get(offset).copied().ok_or(ParseReject::Truncated)
}

#[inline]
fn read_u16(packet: &[u8], offset: usize) -> Result<u16, ParseReject> {
    read_array::<2>(packet, offset).map(u16::from_be_bytes)
}
