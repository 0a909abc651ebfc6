//! In-place traffic-class rewrite with checksum fixup.

use ebpf_common::dscp::{ECN_MASK, IPV6_DSCP_CLEAR_MASK, IPV6_DSCP_SHIFT};

use super::entity::DscpAction;
use super::parser::TrafficClassField;

/// What [`apply`] did to the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// Nothing written: the action was `Keep`, or the offsets did not fit
    /// the buffer.
    Unchanged,
    /// TOS byte and header checksum rewritten.
    Ipv4 { old_tos: u8, new_tos: u8 },
    /// First header word rewritten. IPv6 has no header checksum, so any
    /// enclosing checksum state must be recomputed rather than patched.
    Ipv6 {
        old_word: u32,
        new_word: u32,
        recompute_checksum: bool,
    },
}

impl RewriteOutcome {
    pub fn is_rewritten(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Apply `action` to the traffic-class field described by `field`.
pub fn apply(packet: &mut [u8], field: &TrafficClassField, action: DscpAction) -> RewriteOutcome {
    let Some(dscp) = action.dscp() else {
        return RewriteOutcome::Unchanged;
    };

    match *field {
        TrafficClassField::Ipv4 {
            tos_offset,
            checksum_offset,
            tos,
        } => {
            let new_tos = (dscp.value() << 2) | (tos & ECN_MASK);

            let Some(csum_bytes) = packet.get(checksum_offset..checksum_offset + 2) else {
                return RewriteOutcome::Unchanged;
            };
            if tos_offset >= packet.len() {
                return RewriteOutcome::Unchanged;
            }
            let old_check = u16::from_be_bytes([csum_bytes[0], csum_bytes[1]]);
            // TOS is the low-order byte of the version/IHL/TOS word.
            let new_check = csum_replace2(old_check, u16::from(tos), u16::from(new_tos));

            packet[checksum_offset..checksum_offset + 2].copy_from_slice(&new_check.to_be_bytes());
            packet[tos_offset] = new_tos;
            RewriteOutcome::Ipv4 {
                old_tos: tos,
                new_tos,
            }
        }
        TrafficClassField::Ipv6 {
            word_offset,
            first_word,
        } => {
            let new_word =
                (first_word & IPV6_DSCP_CLEAR_MASK) | (u32::from(dscp.value()) << IPV6_DSCP_SHIFT);
            let Some(slot) = packet.get_mut(word_offset..word_offset + 4) else {
                return RewriteOutcome::Unchanged;
            };
            slot.copy_from_slice(&new_word.to_be_bytes());
            RewriteOutcome::Ipv6 {
                old_word: first_word,
                new_word,
                recompute_checksum: true,
            }
        }
    }
}

/// Incrementally update a one's-complement checksum after one 16-bit word
/// changed from `old` to `new` (RFC 1624, eqn. 3).
pub fn csum_replace2(check: u16, old: u16, new: u16) -> u16 {
    let sum = u32::from(!check) + u32::from(!old) + u32::from(new);
    !fold(sum)
}

/// Full RFC 1071 checksum of an IPv4 header. The checksum field itself
/// (bytes 10..12) is treated as zero.
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for (i, chunk) in header.chunks(2).enumerate() {
        if i == 5 {
            continue;
        }
        let word = match *chunk {
            [hi, lo] => u16::from_be_bytes([hi, lo]),
            [hi] => u16::from_be_bytes([hi, 0]),
            _ => 0,
        };
        sum += u32::from(word);
    }
    !fold(sum)
}

fn fold(mut sum: u32) -> u16 {
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}
