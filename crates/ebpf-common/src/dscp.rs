//! DSCP marking shared types for kernel (eBPF) and userspace.
//!
//! Used by: `tc-dscp` (egress classification and rewrite) and the domain
//! engine, which converts its policies to and from these layouts.

/// Policy slots per address family (IPv4 table and IPv6 table).
pub const MAX_DSCP_POLICIES: u32 = 16;

/// Flow cache slots per CPU. Must stay a power of two so the slot index is
/// a mask of the socket cookie.
pub const DSCP_CACHE_SIZE: u32 = 32;

/// Raw action value meaning "matched, but leave the traffic class alone".
pub const DSCP_NONE: i8 = -1;

/// Largest DSCP codepoint (6 bits).
pub const DSCP_MAX: u8 = 63;

/// The two explicit congestion notification bits below the DSCP in the TOS byte.
pub const ECN_MASK: u8 = 0x03;

/// Bits of the first IPv6 header word that are *not* the DSCP.
pub const IPV6_DSCP_CLEAR_MASK: u32 = 0xF03F_FFFF;

/// Bit position of the DSCP inside the first IPv6 header word.
pub const IPV6_DSCP_SHIFT: u32 = 22;

/// Policy entry stored in the `DSCP_POLICIES_V4` / `DSCP_POLICIES_V6`
/// `Array` maps (48 bytes).
///
/// IPv4 addresses are stored IPv4-mapped (`::ffff:a.b.c.d`) so both tables
/// share one comparison path. Each `match_*` byte is a boolean (0/1); when
/// it is 0 the paired field is ignored. The destination port range is always
/// checked.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DscpPolicyEntry {
    /// Source address (network byte order).
    pub src_ip: [u8; 16],
    /// Destination address (network byte order).
    pub dst_ip: [u8; 16],
    /// Interface index; must equal the packet's egress interface.
    pub ifindex: u32,
    /// Source port (host byte order).
    pub src_port: u16,
    /// Inclusive destination port range start (host byte order).
    pub dst_port_start: u16,
    /// Inclusive destination port range end (host byte order).
    pub dst_port_end: u16,
    /// IP protocol number.
    pub proto: u8,
    /// `DSCP_NONE` or a DSCP codepoint 0..=63.
    pub dscp_val: i8,
    pub match_src_ip: u8,
    pub match_dst_ip: u8,
    pub match_src_port: u8,
    pub match_proto: u8,
}

impl DscpPolicyEntry {
    /// Cleared slot: never eligible (ifindex 0), full port range, no rewrite.
    pub const fn noop() -> Self {
        Self {
            src_ip: [0; 16],
            dst_ip: [0; 16],
            ifindex: 0,
            src_port: 0,
            dst_port_start: 0,
            dst_port_end: u16::MAX,
            proto: 0,
            dscp_val: DSCP_NONE,
            match_src_ip: 0,
            match_dst_ip: 0,
            match_src_port: 0,
            match_proto: 0,
        }
    }
}

/// Per-CPU flow cache slot (44 bytes), indexed by `socket_cookie % DSCP_CACHE_SIZE`.
///
/// Never read or written by userspace. Holds the key of the last flow that
/// hashed to the slot and the action resolved for it. The kernel zero-fills
/// the map; a zeroed slot matches no real flow because ifindex 0 is unused.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DscpCacheEntry {
    pub src_ip: [u8; 16],
    pub dst_ip: [u8; 16],
    pub ifindex: u32,
    /// Source port (host byte order).
    pub src_port: u16,
    /// Destination port (host byte order).
    pub dst_port: u16,
    pub proto: u8,
    /// `DSCP_NONE` or a DSCP codepoint 0..=63.
    pub dscp_val: i8,
    pub _pad: [u8; 2],
}

// ── Metric indices ──────────────────────────────────────────────────

/// Packets seen by the classifier.
pub const DSCP_METRIC_TOTAL_SEEN: u32 = 0;
/// Packets passed through without classification (parse reject, no cookie).
pub const DSCP_METRIC_PASSTHROUGH: u32 = 1;
/// Packets resolved from the flow cache.
pub const DSCP_METRIC_CACHE_HIT: u32 = 2;
/// Packets that required a policy scan.
pub const DSCP_METRIC_CACHE_MISS: u32 = 3;
/// Packets whose traffic class was rewritten.
pub const DSCP_METRIC_REWRITTEN: u32 = 4;
/// Processing errors (failed map lookups, failed stores).
pub const DSCP_METRIC_ERRORS: u32 = 5;
/// Total metric slots.
pub const DSCP_METRIC_COUNT: u32 = 6;

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem;

    #[test]
    fn policy_entry_size() {
        assert_eq!(mem::size_of::<DscpPolicyEntry>(), 48);
    }

    #[test]
    fn policy_entry_alignment() {
        assert_eq!(mem::align_of::<DscpPolicyEntry>(), 4);
    }

    #[test]
    fn policy_entry_field_offsets() {
        assert_eq!(mem::offset_of!(DscpPolicyEntry, src_ip), 0);
        assert_eq!(mem::offset_of!(DscpPolicyEntry, dst_ip), 16);
        assert_eq!(mem::offset_of!(DscpPolicyEntry, ifindex), 32);
        assert_eq!(mem::offset_of!(DscpPolicyEntry, src_port), 36);
        assert_eq!(mem::offset_of!(DscpPolicyEntry, dst_port_start), 38);
        assert_eq!(mem::offset_of!(DscpPolicyEntry, dst_port_end), 40);
        assert_eq!(mem::offset_of!(DscpPolicyEntry, proto), 42);
        assert_eq!(mem::offset_of!(DscpPolicyEntry, dscp_val), 43);
        assert_eq!(mem::offset_of!(DscpPolicyEntry, match_src_ip), 44);
        assert_eq!(mem::offset_of!(DscpPolicyEntry, match_dst_ip), 45);
        assert_eq!(mem::offset_of!(DscpPolicyEntry, match_src_port), 46);
        assert_eq!(mem::offset_of!(DscpPolicyEntry, match_proto), 47);
    }

    #[test]
    fn cache_entry_size() {
        assert_eq!(mem::size_of::<DscpCacheEntry>(), 44);
    }

    #[test]
    fn cache_entry_field_offsets() {
        assert_eq!(mem::offset_of!(DscpCacheEntry, src_ip), 0);
        assert_eq!(mem::offset_of!(DscpCacheEntry, dst_ip), 16);
        assert_eq!(mem::offset_of!(DscpCacheEntry, ifindex), 32);
        assert_eq!(mem::offset_of!(DscpCacheEntry, src_port), 36);
        assert_eq!(mem::offset_of!(DscpCacheEntry, dst_port), 38);
        assert_eq!(mem::offset_of!(DscpCacheEntry, proto), 40);
        assert_eq!(mem::offset_of!(DscpCacheEntry, dscp_val), 41);
    }

    #[test]
    fn noop_policy_is_inert() {
        let p = DscpPolicyEntry::noop();
        assert_eq!(p.ifindex, 0);
        assert_eq!(p.dscp_val, DSCP_NONE);
        assert_eq!((p.dst_port_start, p.dst_port_end), (0, u16::MAX));
        assert_eq!(
            p.match_src_ip | p.match_dst_ip | p.match_src_port | p.match_proto,
            0
        );
    }

    #[test]
    fn cache_size_is_power_of_two() {
        assert!(DSCP_CACHE_SIZE.is_power_of_two());
    }

    #[test]
    fn ipv6_mask_covers_exactly_six_bits() {
        let dscp_bits = !IPV6_DSCP_CLEAR_MASK;
        assert_eq!(dscp_bits, u32::from(DSCP_MAX) << IPV6_DSCP_SHIFT);
    }

    #[test]
    fn metric_indices_unique() {
        let indices = [
            DSCP_METRIC_TOTAL_SEEN,
            DSCP_METRIC_PASSTHROUGH,
            DSCP_METRIC_CACHE_HIT,
            DSCP_METRIC_CACHE_MISS,
            DSCP_METRIC_REWRITTEN,
            DSCP_METRIC_ERRORS,
        ];
        for (i, &a) in indices.iter().enumerate() {
            for &b in &indices[i + 1..] {
                assert_ne!(a, b, "metric indices {a} and {b} collide");
            }
            assert!(a < DSCP_METRIC_COUNT);
        }
    }
}
