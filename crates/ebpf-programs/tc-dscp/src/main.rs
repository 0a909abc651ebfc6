#![no_std]
#![no_main]

use aya_ebpf::{
    bindings::TC_ACT_PIPE,
    helpers::{bpf_get_socket_cookie, bpf_l3_csum_replace, bpf_skb_store_bytes},
    macros::{classifier, map},
    maps::{Array, PerCpuArray},
    programs::TcContext,
};
use core::mem;
use ebpf_common::dscp::{
    DSCP_CACHE_SIZE, DSCP_METRIC_CACHE_HIT, DSCP_METRIC_CACHE_MISS, DSCP_METRIC_COUNT,
    DSCP_METRIC_ERRORS, DSCP_METRIC_PASSTHROUGH, DSCP_METRIC_REWRITTEN, DSCP_METRIC_TOTAL_SEEN,
    DSCP_NONE, DscpCacheEntry, DscpPolicyEntry, ECN_MASK, IPV6_DSCP_CLEAR_MASK, IPV6_DSCP_SHIFT,
    MAX_DSCP_POLICIES,
};
use network_types::{eth::EthHdr, ip::Ipv4Hdr, tcp::TcpHdr, udp::UdpHdr};

// ── Constants ───────────────────────────────────────────────────────

const ETH_P_IP: u16 = 0x0800;
const ETH_P_IPV6: u16 = 0x86DD;
const IPV6_HDR_LEN: usize = 40;
const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;
const PROTO_UDPLITE: u8 = 136;

/// `skb->pkt_type` of locally originated and unicast-to-us packets.
const PACKET_HOST: u32 = 0;

const BPF_F_RECOMPUTE_CSUM: u64 = 1;

/// Offset of the TOS byte inside the IPv4 header.
const IPV4_TOS_OFFSET: usize = 1;
/// Offset of the header checksum inside the IPv4 header.
const IPV4_CSUM_OFFSET: usize = 10;

/// Weight of one matched field; dominates any port-width bonus.
const FIELD_WEIGHT: u32 = 1 << 16;

// ── Inline header types ─────────────────────────────────────────────

#[repr(C)]
struct RawEthHdr {
    _dst: [u8; 6],
    _src: [u8; 6],
    ether_type: [u8; 2],
}

/// Option-free IPv4 header (20 bytes).
#[repr(C)]
struct Ipv4Fixed {
    version_ihl: u8,
    tos: u8,
    _tot_len: u16,
    _id: u16,
    _frag_off: u16,
    _ttl: u8,
    proto: u8,
    _check: u16,
    saddr: [u8; 4],
    daddr: [u8; 4],
}

/// IPv6 fixed header (40 bytes).
#[repr(C)]
struct Ipv6Fixed {
    vtcfl: [u8; 4],
    _payload_len: u16,
    next_hdr: u8,
    _hop_limit: u8,
    saddr: [u8; 16],
    daddr: [u8; 16],
}

/// First four bytes of a TCP, UDP or UDP-Lite header.
#[repr(C)]
struct L4Ports {
    source: [u8; 2],
    dest: [u8; 2],
}

// ── Maps ────────────────────────────────────────────────────────────

/// IPv4 policy table (IPv4-mapped addresses).
#[map]
static DSCP_POLICIES_V4: Array<DscpPolicyEntry> = Array::with_max_entries(MAX_DSCP_POLICIES, 0);

/// IPv6 policy table.
#[map]
static DSCP_POLICIES_V6: Array<DscpPolicyEntry> = Array::with_max_entries(MAX_DSCP_POLICIES, 0);

/// Per-CPU flow cache indexed by `socket_cookie % DSCP_CACHE_SIZE`. Never
/// touched by userspace.
#[map]
static DSCP_FLOW_CACHE: PerCpuArray<DscpCacheEntry> =
    PerCpuArray::with_max_entries(DSCP_CACHE_SIZE, 0);

/// Per-CPU DSCP metrics.
#[map]
static DSCP_METRICS: PerCpuArray<u64> = PerCpuArray::with_max_entries(DSCP_METRIC_COUNT, 0);

// ── Entry point ─────────────────────────────────────────────────────

#[classifier]
pub fn tc_dscp(mut ctx: TcContext) -> i32 {
    increment_metric(DSCP_METRIC_TOTAL_SEEN);
    if try_tc_dscp(&mut ctx).is_err() {
        increment_metric(DSCP_METRIC_ERRORS);
    }
    TC_ACT_PIPE
}

// ── Helpers ─────────────────────────────────────────────────────────

#[inline(always)]
fn increment_metric(index: u32) {
    if let Some(counter) = DSCP_METRICS.get_ptr_mut(index) {
        unsafe {
            *counter += 1;
        }
    }
}

#[inline(always)]
unsafe fn ptr_at<T>(ctx: &TcContext, offset: usize) -> Result<*const T, ()> {
    let start = ctx.data();
    let end = ctx.data_end();
    let len = mem::size_of::<T>();
    if start + offset + len > end {
        return Err(());
    }
    Ok((start + offset) as *const T)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Family {
    V4,
    V6,
}

/// Flow key plus what the rewrite needs from the original header.
struct Parsed {
    src_ip: [u8; 16],
    dst_ip: [u8; 16],
    src_port: u16,
    dst_port: u16,
    proto: u8,
    /// IPv4 TOS byte.
    tos: u8,
    /// IPv6 first header word (host order).
    first_word: u32,
}

#[inline(always)]
fn mapped_v4(addr: [u8; 4]) -> [u8; 16] {
    [
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, addr[0], addr[1], addr[2], addr[3],
    ]
}

// ── Packet processing ───────────────────────────────────────────────

#[inline(always)]
fn try_tc_dscp(ctx: &mut TcContext) -> Result<(), ()> {
    let skb = ctx.skb.skb;
    let (pkt_type, protocol, ifindex) =
        unsafe { ((*skb).pkt_type, (*skb).protocol, (*skb).ifindex) };

    if pkt_type != PACKET_HOST {
        increment_metric(DSCP_METRIC_PASSTHROUGH);
        return Ok(());
    }

    let family = if protocol == u32::from(ETH_P_IP.to_be()) {
        Family::V4
    } else if protocol == u32::from(ETH_P_IPV6.to_be()) {
        Family::V6
    } else {
        increment_metric(DSCP_METRIC_PASSTHROUGH);
        return Ok(());
    };

    let Some(parsed) = parse(ctx, family) else {
        increment_metric(DSCP_METRIC_PASSTHROUGH);
        return Ok(());
    };

    let cookie = unsafe { bpf_get_socket_cookie(skb as *mut _) };
    if cookie == 0 {
        increment_metric(DSCP_METRIC_PASSTHROUGH);
        return Ok(());
    }
    let cache_id = (cookie % u64::from(DSCP_CACHE_SIZE)) as u32;

    // Cannot fail on a per-CPU array of DSCP_CACHE_SIZE entries.
    let slot = DSCP_FLOW_CACHE.get_ptr_mut(cache_id).ok_or(())?;

    let dscp_val = if let Some(cached) = cache_hit(unsafe { &*slot }, &parsed, ifindex) {
        increment_metric(DSCP_METRIC_CACHE_HIT);
        cached
    } else {
        increment_metric(DSCP_METRIC_CACHE_MISS);
        let resolved = classify(&parsed, family, ifindex)?;
        unsafe {
            *slot = DscpCacheEntry {
                src_ip: parsed.src_ip,
                dst_ip: parsed.dst_ip,
                ifindex,
                src_port: parsed.src_port,
                dst_port: parsed.dst_port,
                proto: parsed.proto,
                dscp_val: resolved,
                _pad: [0; 2],
            };
        }
        resolved
    };

    if dscp_val < 0 {
        return Ok(());
    }
    let dscp = dscp_val as u8;

    match family {
        Family::V4 => rewrite_ipv4(ctx, parsed.tos, dscp)?,
        Family::V6 => rewrite_ipv6(ctx, parsed.first_word, dscp)?,
    }
    increment_metric(DSCP_METRIC_REWRITTEN);
    Ok(())
}

/// Locate Ethernet + IP + transport headers at fixed offsets. `None` means
/// the packet is not one we classify.
#[inline(always)]
fn parse(ctx: &TcContext, family: Family) -> Option<Parsed> {
    let eth: *const RawEthHdr = unsafe { ptr_at(ctx, 0).ok()? };
    let ether_type = u16::from_be_bytes(unsafe { (*eth).ether_type });
    let l3 = EthHdr::LEN;

    let (mut parsed, l4) = match family {
        Family::V4 => {
            if ether_type != ETH_P_IP {
                return None;
            }
            let ip: *const Ipv4Fixed = unsafe { ptr_at(ctx, l3).ok()? };
            let version_ihl = unsafe { (*ip).version_ihl };
            if version_ihl >> 4 != 4 || version_ihl & 0x0F != 5 {
                return None;
            }
            let parsed = unsafe {
                Parsed {
                    src_ip: mapped_v4((*ip).saddr),
                    dst_ip: mapped_v4((*ip).daddr),
                    src_port: 0,
                    dst_port: 0,
                    proto: (*ip).proto,
                    tos: (*ip).tos,
                    first_word: 0,
                }
            };
            (parsed, l3 + Ipv4Hdr::LEN)
        }
        Family::V6 => {
            if ether_type != ETH_P_IPV6 {
                return None;
            }
            let ip: *const Ipv6Fixed = unsafe { ptr_at(ctx, l3).ok()? };
            let first_word = u32::from_be_bytes(unsafe { (*ip).vtcfl });
            if first_word >> 28 != 6 {
                return None;
            }
            let parsed = unsafe {
                Parsed {
                    src_ip: (*ip).saddr,
                    dst_ip: (*ip).daddr,
                    src_port: 0,
                    dst_port: 0,
                    proto: (*ip).next_hdr,
                    tos: 0,
                    first_word,
                }
            };
            (parsed, l3 + IPV6_HDR_LEN)
        }
    };

    match parsed.proto {
        PROTO_TCP => {
            let _: *const TcpHdr = unsafe { ptr_at(ctx, l4).ok()? };
        }
        PROTO_UDP | PROTO_UDPLITE => {
            let _: *const UdpHdr = unsafe { ptr_at(ctx, l4).ok()? };
        }
        _ => return None,
    }
    let ports: *const L4Ports = unsafe { ptr_at(ctx, l4).ok()? };
    unsafe {
        parsed.src_port = u16::from_be_bytes((*ports).source);
        parsed.dst_port = u16::from_be_bytes((*ports).dest);
    }
    Some(parsed)
}

#[inline(always)]
fn cache_hit(entry: &DscpCacheEntry, p: &Parsed, ifindex: u32) -> Option<i8> {
    if entry.ifindex == ifindex
        && entry.src_ip == p.src_ip
        && entry.dst_ip == p.dst_ip
        && entry.src_port == p.src_port
        && entry.dst_port == p.dst_port
        && entry.proto == p.proto
    {
        Some(entry.dscp_val)
    } else {
        None
    }
}

/// Scan every slot of the family's table. The best score starts at zero,
/// so a slot needs a positive score to win; equal scores keep the lower
/// index. `Err` only when a slot lookup fails, which aborts the packet.
#[inline(always)]
fn classify(p: &Parsed, family: Family, ifindex: u32) -> Result<i8, ()> {
    let mut best_score = 0u32;
    let mut dscp_val = DSCP_NONE;

    for i in 0..MAX_DSCP_POLICIES {
        let policy = match family {
            Family::V4 => DSCP_POLICIES_V4.get(i),
            Family::V6 => DSCP_POLICIES_V6.get(i),
        }
        .ok_or(())?;

        let Some(score) = score(policy, p, ifindex) else {
            continue;
        };
        if score > best_score {
            best_score = score;
            dscp_val = policy.dscp_val;
        }
    }
    Ok(dscp_val)
}

#[inline(always)]
fn score(policy: &DscpPolicyEntry, p: &Parsed, ifindex: u32) -> Option<u32> {
    if policy.ifindex != ifindex {
        return None;
    }
    let mut matched = 0u32;
    if policy.match_proto != 0 {
        if policy.proto != p.proto {
            return None;
        }
        matched += 1;
    }
    if policy.match_src_ip != 0 {
        if policy.src_ip != p.src_ip {
            return None;
        }
        matched += 1;
    }
    if policy.match_dst_ip != 0 {
        if policy.dst_ip != p.dst_ip {
            return None;
        }
        matched += 1;
    }
    if policy.match_src_port != 0 {
        if policy.src_port != p.src_port {
            return None;
        }
        matched += 1;
    }
    if p.dst_port < policy.dst_port_start || p.dst_port > policy.dst_port_end {
        return None;
    }
    let width = u32::from(policy.dst_port_end - policy.dst_port_start);
    Some(matched * FIELD_WEIGHT + (0xFFFF - width))
}

/// Write the new TOS byte and patch the header checksum incrementally.
#[inline(always)]
fn rewrite_ipv4(ctx: &mut TcContext, old_tos: u8, dscp: u8) -> Result<(), ()> {
    let new_tos = (dscp << 2) | (old_tos & ECN_MASK);
    let csum_off = (EthHdr::LEN + IPV4_CSUM_OFFSET) as u32;

    // The TOS byte is the low-address half of the first header word, so
    // `to_be` places it where the checksum expects it.
    let ret = unsafe {
        bpf_l3_csum_replace(
            ctx.skb.skb as *mut _,
            csum_off,
            u64::from(u16::from(old_tos).to_be()),
            u64::from(u16::from(new_tos).to_be()),
            2,
        )
    };
    if ret != 0 {
        return Err(());
    }

    ctx.store(EthHdr::LEN + IPV4_TOS_OFFSET, &new_tos, 0)
        .map_err(|_| ())
}

/// Rewrite the first IPv6 word and ask the kernel to recompute any
/// checksum covering it.
#[inline(always)]
fn rewrite_ipv6(ctx: &mut TcContext, old_word: u32, dscp: u8) -> Result<(), ()> {
    let new_word = (old_word & IPV6_DSCP_CLEAR_MASK) | (u32::from(dscp) << IPV6_DSCP_SHIFT);
    let bytes = new_word.to_be_bytes();

    let ret = unsafe {
        bpf_skb_store_bytes(
            ctx.skb.skb as *mut _,
            EthHdr::LEN as u32,
            bytes.as_ptr() as *const _,
            4,
            BPF_F_RECOMPUTE_CSUM,
        )
    };
    if ret != 0 {
        return Err(());
    }
    Ok(())
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
