#![no_main]

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use libfuzzer_sys::fuzz_target;

use domain::dscp::engine::{DscpClassifier, EgressMeta, Outcome, TC_ACT_PIPE};
use domain::dscp::entity::{Dscp, DscpAction, DscpPolicy, IpFamily, PortRange};
use domain::dscp::rewriter::{RewriteOutcome, ipv4_header_checksum};
use domain::dscp::table::PolicyTable;

// Drive the dispatcher with fuzz-derived policies and packets.
//
// Layout (variable-length):
//   [0]    = number of policies (0–16)
//   [1]    = family selector (even = IPv4, odd = IPv6)
//   then   = 12-byte policy chunks, then 9-byte packet headers
//            (cookie: 8 bytes, ifindex: 1 byte) each followed by a
//            1-byte length and that many packet bytes
fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let num_policies = (data[0] as usize) % 17;
    let family = if data[1] & 1 == 0 {
        IpFamily::V4
    } else {
        IpFamily::V6
    };
    let mut cursor = 2;

    let table = Arc::new(PolicyTable::new());
    let mut policies = Vec::new();
    for _ in 0..num_policies {
        if cursor + 12 > data.len() {
            break;
        }
        let c = &data[cursor..cursor + 12];
        cursor += 12;

        let a = u16::from_be_bytes([c[2], c[3]]);
        let b = u16::from_be_bytes([c[4], c[5]]);
        let addr = match family {
            IpFamily::V4 => Ipv4Addr::new(10, 0, c[6], c[7]).to_ipv6_mapped(),
            IpFamily::V6 => Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, u16::from(c[6])),
        };
        let action = match Dscp::new(c[9] % 64) {
            Ok(dscp) if c[9] & 0x80 == 0 => DscpAction::Mark(dscp),
            _ => DscpAction::Keep,
        };
        policies.push(DscpPolicy {
            if_index: u32::from(c[0] % 4),
            protocol: (c[1] & 1 != 0).then_some(c[8]),
            src_ip: (c[1] & 2 != 0).then_some(addr),
            dst_ip: (c[1] & 4 != 0).then_some(addr),
            src_port: (c[1] & 8 != 0).then_some(u16::from(c[10])),
            dst_ports: PortRange {
                start: a.min(b),
                end: a.max(b),
            },
            action,
        });
    }
    if table.reload(family, &policies).is_err() {
        return;
    }

    let mut classifier: DscpClassifier = DscpClassifier::new(table);
    while cursor + 10 <= data.len() {
        let cookie = u64::from_le_bytes([
            data[cursor],
            data[cursor + 1],
            data[cursor + 2],
            data[cursor + 3],
            data[cursor + 4],
            data[cursor + 5],
            data[cursor + 6],
            data[cursor + 7],
        ]);
        let if_index = u32::from(data[cursor + 8] % 4);
        let len = data[cursor + 9] as usize;
        cursor += 10;
        let end = (cursor + len).min(data.len());
        let mut packet = data[cursor..end].to_vec();
        cursor = end;

        let before = packet.clone();
        let outcome = classifier.process(
            &mut packet,
            EgressMeta {
                if_index,
                family,
                socket_cookie: cookie,
            },
        );
        assert_eq!(outcome.verdict().as_tc_action(), TC_ACT_PIPE);

        match outcome.rewrite() {
            RewriteOutcome::Unchanged => assert_eq!(packet, before),
            RewriteOutcome::Ipv4 { .. } => {
                assert_eq!(packet.len(), before.len());
                // A header whose checksum was right before is still right.
                if stored_csum(&before) == ipv4_header_checksum(&before[14..34]) {
                    assert!(csum_eq(
                        stored_csum(&packet),
                        ipv4_header_checksum(&packet[14..34])
                    ));
                }
            }
            RewriteOutcome::Ipv6 { .. } => {
                assert_eq!(packet.len(), before.len());
                assert_eq!(packet[14] >> 4, 6);
            }
        }
        if let Outcome::PassThrough(_) = outcome {
            assert_eq!(packet, before);
        }
    }

    let stats = classifier.stats();
    assert_eq!(
        stats.packets,
        stats.passthrough() + stats.cache_hits + stats.cache_misses - stats.aborted
    );
});

fn stored_csum(packet: &[u8]) -> u16 {
    u16::from_be_bytes([packet[24], packet[25]])
}

/// Equal as one's-complement values (0x0000 and 0xFFFF are both zero).
fn csum_eq(a: u16, b: u16) -> bool {
    a == b || (a ^ b == 0xFFFF && (a == 0 || b == 0))
}
