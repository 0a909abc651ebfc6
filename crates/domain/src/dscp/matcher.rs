//! Policy scoring and winner selection.
//!
//! Every slot of the family's table is scored against the flow key. A slot is
//! eligible when its interface matches, its destination port range contains
//! the packet's destination port, and every enabled field matches. Among
//! eligible slots the highest score wins; on equal scores the lower index
//! keeps the win. The running best starts at zero, so an eligible slot
//! only wins with a score above zero: a bare interface rule over the full
//! port range scores exactly zero and never rewrites.
//!
//! ```text
//! score = (matched_fields << 16) + (0xFFFF - (dst_port_end - dst_port_start))
//! ```
//!
//! `matched_fields` counts enabled-and-matched fields among protocol, source
//! address, destination address and source port (0..=4). Field matches
//! always outweigh port-range width; width only separates equal match counts.

use super::entity::{DscpAction, DscpPolicy, FlowKey, IpFamily};
use super::table::PolicyLookup;

/// Weight of one matched field. Larger than any port-range bonus.
const FIELD_WEIGHT: u32 = 1 << 16;

/// Result of scanning one policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// No slot was eligible.
    NoMatch,
    /// `slot` won with `score`.
    Matched {
        slot: usize,
        score: u32,
        action: DscpAction,
    },
    /// Reading `slot` failed; the packet must not be rewritten or cached.
    Aborted { slot: usize },
}

impl MatchOutcome {
    /// Action to apply and cache. `None` only for [`MatchOutcome::Aborted`].
    pub fn action(&self) -> Option<DscpAction> {
        match *self {
            Self::NoMatch => Some(DscpAction::Keep),
            Self::Matched { action, .. } => Some(action),
            Self::Aborted { .. } => None,
        }
    }

    pub fn slot(&self) -> Option<usize> {
        match *self {
            Self::Matched { slot, .. } => Some(slot),
            _ => None,
        }
    }
}

/// Score `policy` against `key`. `None` if the policy is not eligible.
pub fn score(policy: &DscpPolicy, key: &FlowKey) -> Option<u32> {
    if policy.if_index != key.if_index || !policy.dst_ports.contains(key.dst_port) {
        return None;
    }

    let mut matched = 0u32;
    for field in [
        policy.protocol.map(|p| p == key.protocol),
        policy.src_ip.map(|ip| ip == key.src_ip),
        policy.dst_ip.map(|ip| ip == key.dst_ip),
        policy.src_port.map(|p| p == key.src_port),
    ] {
        match field {
            Some(true) => matched += 1,
            Some(false) => return None,
            None => {}
        }
    }

    let width_bonus = u32::from(u16::MAX - policy.dst_ports.width());
    Some(matched * FIELD_WEIGHT + width_bonus)
}

/// Scan every slot of `family` and pick the winner.
pub fn classify<T>(key: &FlowKey, family: IpFamily, table: &T) -> MatchOutcome
where
    T: PolicyLookup + ?Sized,
{
    let mut best_score = 0u32;
    let mut winner: Option<(usize, DscpAction)> = None;

    for slot in 0..table.capacity() {
        let Some(policy) = table.get(family, slot) else {
            return MatchOutcome::Aborted { slot };
        };
        let Some(s) = score(&policy, key) else {
            continue;
        };
        if s > best_score {
            best_score = s;
            winner = Some((slot, policy.action));
        }
    }

    match winner {
        Some((slot, action)) => MatchOutcome::Matched {
            slot,
            score: best_score,
            action,
        },
        None => MatchOutcome::NoMatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dscp::entity::{Dscp, PROTO_TCP, PROTO_UDP, PortRange};
    use crate::dscp::table::PolicyTable;
    use std::net::{Ipv4Addr, Ipv6Addr};

    const IF: u32 = 2;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> Ipv6Addr {
        Ipv4Addr::new(a, b, c, d).to_ipv6_mapped()
    }

    fn key(dst_port: u16) -> FlowKey {
        FlowKey {
            src_ip: v4(10, 0, 0, 1),
            dst_ip: v4(192, 0, 2, 10),
            if_index: IF,
            src_port: 40000,
            dst_port,
            protocol: PROTO_TCP,
        }
    }

    fn mark(v: u8) -> DscpAction {
        DscpAction::Mark(Dscp::new(v).unwrap())
    }

    fn any_port(dscp: u8) -> DscpPolicy {
        DscpPolicy {
            if_index: IF,
            action: mark(dscp),
            ..DscpPolicy::noop()
        }
    }

    fn table(policies: &[DscpPolicy]) -> PolicyTable {
        let t = PolicyTable::new();
        t.reload(IpFamily::V4, policies).unwrap();
        t
    }

    #[test]
    fn empty_table_is_no_match() {
        let t = PolicyTable::new();
        let out = classify(&key(80), IpFamily::V4, &t);
        assert_eq!(out, MatchOutcome::NoMatch);
        assert_eq!(out.action(), Some(DscpAction::Keep));
    }

    #[test]
    fn interface_must_match() {
        let p = DscpPolicy {
            if_index: IF + 1,
            ..any_port(10)
        };
        assert_eq!(score(&p, &key(80)), None);
    }

    #[test]
    fn cleared_slot_is_never_eligible() {
        let mut k = key(80);
        k.if_index = 0;
        assert_eq!(score(&DscpPolicy::noop(), &k), None);
    }

    #[test]
    fn bare_full_range_rule_scores_zero_and_never_wins() {
        let t = table(&[any_port(10)]);
        assert_eq!(score(&any_port(10), &key(80)), Some(0));
        let out = classify(&key(80), IpFamily::V4, &t);
        assert_eq!(out, MatchOutcome::NoMatch);
        assert_eq!(out.action(), Some(DscpAction::Keep));
    }

    #[test]
    fn narrowest_non_full_range_wins_with_score_one() {
        let p = DscpPolicy {
            dst_ports: PortRange { start: 0, end: 65534 },
            ..any_port(12)
        };
        let t = table(&[any_port(10), p]);
        assert_eq!(
            classify(&key(80), IpFamily::V4, &t),
            MatchOutcome::Matched {
                slot: 1,
                score: 1,
                action: mark(12),
            }
        );
    }

    #[test]
    fn narrower_range_outscores_full_range() {
        let narrow = DscpPolicy {
            dst_ports: PortRange::single(80),
            ..any_port(20)
        };
        let t = table(&[any_port(10), narrow]);
        let out = classify(&key(80), IpFamily::V4, &t);
        assert_eq!(out.slot(), Some(1));
        assert_eq!(out.action(), Some(mark(20)));
    }

    #[test]
    fn equal_scores_keep_lower_index() {
        let p = DscpPolicy {
            protocol: Some(PROTO_TCP),
            dst_ports: PortRange {
                start: 1,
                end: 1024,
            },
            ..any_port(0)
        };
        let t = table(&[
            DscpPolicy {
                if_index: 9,
                ..any_port(1)
            },
            DscpPolicy {
                if_index: 9,
                ..any_port(1)
            },
            DscpPolicy {
                action: mark(30),
                ..p
            },
            DscpPolicy {
                action: mark(40),
                ..p
            },
        ]);
        let out = classify(&key(443), IpFamily::V4, &t);
        assert_eq!(out.slot(), Some(2));
        assert_eq!(out.action(), Some(mark(30)));
    }

    #[test]
    fn field_matches_dominate_range_width() {
        // One matched field on the full range beats zero fields on one port.
        let proto_only = DscpPolicy {
            protocol: Some(PROTO_TCP),
            ..any_port(10)
        };
        let single_port = DscpPolicy {
            dst_ports: PortRange::single(80),
            ..any_port(20)
        };
        assert!(score(&proto_only, &key(80)) > score(&single_port, &key(80)));

        let t = table(&[single_port, proto_only]);
        assert_eq!(classify(&key(80), IpFamily::V4, &t).slot(), Some(1));
    }

    #[test]
    fn every_enabled_field_adds_one_unit() {
        let mut p = any_port(1);
        let k = key(80);
        let base = score(&p, &k).unwrap();

        p.protocol = Some(PROTO_TCP);
        p.src_ip = Some(k.src_ip);
        p.dst_ip = Some(k.dst_ip);
        p.src_port = Some(k.src_port);
        assert_eq!(score(&p, &k), Some(base + 4 * FIELD_WEIGHT));
    }

    #[test]
    fn mismatched_enabled_field_disqualifies() {
        let k = key(80);
        for p in [
            DscpPolicy {
                protocol: Some(PROTO_UDP),
                ..any_port(1)
            },
            DscpPolicy {
                src_ip: Some(v4(10, 0, 0, 99)),
                ..any_port(1)
            },
            DscpPolicy {
                dst_ip: Some(v4(192, 0, 2, 99)),
                ..any_port(1)
            },
            DscpPolicy {
                src_port: Some(1),
                ..any_port(1)
            },
        ] {
            assert_eq!(score(&p, &k), None, "{p:?}");
        }
    }

    #[test]
    fn port_range_boundaries() {
        let p = DscpPolicy {
            dst_ports: PortRange {
                start: 1000,
                end: 2000,
            },
            ..any_port(8)
        };
        assert!(score(&p, &key(1000)).is_some());
        assert!(score(&p, &key(2000)).is_some());
        assert!(score(&p, &key(999)).is_none());
        assert!(score(&p, &key(2001)).is_none());
    }

    #[test]
    fn later_higher_score_replaces_earlier_winner() {
        let weak = any_port(1);
        let strong = DscpPolicy {
            protocol: Some(PROTO_TCP),
            dst_ip: Some(v4(192, 0, 2, 10)),
            ..any_port(2)
        };
        let t = table(&[weak, any_port(3), strong]);
        assert_eq!(classify(&key(80), IpFamily::V4, &t).slot(), Some(2));
    }

    #[test]
    fn keep_action_can_win() {
        let allow = DscpPolicy {
            dst_ports: PortRange::single(22),
            action: DscpAction::Keep,
            ..any_port(0)
        };
        let t = table(&[any_port(10), allow]);
        let out = classify(&key(22), IpFamily::V4, &t);
        assert_eq!(out.slot(), Some(1));
        assert_eq!(out.action(), Some(DscpAction::Keep));
    }

    #[test]
    fn families_are_separate_tables() {
        let t = table(&[any_port(10)]);
        assert_eq!(classify(&key(80), IpFamily::V6, &t), MatchOutcome::NoMatch);
    }

    struct Broken {
        fails_at: usize,
    }

    impl PolicyLookup for Broken {
        fn capacity(&self) -> usize {
            8
        }

        fn get(&self, _family: IpFamily, index: usize) -> Option<DscpPolicy> {
            (index != self.fails_at).then(|| any_port(10))
        }
    }

    #[test]
    fn failed_slot_read_aborts() {
        let out = classify(&key(80), IpFamily::V4, &Broken { fails_at: 3 });
        assert_eq!(out, MatchOutcome::Aborted { slot: 3 });
        assert_eq!(out.action(), None);
    }
}
