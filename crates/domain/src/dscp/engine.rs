//! Per-packet dispatcher.
//!
//! `parse -> cache lookup -> (hit) rewrite` or
//! `parse -> cache lookup -> (miss) match -> cache store -> rewrite`.
//! Every path ends with the packet continuing; nothing here drops.

use std::sync::Arc;

use serde::Serialize;

use super::cache::{DEFAULT_CACHE_SLOTS, FlowCache};
use super::entity::{DscpAction, IpFamily};
use super::matcher;
use super::parser::{HeaderView, ParseReject};
use super::rewriter::{self, RewriteOutcome};
use super::table::PolicyTable;

/// `TC_ACT_PIPE`: hand the packet to the next action in the chain.
pub const TC_ACT_PIPE: i32 = 3;

/// Ancillary data supplied by the egress hook with each packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EgressMeta {
    pub if_index: u32,
    pub family: IpFamily,
    /// Per-socket identifier, stable for the lifetime of a connection.
    /// 0 means unavailable.
    pub socket_cookie: u64,
}

/// Why a packet was left alone without consulting any policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReason {
    Unparsed(ParseReject),
    NoFlowId,
    /// A policy slot could not be read mid-scan.
    Aborted,
}

/// What the hook tells the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
}

impl Verdict {
    pub fn as_tc_action(self) -> i32 {
        match self {
            Self::Continue => TC_ACT_PIPE,
        }
    }
}

/// Result of processing one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    PassThrough(PassReason),
    CacheHit {
        action: DscpAction,
        rewrite: RewriteOutcome,
    },
    /// Resolved by a policy scan. `slot` is `None` when nothing was eligible.
    Classified {
        action: DscpAction,
        slot: Option<usize>,
        rewrite: RewriteOutcome,
    },
}

impl Outcome {
    pub fn verdict(&self) -> Verdict {
        Verdict::Continue
    }

    pub fn action(&self) -> Option<DscpAction> {
        match *self {
            Self::PassThrough(_) => None,
            Self::CacheHit { action, .. } | Self::Classified { action, .. } => Some(action),
        }
    }

    pub fn rewrite(&self) -> RewriteOutcome {
        match *self {
            Self::PassThrough(_) => RewriteOutcome::Unchanged,
            Self::CacheHit { rewrite, .. } | Self::Classified { rewrite, .. } => rewrite,
        }
    }
}

/// Counters owned by one classifier. Merge them to get totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassifierStats {
    pub packets: u64,
    pub passthrough_unparsed: u64,
    pub passthrough_no_flow_id: u64,
    pub aborted: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub rewritten: u64,
}

impl ClassifierStats {
    pub fn merge(&mut self, other: &Self) {
        self.packets += other.packets;
        self.passthrough_unparsed += other.passthrough_unparsed;
        self.passthrough_no_flow_id += other.passthrough_no_flow_id;
        self.aborted += other.aborted;
        self.cache_hits += other.cache_hits;
        self.cache_misses += other.cache_misses;
        self.rewritten += other.rewritten;
    }

    pub fn passthrough(&self) -> u64 {
        self.passthrough_unparsed + self.passthrough_no_flow_id + self.aborted
    }
}

/// Egress classifier for one worker.
///
/// Owns its flow cache; shares only the policy table. Create one per
/// thread and move it there; never put one behind a lock. The cache is
/// flushed whenever the table's cache epoch has moved since the last packet.
#[derive(Debug)]
pub struct DscpClassifier<const N: usize = { DEFAULT_CACHE_SLOTS }> {
    cache: FlowCache<N>,
    table: Arc<PolicyTable>,
    /// Table cache epoch the cache contents belong to.
    epoch: u64,
    stats: ClassifierStats,
}

impl<const N: usize> DscpClassifier<N> {
    pub fn new(table: Arc<PolicyTable>) -> Self {
        Self {
            cache: FlowCache::new(),
            epoch: table.cache_epoch(),
            table,
            stats: ClassifierStats::default(),
        }
    }

    /// Classify `packet` (starting at the Ethernet header) and rewrite its
    /// traffic class in place when a policy says so.
    pub fn process(&mut self, packet: &mut [u8], meta: EgressMeta) -> Outcome {
        self.stats.packets += 1;

        let view = match HeaderView::parse(packet, meta.family, meta.if_index) {
            Ok(view) => view,
            Err(reject) => {
                self.stats.passthrough_unparsed += 1;
                return Outcome::PassThrough(PassReason::Unparsed(reject));
            }
        };

        let epoch = self.table.cache_epoch();
        if epoch != self.epoch {
            self.cache.flush();
            self.epoch = epoch;
        }

        let Some(slot) = self.cache.lookup(meta.socket_cookie) else {
            self.stats.passthrough_no_flow_id += 1;
            return Outcome::PassThrough(PassReason::NoFlowId);
        };

        if let Some(action) = slot.hit(&view.key) {
            self.stats.cache_hits += 1;
            let rewrite = rewriter::apply(packet, &view.field, action);
            self.count_rewrite(&rewrite);
            return Outcome::CacheHit { action, rewrite };
        }
        self.stats.cache_misses += 1;

        let outcome = matcher::classify(&view.key, meta.family, self.table.as_ref());
        let Some(action) = outcome.action() else {
            self.stats.aborted += 1;
            return Outcome::PassThrough(PassReason::Aborted);
        };
        slot.store(view.key, action);

        let rewrite = rewriter::apply(packet, &view.field, action);
        self.count_rewrite(&rewrite);
        Outcome::Classified {
            action,
            slot: outcome.slot(),
            rewrite,
        }
    }

    pub fn stats(&self) -> &ClassifierStats {
        &self.stats
    }

    /// Return the counters accumulated so far and reset them.
    pub fn take_stats(&mut self) -> ClassifierStats {
        std::mem::take(&mut self.stats)
    }

    pub fn cache(&self) -> &FlowCache<N> {
        &self.cache
    }

    /// Drop every cached decision, e.g. after the policy table changed.
    pub fn flush_cache(&mut self) {
        self.cache.flush();
    }

    pub fn table(&self) -> &Arc<PolicyTable> {
        &self.table
    }

    fn count_rewrite(&mut self, rewrite: &RewriteOutcome) {
        if rewrite.is_rewritten() {
            self.stats.rewritten += 1;
        }
    }
}
