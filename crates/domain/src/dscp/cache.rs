//! Per-worker flow result cache.
//!
//! A direct-mapped table indexed by `socket_cookie % N`. Each slot remembers
//! the last flow that hashed to it and the action resolved for that flow.
//! Collisions silently evict. The cache is never shared: every classifier
//! owns one, so no slot is ever contended.

use ebpf_common::dscp::DSCP_CACHE_SIZE;

use super::entity::{DscpAction, FlowKey};

/// Slot count used when a classifier does not pick one.
pub const DEFAULT_CACHE_SLOTS: usize = DSCP_CACHE_SIZE as usize;

/// Key and resolved action of the last flow that hashed to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: FlowKey,
    pub action: DscpAction,
}

/// One cache slot. Empty until the first flow lands in it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheSlot {
    entry: Option<CacheEntry>,
}

impl CacheSlot {
    /// Cached action if the stored key is identical to `key`.
    pub fn hit(&self, key: &FlowKey) -> Option<DscpAction> {
        self.entry
            .as_ref()
            .filter(|e| e.key == *key)
            .map(|e| e.action)
    }

    /// Overwrite the slot, evicting whatever flow was there.
    pub fn store(&mut self, key: FlowKey, action: DscpAction) {
        self.entry = Some(CacheEntry { key, action });
    }

    pub fn entry(&self) -> Option<&CacheEntry> {
        self.entry.as_ref()
    }
}

/// Fixed-capacity direct-mapped cache. `N` must be a power of two.
#[derive(Debug, Clone)]
pub struct FlowCache<const N: usize = { DEFAULT_CACHE_SLOTS }> {
    slots: [CacheSlot; N],
}

impl<const N: usize> FlowCache<N> {
    const POWER_OF_TWO: () = assert!(N.is_power_of_two(), "cache size must be a power of two");

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::POWER_OF_TWO;
        Self {
            slots: [CacheSlot::default(); N],
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Slot for `flow_id`. A flow id of 0 means "unavailable" and yields
    /// no slot.
    pub fn lookup(&mut self, flow_id: u64) -> Option<&mut CacheSlot> {
        if flow_id == 0 {
            return None;
        }
        Some(&mut self.slots[Self::index(flow_id)])
    }

    /// Read-only view of the slot `flow_id` maps to.
    pub fn peek(&self, flow_id: u64) -> Option<&CacheEntry> {
        if flow_id == 0 {
            return None;
        }
        self.slots[Self::index(flow_id)].entry()
    }

    /// Forget every cached decision.
    pub fn flush(&mut self) {
        self.slots = [CacheSlot::default(); N];
    }

    #[inline]
    fn index(flow_id: u64) -> usize {
        // N is a power of two, so the mask equals `flow_id % N`.
        (flow_id & (N as u64 - 1)) as usize
    }
}

impl<const N: usize> Default for FlowCache<N> {
    fn default() -> Self {
        Self::new()
    }
}
