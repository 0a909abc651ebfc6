//! Fixed-capacity policy tables, one per address family.
//!
//! Slots are addressed by index and never removed; clearing writes the
//! no-op policy. Each slot is swapped atomically, so a reader always sees
//! one whole policy. Consistency across slots during a reload is not
//! guaranteed.
//!
//! Classifiers keep cached decisions across table writes. Bumping the cache
//! epoch with [`PolicyTable::invalidate_caches`] makes every classifier
//! drop its cache before the next lookup.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use ebpf_common::dscp::{DscpPolicyEntry, MAX_DSCP_POLICIES};

use super::entity::{DscpPolicy, IpFamily};
use super::error::DscpError;

/// Slots per family.
pub const POLICY_CAPACITY: usize = MAX_DSCP_POLICIES as usize;

/// Read access used by the matcher.
pub trait PolicyLookup {
    /// Number of slots scanned per family.
    fn capacity(&self) -> usize;

    /// Snapshot of one slot. `None` when the slot cannot be read, which
    /// aborts classification of the current packet.
    fn get(&self, family: IpFamily, index: usize) -> Option<DscpPolicy>;
}

pub struct PolicyTable {
    v4: [ArcSwap<DscpPolicy>; POLICY_CAPACITY],
    v6: [ArcSwap<DscpPolicy>; POLICY_CAPACITY],
    cache_epoch: AtomicU64,
}

impl PolicyTable {
    /// Both tables filled with no-op policies.
    pub fn new() -> Self {
        Self {
            v4: std::array::from_fn(|_| ArcSwap::from_pointee(DscpPolicy::noop())),
            v6: std::array::from_fn(|_| ArcSwap::from_pointee(DscpPolicy::noop())),
            cache_epoch: AtomicU64::new(0),
        }
    }

    /// Current cache epoch. Classifiers flush when it moves.
    pub fn cache_epoch(&self) -> u64 {
        self.cache_epoch.load(Ordering::Acquire)
    }

    /// Tell every classifier reading this table to drop its cached
    /// decisions. Call after the slot writes it should cover.
    pub fn invalidate_caches(&self) {
        self.cache_epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Write one slot.
    pub fn set(&self, family: IpFamily, index: usize, policy: DscpPolicy) -> Result<(), DscpError> {
        policy.validate(family)?;
        self.slot(family, index)?.store(Arc::new(policy));
        Ok(())
    }

    /// Reset one slot to the no-op policy.
    pub fn clear(&self, family: IpFamily, index: usize) -> Result<(), DscpError> {
        self.slot(family, index)?
            .store(Arc::new(DscpPolicy::noop()));
        Ok(())
    }

    /// Reset every slot of `family`.
    pub fn clear_all(&self, family: IpFamily) {
        for slot in self.slots(family) {
            slot.store(Arc::new(DscpPolicy::noop()));
        }
    }

    /// Replace the whole table for `family`: `policies[i]` lands in slot `i`
    /// and every slot past the list is cleared. Nothing is written unless
    /// every policy is valid and the list fits.
    pub fn reload(&self, family: IpFamily, policies: &[DscpPolicy]) -> Result<(), DscpError> {
        Self::check(family, policies)?;

        for (i, slot) in self.slots(family).iter().enumerate() {
            let policy = policies.get(i).copied().unwrap_or_else(DscpPolicy::noop);
            slot.store(Arc::new(policy));
        }
        Ok(())
    }

    /// Validate a full policy list for `family` without touching any slot.
    pub fn check(family: IpFamily, policies: &[DscpPolicy]) -> Result<(), DscpError> {
        if policies.len() > POLICY_CAPACITY {
            return Err(DscpError::TooManyPolicies {
                family,
                count: policies.len(),
                capacity: POLICY_CAPACITY,
            });
        }
        policies.iter().try_for_each(|p| p.validate(family))
    }

    /// Snapshot of every slot of `family`, in index order.
    pub fn policies(&self, family: IpFamily) -> Vec<DscpPolicy> {
        self.slots(family).iter().map(|s| **s.load()).collect()
    }

    /// Number of slots holding something other than the no-op policy.
    pub fn active_count(&self, family: IpFamily) -> usize {
        self.slots(family)
            .iter()
            .filter(|s| **s.load() != DscpPolicy::noop())
            .count()
    }

    /// Kernel-layout image of `family`, ready to be written into the
    /// `DSCP_POLICIES_V4` / `DSCP_POLICIES_V6` arrays.
    pub fn to_ebpf_entries(&self, family: IpFamily) -> [DscpPolicyEntry; POLICY_CAPACITY] {
        let mut out = [DscpPolicyEntry::noop(); POLICY_CAPACITY];
        for (dst, slot) in out.iter_mut().zip(self.slots(family)) {
            *dst = slot.load().to_ebpf_entry();
        }
        out
    }

    fn slots(&self, family: IpFamily) -> &[ArcSwap<DscpPolicy>; POLICY_CAPACITY] {
        match family {
            IpFamily::V4 => &self.v4,
            IpFamily::V6 => &self.v6,
        }
    }

    fn slot(&self, family: IpFamily, index: usize) -> Result<&ArcSwap<DscpPolicy>, DscpError> {
        self.slots(family)
            .get(index)
            .ok_or(DscpError::SlotOutOfRange {
                family,
                index,
                capacity: POLICY_CAPACITY,
            })
    }
}

impl PolicyLookup for PolicyTable {
    fn capacity(&self) -> usize {
        POLICY_CAPACITY
    }

    fn get(&self, family: IpFamily, index: usize) -> Option<DscpPolicy> {
        self.slots(family).get(index).map(|s| **s.load())
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PolicyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyTable")
            .field("v4_active", &self.active_count(IpFamily::V4))
            .field("v6_active", &self.active_count(IpFamily::V6))
            .field("cache_epoch", &self.cache_epoch())
            .finish()
    }
}
