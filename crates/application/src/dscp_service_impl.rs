use std::sync::Arc;

use domain::common::error::DomainError;
use domain::dscp::engine::{ClassifierStats, DscpClassifier};
use domain::dscp::entity::{DscpPolicy, IpFamily};
use domain::dscp::error::DscpError;
use domain::dscp::table::{POLICY_CAPACITY, PolicyTable};

/// Application-level DSCP marking service.
///
/// Keeps the administrator's configured policies, pushes them into the
/// shared [`PolicyTable`] that every worker classifier reads, and collects
/// worker statistics. Designed to be wrapped in `RwLock` for shared access.
pub struct DscpAppService {
    table: Arc<PolicyTable>,
    configured_v4: [DscpPolicy; POLICY_CAPACITY],
    configured_v6: [DscpPolicy; POLICY_CAPACITY],
    enabled: bool,
    stats: ClassifierStats,
}

impl DscpAppService {
    /// Wrap `table`. Whatever it already holds becomes the configured state.
    pub fn new(table: Arc<PolicyTable>) -> Self {
        let snapshot = |family: IpFamily| {
            let mut out = [DscpPolicy::noop(); POLICY_CAPACITY];
            for (dst, p) in out.iter_mut().zip(table.policies(family)) {
                *dst = p;
            }
            out
        };
        Self {
            configured_v4: snapshot(IpFamily::V4),
            configured_v6: snapshot(IpFamily::V6),
            table,
            enabled: true,
            stats: ClassifierStats::default(),
        }
    }

    /// Return whether marking is enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable marking. Disabled means both tables hold only
    /// no-op policies; the configured policies are restored on re-enable.
    /// Either way every classifier drops its cached decisions, so flows a
    /// worker already resolved follow the switch on their next packet.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        for family in [IpFamily::V4, IpFamily::V6] {
            if enabled {
                self.push(family);
            } else {
                self.table.clear_all(family);
            }
        }
        self.table.invalidate_caches();
        tracing::info!(enabled, "DSCP marking toggled");
    }

    /// Replace every policy of `family`. List position is slot index.
    pub fn reload_policies(
        &mut self,
        family: IpFamily,
        policies: Vec<DscpPolicy>,
    ) -> Result<(), DomainError> {
        if let Err(e) = PolicyTable::check(family, &policies) {
            tracing::warn!(%family, count = policies.len(), "rejected DSCP policy reload: {e}");
            return Err(e.into());
        }

        let configured = self.configured_mut(family);
        *configured = [DscpPolicy::noop(); POLICY_CAPACITY];
        for (dst, p) in configured.iter_mut().zip(&policies) {
            *dst = *p;
        }
        if self.enabled {
            self.push(family);
        }

        tracing::info!(
            %family,
            count = policies.len(),
            enabled = self.enabled,
            "DSCP policies reloaded"
        );
        Ok(())
    }

    /// Write one slot.
    pub fn set_policy(
        &mut self,
        family: IpFamily,
        index: usize,
        policy: DscpPolicy,
    ) -> Result<(), DomainError> {
        if let Err(e) = policy.validate(family) {
            tracing::warn!(%family, index, "rejected DSCP policy: {e}");
            return Err(e.into());
        }
        *self.configured_slot(family, index)? = policy;
        if self.enabled {
            self.table.set(family, index, policy)?;
        }
        tracing::debug!(%family, index, action = ?policy.action, "DSCP policy set");
        Ok(())
    }

    /// Reset one slot to the no-op policy.
    pub fn clear_policy(&mut self, family: IpFamily, index: usize) -> Result<(), DomainError> {
        *self.configured_slot(family, index)? = DscpPolicy::noop();
        self.table.clear(family, index)?;
        tracing::debug!(%family, index, "DSCP policy cleared");
        Ok(())
    }

    /// Configured policies of `family`, in slot order, including no-op slots.
    pub fn policies(&self, family: IpFamily) -> Vec<DscpPolicy> {
        match family {
            IpFamily::V4 => self.configured_v4.to_vec(),
            IpFamily::V6 => self.configured_v6.to_vec(),
        }
    }

    /// Number of configured (non-no-op) policies of `family`.
    pub fn policy_count(&self, family: IpFamily) -> usize {
        self.policies(family)
            .iter()
            .filter(|p| **p != DscpPolicy::noop())
            .count()
    }

    /// A fresh classifier for a new worker. Each worker must own its own.
    pub fn classifier(&self) -> DscpClassifier {
        DscpClassifier::new(Arc::clone(&self.table))
    }

    /// One classifier per worker shard.
    pub fn classifiers(&self, workers: usize) -> Vec<DscpClassifier> {
        (0..workers).map(|_| self.classifier()).collect()
    }

    /// Fold a worker's counters into the service totals.
    pub fn record_stats(&mut self, stats: &ClassifierStats) {
        self.stats.merge(stats);
    }

    /// Totals of every recorded worker.
    pub fn stats(&self) -> ClassifierStats {
        self.stats
    }

    pub fn table(&self) -> &Arc<PolicyTable> {
        &self.table
    }

    fn push(&self, family: IpFamily) {
        let configured = match family {
            IpFamily::V4 => &self.configured_v4,
            IpFamily::V6 => &self.configured_v6,
        };
        // Every configured policy was validated on the way in.
        if let Err(e) = self.table.reload(family, configured) {
            tracing::warn!(%family, "failed to apply DSCP policies: {e}");
        }
    }

    fn configured_mut(&mut self, family: IpFamily) -> &mut [DscpPolicy; POLICY_CAPACITY] {
        match family {
            IpFamily::V4 => &mut self.configured_v4,
            IpFamily::V6 => &mut self.configured_v6,
        }
    }

    fn configured_slot(
        &mut self,
        family: IpFamily,
        index: usize,
    ) -> Result<&mut DscpPolicy, DscpError> {
        self.configured_mut(family)
            .get_mut(index)
            .ok_or(DscpError::SlotOutOfRange {
                family,
                index,
                capacity: POLICY_CAPACITY,
            })
    }
}
