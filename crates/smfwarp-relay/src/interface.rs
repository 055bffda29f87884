use smfwarp_core::{
    config::{Config, InterfaceConfig},
    MacAddr, Tick,
};
use smfwarp_dpd::{DpdTable, DuplicateDetector, TreeTable};
use smfwarp_protocol::{DpdIdentity, DpdType};

/// A forwarding endpoint and its duplicate tables.
///
/// Identification based identifiers go to the configured table flavour.
/// Digests and fragment identifiers always go to an explicit history table:
/// neither increases sequentially. Neither table is shared with any other
/// interface.
#[derive(Debug)]
pub struct Interface {
    config: InterfaceConfig,
    dpd: DpdTable,
    hash_dpd: TreeTable,
}

impl Interface {
    /// Creates an interface with empty tables sized by `engine`.
    pub fn new(config: InterfaceConfig, engine: &Config) -> Self {
        Self {
            config,
            dpd: DpdTable::from_config(engine),
            hash_dpd: TreeTable::new(
                engine.max_flows,
                engine.max_tree_ids_per_flow,
                engine.update_age_max,
            ),
        }
    }

    /// Interface settings.
    pub fn config(&self) -> &InterfaceConfig {
        &self.config
    }

    /// Interface name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Own link address.
    pub fn mac(&self) -> MacAddr {
        self.config.mac
    }

    fn table(&self, dpd_type: DpdType) -> &dyn DuplicateDetector {
        match dpd_type {
            DpdType::SmfH | DpdType::Hash | DpdType::Frag => &self.hash_dpd,
            _ => &self.dpd,
        }
    }

    fn table_mut(&mut self, dpd_type: DpdType) -> &mut dyn DuplicateDetector {
        match dpd_type {
            DpdType::SmfH | DpdType::Hash | DpdType::Frag => &mut self.hash_dpd,
            _ => &mut self.dpd,
        }
    }

    /// Checks and records `identity` in this interface's tables.
    pub fn is_duplicate(&mut self, now: Tick, identity: &DpdIdentity) -> bool {
        self.table_mut(identity.dpd_type).is_duplicate(now, &identity.flow_id, &identity.pkt_id)
    }

    /// Returns true if `identity` is recorded, without recording it.
    pub fn contains(&self, now: Tick, identity: &DpdIdentity) -> bool {
        self.table(identity.dpd_type).contains(now, &identity.flow_id, &identity.pkt_id)
    }

    /// Prunes both tables.
    pub fn prune(&mut self, now: Tick, max_age: u64) -> usize {
        self.dpd.prune(now, max_age) + self.hash_dpd.prune(now, max_age)
    }

    /// Flows tracked across both tables.
    pub fn flow_count(&self) -> usize {
        self.dpd.flow_count() + self.hash_dpd.flow_count()
    }
}
