use std::collections::HashSet;

use smfwarp_core::MacAddr;

/// How the sender of a packet relates to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderKind {
    /// The sender selected this node as a multi-point relay.
    Selector,
    /// Symmetric neighbor that did not select this node.
    Neighbor,
    /// Not known as a symmetric neighbor (possibly an asymmetric link).
    Unknown,
}

/// MPR selector and symmetric neighbor sets, keyed by link address.
///
/// Both sets are owned by the routing protocol and replaced wholesale.
#[derive(Debug, Clone, Default)]
pub struct NeighborTable {
    selectors: HashSet<MacAddr>,
    neighbors: HashSet<MacAddr>,
}

impl NeighborTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the MPR selector set.
    pub fn set_selectors(&mut self, selectors: impl IntoIterator<Item = MacAddr>) {
        self.selectors = selectors.into_iter().collect();
    }

    /// Replaces the symmetric neighbor set.
    pub fn set_neighbors(&mut self, neighbors: impl IntoIterator<Item = MacAddr>) {
        self.neighbors = neighbors.into_iter().collect();
    }

    /// Returns true if `mac` selected this node as a relay.
    pub fn is_selector(&self, mac: &MacAddr) -> bool {
        self.selectors.contains(mac)
    }

    /// Returns true if `mac` is a symmetric neighbor.
    pub fn is_neighbor(&self, mac: &MacAddr) -> bool {
        self.neighbors.contains(mac)
    }

    /// Classifies a packet sender. Selectors are symmetric neighbors by
    /// definition, whether or not the neighbor set lists them.
    pub fn classify(&self, mac: &MacAddr) -> SenderKind {
        if self.is_selector(mac) {
            SenderKind::Selector
        } else if self.is_neighbor(mac) {
            SenderKind::Neighbor
        } else {
            SenderKind::Unknown
        }
    }

    /// Number of MPR selectors.
    pub fn selector_count(&self) -> usize {
        self.selectors.len()
    }

    /// Number of symmetric neighbors.
    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }
}
