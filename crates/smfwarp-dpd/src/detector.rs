//! Duplicate detection tables.
//!
//! Two interchangeable flavours sit behind [`DuplicateDetector`]:
//! - [`WindowTable`]: one [`SlidingWindow`] per flow, for identifiers that
//!   increase sequentially (IPv4 ID, IPSec sequence, SMF_DPD identifiers).
//! - [`TreeTable`]: an explicit per-flow history of identifiers, for
//!   identifiers with no order (hash digests) or when configured.
//!
//! The flavour is chosen once per interface; [`DpdTable`] is the tagged union
//! the interface stores.

use std::collections::{BTreeMap, VecDeque};

use smfwarp_core::{
    config::{Config, DpdTableKind},
    error::Result,
    Tick,
};

use crate::{
    bits::{FlowKey, PacketId},
    flow_cache::FlowCache,
    window::SlidingWindow,
};

/// Capability shared by the duplicate table flavours.
pub trait DuplicateDetector {
    /// Checks `pkt_id` in `flow` and records it.
    ///
    /// Returns true for a duplicate. When the table cannot track the
    /// identifier it answers true: suppressing a packet is safer than
    /// forwarding one that cannot be checked.
    fn is_duplicate(&mut self, now: Tick, flow: &FlowKey, pkt_id: &PacketId) -> bool;

    /// Returns true if `pkt_id` is recorded in `flow`, without recording it.
    fn contains(&self, now: Tick, flow: &FlowKey, pkt_id: &PacketId) -> bool;

    /// Removes flows idle for more than `max_age` ticks, returning how many.
    fn prune(&mut self, now: Tick, max_age: u64) -> usize;

    /// Number of flows currently tracked.
    fn flow_count(&self) -> usize;
}

/// Sliding window per flow.
#[derive(Debug)]
pub struct WindowTable {
    flows: FlowCache<SlidingWindow>,
    window_size: u32,
    past_max: u32,
}

impl WindowTable {
    /// Creates a table; window parameters are scaled down per flow to fit
    /// the identifier width.
    pub fn new(window_size: u32, past_max: u32, max_flows: usize) -> Self {
        Self { flows: FlowCache::new(max_flows), window_size, past_max }
    }

    fn window_for(window_size: u32, past_max: u32, bits: u8) -> Result<SlidingWindow> {
        let half = 1u64 << (bits - 1);
        let window = u64::from(window_size).min(half) as u32;
        let past = u64::from(past_max).min(half) as u32;
        SlidingWindow::new(bits, window, past)
    }
}

impl DuplicateDetector for WindowTable {
    fn is_duplicate(&mut self, now: Tick, flow: &FlowKey, pkt_id: &PacketId) -> bool {
        let bits = pkt_id.bit_len();
        let seq = match pkt_id.to_u32() {
            Some(seq) if bits >= 8 => seq,
            _ => {
                tracing::warn!(
                    "Identifier {} ({} bits) cannot be windowed, treating as duplicate",
                    pkt_id,
                    bits
                );
                return true;
            }
        };
        let bits = bits as u8;
        let (window_size, past_max) = (self.window_size, self.past_max);
        let found = self
            .flows
            .try_find_or_create(flow, now, || Self::window_for(window_size, past_max, bits));
        let window = match found {
            Ok((window, _)) => window,
            Err(err) => {
                tracing::warn!("Cannot create window for flow {}: {}", flow, err);
                return true;
            }
        };
        if window.seq_bits() != bits {
            tracing::debug!(
                "Flow {} changed identifier width {} -> {}, restarting window",
                flow,
                window.seq_bits(),
                bits
            );
            match Self::window_for(window_size, past_max, bits) {
                Ok(fresh) => *window = fresh,
                Err(err) => {
                    tracing::warn!("Cannot create window for flow {}: {}", flow, err);
                    return true;
                }
            }
        }
        window.is_duplicate(seq)
    }

    fn contains(&self, _now: Tick, flow: &FlowKey, pkt_id: &PacketId) -> bool {
        match (self.flows.get(flow), pkt_id.to_u32()) {
            (Some(window), Some(seq)) if usize::from(window.seq_bits()) == pkt_id.bit_len() => {
                window.contains(seq)
            }
            _ => false,
        }
    }

    fn prune(&mut self, now: Tick, max_age: u64) -> usize {
        self.flows.prune(now, max_age)
    }

    fn flow_count(&self) -> usize {
        self.flows.len()
    }
}

/// Identifiers seen in one flow, oldest first in `order`.
#[derive(Debug, Default)]
pub struct PacketHistory {
    seen: BTreeMap<PacketId, Tick>,
    order: VecDeque<(Tick, PacketId)>,
}

impl PacketHistory {
    /// Number of identifiers remembered.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns true if nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn expire(&mut self, now: Tick, max_age: u64) {
        while let Some((when, _)) = self.order.front() {
            if now.since(*when) <= max_age {
                break;
            }
            if let Some((_, id)) = self.order.pop_front() {
                self.seen.remove(&id);
            }
        }
    }

    fn insert(&mut self, now: Tick, pkt_id: &PacketId, limit: usize) {
        self.seen.insert(pkt_id.clone(), now);
        self.order.push_back((now, pkt_id.clone()));
        while self.order.len() > limit {
            if let Some((_, id)) = self.order.pop_front() {
                self.seen.remove(&id);
            }
        }
    }
}

/// Explicit identifier history per flow.
#[derive(Debug)]
pub struct TreeTable {
    flows: FlowCache<PacketHistory>,
    max_ids_per_flow: usize,
    max_age: u64,
}

impl TreeTable {
    /// Creates a table remembering up to `max_ids_per_flow` identifiers per
    /// flow, each for at most `max_age` ticks.
    pub fn new(max_flows: usize, max_ids_per_flow: usize, max_age: u64) -> Self {
        Self { flows: FlowCache::new(max_flows), max_ids_per_flow: max_ids_per_flow.max(1), max_age }
    }
}

impl DuplicateDetector for TreeTable {
    fn is_duplicate(&mut self, now: Tick, flow: &FlowKey, pkt_id: &PacketId) -> bool {
        let max_age = self.max_age;
        let limit = self.max_ids_per_flow;
        let (history, _) = self.flows.find_or_create(flow, now, PacketHistory::default);
        history.expire(now, max_age);
        if history.seen.contains_key(pkt_id) {
            return true;
        }
        history.insert(now, pkt_id, limit);
        false
    }

    fn contains(&self, now: Tick, flow: &FlowKey, pkt_id: &PacketId) -> bool {
        self.flows
            .get(flow)
            .and_then(|history| history.seen.get(pkt_id))
            .map(|when| now.since(*when) <= self.max_age)
            .unwrap_or(false)
    }

    fn prune(&mut self, now: Tick, max_age: u64) -> usize {
        self.flows.prune(now, max_age)
    }

    fn flow_count(&self) -> usize {
        self.flows.len()
    }
}

/// Duplicate table chosen at interface initialization.
#[derive(Debug)]
pub enum DpdTable {
    /// Sliding window flavour.
    Window(WindowTable),
    /// Explicit history flavour.
    Tree(TreeTable),
}

impl DpdTable {
    /// Builds the flavour selected by `config.dpd_table`.
    pub fn from_config(config: &Config) -> Self {
        match config.dpd_table {
            DpdTableKind::Window => DpdTable::Window(WindowTable::new(
                config.window_size,
                config.window_past_max,
                config.max_flows,
            )),
            DpdTableKind::Tree => DpdTable::Tree(TreeTable::new(
                config.max_flows,
                config.max_tree_ids_per_flow,
                config.update_age_max,
            )),
        }
    }

    /// Table flavour.
    pub fn kind(&self) -> DpdTableKind {
        match self {
            DpdTable::Window(_) => DpdTableKind::Window,
            DpdTable::Tree(_) => DpdTableKind::Tree,
        }
    }
}

impl DuplicateDetector for DpdTable {
    fn is_duplicate(&mut self, now: Tick, flow: &FlowKey, pkt_id: &PacketId) -> bool {
        match self {
            DpdTable::Window(t) => t.is_duplicate(now, flow, pkt_id),
            DpdTable::Tree(t) => t.is_duplicate(now, flow, pkt_id),
        }
    }

    fn contains(&self, now: Tick, flow: &FlowKey, pkt_id: &PacketId) -> bool {
        match self {
            DpdTable::Window(t) => t.contains(now, flow, pkt_id),
            DpdTable::Tree(t) => t.contains(now, flow, pkt_id),
        }
    }

    fn prune(&mut self, now: Tick, max_age: u64) -> usize {
        match self {
            DpdTable::Window(t) => t.prune(now, max_age),
            DpdTable::Tree(t) => t.prune(now, max_age),
        }
    }

    fn flow_count(&self) -> usize {
        match self {
            DpdTable::Window(t) => t.flow_count(),
            DpdTable::Tree(t) => t.flow_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(n: u8) -> FlowKey {
        FlowKey::new().with_bits(1, 4).with_bytes(&[n])
    }

    #[test]
    fn test_window_table_tracks_flows_separately() {
        let mut table = WindowTable::new(64, 1024, 0);
        let id = PacketId::from_value(7, 16);
        assert!(!table.is_duplicate(Tick::ZERO, &flow(1), &id));
        assert!(!table.is_duplicate(Tick::ZERO, &flow(2), &id));
        assert!(table.is_duplicate(Tick::ZERO, &flow(1), &id));
        assert_eq!(table.flow_count(), 2);
        assert!(table.contains(Tick::ZERO, &flow(2), &id));
        assert!(!table.contains(Tick::ZERO, &flow(2), &PacketId::from_value(8, 16)));
    }

    #[test]
    fn test_window_table_fails_safe_on_wide_ids() {
        let mut table = WindowTable::new(64, 1024, 0);
        let digest = PacketId::from_bytes(&[0u8; 16]);
        assert!(table.is_duplicate(Tick::ZERO, &flow(1), &digest));
        assert_eq!(table.flow_count(), 0);
    }

    #[test]
    fn test_window_scaled_to_narrow_ids() {
        // 1024 exceeds half of an 8-bit space, the flow still gets a window
        let mut table = WindowTable::new(1024, 32768, 0);
        let id = PacketId::from_value(3, 8);
        assert!(!table.is_duplicate(Tick::ZERO, &flow(1), &id));
        assert!(table.is_duplicate(Tick::ZERO, &flow(1), &id));
    }

    #[test]
    fn test_window_table_restarts_on_width_change() {
        let mut table = WindowTable::new(64, 1024, 0);
        let narrow = PacketId::from_value(5, 16);
        let wide = PacketId::from_value(5, 32);
        assert!(!table.is_duplicate(Tick::ZERO, &flow(1), &narrow));
        assert!(table.is_duplicate(Tick::ZERO, &flow(1), &narrow));
        // same value at a new width starts a new window for the flow
        assert!(!table.is_duplicate(Tick::ZERO, &flow(1), &wide));
        assert!(table.contains(Tick::ZERO, &flow(1), &wide));
        assert!(!table.contains(Tick::ZERO, &flow(1), &narrow));
        assert_eq!(table.flow_count(), 1);
    }

    #[test]
    fn test_tree_table_exact_membership() {
        let mut table = TreeTable::new(0, 16, 10);
        let a = PacketId::from_bytes(&[0xde, 0xad, 0xbe, 0xef, 0x01]);
        let b = PacketId::from_bytes(&[0x01, 0x02]);
        assert!(!table.is_duplicate(Tick::ZERO, &flow(1), &a));
        assert!(!table.is_duplicate(Tick::ZERO, &flow(1), &b));
        assert!(table.is_duplicate(Tick::new(1), &flow(1), &a));
        assert!(table.contains(Tick::new(1), &flow(1), &b));
        assert!(!table.contains(Tick::new(1), &flow(2), &b));
    }

    #[test]
    fn test_tree_table_ids_expire() {
        let mut table = TreeTable::new(0, 16, 10);
        let a = PacketId::from_value(1, 16);
        let b = PacketId::from_value(2, 16);
        assert!(!table.is_duplicate(Tick::ZERO, &flow(1), &a));
        assert!(!table.is_duplicate(Tick::new(8), &flow(1), &b));
        assert!(!table.contains(Tick::new(15), &flow(1), &a));
        assert!(!table.is_duplicate(Tick::new(15), &flow(1), &a));
        assert!(table.is_duplicate(Tick::new(15), &flow(1), &b));
    }

    #[test]
    fn test_tree_table_history_limit() {
        let mut table = TreeTable::new(0, 2, 100);
        let ids: Vec<_> = (0..3).map(|n| PacketId::from_value(n, 16)).collect();
        for id in &ids {
            assert!(!table.is_duplicate(Tick::ZERO, &flow(1), id));
        }
        assert!(!table.contains(Tick::ZERO, &flow(1), &ids[0]));
        assert!(table.contains(Tick::ZERO, &flow(1), &ids[2]));
    }

    #[test]
    fn test_dpd_table_from_config() {
        let mut config = Config::default();
        assert_eq!(DpdTable::from_config(&config).kind(), DpdTableKind::Window);
        config.dpd_table = DpdTableKind::Tree;
        let mut table = DpdTable::from_config(&config);
        assert_eq!(table.kind(), DpdTableKind::Tree);
        let id = PacketId::from_value(9, 16);
        assert!(!table.is_duplicate(Tick::ZERO, &flow(1), &id));
        assert!(table.is_duplicate(Tick::ZERO, &flow(1), &id));
        assert_eq!(table.prune(Tick::new(100), 10), 1);
        assert_eq!(table.flow_count(), 0);
    }
}
