use std::net::IpAddr;

use smfwarp_core::{
    error::{ErrorKind, Result},
    Tick,
};

use crate::{bits::FlowKey, flow_cache::FlowCache};

/// Hands out per-flow sequence numbers for packets this node marks.
///
/// New flows start at a random counter so that a restarted node does not
/// replay identifiers a downstream receiver still holds in its windows.
#[derive(Debug)]
pub struct SequenceAllocator {
    flows: FlowCache<u32>,
    seq_bits: u8,
    seq_mask: u32,
}

impl SequenceAllocator {
    /// Creates an allocator for `seq_bits`-bit sequence numbers.
    pub fn new(seq_bits: u8, max_flows: usize) -> Result<Self> {
        if !(1..=32).contains(&seq_bits) {
            return Err(ErrorKind::InvalidConfig("sequence width must be 1..=32 bits"));
        }
        let seq_mask = if seq_bits == 32 { u32::MAX } else { (1u32 << seq_bits) - 1 };
        Ok(Self { flows: FlowCache::new(max_flows), seq_bits, seq_mask })
    }

    /// Sequence number width in bits.
    pub fn seq_bits(&self) -> u8 {
        self.seq_bits
    }

    /// Returns the next sequence number for the `dst[:src]` flow.
    pub fn increment_sequence(&mut self, now: Tick, dst: IpAddr, src: Option<IpAddr>) -> u32 {
        let mut key = FlowKey::new().with_addr(dst);
        if let Some(src) = src {
            key.push_addr(src);
        }
        let (counter, created) = self.flows.find_or_create(&key, now, rand::random::<u32>);
        if !created {
            *counter = counter.wrapping_add(1);
        }
        *counter & self.seq_mask
    }

    /// Drops flows idle for more than `max_age` ticks.
    pub fn prune(&mut self, now: Tick, max_age: u64) -> usize {
        self.flows.prune(now, max_age)
    }

    /// Number of flows with an allocated counter.
    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }
}
