//! Sequence number duplicate detection using a sliding window.
//!
//! # Design
//!
//! The window is anchored at the highest sequence number seen (`last_set`).
//! Received sequence numbers are recorded in a bit ring indexed by
//! `seq mod capacity`, where capacity is the window size rounded up to a power
//! of two. Because the capacity divides the modular sequence space, a
//! sequence number always lands on the same bit no matter how often the space
//! wraps.
//!
//! # Wrapping Arithmetic
//!
//! The distance `seq - last_set` is computed modulo `2^bits`; a distance with
//! the top bit of the sequence space set is negative (an older packet).
//! Packets older than the window but younger than `past_max` are assumed to
//! be duplicates of something that aged out; anything older than that is a
//! catastrophic reorder and re-anchors the window.

use smfwarp_core::error::{ErrorKind, Result};

/// Duplicate detection state for one flow.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    seq_bits: u8,
    seq_mask: u32,
    window_size: u32,
    past_max: u32,
    last_set: Option<u32>,
    ring: Box<[u64]>,
}

impl SlidingWindow {
    /// Creates a window over `seq_bits`-bit sequence numbers.
    ///
    /// Fails if `seq_bits` is outside 8..=32, the window is empty or larger
    /// than half the sequence space, or `past_max` is not within
    /// `window_size..=2^(seq_bits-1)`.
    pub fn new(seq_bits: u8, window_size: u32, past_max: u32) -> Result<Self> {
        let invalid = || ErrorKind::InvalidWindow { seq_bits, window_size, past_max };
        if !(8..=32).contains(&seq_bits) {
            return Err(invalid());
        }
        let half = 1u64 << (seq_bits - 1);
        if window_size == 0
            || u64::from(window_size) > half
            || past_max < window_size
            || u64::from(past_max) > half
        {
            return Err(invalid());
        }

        let capacity = window_size.next_power_of_two().max(64) as usize;
        let seq_mask = if seq_bits == 32 { u32::MAX } else { (1u32 << seq_bits) - 1 };
        Ok(Self {
            seq_bits,
            seq_mask,
            window_size,
            past_max,
            last_set: None,
            ring: vec![0u64; capacity / 64].into_boxed_slice(),
        })
    }

    /// Sequence number width in bits.
    pub fn seq_bits(&self) -> u8 {
        self.seq_bits
    }

    /// Window size in packets.
    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Highest sequence number recorded, if any.
    pub fn last_set(&self) -> Option<u32> {
        self.last_set
    }

    /// Checks `seq` and records it.
    ///
    /// Returns true if `seq` is a duplicate (or presumed one).
    pub fn is_duplicate(&mut self, seq: u32) -> bool {
        let seq = seq & self.seq_mask;
        let last = match self.last_set {
            Some(last) => last,
            None => {
                self.reset(seq);
                return false;
            }
        };

        let delta = self.delta(seq, last);
        if delta > 0 {
            let delta = delta as u64;
            if delta < u64::from(self.window_size) {
                for step in 1..=delta {
                    self.clear(last.wrapping_add(step as u32) & self.seq_mask);
                }
            } else {
                self.ring.iter_mut().for_each(|w| *w = 0);
            }
            self.set(seq);
            self.last_set = Some(seq);
            false
        } else if delta == 0 {
            true
        } else {
            let age = delta.unsigned_abs();
            if age < u64::from(self.window_size) {
                if self.test(seq) {
                    true
                } else {
                    self.set(seq);
                    false
                }
            } else if age < u64::from(self.past_max) {
                // probably a duplicate of something that already aged out
                true
            } else {
                tracing::debug!(
                    "Sequence {} is {} behind {}, re-anchoring window",
                    seq,
                    age,
                    last
                );
                self.reset(seq);
                false
            }
        }
    }

    /// Returns true if `seq` was recorded and is still inside the window.
    ///
    /// Unlike [`is_duplicate`](Self::is_duplicate) this never records
    /// anything and never presumes aged-out packets to be duplicates.
    pub fn contains(&self, seq: u32) -> bool {
        let seq = seq & self.seq_mask;
        let Some(last) = self.last_set else {
            return false;
        };
        let delta = self.delta(seq, last);
        delta <= 0 && delta.unsigned_abs() < u64::from(self.window_size) && self.test(seq)
    }

    /// Signed circular distance from `last` to `seq`.
    fn delta(&self, seq: u32, last: u32) -> i64 {
        let d = u64::from(seq.wrapping_sub(last) & self.seq_mask);
        let sign_bit = 1u64 << (self.seq_bits - 1);
        if d & sign_bit != 0 {
            d as i64 - (1i64 << self.seq_bits)
        } else {
            d as i64
        }
    }

    fn reset(&mut self, seq: u32) {
        self.ring.iter_mut().for_each(|w| *w = 0);
        self.set(seq);
        self.last_set = Some(seq);
    }

    fn slot(&self, seq: u32) -> (usize, u64) {
        let index = seq as usize & (self.ring.len() * 64 - 1);
        (index / 64, 1u64 << (index % 64))
    }

    fn test(&self, seq: u32) -> bool {
        let (word, bit) = self.slot(seq);
        self.ring[word] & bit != 0
    }

    fn set(&mut self, seq: u32) {
        let (word, bit) = self.slot(seq);
        self.ring[word] |= bit;
    }

    fn clear(&mut self, seq: u32) {
        let (word, bit) = self.slot(seq);
        self.ring[word] &= !bit;
    }
}
