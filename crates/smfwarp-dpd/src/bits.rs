//! Variable bit-length keys.
//!
//! Flow keys are built by concatenating protocol fields, some of which are not
//! a whole number of bytes (the SMF_DPD tagger type is 3 bits, the DPD type
//! prefix 4). The bit length is part of the identity: two keys with the same
//! bytes but different lengths are different keys.

use std::{fmt, net::IpAddr};

/// Owned bit string, most significant bit first.
///
/// Bits past `bit_len` in the last byte are always zero, so derived equality,
/// ordering and hashing are exact over the bit length.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BitString {
    bits: usize,
    bytes: Vec<u8>,
}

/// Key identifying one duplicate detection flow.
pub type FlowKey = BitString;
/// Identifier of one packet within a flow.
pub type PacketId = BitString;

impl BitString {
    /// Creates an empty bit string.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a byte-aligned bit string from raw bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self { bits: data.len() * 8, bytes: data.to_vec() }
    }

    /// Creates a bit string holding the low `nbits` bits of `value`.
    pub fn from_value(value: u64, nbits: u8) -> Self {
        let mut s = Self::new();
        s.push_bits(value, nbits);
        s
    }

    /// Length in bits.
    pub fn bit_len(&self) -> usize {
        self.bits
    }

    /// Returns true if no bits have been pushed.
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Underlying bytes; the last one may be partially used.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Appends the low `nbits` bits of `value`, most significant first.
    pub fn push_bits(&mut self, value: u64, nbits: u8) {
        debug_assert!(nbits <= 64);
        for i in (0..nbits).rev() {
            let byte_index = self.bits / 8;
            if byte_index == self.bytes.len() {
                self.bytes.push(0);
            }
            if (value >> i) & 1 == 1 {
                self.bytes[byte_index] |= 0x80 >> (self.bits % 8);
            }
            self.bits += 1;
        }
    }

    /// Appends whole bytes.
    pub fn push_bytes(&mut self, data: &[u8]) {
        if self.bits % 8 == 0 {
            self.bytes.extend_from_slice(data);
            self.bits += data.len() * 8;
        } else {
            for byte in data {
                self.push_bits(u64::from(*byte), 8);
            }
        }
    }

    /// Appends the octets of an IP address (4 or 16 bytes).
    pub fn push_addr(&mut self, addr: IpAddr) {
        match addr {
            IpAddr::V4(a) => self.push_bytes(&a.octets()),
            IpAddr::V6(a) => self.push_bytes(&a.octets()),
        }
    }

    /// Builder form of [`push_bits`](Self::push_bits).
    pub fn with_bits(mut self, value: u64, nbits: u8) -> Self {
        self.push_bits(value, nbits);
        self
    }

    /// Builder form of [`push_bytes`](Self::push_bytes).
    pub fn with_bytes(mut self, data: &[u8]) -> Self {
        self.push_bytes(data);
        self
    }

    /// Builder form of [`push_addr`](Self::push_addr).
    pub fn with_addr(mut self, addr: IpAddr) -> Self {
        self.push_addr(addr);
        self
    }

    /// Interprets the string as an unsigned integer when it is 1..=32 bits long.
    pub fn to_u32(&self) -> Option<u32> {
        if self.bits == 0 || self.bits > 32 {
            return None;
        }
        let mut acc: u64 = 0;
        for byte in &self.bytes {
            acc = (acc << 8) | u64::from(*byte);
        }
        let unused = self.bytes.len() * 8 - self.bits;
        Some((acc >> unused) as u32)
    }
}

impl fmt::Debug for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.bytes {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "/{}", self.bits)
    }
}
