use std::{fmt, str::FromStr};

use crate::error::DecodingErrorKind;

/// 48-bit link-layer (Ethernet) address.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// The all-zero address.
    pub const UNSPECIFIED: MacAddr = MacAddr([0; 6]);

    /// Creates an address from its six octets.
    pub const fn new(octets: [u8; 6]) -> Self {
        MacAddr(octets)
    }

    /// Returns the six octets.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Returns true for the all-zero address.
    pub fn is_unspecified(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Returns true when the group (multicast) bit is set.
    pub fn is_group(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// A usable unicast source address.
    pub fn is_valid_source(&self) -> bool {
        !self.is_unspecified() && !self.is_group()
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", o[0], o[1], o[2], o[3], o[4], o[5])
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        MacAddr(octets)
    }
}

impl FromStr for MacAddr {
    type Err = DecodingErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(|c| c == ':' || c == '-');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or(DecodingErrorKind::LinkAddress)?;
            if part.len() != 2 {
                return Err(DecodingErrorKind::LinkAddress);
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| DecodingErrorKind::LinkAddress)?;
        }
        if parts.next().is_some() {
            return Err(DecodingErrorKind::LinkAddress);
        }
        Ok(MacAddr(octets))
    }
}
