//! Forwarding statistics.
//!
//! Counters kept by the forwarding engine: packets seen, forwarded and
//! suppressed, plus one drop counter per [`DropReason`].

use std::fmt;

/// Why a packet was not forwarded at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Source interface index is not configured.
    UnknownInterface,
    /// Header could not be parsed.
    Malformed,
    /// IPv4 fragment with the don't-fragment flag.
    InvalidFragment,
    /// No duplicate detection identifier could be derived.
    NoIdentifier,
    /// An identifier could not be written into the packet.
    MarkingFailed,
    /// Our own transmission captured again.
    Recapture,
    /// Link-local source or destination on a non-tunnel interface.
    LinkLocal,
    /// Unicast destination while unicast forwarding is off.
    Unicast,
    /// TTL or hop limit would expire.
    TtlExpired,
    /// Our own marked packet heard back on the ingress interface.
    Echo,
}

impl DropReason {
    /// Every reason, in counter order.
    pub const ALL: [DropReason; 10] = [
        DropReason::UnknownInterface,
        DropReason::Malformed,
        DropReason::InvalidFragment,
        DropReason::NoIdentifier,
        DropReason::MarkingFailed,
        DropReason::Recapture,
        DropReason::LinkLocal,
        DropReason::Unicast,
        DropReason::TtlExpired,
        DropReason::Echo,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DropReason::UnknownInterface => "unknown interface",
            DropReason::Malformed => "malformed packet",
            DropReason::InvalidFragment => "fragment with DF set",
            DropReason::NoIdentifier => "no identifier",
            DropReason::MarkingFailed => "marking failed",
            DropReason::Recapture => "recaptured transmission",
            DropReason::LinkLocal => "link-local address",
            DropReason::Unicast => "unicast destination",
            DropReason::TtlExpired => "ttl expired",
            DropReason::Echo => "echo of own packet",
        };
        f.write_str(text)
    }
}

/// Counters for a forwarding engine.
#[derive(Debug, Clone, Default)]
pub struct ForwardingStats {
    /// Packets handed to the engine
    pub received: u64,
    /// Packets sent out at least one interface
    pub forwarded: u64,
    /// Copies sent, summed over destination interfaces
    pub transmissions: u64,
    /// Destination interfaces suppressed as duplicates
    pub duplicates: u64,
    /// Packets from senders not known as symmetric neighbors under S_MPR
    pub asymmetric: u64,
    /// Packets with an all-zero or group source link address
    pub invalid_source_mac: u64,
    /// Identifiers written by resequencing
    pub resequenced: u64,
    /// Hash assist values installed
    pub hav_installed: u64,
    /// Packets forwarded with an exhausted hash assist value space
    pub hav_exhausted: u64,
    drops: [u64; DropReason::ALL.len()],
}

impl ForwardingStats {
    /// Counts a dropped packet.
    pub fn record_drop(&mut self, reason: DropReason) {
        self.drops[reason.index()] += 1;
    }

    /// Packets dropped for `reason`.
    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.drops[reason.index()]
    }

    /// Packets dropped for any reason.
    pub fn total_dropped(&self) -> u64 {
        self.drops.iter().sum()
    }

    /// Resets all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
