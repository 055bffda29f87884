#![warn(missing_docs)]

//! smfwarp-core: foundational types shared by every layer.
//!
//! This crate provides the minimal set of core utilities shared across the workspace:
//! - Configuration types
//! - Error handling
//! - Protocol constants
//! - Link-layer addresses and the logical tick
//! - Capture transport and interceptor traits
//!
//! Duplicate detection lives in `smfwarp-dpd`, header handling and packet
//! identification in `smfwarp-protocol`, relay decisions in `smfwarp-relay`.

/// Protocol constants shared across layers.
pub mod constants {
    /// IPv6 hop-by-hop options extension header.
    pub const IPPROTO_HOPOPTS: u8 = 0;
    /// IPv6 routing extension header.
    pub const IPPROTO_ROUTING: u8 = 43;
    /// IPv6 fragment extension header.
    pub const IPPROTO_FRAGMENT: u8 = 44;
    /// IPSec encapsulating security payload.
    pub const IPPROTO_ESP: u8 = 50;
    /// IPSec authentication header.
    pub const IPPROTO_AH: u8 = 51;
    /// IPv6 "no next header" marker.
    pub const IPPROTO_NONE: u8 = 59;
    /// IPv6 destination options extension header.
    pub const IPPROTO_DSTOPTS: u8 = 60;
    /// IPv6 mobility header.
    pub const IPPROTO_MOBILITY: u8 = 135;

    /// Size of the fixed IPv4 header without options.
    pub const IPV4_HEADER_MIN: usize = 20;
    /// Size of the fixed IPv6 header.
    pub const IPV6_HEADER_SIZE: usize = 40;

    /// Hop-by-hop option type assigned to SMF_DPD (RFC 6621).
    pub const SMF_DPD_OPTION_TYPE: u8 = 0x08;
    /// Pad1 hop-by-hop option.
    pub const OPTION_PAD1: u8 = 0x00;
    /// PadN hop-by-hop option.
    pub const OPTION_PADN: u8 = 0x01;

    /// Width of identifiers this node writes when resequencing.
    pub const RESEQUENCE_BITS: u8 = 16;
    /// Largest hash assist value this node installs.
    pub const HAV_MAX: u8 = 254;

    /// Largest IPv6 extension header; its length field counts 8-octet units
    /// beyond the first in one byte.
    pub const EXTENSION_HEADER_MAX: usize = 2048;

    /// Largest IP datagram the packet buffer will grow to.
    pub const MAX_PACKET_SIZE: usize = 65535;
}

/// Configuration options for the forwarding engine and its interfaces.
pub mod config;
/// Error types and results.
pub mod error;
/// Packet interception for custom processing.
pub mod interceptor;
/// Link-layer addressing.
pub mod link;
/// Logical clock driving all age comparisons.
pub mod tick;
/// Capture abstraction for pluggable packet I/O.
pub mod transport;

pub use link::MacAddr;
pub use tick::Tick;
