use thiserror::Error;

/// Result type used throughout the workspace.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Top level error for everything that can fail while configuring the engine
/// or handling a packet.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A header could not be parsed.
    #[error("decoding error: {0}")]
    DecodingError(#[from] DecodingErrorKind),
    /// Sliding window parameters violate the window contract.
    #[error("invalid sliding window parameters (bits={seq_bits}, window={window_size}, past_max={past_max})")]
    InvalidWindow {
        /// Sequence number width in bits.
        seq_bits: u8,
        /// Window size in packets.
        window_size: u32,
        /// Staleness horizon in packets.
        past_max: u32,
    },
    /// A configuration value was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// IPv4 fragment carrying the don't-fragment flag.
    #[error("fragment with DF flag set")]
    FragmentWithDontFragment,
    /// The packet buffer cannot grow enough to hold an inserted header.
    #[error("insufficient buffer space: need {needed} bytes, {available} available")]
    InsufficientSpace {
        /// Bytes the operation needed.
        needed: usize,
        /// Bytes that were available.
        available: usize,
    },
    /// No duplicate detection identifier could be extracted or added.
    #[error("no duplicate detection identifier available")]
    NoIdentifier,
    /// Hash based detection was required but no algorithm is configured.
    #[error("hash algorithm not configured")]
    HashUnavailable,
    /// Interface index does not exist.
    #[error("unknown interface index {0}")]
    UnknownInterface(usize),
    /// Interface group definition is inconsistent.
    #[error("invalid interface group: {0}")]
    InvalidGroup(&'static str),
}

/// Specific header decoding failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodingErrorKind {
    /// Buffer ended before a header did.
    #[error("truncated packet")]
    Truncated,
    /// IP version nibble is neither 4 nor 6.
    #[error("unsupported IP version {0}")]
    IpVersion(u8),
    /// Header length field is inconsistent with the buffer.
    #[error("bad header length")]
    HeaderLength,
    /// IPv6 extension header chain is malformed.
    #[error("malformed extension header")]
    ExtensionHeader,
    /// Hop-by-hop header appears somewhere other than first.
    #[error("hop-by-hop header out of position")]
    HopByHopPosition,
    /// SMF_DPD option content is malformed.
    #[error("malformed SMF_DPD option")]
    DpdOption,
    /// Link-layer address string could not be parsed.
    #[error("malformed link address")]
    LinkAddress,
}
