#![warn(missing_docs)]

//! smfwarp-protocol: IP header handling and duplicate detection identifiers.

/// SMF_DPD hop-by-hop option codec.
pub mod dpd_option;
/// IPv6 extension header chain.
pub mod ext;
/// Digest providers for hash based detection.
pub mod hash;
/// Identifier extraction and injection.
pub mod identifier;
/// Mutable IP packet buffer.
pub mod packet;

pub use dpd_option::{DpdOption, TaggerId};
pub use hash::{hash_provider, HashProvider};
pub use identifier::{DpdIdentity, DpdType, Marking, PacketIdentifier};
pub use packet::{IpVersion, PacketBuffer};
