#![warn(missing_docs)]

//! smfwarp-dpd: duplicate packet detection tables.
//!
//! Everything here is protocol agnostic: flows and packets are identified by
//! opaque [`BitString`]s built by `smfwarp-protocol`.

/// Variable bit-length flow keys and packet identifiers.
pub mod bits;
/// Duplicate detector variants.
pub mod detector;
/// LRU-ordered per-flow state.
pub mod flow_cache;
/// Sequence numbers for packets this node marks.
pub mod sequence;
/// Sliding window duplicate detection.
pub mod window;

pub use bits::{BitString, FlowKey, PacketId};
pub use detector::{DpdTable, DuplicateDetector, PacketHistory, TreeTable, WindowTable};
pub use flow_cache::FlowCache;
pub use sequence::SequenceAllocator;
pub use window::SlidingWindow;
