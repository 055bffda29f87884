#![warn(missing_docs)]

//! smfwarp-relay: interface associations and per-packet relay decisions.
//!
//! [`ForwardingEngine`] is the single entry point: it identifies each packet,
//! applies the relay policy of every associate of the arrival interface and
//! checks the destination interfaces' duplicate tables.

mod engine;
/// Interface groups and associates.
pub mod group;
mod interface;
/// MPR selectors and symmetric neighbors.
pub mod neighbors;
/// Relay switch with delayed disable.
pub mod relay_state;
/// Forwarding counters.
pub mod statistics;

pub use engine::ForwardingEngine;
pub use group::{Associate, GroupMode, InterfaceGroup};
pub use interface::Interface;
pub use neighbors::{NeighborTable, SenderKind};
pub use relay_state::RelaySwitch;
pub use statistics::{DropReason, ForwardingStats};
