//! Event and command types for the relay host.
//!
//! - `Action`: work queued during a poll round (transmit a copy or emit an event)
//! - `RelayEvent`: events emitted to the user
//! - `ControlCommand`: instructions from the routing collaborator to the engine

use std::net::IpAddr;

use smfwarp_core::{MacAddr, Tick};
use smfwarp_relay::DropReason;

/// Work queued while pumping frames and flushed at the end of a poll round.
#[derive(Debug)]
pub enum Action {
    /// Transmit the given packet on an interface
    Send {
        /// Destination interface index
        interface: usize,
        /// IP packet bytes
        packet: Vec<u8>,
    },
    /// Emit an event to the user
    Emit(RelayEvent),
}

/// Events pushed through the event receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A packet was sent out on one or more interfaces.
    Forwarded {
        /// Arrival interface
        interface: usize,
        /// Interfaces a copy was sent on
        destinations: Vec<usize>,
    },
    /// A packet was discarded.
    Dropped {
        /// Arrival interface
        interface: usize,
        /// Why
        reason: DropReason,
    },
    /// The prune timer fired.
    Pruned {
        /// Logical time after the timeout
        tick: Tick,
        /// Flows removed
        flows: usize,
    },
}

/// Updates pushed by the routing collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Turn the relay function on or off.
    SetRelayEnabled(bool),
    /// Set or clear E_CDS relay selection.
    SetRelaySelected(bool),
    /// Replace the MPR selector set.
    SetSelectors(Vec<MacAddr>),
    /// Replace the symmetric neighbor set.
    SetNeighbors(Vec<MacAddr>),
    /// Register a local address.
    AddLocalAddress(IpAddr),
    /// Forget a local address.
    RemoveLocalAddress(IpAddr),
}
