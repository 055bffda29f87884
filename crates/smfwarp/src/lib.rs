#![warn(missing_docs)]

//! smfwarp: a small public API facade for the workspace.
//!
//! This crate re-exports the types most relay deployments need:
//!
//! - The forwarding engine and its groups (`ForwardingEngine`, `InterfaceGroup`)
//! - The host event loop (`RelayHost`, `RelayEvent`, `ControlCommand`)
//! - Core configuration (`Config`, `InterfaceConfig`)
//!
//! Example
//! ```ignore
//! use smfwarp::prelude::*;
//!
//! let mut engine = ForwardingEngine::new(Config::default()).unwrap();
//! let wlan = engine.add_interface(InterfaceConfig::new("wlan0", mac).reflect(true));
//! let group = InterfaceGroup::new("manet", RelayType::Cf, GroupMode::Relay, [wlan]).unwrap();
//! engine.add_group(group).unwrap();
//!
//! let mut host = RelayHost::new(engine, capture);
//! host.manual_poll(std::time::Instant::now());
//!
//! while let Some(event) = host.recv() {
//!     println!("{:?}", event);
//! }
//! ```

// Core config
pub use smfwarp_core::{
    config::{Config, DpdTableKind, HashAlgorithm, HashMode, InterfaceConfig, RelayType},
    error::{ErrorKind, Result},
    transport::{Capture, FrameInfo},
    MacAddr, Tick,
};
// Duplicate tables
pub use smfwarp_dpd::{DpdTable, DuplicateDetector};
// Host: event loop over a capture transport
pub use smfwarp_host::{ControlCommand, RelayEvent, RelayHost};
// Protocol: packets and identifiers
pub use smfwarp_protocol::{DpdIdentity, DpdType, PacketBuffer, PacketIdentifier};
// Relay: engine and policy
pub use smfwarp_relay::{
    DropReason, ForwardingEngine, ForwardingStats, GroupMode, InterfaceGroup,
};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        Capture, Config, ControlCommand, DropReason, ForwardingEngine, FrameInfo, GroupMode,
        InterfaceConfig, InterfaceGroup, MacAddr, PacketBuffer, RelayEvent, RelayHost, RelayType,
    };
}
