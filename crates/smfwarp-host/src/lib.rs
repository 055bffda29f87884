#![warn(missing_docs)]

//! smfwarp-host: event loop gluing a capture transport to the forwarding engine.

/// Event, action and control command types.
pub mod event_types;
/// Relay host driving the engine from a capture transport.
pub mod relay_host;
/// Time utilities for the host.
pub mod time;

pub use event_types::{Action, ControlCommand, RelayEvent};
pub use relay_host::RelayHost;
pub use time::{Clock, ManualClock, SystemClock};
