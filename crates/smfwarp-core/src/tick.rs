//! Logical clock.
//!
//! All ages are measured in ticks rather than wall-clock time. The host
//! advances the tick from its prune timer, which keeps aging deterministic
//! in tests: a test simply advances the tick by hand.

use std::fmt;

/// Monotonic logical timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tick(u64);

impl Tick {
    /// The first tick.
    pub const ZERO: Tick = Tick(0);

    /// Creates a tick from a raw value.
    pub const fn new(value: u64) -> Self {
        Tick(value)
    }

    /// Returns the raw value.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns this tick moved forward by `ticks`.
    pub fn plus(self, ticks: u64) -> Tick {
        Tick(self.0.saturating_add(ticks))
    }

    /// Moves this tick forward in place.
    pub fn advance(&mut self, ticks: u64) {
        self.0 = self.0.saturating_add(ticks);
    }

    /// Ticks elapsed since `earlier`, zero if `earlier` is in the future.
    pub fn since(self, earlier: Tick) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}
