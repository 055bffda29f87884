use smfwarp_core::Tick;

/// Relay function switch with a delayed "stop relaying" transition.
///
/// Turning relaying off can be deferred by a stop delay so that a brief
/// routing change does not immediately cut the flood. While the delay runs the
/// switch still reads as active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaySwitch {
    /// Relaying.
    Enabled,
    /// Relaying until `deadline`, then disabled.
    PendingDisable {
        /// Tick at which the switch turns off.
        deadline: Tick,
    },
    /// Not relaying.
    Disabled,
}

impl RelaySwitch {
    /// Switch in the given initial state.
    pub fn from_bool(on: bool) -> Self {
        if on {
            RelaySwitch::Enabled
        } else {
            RelaySwitch::Disabled
        }
    }

    /// Returns true if the switch reads as on at `now`.
    pub fn is_active(&self, now: Tick) -> bool {
        match self {
            RelaySwitch::Enabled => true,
            RelaySwitch::PendingDisable { deadline } => now < *deadline,
            RelaySwitch::Disabled => false,
        }
    }

    /// Turns the switch on, cancelling any pending disable.
    pub fn enable(&mut self) {
        *self = RelaySwitch::Enabled;
    }

    /// Turns the switch off after `delay` ticks (immediately when zero).
    ///
    /// A pending disable keeps its original deadline.
    pub fn disable(&mut self, now: Tick, delay: u64) {
        *self = match *self {
            _ if delay == 0 => RelaySwitch::Disabled,
            RelaySwitch::Enabled => RelaySwitch::PendingDisable { deadline: now.plus(delay) },
            pending @ RelaySwitch::PendingDisable { .. } => pending,
            RelaySwitch::Disabled => RelaySwitch::Disabled,
        };
    }

    /// Enables or disables the switch.
    pub fn set(&mut self, on: bool, now: Tick, delay: u64) {
        if on {
            self.enable();
        } else {
            self.disable(now, delay);
        }
    }

    /// Completes a pending disable whose deadline has passed.
    ///
    /// Returns true if the switch changed.
    pub fn settle(&mut self, now: Tick) -> bool {
        match *self {
            RelaySwitch::PendingDisable { deadline } if now >= deadline => {
                *self = RelaySwitch::Disabled;
                true
            }
            _ => false,
        }
    }
}
