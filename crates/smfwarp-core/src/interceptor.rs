//! Packet interception for custom processing.
//!
//! Interceptors see raw IP packets right after capture and right before
//! re-transmission. Useful for logging, accounting or filtering traffic
//! per interface.

/// Trait for intercepting packets before/after forwarding.
///
/// # Examples
/// ```
/// use smfwarp_core::interceptor::Interceptor;
///
/// struct CountingInterceptor(usize);
///
/// impl Interceptor for CountingInterceptor {
///     fn on_receive(&mut self, _interface: usize, _packet: &mut [u8]) -> bool {
///         self.0 += 1;
///         true
///     }
///
///     fn on_send(&mut self, _interface: usize, _packet: &mut Vec<u8>) -> bool {
///         true
///     }
/// }
/// ```
pub trait Interceptor: Send {
    /// Called when a packet is captured, before the forwarding decision.
    ///
    /// Returns `false` to drop the packet.
    fn on_receive(&mut self, interface: usize, packet: &mut [u8]) -> bool;

    /// Called for each copy about to be transmitted on `interface`.
    ///
    /// Returns `false` to suppress this copy.
    fn on_send(&mut self, interface: usize, packet: &mut Vec<u8>) -> bool;
}

/// No-op interceptor that passes all packets through unchanged.
#[derive(Debug, Clone, Copy)]
pub struct NoOpInterceptor;

impl Interceptor for NoOpInterceptor {
    fn on_receive(&mut self, _interface: usize, _packet: &mut [u8]) -> bool {
        true
    }

    fn on_send(&mut self, _interface: usize, _packet: &mut Vec<u8>) -> bool {
        true
    }
}
