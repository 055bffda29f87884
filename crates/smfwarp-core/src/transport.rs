//! Capture abstraction for pluggable packet I/O.

use std::io::Result;

use crate::link::MacAddr;

/// Metadata delivered with every captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Index of the interface the frame arrived on.
    pub interface: usize,
    /// Link-layer source address of the frame.
    pub src_mac: MacAddr,
}

/// Low-level packet capture and injection.
///
/// This trait allows raw sockets, pcap handles or an in-memory emulator to be
/// plugged into the relay host without coupling to a concrete mechanism. The
/// bytes exchanged are IP datagrams; link framing is the implementor's concern.
pub trait Capture {
    /// Receives a single IP packet into `buffer`.
    ///
    /// Returns `ErrorKind::WouldBlock` when nothing is pending.
    fn receive_frame<'a>(&mut self, buffer: &'a mut [u8]) -> Result<(&'a [u8], FrameInfo)>;

    /// Transmits an IP packet on the given interface.
    fn send_frame(&mut self, interface: usize, packet: &[u8]) -> Result<usize>;

    /// Returns whether receive blocks or returns `WouldBlock`.
    fn is_blocking_mode(&self) -> bool;
}
