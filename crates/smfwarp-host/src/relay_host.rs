use std::{
    fmt::Debug,
    thread::{sleep, yield_now},
    time::{Duration, Instant},
};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use tracing::{debug, error};

use smfwarp_core::{
    constants::MAX_PACKET_SIZE,
    interceptor::{Interceptor, NoOpInterceptor},
    transport::{Capture, FrameInfo},
};
use smfwarp_protocol::PacketBuffer;
use smfwarp_relay::{DropReason, ForwardingEngine};

use crate::{
    event_types::{Action, ControlCommand, RelayEvent},
    time::{Clock, SystemClock},
};

// ============================================================================
// Event Sink (Internal)
// ============================================================================

/// Minimal event sink abstraction to decouple from a concrete channel.
trait EventSink<E> {
    fn send(&mut self, event: E);
}

/// Channel-backed event sink using crossbeam `Sender`.
#[derive(Debug)]
struct ChannelSink<E>(Sender<E>);

impl<E: Debug> EventSink<E> for ChannelSink<E> {
    fn send(&mut self, event: E) {
        if let Err(err) = self.0.send(event) {
            debug!("Event receiver gone, dropping {:?}", err.into_inner());
        }
    }
}

// ============================================================================
// Relay Host
// ============================================================================

/// Event loop feeding captured packets through a [`ForwardingEngine`].
///
/// Each poll round applies pending control commands, pumps frames until the
/// capture would block, fires the prune timer for every elapsed interval and
/// then flushes queued transmissions and events.
pub struct RelayHost<C: Capture, K: Clock = SystemClock> {
    engine: ForwardingEngine,
    capture: C,
    clock: K,
    interceptor: Box<dyn Interceptor>,
    receive_buffer: Vec<u8>,
    pending: Vec<Action>,
    command_sender: Sender<ControlCommand>,
    command_receiver: Receiver<ControlCommand>,
    event_sink: ChannelSink<RelayEvent>,
    event_receiver: Receiver<RelayEvent>,
    prune_interval: Duration,
    last_prune: Instant,
}

impl<C: Capture, K: Clock> Debug for RelayHost<C, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHost")
            .field("engine", &self.engine)
            .field("capture", &"<capture>")
            .field("interceptor", &"<interceptor>")
            .field("pending", &self.pending)
            .field("prune_interval", &self.prune_interval)
            .field("last_prune", &self.last_prune)
            .finish()
    }
}

impl<C: Capture> RelayHost<C, SystemClock> {
    /// Creates a host on the system clock.
    pub fn new(engine: ForwardingEngine, capture: C) -> Self {
        Self::with_clock(engine, capture, SystemClock)
    }
}

impl<C: Capture, K: Clock> RelayHost<C, K> {
    /// Creates a host with a custom clock.
    pub fn with_clock(engine: ForwardingEngine, capture: C, clock: K) -> Self {
        Self::with_clock_and_interceptor(engine, capture, clock, None)
    }

    /// Creates a host with a custom clock and interceptor.
    pub fn with_clock_and_interceptor(
        engine: ForwardingEngine,
        capture: C,
        clock: K,
        interceptor: Option<Box<dyn Interceptor>>,
    ) -> Self {
        let (command_sender, command_receiver) = unbounded();
        let (event_sender, event_receiver) = unbounded();
        let interceptor = interceptor.unwrap_or_else(|| Box::new(NoOpInterceptor));
        let max_packet_size = engine.config().max_packet_size.min(MAX_PACKET_SIZE);
        let prune_interval = engine.config().prune_interval;
        let last_prune = clock.now();

        RelayHost {
            engine,
            capture,
            clock,
            interceptor,
            receive_buffer: vec![0; max_packet_size],
            pending: Vec::new(),
            command_sender,
            command_receiver,
            event_sink: ChannelSink(event_sender),
            event_receiver,
            prune_interval,
            last_prune,
        }
    }

    /// The forwarding engine.
    pub fn engine(&self) -> &ForwardingEngine {
        &self.engine
    }

    /// Mutable access to the engine, for interface and group management.
    pub fn engine_mut(&mut self) -> &mut ForwardingEngine {
        &mut self.engine
    }

    /// The capture transport.
    pub fn capture(&self) -> &C {
        &self.capture
    }

    /// Mutable access to the capture transport.
    pub fn capture_mut(&mut self) -> &mut C {
        &mut self.capture
    }

    /// Returns a clone of the control command sender.
    pub fn command_sender(&self) -> Sender<ControlCommand> {
        self.command_sender.clone()
    }

    /// Returns a clone of the event receiver.
    pub fn event_receiver(&self) -> Receiver<RelayEvent> {
        self.event_receiver.clone()
    }

    /// Receives the next pending event, if any.
    pub fn recv(&mut self) -> Option<RelayEvent> {
        match self.event_receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Polls once at the clock's current time.
    pub fn poll(&mut self) {
        self.manual_poll(self.clock.now());
    }

    /// Polls in a loop, sleeping `sleep_duration` between rounds (blocking call).
    pub fn start_polling_with_duration(&mut self, sleep_duration: Option<Duration>) {
        loop {
            self.manual_poll(self.clock.now());
            match sleep_duration {
                None => yield_now(),
                Some(duration) => sleep(duration),
            };
        }
    }

    /// Runs one poll round at `time`.
    pub fn manual_poll(&mut self, time: Instant) {
        while let Ok(command) = self.command_receiver.try_recv() {
            self.apply_command(command);
        }

        loop {
            match self.capture.receive_frame(self.receive_buffer.as_mut()) {
                Ok((payload, info)) => {
                    let payload_len = payload.len();
                    let buf_slice = &mut self.receive_buffer[..payload_len];
                    if !self.interceptor.on_receive(info.interface, buf_slice) {
                        continue;
                    }
                    let bytes = self.receive_buffer[..payload_len].to_vec();
                    self.handle_frame(bytes, info);
                }
                Err(e) => {
                    if e.kind() != std::io::ErrorKind::WouldBlock {
                        error!("Encountered an error receiving a frame: {:?}", e);
                    }
                    break;
                }
            }
            if self.capture.is_blocking_mode() {
                break;
            }
        }

        while time.saturating_duration_since(self.last_prune) >= self.prune_interval {
            self.last_prune += self.prune_interval;
            let flows = self.engine.on_prune_timeout();
            self.pending.push(Action::Emit(RelayEvent::Pruned { tick: self.engine.tick(), flows }));
        }

        self.flush();
    }

    fn apply_command(&mut self, command: ControlCommand) {
        debug!("Applying {:?}", command);
        match command {
            ControlCommand::SetRelayEnabled(on) => self.engine.set_relay_enabled(on),
            ControlCommand::SetRelaySelected(on) => self.engine.set_relay_selected(on),
            ControlCommand::SetSelectors(selectors) => self.engine.set_selectors(selectors),
            ControlCommand::SetNeighbors(neighbors) => self.engine.set_neighbors(neighbors),
            ControlCommand::AddLocalAddress(addr) => {
                self.engine.add_local_address(addr);
            }
            ControlCommand::RemoveLocalAddress(addr) => {
                self.engine.remove_local_address(&addr);
            }
        }
    }

    fn handle_frame(&mut self, bytes: Vec<u8>, info: FrameInfo) {
        let max_size = self.engine.config().max_packet_size;
        let mut packet = match PacketBuffer::with_max_size(bytes, max_size) {
            Ok(packet) => packet,
            Err(err) => {
                debug!("Discarding malformed frame on interface {}: {}", info.interface, err);
                self.pending.push(Action::Emit(RelayEvent::Dropped {
                    interface: info.interface,
                    reason: DropReason::Malformed,
                }));
                return;
            }
        };

        let destinations = self.engine.process_packet(&mut packet, info.src_mac, info.interface);
        if destinations.is_empty() {
            if let Some(reason) = self.engine.last_drop() {
                self.pending
                    .push(Action::Emit(RelayEvent::Dropped { interface: info.interface, reason }));
            }
            return;
        }

        let bytes = packet.into_vec();
        for &interface in &destinations {
            self.pending.push(Action::Send { interface, packet: bytes.clone() });
        }
        self.pending.push(Action::Emit(RelayEvent::Forwarded {
            interface: info.interface,
            destinations,
        }));
    }

    fn flush(&mut self) {
        for action in self.pending.drain(..) {
            match action {
                Action::Send { interface, mut packet } => {
                    if !self.interceptor.on_send(interface, &mut packet) {
                        continue;
                    }
                    if let Err(err) = self.capture.send_frame(interface, &packet) {
                        error!("Error occured sending a frame (on {}): {}", interface, err)
                    }
                }
                Action::Emit(event) => self.event_sink.send(event),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        io,
        net::{IpAddr, Ipv4Addr},
    };

    use smfwarp_core::{
        config::{Config, InterfaceConfig, RelayType},
        MacAddr,
    };
    use smfwarp_relay::{GroupMode, InterfaceGroup};

    use super::*;
    use crate::time::ManualClock;

    /// In-memory capture: frames queued for receive, transmissions recorded.
    #[derive(Debug, Default)]
    struct MockCapture {
        inbound: VecDeque<(Vec<u8>, FrameInfo)>,
        sent: Vec<(usize, Vec<u8>)>,
    }

    impl Capture for MockCapture {
        fn receive_frame<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<(&'a [u8], FrameInfo)> {
            match self.inbound.pop_front() {
                Some((frame, info)) => {
                    buffer[..frame.len()].copy_from_slice(&frame);
                    Ok((&buffer[..frame.len()], info))
                }
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }

        fn send_frame(&mut self, interface: usize, packet: &[u8]) -> io::Result<usize> {
            self.sent.push((interface, packet.to_vec()));
            Ok(packet.len())
        }

        fn is_blocking_mode(&self) -> bool {
            false
        }
    }

    struct BlockInterface(usize);

    impl Interceptor for BlockInterface {
        fn on_receive(&mut self, _interface: usize, _packet: &mut [u8]) -> bool {
            true
        }

        fn on_send(&mut self, interface: usize, _packet: &mut Vec<u8>) -> bool {
            interface != self.0
        }
    }

    fn mac(n: u8) -> MacAddr {
        MacAddr::new([0x02, 0, 0, 0, 0, n])
    }

    fn frame(ttl: u8, id: u16) -> Vec<u8> {
        let mut data = vec![0x45, 0, 0, 24, 0, 0, 0, 0, ttl, 17, 0, 0, 10, 0, 0, 1, 239, 0, 0, 1];
        data[4..6].copy_from_slice(&id.to_be_bytes());
        data.extend_from_slice(b"ping");
        let mut packet = PacketBuffer::new(data).unwrap();
        packet.update_ipv4_checksum();
        packet.into_vec()
    }

    fn engine() -> ForwardingEngine {
        let mut engine = ForwardingEngine::new(Config::default()).unwrap();
        let members: Vec<usize> = (0..3)
            .map(|n| engine.add_interface(InterfaceConfig::new(format!("wlan{}", n), mac(n))))
            .collect();
        let group = InterfaceGroup::new("manet", RelayType::Cf, GroupMode::Relay, members).unwrap();
        engine.add_group(group).unwrap();
        engine
    }

    fn host() -> RelayHost<MockCapture, ManualClock> {
        RelayHost::with_clock(engine(), MockCapture::default(), ManualClock::default())
    }

    fn receive(host: &mut RelayHost<MockCapture, ManualClock>, bytes: Vec<u8>, interface: usize) {
        let info = FrameInfo { interface, src_mac: mac(0x42) };
        host.capture_mut().inbound.push_back((bytes, info));
    }

    #[test]
    fn test_forwards_on_every_destination() {
        let mut host = host();
        receive(&mut host, frame(4, 1), 0);
        receive(&mut host, frame(4, 1), 0);
        host.poll();

        let sent: Vec<usize> = host.capture().sent.iter().map(|(i, _)| *i).collect();
        assert_eq!(sent, vec![1, 2]);
        let copy = PacketBuffer::from_slice(&host.capture().sent[0].1).unwrap();
        assert_eq!(copy.ttl(), 3);
        assert_eq!(
            host.recv(),
            Some(RelayEvent::Forwarded { interface: 0, destinations: vec![1, 2] })
        );
        // the duplicate is suppressed, not dropped
        assert_eq!(host.recv(), None);
    }

    #[test]
    fn test_drop_events() {
        let mut host = host();
        receive(&mut host, vec![0x45, 0, 0], 0);
        receive(&mut host, frame(1, 2), 1);
        host.poll();
        assert_eq!(
            host.recv(),
            Some(RelayEvent::Dropped { interface: 0, reason: DropReason::Malformed })
        );
        assert_eq!(
            host.recv(),
            Some(RelayEvent::Dropped { interface: 1, reason: DropReason::TtlExpired })
        );
        assert!(host.capture().sent.is_empty());
    }

    #[test]
    fn test_control_commands_apply_before_frames() {
        let mut host = host();
        let commands = host.command_sender();
        commands.send(ControlCommand::SetRelayEnabled(false)).unwrap();
        receive(&mut host, frame(8, 3), 0);
        host.poll();
        assert!(!host.engine().is_relay_enabled());
        assert!(host.capture().sent.is_empty());

        let local = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        commands.send(ControlCommand::AddLocalAddress(local)).unwrap();
        receive(&mut host, frame(8, 4), 0);
        host.poll();
        assert_eq!(host.capture().sent.len(), 2);
    }

    #[test]
    fn test_prune_timer_fires_per_interval() {
        let mut host = host();
        let events = host.event_receiver();
        host.clock.advance(Duration::from_secs(11));
        host.poll();

        let pruned: Vec<RelayEvent> = events.try_iter().collect();
        assert_eq!(pruned.len(), 2);
        assert!(matches!(pruned[1], RelayEvent::Pruned { flows: 0, .. }));
        assert_eq!(host.engine().tick().value(), 10);
    }

    #[test]
    fn test_interceptor_suppresses_copies() {
        let interceptor: Box<dyn Interceptor> = Box::new(BlockInterface(2));
        let mut host = RelayHost::with_clock_and_interceptor(
            engine(),
            MockCapture::default(),
            ManualClock::default(),
            Some(interceptor),
        );
        receive(&mut host, frame(8, 5), 0);
        host.poll();
        let sent: Vec<usize> = host.capture().sent.iter().map(|(i, _)| *i).collect();
        assert_eq!(sent, vec![1]);
    }
}
