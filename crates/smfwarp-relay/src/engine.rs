use std::{collections::HashSet, net::IpAddr};

use tracing::{debug, trace, warn};

use smfwarp_core::{
    config::{Config, InterfaceConfig, RelayType},
    error::{ErrorKind, Result},
    MacAddr, Tick,
};
use smfwarp_protocol::{DpdIdentity, Marking, PacketBuffer, PacketIdentifier};

use crate::{
    group::{Associate, AssociateMap, InterfaceGroup},
    interface::Interface,
    neighbors::{NeighborTable, SenderKind},
    relay_state::RelaySwitch,
    statistics::{DropReason, ForwardingStats},
};

/// Folded decision for one destination interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Decision {
    dst: usize,
    forward: bool,
    track: bool,
}

/// Per-packet forwarding state machine.
///
/// Owns every interface and its duplicate tables, the interface groups and the
/// associate graph derived from them, the packet identifier and the relay
/// switches. All state changes happen through `&mut self`, one packet or timer
/// event at a time.
#[derive(Debug)]
pub struct ForwardingEngine {
    config: Config,
    interfaces: Vec<Option<Interface>>,
    groups: Vec<InterfaceGroup>,
    associates: AssociateMap,
    identifier: PacketIdentifier,
    neighbors: NeighborTable,
    relay_enabled: RelaySwitch,
    relay_selected: RelaySwitch,
    local_addrs: HashSet<IpAddr>,
    tick: Tick,
    stats: ForwardingStats,
    last_drop: Option<DropReason>,
}

impl ForwardingEngine {
    /// Creates an engine with no interfaces. Rejects invalid configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let identifier = PacketIdentifier::new(&config)?;
        Ok(Self {
            relay_enabled: RelaySwitch::from_bool(config.relay_enabled),
            relay_selected: RelaySwitch::from_bool(config.relay_selected),
            config,
            interfaces: Vec::new(),
            groups: Vec::new(),
            associates: AssociateMap::default(),
            identifier,
            neighbors: NeighborTable::new(),
            local_addrs: HashSet::new(),
            tick: Tick::ZERO,
            stats: ForwardingStats::default(),
            last_drop: None,
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current logical time.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Counters.
    pub fn stats(&self) -> &ForwardingStats {
        &self.stats
    }

    /// Resets all counters.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Why the last packet was dropped. `None` if it was forwarded, or only
    /// suppressed by relay policy or duplicate detection.
    pub fn last_drop(&self) -> Option<DropReason> {
        self.last_drop
    }

    // ------------------------------------------------------------------
    // Interfaces and groups
    // ------------------------------------------------------------------

    /// Adds an interface and returns its index. Indices are never reused.
    pub fn add_interface(&mut self, config: InterfaceConfig) -> usize {
        let index = self.interfaces.len();
        debug!("Adding interface {} ({}) as {}", config.name, config.mac, index);
        self.interfaces.push(Some(Interface::new(config, &self.config)));
        index
    }

    /// Removes an interface, dropping it from every group. Groups left without
    /// members (or without their PUSH source) are removed too.
    pub fn remove_interface(&mut self, index: usize) -> Result<InterfaceConfig> {
        let interface = self
            .interfaces
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(ErrorKind::UnknownInterface(index))?;
        self.groups.retain_mut(|group| {
            let keep = group.remove_member(index);
            if !keep {
                debug!("Removing group {} after losing interface {}", group.name(), index);
            }
            keep
        });
        self.rebuild_associates();
        Ok(interface.config().clone())
    }

    /// Interface at `index`.
    pub fn interface(&self, index: usize) -> Option<&Interface> {
        self.interfaces.get(index).and_then(Option::as_ref)
    }

    /// Number of live interfaces.
    pub fn interface_count(&self) -> usize {
        self.interfaces.iter().flatten().count()
    }

    /// Flows tracked by the duplicate tables of interface `index`.
    pub fn flow_count(&self, index: usize) -> Option<usize> {
        self.interface(index).map(Interface::flow_count)
    }

    /// Adds a group, replacing any group with the same name. Every member must
    /// be a live interface.
    pub fn add_group(&mut self, group: InterfaceGroup) -> Result<()> {
        if let Some(missing) = group.members().iter().find(|m| self.interface(**m).is_none()) {
            return Err(ErrorKind::UnknownInterface(*missing));
        }
        match self.groups.iter_mut().find(|g| g.name() == group.name()) {
            Some(existing) => {
                debug!("Replacing group {}", group.name());
                *existing = group;
            }
            None => self.groups.push(group),
        }
        self.rebuild_associates();
        Ok(())
    }

    /// Removes the group called `name`.
    pub fn remove_group(&mut self, name: &str) -> Option<InterfaceGroup> {
        let position = self.groups.iter().position(|g| g.name() == name)?;
        let group = self.groups.remove(position);
        self.rebuild_associates();
        Some(group)
    }

    /// Configured groups.
    pub fn groups(&self) -> &[InterfaceGroup] {
        &self.groups
    }

    /// Edges leaving interface `src`.
    pub fn associates(&self, src: usize) -> &[Associate] {
        self.associates.from_source(src)
    }

    fn rebuild_associates(&mut self) {
        let interfaces = &self.interfaces;
        let reflects = |index: usize| {
            interfaces
                .get(index)
                .and_then(Option::as_ref)
                .is_some_and(|interface| interface.config().reflect)
        };
        self.associates = AssociateMap::build(&self.groups, reflects);
        trace!("Rebuilt associates: {} edges", self.associates.len());
    }

    // ------------------------------------------------------------------
    // Relay state
    // ------------------------------------------------------------------

    /// Turns the relay function on, or off after the configured stop delay.
    pub fn set_relay_enabled(&mut self, on: bool) {
        self.relay_enabled.set(on, self.tick, self.config.relay_stop_delay);
    }

    /// Sets E_CDS relay selection, with the same stop delay.
    pub fn set_relay_selected(&mut self, on: bool) {
        self.relay_selected.set(on, self.tick, self.config.relay_stop_delay);
    }

    /// Returns true while the relay function is on.
    pub fn is_relay_enabled(&self) -> bool {
        self.relay_enabled.is_active(self.tick)
    }

    /// Returns true while this node is a selected E_CDS relay.
    pub fn is_relay_selected(&self) -> bool {
        self.relay_selected.is_active(self.tick)
    }

    /// Replaces the MPR selector set.
    pub fn set_selectors(&mut self, selectors: impl IntoIterator<Item = MacAddr>) {
        self.neighbors.set_selectors(selectors);
    }

    /// Replaces the symmetric neighbor set.
    pub fn set_neighbors(&mut self, neighbors: impl IntoIterator<Item = MacAddr>) {
        self.neighbors.set_neighbors(neighbors);
    }

    /// Selector and neighbor sets.
    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    /// Registers an address packets originated by this node carry.
    pub fn add_local_address(&mut self, addr: IpAddr) -> bool {
        self.local_addrs.insert(addr)
    }

    /// Forgets a local address.
    pub fn remove_local_address(&mut self, addr: &IpAddr) -> bool {
        self.local_addrs.remove(addr)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Periodic timer: advances the logical clock, ages out idle flows
    /// everywhere and completes delayed relay shutdowns.
    ///
    /// Returns the number of flows removed.
    pub fn on_prune_timeout(&mut self) -> usize {
        self.tick.advance(self.config.prune_interval_ticks);
        let now = self.tick;
        let max_age = self.config.update_age_max;

        let mut pruned = 0;
        for interface in self.interfaces.iter_mut().flatten() {
            pruned += interface.prune(now, max_age);
        }
        pruned += self.identifier.prune(now, max_age);

        if self.relay_enabled.settle(now) {
            debug!("Relay function disabled at tick {}", now.value());
        }
        if self.relay_selected.settle(now) {
            debug!("Relay selection dropped at tick {}", now.value());
        }
        trace!("Prune at tick {} removed {} flows", now.value(), pruned);
        pruned
    }

    /// Decides where a packet arriving on `src_iface` from `src_mac` goes.
    ///
    /// The packet may be modified: TTL / hop limit decremented, identifier
    /// overwritten or added, hash assist value installed. Returns destination
    /// interface indices in associate order; an empty list means the packet is
    /// not sent anywhere.
    pub fn process_packet(
        &mut self,
        packet: &mut PacketBuffer,
        src_mac: MacAddr,
        src_iface: usize,
    ) -> Vec<usize> {
        self.stats.received += 1;
        self.last_drop = None;
        let now = self.tick;

        let (own_mac, tunnel, resequence) = match self.interface(src_iface) {
            Some(interface) => {
                let config = interface.config();
                (config.mac, config.tunnel, config.resequence)
            }
            None => return self.drop_packet(DropReason::UnknownInterface),
        };

        if !src_mac.is_valid_source() {
            warn!("Invalid source link address {} on interface {}", src_mac, src_iface);
            self.stats.invalid_source_mac += 1;
        }
        if src_mac == own_mac {
            return self.drop_packet(DropReason::Recapture);
        }
        if !tunnel && is_link_local(packet) {
            return self.drop_packet(DropReason::LinkLocal);
        }
        let unicast = !packet.dst_addr().is_multicast();
        if unicast && !self.config.forward_unicast {
            return self.drop_packet(DropReason::Unicast);
        }

        let local = self.local_addrs.contains(&packet.src_addr());
        let decisions = self.decide(src_mac, src_iface, local, unicast);
        if !decisions.iter().any(|d| d.track) {
            trace!("No destinations for packet on interface {}", src_iface);
            return Vec::new();
        }

        let decrement = !tunnel && !local;
        if decrement && packet.ttl() <= 1 {
            return self.drop_packet(DropReason::TtlExpired);
        }

        let identity = match self.identify(packet, src_iface, resequence) {
            Ok(identity) => identity,
            Err(reason) => return self.drop_packet(reason),
        };
        match identity.marking {
            Marking::Existing => {}
            Marking::Resequenced => self.stats.resequenced += 1,
            Marking::HashAssist(_) => self.stats.hav_installed += 1,
            Marking::HashAssistExhausted => self.stats.hav_exhausted += 1,
        }

        // The self-edge of a reflecting interface records the identity itself.
        let reflected = decisions.iter().any(|d| d.dst == src_iface && d.track);
        if identity.is_marked() && !reflected {
            if let Some(source) = self.interface_mut(src_iface) {
                source.is_duplicate(now, &identity);
            }
        }

        let mut destinations = Vec::with_capacity(decisions.len());
        for decision in decisions {
            let Some(interface) = self.interface_mut(decision.dst) else {
                continue;
            };
            if interface.is_duplicate(now, &identity) {
                if decision.forward {
                    self.stats.duplicates += 1;
                }
                continue;
            }
            if decision.forward {
                destinations.push(decision.dst);
            }
        }

        if !destinations.is_empty() {
            if decrement {
                packet.decrement_ttl();
            }
            self.stats.forwarded += 1;
            self.stats.transmissions += destinations.len() as u64;
        }
        trace!(
            "{:?} packet {} -> {} from {} on {}: {:?}",
            identity.dpd_type,
            packet.src_addr(),
            packet.dst_addr(),
            src_mac,
            src_iface,
            destinations
        );
        destinations
    }

    fn interface_mut(&mut self, index: usize) -> Option<&mut Interface> {
        self.interfaces.get_mut(index).and_then(Option::as_mut)
    }

    fn drop_packet(&mut self, reason: DropReason) -> Vec<usize> {
        trace!("Dropping packet: {}", reason);
        self.stats.record_drop(reason);
        self.last_drop = Some(reason);
        Vec::new()
    }

    /// Applies relay policy to every associate of `src_iface` and folds the
    /// results per destination.
    fn decide(
        &mut self,
        src_mac: MacAddr,
        src_iface: usize,
        local: bool,
        unicast: bool,
    ) -> Vec<Decision> {
        let now = self.tick;
        let relay_on = self.relay_enabled.is_active(now);
        let selected = self.relay_selected.is_active(now);
        let mut asymmetric = false;
        let mut decisions: Vec<Decision> = Vec::new();

        for associate in self.associates.from_source(src_iface) {
            if self.interface(associate.dst).is_none() {
                continue;
            }
            let (forward, track) = if local {
                (true, true)
            } else {
                match associate.relay_type {
                    RelayType::Cf => (relay_on, relay_on),
                    RelayType::ECds => {
                        let forward = relay_on && (selected || unicast);
                        (forward, forward)
                    }
                    RelayType::SMpr => match self.neighbors.classify(&src_mac) {
                        SenderKind::Selector => (relay_on, true),
                        SenderKind::Neighbor => (false, true),
                        SenderKind::Unknown => {
                            asymmetric = true;
                            (false, false)
                        }
                    },
                }
            };
            match decisions.iter_mut().find(|d| d.dst == associate.dst) {
                Some(existing) => {
                    existing.forward |= forward;
                    existing.track |= track;
                }
                None => decisions.push(Decision { dst: associate.dst, forward, track }),
            }
        }

        if asymmetric {
            debug!("Asymmetric link: {} is not a known neighbor", src_mac);
            self.stats.asymmetric += 1;
        }
        decisions
    }

    /// Identifies the packet, resequencing at ingress. A packet that arrives
    /// on a resequencing interface carrying an identifier this interface
    /// already recorded is an echo.
    fn identify(
        &mut self,
        packet: &mut PacketBuffer,
        src_iface: usize,
        resequence: bool,
    ) -> std::result::Result<DpdIdentity, DropReason> {
        let now = self.tick;
        let result = if resequence {
            // An IPv4 host's own Identification shares the flow key with the
            // values resequenced here. While the host counter walks through
            // the span already assigned, its packets read as echoes and the
            // resequencing counter stands still, so at most `window_size`
            // consecutive packets (or `max_tree_ids_per_flow` with the tree
            // table) are dropped before the host counter leaves that span.
            match self.identifier.classify(packet) {
                Ok(Some(existing))
                    if self.interface(src_iface).is_some_and(|i| i.contains(now, &existing)) =>
                {
                    return Err(DropReason::Echo);
                }
                Ok(_) => self.identifier.resequence(packet, now),
                Err(err) => Err(err),
            }
        } else {
            self.identifier.identify(packet)
        };
        result.map_err(|err| {
            let reason = drop_reason(&err);
            debug!("Cannot identify packet on interface {}: {}", src_iface, err);
            reason
        })
    }
}

/// Maps an identification failure to the counter it is recorded under.
fn drop_reason(err: &ErrorKind) -> DropReason {
    match err {
        ErrorKind::FragmentWithDontFragment => DropReason::InvalidFragment,
        ErrorKind::NoIdentifier | ErrorKind::HashUnavailable => DropReason::NoIdentifier,
        ErrorKind::InsufficientSpace { .. } => DropReason::MarkingFailed,
        _ => DropReason::Malformed,
    }
}

/// Link-local source, or a destination that must not leave the link.
fn is_link_local(packet: &PacketBuffer) -> bool {
    match (packet.src_addr(), packet.dst_addr()) {
        (IpAddr::V4(src), IpAddr::V4(dst)) => {
            src.is_link_local() || dst.octets()[..3] == [224, 0, 0]
        }
        (IpAddr::V6(src), IpAddr::V6(dst)) => {
            let scope = dst.octets()[1] & 0x0f;
            src.segments()[0] & 0xffc0 == 0xfe80 || (dst.is_multicast() && scope <= 2)
        }
        _ => false,
    }
}
