//! Duplicate detection identifiers for IP packets.
//!
//! [`PacketIdentifier`] turns a packet into a `(flow_id, pkt_id)` pair. It
//! prefers identifiers already carried by the packet (fragmentation, IPSec,
//! an SMF_DPD option) and otherwise adds one (resequencing at ingress) or
//! falls back to a digest of the hop-invariant packet bytes.
//!
//! Every flow key starts with the 4-bit [`DpdType`] code so identifiers of
//! different kinds never share a flow.

use std::net::IpAddr;

use smfwarp_core::{
    config::{Config, HashMode},
    constants::{IPPROTO_AH, IPPROTO_ESP, IPPROTO_FRAGMENT, HAV_MAX, RESEQUENCE_BITS},
    error::{ErrorKind, Result},
    Tick,
};
use smfwarp_dpd::{DuplicateDetector, FlowKey, PacketId, SequenceAllocator, TreeTable};

use crate::{
    dpd_option::{find_dpd_option, write_dpd_option, DpdOption, TaggerId},
    ext::{ExtensionChain, FragmentHeader, IpsecHeader},
    hash::{hash_provider, HashProvider},
    packet::{IpVersion, PacketBuffer},
};

/// Where a packet's duplicate detection identifier came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DpdType {
    /// Fragment identification (IPv4 ID:flags:offset or IPv6 fragment header).
    Frag,
    /// IPSec AH/ESP sequence number.
    Ipsec,
    /// SMF_DPD identification option.
    SmfI,
    /// Digest of a packet carrying an SMF_DPD hash assist value.
    SmfH,
    /// IPv4 Identification field.
    Ipv4Id,
    /// Digest of a packet with no explicit identifier.
    Hash,
}

impl DpdType {
    /// 4-bit code prefixed to flow keys.
    pub fn code(self) -> u8 {
        match self {
            DpdType::Frag => 1,
            DpdType::Ipsec => 2,
            DpdType::SmfI => 3,
            DpdType::SmfH => 4,
            DpdType::Ipv4Id => 5,
            DpdType::Hash => 6,
        }
    }

    fn key(self) -> FlowKey {
        FlowKey::new().with_bits(u64::from(self.code()), 4)
    }
}

/// What this node did to the packet while identifying it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Marking {
    /// Packet left as received.
    Existing,
    /// Identifier overwritten or added from a sequence allocator.
    Resequenced,
    /// Hash assist value installed to resolve a digest collision.
    HashAssist(u8),
    /// Every hash assist value collided; the packet carries the last one tried.
    HashAssistExhausted,
}

/// Identifier pair fed to the duplicate tables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DpdIdentity {
    /// Kind of identifier.
    pub dpd_type: DpdType,
    /// Flow the identifier is scoped to.
    pub flow_id: FlowKey,
    /// Identifier of the packet within the flow.
    pub pkt_id: PacketId,
    /// Changes made to the packet.
    pub marking: Marking,
}

impl DpdIdentity {
    fn new(dpd_type: DpdType, flow_id: FlowKey, pkt_id: PacketId) -> Self {
        Self { dpd_type, flow_id, pkt_id, marking: Marking::Existing }
    }

    /// Returns true if this node assigned the identifier.
    pub fn is_marked(&self) -> bool {
        self.marking != Marking::Existing
    }
}

/// Extracts or injects duplicate detection identifiers.
#[derive(Debug)]
pub struct PacketIdentifier {
    ipv4_sequences: SequenceAllocator,
    ipv6_sequences: SequenceAllocator,
    hasher: Option<Box<dyn HashProvider>>,
    hash_mode: HashMode,
    collisions: TreeTable,
    use_idpd: bool,
    tagger: TaggerId,
}

impl PacketIdentifier {
    /// Creates an identifier from the engine configuration.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            ipv4_sequences: SequenceAllocator::new(RESEQUENCE_BITS, config.max_flows)?,
            ipv6_sequences: SequenceAllocator::new(RESEQUENCE_BITS, config.max_flows)?,
            hasher: hash_provider(config.hash_algorithm),
            hash_mode: config.hash_mode,
            collisions: TreeTable::new(
                config.max_flows,
                config.max_tree_ids_per_flow,
                config.update_age_max,
            ),
            use_idpd: config.use_idpd,
            tagger: TaggerId::from(config.tagger_id),
        })
    }

    /// Reads the identifier a packet already carries.
    ///
    /// Returns `None` for an IPv6 packet with nothing usable, which is the
    /// case resequencing adds an identifier for. IPv4 packets always have one
    /// (or fail).
    pub fn classify(&mut self, packet: &PacketBuffer) -> Result<Option<DpdIdentity>> {
        match packet.version() {
            IpVersion::V4 => self.classify_ipv4(packet).map(Some),
            IpVersion::V6 => self.classify_ipv6(packet),
        }
    }

    /// Identifies a packet arriving on a non-resequencing interface.
    ///
    /// Packets with no explicit identifier are identified by digest.
    pub fn identify(&mut self, packet: &PacketBuffer) -> Result<DpdIdentity> {
        match self.classify(packet)? {
            Some(identity) => Ok(identity),
            None if self.hasher.is_some() => self.hash_identity(packet, DpdType::Hash),
            None => Err(ErrorKind::NoIdentifier),
        }
    }

    /// Identifies a packet arriving on a resequencing (ingress) interface,
    /// overwriting or adding an identifier where the packet allows it.
    ///
    /// IPv4 packets get a fresh Identification; IPv6 packets without an
    /// identifier get an SMF_DPD option (or a hash assist value in H-DPD
    /// mode). Fragments and IPSec packets keep their identifiers.
    pub fn resequence(&mut self, packet: &mut PacketBuffer, now: Tick) -> Result<DpdIdentity> {
        let src = packet.src_addr();
        let dst = packet.dst_addr();
        match packet.version() {
            IpVersion::V4 => {
                let identity = self.classify_ipv4(packet)?;
                if identity.dpd_type != DpdType::Ipv4Id {
                    return Ok(identity);
                }
                let seq = self.ipv4_sequences.increment_sequence(now, dst, Some(src));
                packet.set_ipv4_identification(seq as u16);
                tracing::trace!("Resequenced IPv4 {} -> {} as {}", src, dst, seq);
                Ok(DpdIdentity {
                    pkt_id: PacketId::from_value(u64::from(seq), RESEQUENCE_BITS),
                    marking: Marking::Resequenced,
                    ..identity
                })
            }
            IpVersion::V6 => {
                if let Some(identity) = self.classify_ipv6(packet)? {
                    return Ok(identity);
                }
                if self.use_idpd {
                    let seq = self.ipv6_sequences.increment_sequence(now, dst, Some(src));
                    let id = (seq as u16).to_be_bytes().to_vec();
                    let mut identity = smf_identity(&self.tagger, &id, src, dst);
                    let option = DpdOption::Identification { tagger: self.tagger.clone(), id };
                    write_dpd_option(packet, &option)?;
                    tracing::trace!("Added SMF_DPD identifier {} to {} -> {}", seq, src, dst);
                    identity.marking = Marking::Resequenced;
                    Ok(identity)
                } else if self.hasher.is_none() {
                    Err(ErrorKind::NoIdentifier)
                } else if self.hash_mode == HashMode::Hdpd {
                    self.assist_hash(packet, now)
                } else {
                    self.hash_identity(packet, DpdType::Hash)
                }
            }
        }
    }

    /// Prunes sequence allocators and the hash collision table.
    pub fn prune(&mut self, now: Tick, max_age: u64) -> usize {
        self.ipv4_sequences.prune(now, max_age)
            + self.ipv6_sequences.prune(now, max_age)
            + self.collisions.prune(now, max_age)
    }

    /// Sources currently tracked by the hash collision table.
    pub fn collision_flow_count(&self) -> usize {
        self.collisions.flow_count()
    }

    fn classify_ipv4(&mut self, packet: &PacketBuffer) -> Result<DpdIdentity> {
        let protocol = packet.ipv4_protocol();
        let src = IpAddr::V4(packet.ipv4_src());
        let dst = IpAddr::V4(packet.ipv4_dst());
        let flow = |dpd_type: DpdType| {
            dpd_type.key().with_bits(u64::from(protocol), 8).with_addr(src).with_addr(dst)
        };

        if packet.ipv4_is_fragment() {
            if packet.ipv4_dont_fragment() {
                tracing::warn!("IPv4 fragment {} -> {} has DF set", src, dst);
                return Err(ErrorKind::FragmentWithDontFragment);
            }
            let pkt_id = PacketId::from_value(u64::from(packet.ipv4_fragment_id()), 32);
            return Ok(DpdIdentity::new(DpdType::Frag, flow(DpdType::Frag), pkt_id));
        }

        if protocol == IPPROTO_AH || protocol == IPPROTO_ESP {
            let ipsec = IpsecHeader::read(packet.as_slice(), packet.header_len(), protocol)?;
            let flow_id = flow(DpdType::Ipsec).with_bits(u64::from(ipsec.spi), 32);
            let pkt_id = PacketId::from_value(u64::from(ipsec.sequence), 32);
            return Ok(DpdIdentity::new(DpdType::Ipsec, flow_id, pkt_id));
        }

        if self.use_idpd {
            let pkt_id = PacketId::from_value(u64::from(packet.ipv4_identification()), 16);
            Ok(DpdIdentity::new(DpdType::Ipv4Id, flow(DpdType::Ipv4Id), pkt_id))
        } else if self.hasher.is_some() {
            self.hash_identity(packet, DpdType::Hash)
        } else {
            Err(ErrorKind::NoIdentifier)
        }
    }

    fn classify_ipv6(&mut self, packet: &PacketBuffer) -> Result<Option<DpdIdentity>> {
        let src = IpAddr::V6(packet.ipv6_src());
        let dst = IpAddr::V6(packet.ipv6_dst());
        let chain = ExtensionChain::walk(packet)?;

        if let Some(hbh) = chain.hop_by_hop() {
            match find_dpd_option(packet, hbh)? {
                Some(DpdOption::Identification { tagger, id }) => {
                    return Ok(Some(smf_identity(&tagger, &id, src, dst)));
                }
                Some(DpdOption::HashAssist { .. }) => {
                    return self.hash_identity(packet, DpdType::SmfH).map(Some);
                }
                None => {}
            }
        }

        let header = match chain.first_identifying() {
            Some(header) => header,
            None => return Ok(None),
        };
        let data = packet.as_slice();
        if header.protocol == IPPROTO_FRAGMENT {
            let fragment = FragmentHeader::read(data, header.offset)?;
            let flow_id = DpdType::Frag
                .key()
                .with_addr(src)
                .with_addr(dst)
                .with_bits(u64::from(fragment.offset_flags), 16);
            let pkt_id = PacketId::from_value(u64::from(fragment.identification), 32);
            Ok(Some(DpdIdentity::new(DpdType::Frag, flow_id, pkt_id)))
        } else {
            let ipsec = IpsecHeader::read(data, header.offset, header.protocol)?;
            let flow_id = DpdType::Ipsec
                .key()
                .with_bits(u64::from(header.protocol), 8)
                .with_addr(src)
                .with_addr(dst)
                .with_bits(u64::from(ipsec.spi), 32);
            let pkt_id = PacketId::from_value(u64::from(ipsec.sequence), 32);
            Ok(Some(DpdIdentity::new(DpdType::Ipsec, flow_id, pkt_id)))
        }
    }

    /// Digest identity over the hop-invariant bytes of the packet.
    fn hash_identity(&mut self, packet: &PacketBuffer, dpd_type: DpdType) -> Result<DpdIdentity> {
        let src = packet.src_addr();
        let dst = packet.dst_addr();
        let data = packet.as_slice();
        let hasher = self.hasher.as_mut().ok_or(ErrorKind::HashUnavailable)?;

        let digest = match packet.version() {
            IpVersion::V4 => {
                let protocol = [packet.ipv4_protocol()];
                let parts: [&[u8]; 4] =
                    [&protocol, &data[12..20], &data[4..8], &data[packet.header_len()..]];
                hasher.digest(&parts)
            }
            IpVersion::V6 => {
                let chain = ExtensionChain::walk(packet)?;
                let hav = match chain.hop_by_hop() {
                    Some(hbh) => match find_dpd_option(packet, hbh)? {
                        Some(DpdOption::HashAssist { hav }) => hav,
                        _ => Vec::new(),
                    },
                    None => Vec::new(),
                };
                let parts: [&[u8]; 3] = [&data[8..40], &hav, &data[chain.after_hop_by_hop()..]];
                hasher.digest(&parts)
            }
        };

        let flow_id = dpd_type.key().with_addr(src).with_addr(dst);
        Ok(DpdIdentity::new(dpd_type, flow_id, PacketId::from_bytes(&digest)))
    }

    /// H-DPD at ingress: checks the digest against recent digests from the
    /// same source and installs hash assist values until it is unique.
    fn assist_hash(&mut self, packet: &mut PacketBuffer, now: Tick) -> Result<DpdIdentity> {
        let src = packet.src_addr();
        let source = FlowKey::new().with_addr(src);

        let mut identity = self.hash_identity(packet, DpdType::Hash)?;
        if !self.collisions.is_duplicate(now, &source, &identity.pkt_id) {
            return Ok(identity);
        }
        for value in 0..=HAV_MAX {
            write_dpd_option(packet, &DpdOption::hash_assist(value))?;
            identity = self.hash_identity(packet, DpdType::SmfH)?;
            if !self.collisions.is_duplicate(now, &source, &identity.pkt_id) {
                tracing::debug!("Installed hash assist value {} for packet from {}", value, src);
                identity.marking = Marking::HashAssist(value);
                return Ok(identity);
            }
        }
        tracing::error!("Hash assist values exhausted for packet from {}", src);
        identity.marking = Marking::HashAssistExhausted;
        Ok(identity)
    }
}

fn smf_identity(tagger: &TaggerId, id: &[u8], src: IpAddr, dst: IpAddr) -> DpdIdentity {
    let flow_id = DpdType::SmfI
        .key()
        .with_bits(u64::from(tagger.type_code()), 3)
        .with_bytes(&tagger.bytes())
        .with_addr(src)
        .with_addr(dst);
    DpdIdentity::new(DpdType::SmfI, flow_id, PacketId::from_bytes(id))
}

#[cfg(test)]
mod tests {
    use smfwarp_core::{
        config::HashAlgorithm,
        constants::{IPPROTO_HOPOPTS, IPPROTO_NONE},
    };

    use super::*;
    use crate::packet::tests::{ipv4_packet, ipv6_packet};

    fn identifier(config: Config) -> PacketIdentifier {
        PacketIdentifier::new(&config).unwrap()
    }

    fn v4(id: u16, payload: &[u8]) -> PacketBuffer {
        PacketBuffer::new(ipv4_packet(8, id, [224, 1, 1, 1], payload)).unwrap()
    }

    #[test]
    fn test_ipv4_identification() {
        let mut ident = identifier(Config::default());
        let identity = ident.identify(&v4(0xbeef, b"x")).unwrap();
        assert_eq!(identity.dpd_type, DpdType::Ipv4Id);
        assert_eq!(identity.pkt_id, PacketId::from_value(0xbeef, 16));
        assert_eq!(identity.flow_id.bit_len(), 4 + 8 + 64);
        assert!(!identity.is_marked());
    }

    #[test]
    fn test_ipv4_fragments() {
        let mut ident = identifier(Config::default());
        let mut data = ipv4_packet(8, 0x0102, [224, 1, 1, 1], b"frag");
        data[6] = 0x20; // MF
        let mut packet = PacketBuffer::new(data).unwrap();
        packet.update_ipv4_checksum();
        let identity = ident.identify(&packet).unwrap();
        assert_eq!(identity.dpd_type, DpdType::Frag);
        assert_eq!(identity.pkt_id, PacketId::from_value(0x0102_2000, 32));

        // resequencing never touches fragments
        let resequenced = ident.resequence(&mut packet, Tick::ZERO).unwrap();
        assert_eq!(resequenced, identity);
        assert_eq!(packet.ipv4_identification(), 0x0102);

        let mut data = ipv4_packet(8, 0x0102, [224, 1, 1, 1], b"frag");
        data[6] = 0x60; // DF + MF
        let packet = PacketBuffer::new(data).unwrap();
        assert!(matches!(ident.identify(&packet), Err(ErrorKind::FragmentWithDontFragment)));
    }

    #[test]
    fn test_ipv4_ipsec() {
        let mut ident = identifier(Config::default());
        let esp = [0, 0, 0x10, 0x01, 0, 0, 0, 0x2a, 0xff];
        let mut data = ipv4_packet(8, 1, [224, 1, 1, 1], &esp);
        data[9] = IPPROTO_ESP;
        let identity = ident.identify(&PacketBuffer::new(data).unwrap()).unwrap();
        assert_eq!(identity.dpd_type, DpdType::Ipsec);
        assert_eq!(identity.pkt_id, PacketId::from_value(42, 32));
        assert_eq!(identity.flow_id.bit_len(), 4 + 8 + 64 + 32);
    }

    #[test]
    fn test_ipv4_resequence() {
        let mut ident = identifier(Config::default());
        let mut first = v4(0xbeef, b"a");
        let mut second = v4(0xbeef, b"b");
        let a = ident.resequence(&mut first, Tick::ZERO).unwrap();
        let b = ident.resequence(&mut second, Tick::ZERO).unwrap();
        assert_eq!(a.marking, Marking::Resequenced);
        assert_eq!(a.flow_id, b.flow_id);
        assert_eq!(second.ipv4_identification(), first.ipv4_identification().wrapping_add(1));
        assert!(first.ipv4_checksum_valid());
        assert_eq!(ident.identify(&first).unwrap().pkt_id, a.pkt_id);
    }

    #[test]
    fn test_ipv4_hash_when_idpd_disabled() {
        let mut config = Config::default();
        config.use_idpd = false;
        let result = identifier(config.clone()).identify(&v4(1, b"x"));
        assert!(matches!(result, Err(ErrorKind::NoIdentifier)));

        config.hash_algorithm = HashAlgorithm::Md5;
        let mut ident = identifier(config);
        let a = ident.identify(&v4(1, b"x")).unwrap();
        assert_eq!(a.dpd_type, DpdType::Hash);
        assert_eq!(a.pkt_id.bit_len(), 128);

        // TTL is not covered by the digest, the payload is
        let mut aged = v4(1, b"x");
        aged.decrement_ttl();
        assert_eq!(ident.identify(&aged).unwrap(), a);
        assert_ne!(ident.identify(&v4(1, b"y")).unwrap().pkt_id, a.pkt_id);
    }

    #[test]
    fn test_ipv6_without_identifier() {
        let packet = PacketBuffer::new(ipv6_packet(8, 17, b"udp")).unwrap();
        let mut ident = identifier(Config::default());
        assert_eq!(ident.classify(&packet).unwrap(), None);
        assert!(matches!(ident.identify(&packet), Err(ErrorKind::NoIdentifier)));

        let mut config = Config::default();
        config.hash_algorithm = HashAlgorithm::Crc32;
        let mut ident = identifier(config);
        let identity = ident.identify(&packet).unwrap();
        assert_eq!(identity.dpd_type, DpdType::Hash);
        assert_eq!(identity.pkt_id.bit_len(), 32);
    }

    #[test]
    fn test_ipv6_fragment_header() {
        let mut payload = vec![17, 0, 0x00, 0x01, 0, 0, 0x01, 0x00];
        payload.extend_from_slice(b"data");
        let packet = PacketBuffer::new(ipv6_packet(8, IPPROTO_FRAGMENT, &payload)).unwrap();
        let identity = identifier(Config::default()).identify(&packet).unwrap();
        assert_eq!(identity.dpd_type, DpdType::Frag);
        assert_eq!(identity.pkt_id, PacketId::from_value(0x100, 32));
        assert_eq!(identity.flow_id.bit_len(), 4 + 256 + 16);
    }

    #[test]
    fn test_ipv6_resequence_with_tagger() {
        let mut config = Config::default();
        config.tagger_id = Some("10.1.1.1".parse().unwrap());
        let mut ident = identifier(config);
        let mut packet = PacketBuffer::new(ipv6_packet(8, IPPROTO_NONE, &[])).unwrap();
        let marked = ident.resequence(&mut packet, Tick::ZERO).unwrap();
        assert_eq!(packet.ipv6_next_header(), IPPROTO_HOPOPTS);
        assert_eq!(marked.pkt_id.bit_len(), 16);
        assert_eq!(marked.flow_id.bit_len(), 4 + 3 + 32 + 256);

        let read_back = ident.classify(&packet).unwrap().unwrap();
        assert_eq!(read_back.flow_id, marked.flow_id);
        assert_eq!(read_back.pkt_id, marked.pkt_id);
        assert_eq!(read_back.marking, Marking::Existing);

        // already marked: resequencing again keeps the identifier
        let again = ident.resequence(&mut packet, Tick::new(1)).unwrap();
        assert_eq!(again.pkt_id, marked.pkt_id);
    }

    #[test]
    fn test_hdpd_installs_hash_assist_on_collision() {
        let mut config = Config::default();
        config.use_idpd = false;
        config.hash_algorithm = HashAlgorithm::Crc32;
        config.hash_mode = HashMode::Hdpd;
        let mut ident = identifier(config);
        let original = PacketBuffer::new(ipv6_packet(8, 17, b"same payload")).unwrap();

        let mut first = original.clone();
        let a = ident.resequence(&mut first, Tick::ZERO).unwrap();
        assert_eq!(a.dpd_type, DpdType::Hash);
        assert_eq!(first, original);

        let mut second = original.clone();
        let b = ident.resequence(&mut second, Tick::ZERO).unwrap();
        assert_eq!(b.dpd_type, DpdType::SmfH);
        assert_eq!(b.marking, Marking::HashAssist(0));
        assert_ne!(a.pkt_id, b.pkt_id);

        let mut third = original.clone();
        let c = ident.resequence(&mut third, Tick::ZERO).unwrap();
        assert_eq!(c.marking, Marking::HashAssist(1));

        // a downstream node derives the same identity from the marked packet
        let mut downstream = identifier(Config {
            hash_algorithm: HashAlgorithm::Crc32,
            ..Config::default()
        });
        let seen = downstream.identify(&third).unwrap();
        assert_eq!(seen.flow_id, c.flow_id);
        assert_eq!(seen.pkt_id, c.pkt_id);
        assert_eq!(ident.collision_flow_count(), 1);
    }

    #[test]
    fn test_hash_assist_requires_hash_algorithm_downstream() {
        let mut packet = PacketBuffer::new(ipv6_packet(8, 17, b"p")).unwrap();
        write_dpd_option(&mut packet, &DpdOption::hash_assist(3)).unwrap();
        let mut ident = identifier(Config::default());
        assert!(matches!(ident.identify(&packet), Err(ErrorKind::HashUnavailable)));
    }

    #[test]
    fn test_prune_covers_allocators() {
        let mut ident = identifier(Config::default());
        ident.resequence(&mut v4(1, b"x"), Tick::ZERO).unwrap();
        let mut packet = PacketBuffer::new(ipv6_packet(8, 17, b"udp")).unwrap();
        ident.resequence(&mut packet, Tick::ZERO).unwrap();
        assert_eq!(ident.prune(Tick::new(20), 10), 2);
        assert_eq!(ident.prune(Tick::new(20), 10), 0);
    }
}
