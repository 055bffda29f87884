//! IPv6 extension header chain and IPSec header fields.

use byteorder::{BigEndian, ByteOrder};

use smfwarp_core::{
    constants::{
        IPPROTO_AH, IPPROTO_DSTOPTS, IPPROTO_ESP, IPPROTO_FRAGMENT, IPPROTO_HOPOPTS,
        IPPROTO_MOBILITY, IPPROTO_ROUTING, IPV6_HEADER_SIZE,
    },
    error::{DecodingErrorKind, Result},
};

use crate::packet::PacketBuffer;

/// Location of one extension header inside a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtensionHeader {
    /// Protocol number identifying the header.
    pub protocol: u8,
    /// Byte offset of the header from the start of the packet.
    pub offset: usize,
    /// Header length in bytes.
    pub len: usize,
}

impl ExtensionHeader {
    /// Offset of the first byte after this header.
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// The extension headers of an IPv6 packet, in wire order.
///
/// The walk stops at the first header it cannot step over: an upper layer
/// protocol, "no next header", or ESP (whose payload is opaque).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionChain {
    headers: Vec<ExtensionHeader>,
    upper_protocol: u8,
    upper_offset: usize,
}

impl ExtensionChain {
    /// Walks the extension headers of an IPv6 packet.
    pub fn walk(packet: &PacketBuffer) -> Result<Self> {
        let data = packet.as_slice();
        let mut headers = Vec::new();
        let mut next = packet.ipv6_next_header();
        let mut offset = IPV6_HEADER_SIZE;
        loop {
            match next {
                IPPROTO_HOPOPTS | IPPROTO_ROUTING | IPPROTO_DSTOPTS | IPPROTO_MOBILITY
                | IPPROTO_FRAGMENT | IPPROTO_AH => {
                    if next == IPPROTO_HOPOPTS && offset != IPV6_HEADER_SIZE {
                        return Err(DecodingErrorKind::HopByHopPosition.into());
                    }
                    if data.len() < offset + 2 {
                        return Err(DecodingErrorKind::ExtensionHeader.into());
                    }
                    let len = match next {
                        IPPROTO_FRAGMENT => 8,
                        IPPROTO_AH => (usize::from(data[offset + 1]) + 2) * 4,
                        _ => (usize::from(data[offset + 1]) + 1) * 8,
                    };
                    if offset + len > data.len() {
                        return Err(DecodingErrorKind::ExtensionHeader.into());
                    }
                    headers.push(ExtensionHeader { protocol: next, offset, len });
                    next = data[offset];
                    offset += len;
                }
                _ => {
                    return Ok(Self { headers, upper_protocol: next, upper_offset: offset });
                }
            }
        }
    }

    /// Headers in wire order.
    pub fn headers(&self) -> &[ExtensionHeader] {
        &self.headers
    }

    /// Protocol the walk stopped at.
    pub fn upper_protocol(&self) -> u8 {
        self.upper_protocol
    }

    /// Offset of the protocol the walk stopped at.
    pub fn upper_offset(&self) -> usize {
        self.upper_offset
    }

    /// The hop-by-hop options header, if present.
    pub fn hop_by_hop(&self) -> Option<&ExtensionHeader> {
        self.headers.first().filter(|h| h.protocol == IPPROTO_HOPOPTS)
    }

    /// Offset of the first byte after the hop-by-hop header, or after the
    /// fixed header when there is none.
    pub fn after_hop_by_hop(&self) -> usize {
        self.hop_by_hop().map(ExtensionHeader::end).unwrap_or(IPV6_HEADER_SIZE)
    }

    /// First header with the given protocol number, including an ESP header
    /// the walk stopped at.
    pub fn find(&self, protocol: u8) -> Option<ExtensionHeader> {
        self.headers.iter().copied().find(|h| h.protocol == protocol).or_else(|| {
            (protocol == IPPROTO_ESP && self.upper_protocol == IPPROTO_ESP).then_some(
                ExtensionHeader { protocol, offset: self.upper_offset, len: 0 },
            )
        })
    }

    /// First fragment, AH or ESP header, whichever comes first.
    pub fn first_identifying(&self) -> Option<ExtensionHeader> {
        self.headers
            .iter()
            .copied()
            .find(|h| h.protocol == IPPROTO_FRAGMENT || h.protocol == IPPROTO_AH)
            .or_else(|| self.find(IPPROTO_ESP))
    }
}

/// Fields of an IPv6 fragment header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentHeader {
    /// Fragment offset and flags as on the wire.
    pub offset_flags: u16,
    /// Fragment identification.
    pub identification: u32,
}

impl FragmentHeader {
    /// Reads the fragment header starting at `offset`.
    pub fn read(data: &[u8], offset: usize) -> Result<Self> {
        let header = data.get(offset..offset + 8).ok_or(DecodingErrorKind::ExtensionHeader)?;
        Ok(Self {
            offset_flags: BigEndian::read_u16(&header[2..4]),
            identification: BigEndian::read_u32(&header[4..8]),
        })
    }
}

/// Security parameter index and sequence number of an AH or ESP header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpsecHeader {
    /// Security parameter index.
    pub spi: u32,
    /// Anti-replay sequence number.
    pub sequence: u32,
}

impl IpsecHeader {
    /// Reads an AH (`IPPROTO_AH`) or ESP (`IPPROTO_ESP`) header at `offset`.
    pub fn read(data: &[u8], offset: usize, protocol: u8) -> Result<Self> {
        let start = match protocol {
            IPPROTO_AH => offset + 4,
            IPPROTO_ESP => offset,
            _ => return Err(DecodingErrorKind::ExtensionHeader.into()),
        };
        let fields = data.get(start..start + 8).ok_or(DecodingErrorKind::Truncated)?;
        Ok(Self {
            spi: BigEndian::read_u32(&fields[0..4]),
            sequence: BigEndian::read_u32(&fields[4..8]),
        })
    }
}

#[cfg(test)]
mod tests {
    use smfwarp_core::{constants::IPPROTO_NONE, error::ErrorKind};

    use super::*;
    use crate::packet::tests::ipv6_packet;

    #[test]
    fn test_plain_packet() {
        let packet = PacketBuffer::new(ipv6_packet(8, 17, b"udp!")).unwrap();
        let chain = ExtensionChain::walk(&packet).unwrap();
        assert!(chain.headers().is_empty());
        assert_eq!(chain.upper_protocol(), 17);
        assert_eq!(chain.after_hop_by_hop(), 40);
        assert!(chain.first_identifying().is_none());
    }

    #[test]
    fn test_walks_hop_by_hop_and_fragment() {
        let mut payload = vec![IPPROTO_FRAGMENT, 0, 1, 4, 0, 0, 0, 0];
        payload.extend_from_slice(&[17, 0, 0x00, 0x09, 0xde, 0xad, 0xbe, 0xef]);
        payload.extend_from_slice(b"data");
        let packet = PacketBuffer::new(ipv6_packet(8, IPPROTO_HOPOPTS, &payload)).unwrap();
        let chain = ExtensionChain::walk(&packet).unwrap();
        assert_eq!(chain.headers().len(), 2);
        assert_eq!(chain.hop_by_hop().map(|h| h.len), Some(8));
        assert_eq!(chain.after_hop_by_hop(), 48);
        let frag = chain.first_identifying().unwrap();
        assert_eq!(frag.protocol, IPPROTO_FRAGMENT);
        let header = FragmentHeader::read(packet.as_slice(), frag.offset).unwrap();
        assert_eq!(header.offset_flags, 9);
        assert_eq!(header.identification, 0xdeadbeef);
        assert_eq!(chain.upper_protocol(), 17);
    }

    #[test]
    fn test_esp_terminates_walk() {
        let payload = [0, 0, 0, 42, 0, 0, 0, 7, 0xff, 0xff];
        let packet = PacketBuffer::new(ipv6_packet(8, IPPROTO_ESP, &payload)).unwrap();
        let chain = ExtensionChain::walk(&packet).unwrap();
        let esp = chain.first_identifying().unwrap();
        assert_eq!(esp.protocol, IPPROTO_ESP);
        let header = IpsecHeader::read(packet.as_slice(), esp.offset, IPPROTO_ESP).unwrap();
        assert_eq!(header, IpsecHeader { spi: 42, sequence: 7 });
    }

    #[test]
    fn test_misplaced_hop_by_hop() {
        let payload = [IPPROTO_HOPOPTS, 0, 1, 4, 0, 0, 0, 0, IPPROTO_NONE, 0, 1, 4, 0, 0, 0, 0];
        let packet = PacketBuffer::new(ipv6_packet(8, IPPROTO_DSTOPTS, &payload)).unwrap();
        assert!(matches!(
            ExtensionChain::walk(&packet),
            Err(ErrorKind::DecodingError(DecodingErrorKind::HopByHopPosition))
        ));
    }

    #[test]
    fn test_truncated_chain() {
        // header claims 16 bytes, only 8 present
        let payload = [17, 1, 1, 4, 0, 0, 0, 0];
        let packet = PacketBuffer::new(ipv6_packet(8, IPPROTO_HOPOPTS, &payload)).unwrap();
        assert!(ExtensionChain::walk(&packet).is_err());
    }
}
