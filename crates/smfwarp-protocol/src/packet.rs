//! Mutable IP packet buffer.
//!
//! A [`PacketBuffer`] is only ever constructed from bytes whose fixed IP
//! header has been validated, so the fixed-offset accessors below never read
//! past the end of the buffer. Every operation that changes the packet length
//! goes through [`PacketBuffer::splice`], which rewrites the IP length field
//! (and the IPv4 header checksum) in the same step.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use byteorder::{BigEndian, ByteOrder};

use smfwarp_core::{
    constants::{IPV4_HEADER_MIN, IPV6_HEADER_SIZE, MAX_PACKET_SIZE},
    error::{DecodingErrorKind, ErrorKind, Result},
};

const IPV4_FLAG_DF: u16 = 0x4000;
const IPV4_FLAG_MF: u16 = 0x2000;
const IPV4_OFFSET_MASK: u16 = 0x1fff;

/// IP version of a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpVersion {
    /// IPv4.
    V4,
    /// IPv6.
    V6,
}

/// Owned IPv4 or IPv6 datagram, starting at the IP header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketBuffer {
    data: Vec<u8>,
    version: IpVersion,
    max_size: usize,
}

impl PacketBuffer {
    /// Validates the fixed IP header of `data` and wraps it.
    ///
    /// Bytes past the IP length field (link layer padding) are dropped.
    pub fn new(data: Vec<u8>) -> Result<Self> {
        Self::with_max_size(data, MAX_PACKET_SIZE)
    }

    /// Like [`new`](Self::new), limiting how far insertions may grow the packet.
    pub fn with_max_size(mut data: Vec<u8>, max_size: usize) -> Result<Self> {
        let first = *data.first().ok_or(DecodingErrorKind::Truncated)?;
        let version = match first >> 4 {
            4 => {
                if data.len() < IPV4_HEADER_MIN {
                    return Err(DecodingErrorKind::Truncated.into());
                }
                let header_len = usize::from(first & 0x0f) * 4;
                let total_len = usize::from(BigEndian::read_u16(&data[2..4]));
                if header_len < IPV4_HEADER_MIN || total_len < header_len || total_len > data.len()
                {
                    return Err(DecodingErrorKind::HeaderLength.into());
                }
                data.truncate(total_len);
                IpVersion::V4
            }
            6 => {
                if data.len() < IPV6_HEADER_SIZE {
                    return Err(DecodingErrorKind::Truncated.into());
                }
                let payload_len = usize::from(BigEndian::read_u16(&data[4..6]));
                let total_len = IPV6_HEADER_SIZE + payload_len;
                // a zero payload length on a longer buffer is a jumbogram
                if total_len > data.len() || (payload_len == 0 && data.len() > IPV6_HEADER_SIZE) {
                    return Err(DecodingErrorKind::HeaderLength.into());
                }
                data.truncate(total_len);
                IpVersion::V6
            }
            other => return Err(DecodingErrorKind::IpVersion(other).into()),
        };
        Ok(Self { data, version, max_size: max_size.min(MAX_PACKET_SIZE) })
    }

    /// Copies and validates a packet.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Self::new(data.to_vec())
    }

    /// IP version.
    pub fn version(&self) -> IpVersion {
        self.version
    }

    /// Packet bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable packet bytes. Length fields are the caller's responsibility.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consumes the buffer, returning the packet bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Packet length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false for a validated packet.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Largest size insertions may grow the packet to.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Length of the fixed header (IPv4 header including options, or the
    /// 40-byte IPv6 header).
    pub fn header_len(&self) -> usize {
        match self.version {
            IpVersion::V4 => usize::from(self.data[0] & 0x0f) * 4,
            IpVersion::V6 => IPV6_HEADER_SIZE,
        }
    }

    /// Replaces `old_len` bytes at `offset` with `bytes` and updates the IP
    /// length field to match.
    ///
    /// On error the packet is left untouched.
    pub fn splice(&mut self, offset: usize, old_len: usize, bytes: &[u8]) -> Result<()> {
        let header_len = self.header_len();
        if offset < header_len || offset + old_len > self.data.len() {
            return Err(DecodingErrorKind::HeaderLength.into());
        }
        let new_len = self.data.len() - old_len + bytes.len();
        if new_len > self.max_size {
            return Err(ErrorKind::InsufficientSpace {
                needed: new_len,
                available: self.max_size,
            });
        }
        self.data.splice(offset..offset + old_len, bytes.iter().copied());
        match self.version {
            IpVersion::V4 => {
                BigEndian::write_u16(&mut self.data[2..4], new_len as u16);
                self.update_ipv4_checksum();
            }
            IpVersion::V6 => {
                let payload_len = (new_len - IPV6_HEADER_SIZE) as u16;
                BigEndian::write_u16(&mut self.data[4..6], payload_len);
            }
        }
        Ok(())
    }

    /// Inserts `bytes` at `offset`, shifting the remainder of the packet.
    pub fn insert(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.splice(offset, 0, bytes)
    }

    /// Removes `len` bytes at `offset`.
    pub fn remove(&mut self, offset: usize, len: usize) -> Result<()> {
        self.splice(offset, len, &[])
    }

    /// Source address.
    pub fn src_addr(&self) -> IpAddr {
        match self.version {
            IpVersion::V4 => IpAddr::V4(self.ipv4_src()),
            IpVersion::V6 => IpAddr::V6(self.ipv6_src()),
        }
    }

    /// Destination address.
    pub fn dst_addr(&self) -> IpAddr {
        match self.version {
            IpVersion::V4 => IpAddr::V4(self.ipv4_dst()),
            IpVersion::V6 => IpAddr::V6(self.ipv6_dst()),
        }
    }

    /// IPv4 TTL or IPv6 hop limit.
    pub fn ttl(&self) -> u8 {
        match self.version {
            IpVersion::V4 => self.data[8],
            IpVersion::V6 => self.data[7],
        }
    }

    /// Sets the TTL / hop limit, keeping the IPv4 checksum valid.
    pub fn set_ttl(&mut self, ttl: u8) {
        match self.version {
            IpVersion::V4 => {
                self.data[8] = ttl;
                self.update_ipv4_checksum();
            }
            IpVersion::V6 => self.data[7] = ttl,
        }
    }

    /// Decrements the TTL / hop limit (saturating) and returns the new value.
    pub fn decrement_ttl(&mut self) -> u8 {
        let ttl = self.ttl().saturating_sub(1);
        self.set_ttl(ttl);
        ttl
    }

    // IPv4

    /// IPv4 Identification field.
    pub fn ipv4_identification(&self) -> u16 {
        BigEndian::read_u16(&self.data[4..6])
    }

    /// Overwrites the IPv4 Identification field and fixes the checksum.
    pub fn set_ipv4_identification(&mut self, id: u16) {
        BigEndian::write_u16(&mut self.data[4..6], id);
        self.update_ipv4_checksum();
    }

    /// IPv4 flags and fragment offset, as on the wire.
    pub fn ipv4_flags_offset(&self) -> u16 {
        BigEndian::read_u16(&self.data[6..8])
    }

    /// Returns true if the IPv4 packet is a fragment (MF set or non-zero offset).
    pub fn ipv4_is_fragment(&self) -> bool {
        let flags = self.ipv4_flags_offset();
        flags & IPV4_FLAG_MF != 0 || flags & IPV4_OFFSET_MASK != 0
    }

    /// Returns true if the IPv4 don't-fragment flag is set.
    pub fn ipv4_dont_fragment(&self) -> bool {
        self.ipv4_flags_offset() & IPV4_FLAG_DF != 0
    }

    /// Identification, flags and offset as one 32-bit value.
    pub fn ipv4_fragment_id(&self) -> u32 {
        BigEndian::read_u32(&self.data[4..8])
    }

    /// IPv4 protocol field.
    pub fn ipv4_protocol(&self) -> u8 {
        self.data[9]
    }

    /// IPv4 source address.
    pub fn ipv4_src(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.data[12], self.data[13], self.data[14], self.data[15])
    }

    /// IPv4 destination address.
    pub fn ipv4_dst(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.data[16], self.data[17], self.data[18], self.data[19])
    }

    /// Recomputes the IPv4 header checksum.
    pub fn update_ipv4_checksum(&mut self) {
        if self.version != IpVersion::V4 {
            return;
        }
        let header_len = self.header_len();
        self.data[10] = 0;
        self.data[11] = 0;
        let checksum = internet_checksum(&self.data[..header_len]);
        BigEndian::write_u16(&mut self.data[10..12], checksum);
    }

    /// Returns true if the IPv4 header checksum verifies.
    pub fn ipv4_checksum_valid(&self) -> bool {
        self.version == IpVersion::V4 && internet_checksum(&self.data[..self.header_len()]) == 0
    }

    // IPv6

    /// IPv6 payload length field.
    pub fn ipv6_payload_len(&self) -> u16 {
        BigEndian::read_u16(&self.data[4..6])
    }

    /// IPv6 next header field of the fixed header.
    pub fn ipv6_next_header(&self) -> u8 {
        self.data[6]
    }

    /// Sets the next header field of the fixed IPv6 header.
    pub fn set_ipv6_next_header(&mut self, next_header: u8) {
        self.data[6] = next_header;
    }

    /// IPv6 source address.
    pub fn ipv6_src(&self) -> Ipv6Addr {
        Ipv6Addr::from(read_16(&self.data[8..24]))
    }

    /// IPv6 destination address.
    pub fn ipv6_dst(&self) -> Ipv6Addr {
        Ipv6Addr::from(read_16(&self.data[24..40]))
    }
}

fn read_16(bytes: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&bytes[..16]);
    out
}

/// One's complement sum over `data`, folded and inverted (RFC 1071).
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// IPv4 UDP datagram with a valid checksum.
    pub(crate) fn ipv4_packet(ttl: u8, id: u16, dst: [u8; 4], payload: &[u8]) -> Vec<u8> {
        let total = (20 + payload.len()) as u16;
        let mut data = vec![
            0x45, 0x00, 0, 0, 0, 0, 0x00, 0x00, ttl, 17, 0, 0, 10, 0, 0, 1, dst[0], dst[1],
            dst[2], dst[3],
        ];
        data[2..4].copy_from_slice(&total.to_be_bytes());
        data[4..6].copy_from_slice(&id.to_be_bytes());
        data.extend_from_slice(payload);
        let checksum = internet_checksum(&data[..20]);
        data[10..12].copy_from_slice(&checksum.to_be_bytes());
        data
    }

    /// IPv6 datagram with no extension headers.
    pub(crate) fn ipv6_packet(hop_limit: u8, next_header: u8, payload: &[u8]) -> Vec<u8> {
        let mut data = vec![0x60, 0, 0, 0];
        data.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        data.push(next_header);
        data.push(hop_limit);
        data.extend_from_slice(&"fd00::1".parse::<Ipv6Addr>().unwrap().octets());
        data.extend_from_slice(&"ff0e::1".parse::<Ipv6Addr>().unwrap().octets());
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(PacketBuffer::new(vec![]).is_err());
        assert!(PacketBuffer::new(vec![0x45; 10]).is_err());
        let mut data = ipv4_packet(4, 1, [224, 1, 1, 1], b"abc");
        data[0] = 0x44;
        assert!(PacketBuffer::new(data).is_err());
        let mut data = ipv4_packet(4, 1, [224, 1, 1, 1], b"abc");
        data[0] = 0x55;
        assert!(matches!(
            PacketBuffer::new(data),
            Err(ErrorKind::DecodingError(DecodingErrorKind::IpVersion(5)))
        ));
        let mut data = ipv6_packet(8, 17, b"abcd");
        data.truncate(42);
        assert!(PacketBuffer::new(data).is_err());
    }

    #[test]
    fn test_trailing_padding_dropped() {
        let mut data = ipv4_packet(4, 1, [224, 1, 1, 1], b"abc");
        data.extend_from_slice(&[0, 0, 0]);
        let packet = PacketBuffer::new(data).unwrap();
        assert_eq!(packet.len(), 23);
    }

    #[test]
    fn test_ipv4_fields() {
        let mut packet = PacketBuffer::new(ipv4_packet(4, 0x1234, [224, 1, 2, 3], b"x")).unwrap();
        assert_eq!(packet.version(), IpVersion::V4);
        assert!(packet.ipv4_checksum_valid());
        assert_eq!(packet.ipv4_identification(), 0x1234);
        assert_eq!(packet.src_addr(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(packet.dst_addr(), IpAddr::V4(Ipv4Addr::new(224, 1, 2, 3)));
        assert!(!packet.ipv4_is_fragment());

        assert_eq!(packet.decrement_ttl(), 3);
        packet.set_ipv4_identification(7);
        assert!(packet.ipv4_checksum_valid());
        assert_eq!(packet.ipv4_fragment_id(), 7 << 16);
    }

    #[test]
    fn test_insert_updates_length_fields() {
        let mut packet = PacketBuffer::new(ipv6_packet(8, 17, b"payload")).unwrap();
        packet.insert(40, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(packet.ipv6_payload_len(), 15);
        assert_eq!(packet.len(), 55);
        assert_eq!(&packet.as_slice()[48..], b"payload");

        packet.remove(40, 8).unwrap();
        assert_eq!(packet.ipv6_payload_len(), 7);

        let mut packet = PacketBuffer::new(ipv4_packet(4, 1, [224, 1, 1, 1], b"ab")).unwrap();
        packet.insert(22, b"cd").unwrap();
        assert_eq!(BigEndian::read_u16(&packet.as_slice()[2..4]), 24);
        assert!(packet.ipv4_checksum_valid());
    }

    #[test]
    fn test_insert_respects_max_size() {
        let mut packet = PacketBuffer::with_max_size(ipv6_packet(8, 59, &[]), 44).unwrap();
        let before = packet.clone();
        let err = packet.insert(40, &[0u8; 8]).unwrap_err();
        assert!(matches!(err, ErrorKind::InsufficientSpace { needed: 48, available: 44 }));
        assert_eq!(packet, before);
        // the fixed header itself cannot be spliced
        assert!(packet.insert(10, &[0]).is_err());
    }
}
