//! SMF_DPD hop-by-hop option (RFC 6621).
//!
//! Option data layout:
//!
//! ```text
//! I-DPD:  |0|TidTyp|TidLen|  TaggerId (opt)  |  Identifier ...  |
//! H-DPD:  |1|         Hash Assist Value ...                     |
//! ```
//!
//! TidType 0 is NULL (no TaggerId, TidLen 0); for the other types the
//! TaggerId is TidLen + 1 bytes long.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use smfwarp_core::{
    constants::{
        EXTENSION_HEADER_MAX, IPPROTO_HOPOPTS, IPV6_HEADER_SIZE, OPTION_PAD1, OPTION_PADN,
        SMF_DPD_OPTION_TYPE,
    },
    error::{DecodingErrorKind, ErrorKind, Result},
};

use crate::{
    ext::{ExtensionChain, ExtensionHeader},
    packet::{IpVersion, PacketBuffer},
};

const H_BIT: u8 = 0x80;

/// Identity of the node that assigned an SMF_DPD identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TaggerId {
    /// No tagger; the identifier is scoped by source address only.
    Null,
    /// Opaque tagger of 1..=16 bytes.
    Default(Vec<u8>),
    /// IPv4 address tagger.
    Ipv4(Ipv4Addr),
    /// IPv6 address tagger.
    Ipv6(Ipv6Addr),
}

impl TaggerId {
    /// The 3-bit TidType code.
    pub fn type_code(&self) -> u8 {
        match self {
            TaggerId::Null => 0,
            TaggerId::Default(_) => 1,
            TaggerId::Ipv4(_) => 2,
            TaggerId::Ipv6(_) => 3,
        }
    }

    /// TaggerId bytes as carried on the wire.
    pub fn bytes(&self) -> Vec<u8> {
        match self {
            TaggerId::Null => Vec::new(),
            TaggerId::Default(bytes) => bytes.clone(),
            TaggerId::Ipv4(addr) => addr.octets().to_vec(),
            TaggerId::Ipv6(addr) => addr.octets().to_vec(),
        }
    }
}

impl From<Option<IpAddr>> for TaggerId {
    fn from(addr: Option<IpAddr>) -> Self {
        match addr {
            None => TaggerId::Null,
            Some(IpAddr::V4(a)) => TaggerId::Ipv4(a),
            Some(IpAddr::V6(a)) => TaggerId::Ipv6(a),
        }
    }
}

/// Decoded SMF_DPD option.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DpdOption {
    /// Identification based DPD.
    Identification {
        /// Node that assigned the identifier.
        tagger: TaggerId,
        /// Identifier bytes, most significant first.
        id: Vec<u8>,
    },
    /// Hash based DPD; the value has its top bit set.
    HashAssist {
        /// Hash assist value bytes.
        hav: Vec<u8>,
    },
}

impl DpdOption {
    /// Two-byte hash assist value carrying `value`.
    pub fn hash_assist(value: u8) -> Self {
        DpdOption::HashAssist { hav: vec![H_BIT, value] }
    }

    /// Decodes option data (the bytes after the option type and length).
    pub fn decode(data: &[u8]) -> Result<Self> {
        let first = *data.first().ok_or(DecodingErrorKind::DpdOption)?;
        if first & H_BIT != 0 {
            return Ok(DpdOption::HashAssist { hav: data.to_vec() });
        }
        let tid_type = (first >> 4) & 0x07;
        let tid_len = usize::from(first & 0x0f);
        let tagger_len = match (tid_type, tid_len) {
            (0, 0) => 0,
            (1, n) => n + 1,
            (2, 3) => 4,
            (3, 15) => 16,
            _ => return Err(DecodingErrorKind::DpdOption.into()),
        };
        let rest = &data[1..];
        if rest.len() <= tagger_len {
            return Err(DecodingErrorKind::DpdOption.into());
        }
        let (tagger_bytes, id) = rest.split_at(tagger_len);
        let tagger = match tid_type {
            0 => TaggerId::Null,
            1 => TaggerId::Default(tagger_bytes.to_vec()),
            2 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(tagger_bytes);
                TaggerId::Ipv4(Ipv4Addr::from(octets))
            }
            _ => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(tagger_bytes);
                TaggerId::Ipv6(Ipv6Addr::from(octets))
            }
        };
        Ok(DpdOption::Identification { tagger, id: id.to_vec() })
    }

    /// Appends the full option (type, length and data) to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut data = Vec::new();
        match self {
            DpdOption::Identification { tagger, id } => {
                let tagger_bytes = tagger.bytes();
                let first = match tagger {
                    TaggerId::Null => 0,
                    TaggerId::Default(bytes) if (1..=16).contains(&bytes.len()) => {
                        0x10 | (bytes.len() as u8 - 1)
                    }
                    TaggerId::Default(_) => return Err(DecodingErrorKind::DpdOption.into()),
                    TaggerId::Ipv4(_) => 0x20 | 3,
                    TaggerId::Ipv6(_) => 0x30 | 15,
                };
                if id.is_empty() {
                    return Err(DecodingErrorKind::DpdOption.into());
                }
                data.push(first);
                data.extend_from_slice(&tagger_bytes);
                data.extend_from_slice(id);
            }
            DpdOption::HashAssist { hav } => {
                if hav.first().map_or(true, |b| b & H_BIT == 0) {
                    return Err(DecodingErrorKind::DpdOption.into());
                }
                data.extend_from_slice(hav);
            }
        }
        let len = u8::try_from(data.len()).map_err(|_| DecodingErrorKind::DpdOption)?;
        out.push(SMF_DPD_OPTION_TYPE);
        out.push(len);
        out.extend_from_slice(&data);
        Ok(())
    }
}

/// One type-length-value entry of an options header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RawOption<'a> {
    option_type: u8,
    data: &'a [u8],
}

/// Splits an options area into its entries; Pad1 entries are skipped.
fn parse_options(area: &[u8]) -> Result<Vec<RawOption<'_>>> {
    let mut options = Vec::new();
    let mut pos = 0;
    while pos < area.len() {
        let option_type = area[pos];
        if option_type == OPTION_PAD1 {
            pos += 1;
            continue;
        }
        let len = usize::from(*area.get(pos + 1).ok_or(DecodingErrorKind::ExtensionHeader)?);
        let data = area.get(pos + 2..pos + 2 + len).ok_or(DecodingErrorKind::ExtensionHeader)?;
        options.push(RawOption { option_type, data });
        pos += 2 + len;
    }
    Ok(options)
}

/// Builds a hop-by-hop header around `options`, padded to a multiple of 8
/// octets with Pad1 or PadN.
///
/// Fails when the padded header would not fit the one-byte length field.
fn build_hop_by_hop(next_header: u8, options: &[u8]) -> Result<Vec<u8>> {
    let unpadded = 2 + options.len();
    let pad = (8 - unpadded % 8) % 8;
    let total = unpadded + pad;
    if total > EXTENSION_HEADER_MAX {
        return Err(ErrorKind::InsufficientSpace { needed: total, available: EXTENSION_HEADER_MAX });
    }
    let mut header = Vec::with_capacity(total);
    header.push(next_header);
    header.push((total / 8 - 1) as u8);
    header.extend_from_slice(options);
    match pad {
        0 => {}
        1 => header.push(OPTION_PAD1),
        n => {
            header.push(OPTION_PADN);
            header.push((n - 2) as u8);
            header.resize(total, 0);
        }
    }
    Ok(header)
}

/// Finds the SMF_DPD option in a hop-by-hop header.
pub fn find_dpd_option(
    packet: &PacketBuffer,
    hop_by_hop: &ExtensionHeader,
) -> Result<Option<DpdOption>> {
    let area = &packet.as_slice()[hop_by_hop.offset + 2..hop_by_hop.end()];
    match parse_options(area)?.into_iter().find(|o| o.option_type == SMF_DPD_OPTION_TYPE) {
        Some(raw) => DpdOption::decode(raw.data).map(Some),
        None => Ok(None),
    }
}

/// Writes `option` into the packet's hop-by-hop header, replacing any SMF_DPD
/// option already there and creating the header if needed.
///
/// The header is re-packed: other options are kept, old padding dropped and
/// fresh padding added. Length fields are updated by the same splice.
pub fn write_dpd_option(packet: &mut PacketBuffer, option: &DpdOption) -> Result<()> {
    if packet.version() != IpVersion::V6 {
        return Err(DecodingErrorKind::ExtensionHeader.into());
    }
    let chain = ExtensionChain::walk(packet)?;
    let mut body = Vec::new();
    option.encode(&mut body)?;

    match chain.hop_by_hop().copied() {
        Some(hbh) => {
            let data = packet.as_slice();
            let next_header = data[hbh.offset];
            for raw in parse_options(&data[hbh.offset + 2..hbh.end()])? {
                match raw.option_type {
                    OPTION_PADN | SMF_DPD_OPTION_TYPE => {}
                    option_type => {
                        body.push(option_type);
                        body.push(raw.data.len() as u8);
                        body.extend_from_slice(raw.data);
                    }
                }
            }
            let header = build_hop_by_hop(next_header, &body)?;
            packet.splice(hbh.offset, hbh.len, &header)
        }
        None => {
            let header = build_hop_by_hop(packet.ipv6_next_header(), &body)?;
            packet.insert(IPV6_HEADER_SIZE, &header)?;
            packet.set_ipv6_next_header(IPPROTO_HOPOPTS);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::tests::ipv6_packet;

    #[test]
    fn test_decode_identification() {
        let option = DpdOption::decode(&[0x00, 0x12, 0x34]).unwrap();
        assert_eq!(option, DpdOption::Identification { tagger: TaggerId::Null, id: vec![0x12, 0x34] });

        let option = DpdOption::decode(&[0x23, 10, 0, 0, 9, 0x01]).unwrap();
        assert_eq!(
            option,
            DpdOption::Identification {
                tagger: TaggerId::Ipv4(Ipv4Addr::new(10, 0, 0, 9)),
                id: vec![1]
            }
        );

        let option = DpdOption::decode(&[0x11, 0xaa, 0xbb, 0x05]).unwrap();
        assert_eq!(
            option,
            DpdOption::Identification { tagger: TaggerId::Default(vec![0xaa, 0xbb]), id: vec![5] }
        );
    }

    #[test]
    fn test_decode_hash_assist() {
        assert_eq!(DpdOption::decode(&[0x80, 0x07]).unwrap(), DpdOption::hash_assist(7));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(DpdOption::decode(&[]).is_err());
        // NULL tagger with non-zero TidLen
        assert!(DpdOption::decode(&[0x01, 0x00]).is_err());
        // IPv4 tagger with the wrong length
        assert!(DpdOption::decode(&[0x22, 1, 2, 3, 4]).is_err());
        // tagger present but no identifier
        assert!(DpdOption::decode(&[0x23, 10, 0, 0, 9]).is_err());
        // reserved tagger type
        assert!(DpdOption::decode(&[0x40, 0x01]).is_err());
    }

    #[test]
    fn test_encode_layout() {
        let mut out = Vec::new();
        let option = DpdOption::Identification {
            tagger: TaggerId::Ipv6("fd00::9".parse().unwrap()),
            id: vec![0xab, 0xcd],
        };
        option.encode(&mut out).unwrap();
        assert_eq!(out[0], SMF_DPD_OPTION_TYPE);
        assert_eq!(out[1], 19);
        assert_eq!(out[2], 0x3f);
        assert_eq!(&out[19..], &[0xab, 0xcd]);

        let mut out = Vec::new();
        let empty = DpdOption::Identification { tagger: TaggerId::Null, id: vec![] };
        assert!(empty.encode(&mut out).is_err());
        assert!(DpdOption::HashAssist { hav: vec![0x01] }.encode(&mut out).is_err());
    }

    #[test]
    fn test_hop_by_hop_padding() {
        assert_eq!(build_hop_by_hop(17, &[]).unwrap().len(), 8);
        let header = build_hop_by_hop(17, &[0x08, 0x03, 0, 0x12, 0x34]).unwrap();
        assert_eq!(header.len(), 8);
        assert_eq!(header[1], 0);
        assert_eq!(header[7], OPTION_PAD1);
        let header = build_hop_by_hop(17, &[0x08, 0x01, 0]).unwrap();
        assert_eq!(&header[5..], &[OPTION_PADN, 1, 0]);
        let header = build_hop_by_hop(17, &[0u8; 7]).unwrap();
        assert_eq!(header.len(), 16);
        assert_eq!(header[1], 1);
    }

    #[test]
    fn test_hop_by_hop_length_limit() {
        let header = build_hop_by_hop(17, &[0u8; 2046]).unwrap();
        assert_eq!(header.len(), 2048);
        assert_eq!(header[1], 255);
        assert!(matches!(
            build_hop_by_hop(17, &[0u8; 2047]),
            Err(ErrorKind::InsufficientSpace { needed: 2056, available: 2048 })
        ));
    }

    /// Hop-by-hop header of the largest size, filled with skippable options.
    fn full_hop_by_hop() -> Vec<u8> {
        let mut hbh = vec![17, 255];
        for _ in 0..8 {
            hbh.extend_from_slice(&[0x1e, 253]);
            hbh.extend_from_slice(&[0xaa; 253]);
        }
        hbh.extend_from_slice(&[0x1e, 4, 0xbb, 0xbb, 0xbb, 0xbb]);
        hbh
    }

    #[test]
    fn test_write_refuses_oversized_hop_by_hop() {
        let mut payload = full_hop_by_hop();
        assert_eq!(payload.len(), EXTENSION_HEADER_MAX);
        payload.extend_from_slice(b"xy");
        let original = ipv6_packet(8, IPPROTO_HOPOPTS, &payload);
        let mut packet = PacketBuffer::new(original.clone()).unwrap();

        let option = DpdOption::Identification { tagger: TaggerId::Null, id: vec![0, 1] };
        let err = write_dpd_option(&mut packet, &option).unwrap_err();
        assert!(matches!(err, ErrorKind::InsufficientSpace { .. }));
        assert_eq!(packet.as_slice(), &original[..]);
        assert!(ExtensionChain::walk(&packet).is_ok());
    }

    #[test]
    fn test_write_creates_hop_by_hop() {
        let mut packet = PacketBuffer::new(ipv6_packet(8, 17, b"datagram")).unwrap();
        let option = DpdOption::Identification { tagger: TaggerId::Null, id: vec![0, 42] };
        write_dpd_option(&mut packet, &option).unwrap();

        assert_eq!(packet.ipv6_next_header(), IPPROTO_HOPOPTS);
        assert_eq!(packet.ipv6_payload_len(), 16);
        let chain = ExtensionChain::walk(&packet).unwrap();
        let hbh = chain.hop_by_hop().copied().unwrap();
        assert_eq!(packet.as_slice()[hbh.offset], 17);
        assert_eq!(find_dpd_option(&packet, &hbh).unwrap(), Some(option));
        assert_eq!(&packet.as_slice()[hbh.end()..], b"datagram");
    }

    #[test]
    fn test_write_replaces_and_keeps_other_options() {
        // router alert option followed by PadN
        let hbh = [17, 0, 0x05, 0x02, 0x00, 0x00, OPTION_PADN, 0x00];
        let mut payload = hbh.to_vec();
        payload.extend_from_slice(b"xy");
        let mut packet = PacketBuffer::new(ipv6_packet(8, IPPROTO_HOPOPTS, &payload)).unwrap();

        write_dpd_option(&mut packet, &DpdOption::hash_assist(0)).unwrap();
        write_dpd_option(&mut packet, &DpdOption::hash_assist(1)).unwrap();

        let chain = ExtensionChain::walk(&packet).unwrap();
        let hbh = chain.hop_by_hop().copied().unwrap();
        assert_eq!(hbh.len, 16);
        assert_eq!(find_dpd_option(&packet, &hbh).unwrap(), Some(DpdOption::hash_assist(1)));
        let area = &packet.as_slice()[hbh.offset + 2..hbh.end()];
        let types: Vec<u8> = parse_options(area).unwrap().iter().map(|o| o.option_type).collect();
        assert!(types.contains(&0x05));
        assert_eq!(types.iter().filter(|t| **t == SMF_DPD_OPTION_TYPE).count(), 1);
        assert_eq!(&packet.as_slice()[hbh.end()..], b"xy");
        assert_eq!(usize::from(packet.ipv6_payload_len()), packet.len() - 40);
    }
}
