//! Link-layer header removal.
//!
//! Each supported link type is reduced to an EtherType-style network protocol
//! number plus the bytes that follow the link header.

use crate::capture::LinkType;
use crate::error::FrameDecodeError;

pub(crate) const ETHERTYPE_IPV4: u16 = 0x0800;
pub(crate) const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88A8;
const ETHERTYPE_QINQ_LEGACY: u16 = 0x9100;
const ETHERTYPE_PPPOE_SESSION: u16 = 0x8864;

const PPP_IPV4: u16 = 0x0021;
const PPP_IPV6: u16 = 0x0057;

const ETHERNET_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const PPPOE_HEADER_LEN: usize = 8;
const LINUX_SLL_HEADER_LEN: usize = 16;
const NULL_HEADER_LEN: usize = 4;

const AF_INET: u32 = 2;
// AF_INET6 differs between the BSDs, Darwin and Linux.
const AF_INET6: [u32; 4] = [10, 24, 28, 30];

/// Strip the link header from `frame`, returning the network protocol and the
/// network-layer bytes.
pub(crate) fn strip_link_layer(
    link_type: LinkType,
    frame: &[u8],
) -> Result<(u16, &[u8]), FrameDecodeError> {
    match link_type {
        LinkType::Ethernet => strip_ethernet(frame),
        LinkType::LinuxSll => strip_linux_sll(frame),
        LinkType::Null => strip_null(frame),
        LinkType::Raw => strip_raw(frame),
        LinkType::Ipv4 => Ok((ETHERTYPE_IPV4, frame)),
        LinkType::Other(raw) => Err(FrameDecodeError::UnsupportedLinkType(raw)),
    }
}

fn need(layer: &'static str, frame: &[u8], needed: usize) -> Result<(), FrameDecodeError> {
    if frame.len() < needed {
        return Err(FrameDecodeError::Truncated {
            layer,
            needed,
            have: frame.len(),
        });
    }
    Ok(())
}

fn be16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

/// Ethernet: [6 bytes dst MAC][6 bytes src MAC][2 bytes EtherType], optionally
/// followed by any number of VLAN tags and a PPPoE session header.
fn strip_ethernet(frame: &[u8]) -> Result<(u16, &[u8]), FrameDecodeError> {
    need("ethernet", frame, ETHERNET_HEADER_LEN)?;
    let mut ethertype = be16(frame, 12);
    let mut offset = ETHERNET_HEADER_LEN;

    while matches!(
        ethertype,
        ETHERTYPE_VLAN | ETHERTYPE_QINQ | ETHERTYPE_QINQ_LEGACY
    ) {
        need("802.1q", frame, offset + VLAN_TAG_LEN)?;
        // [2 bytes TCI][2 bytes inner EtherType]
        ethertype = be16(frame, offset + 2);
        offset += VLAN_TAG_LEN;
    }

    if ethertype == ETHERTYPE_PPPOE_SESSION {
        need("pppoe", frame, offset + PPPOE_HEADER_LEN)?;
        // The PPP protocol field closes the PPPoE session header.
        ethertype = match be16(frame, offset + PPPOE_HEADER_LEN - 2) {
            PPP_IPV4 => ETHERTYPE_IPV4,
            PPP_IPV6 => ETHERTYPE_IPV6,
            other => return Err(FrameDecodeError::UnsupportedNetwork(other)),
        };
        offset += PPPOE_HEADER_LEN;
    }

    Ok((ethertype, &frame[offset..]))
}

/// Linux cooked capture: packet type, ARPHRD type, address length, 8 address
/// bytes, then the protocol.
fn strip_linux_sll(frame: &[u8]) -> Result<(u16, &[u8]), FrameDecodeError> {
    need("linux sll", frame, LINUX_SLL_HEADER_LEN)?;
    Ok((be16(frame, 14), &frame[LINUX_SLL_HEADER_LEN..]))
}

/// BSD loopback: a 4-byte address family in the byte order of the capturing
/// host. Families are small, so two leading zero bytes mean big-endian.
fn strip_null(frame: &[u8]) -> Result<(u16, &[u8]), FrameDecodeError> {
    need("null", frame, NULL_HEADER_LEN)?;
    let bytes = [frame[0], frame[1], frame[2], frame[3]];
    let family = if bytes[0] == 0 && bytes[1] == 0 {
        u32::from_be_bytes(bytes)
    } else {
        u32::from_le_bytes(bytes)
    };

    let ethertype = match family {
        AF_INET => ETHERTYPE_IPV4,
        f if AF_INET6.contains(&f) => ETHERTYPE_IPV6,
        other => {
            return Err(FrameDecodeError::UnsupportedNetwork(
                u16::try_from(other).unwrap_or(u16::MAX),
            ));
        }
    };
    Ok((ethertype, &frame[NULL_HEADER_LEN..]))
}

/// No link header at all; the IP version nibble picks the protocol.
fn strip_raw(frame: &[u8]) -> Result<(u16, &[u8]), FrameDecodeError> {
    need("raw ip", frame, 1)?;
    match frame[0] >> 4 {
        4 => Ok((ETHERTYPE_IPV4, frame)),
        6 => Ok((ETHERTYPE_IPV6, frame)),
        version => Err(FrameDecodeError::UnsupportedNetwork(u16::from(version))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ethernet_header(ethertype: u16) -> Vec<u8> {
        let mut frame = vec![0u8; 14];
        // Destination MAC: 00:11:22:33:44:55
        frame[0..6].copy_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        // Source MAC: AA:BB:CC:DD:EE:FF
        frame[6..12].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        frame[12..14].copy_from_slice(&ethertype.to_be_bytes());
        frame
    }

    #[test]
    fn test_plain_ethernet() {
        let mut frame = ethernet_header(ETHERTYPE_IPV4);
        frame.extend_from_slice(&[0x45, 0x00]);

        let (proto, rest) = strip_link_layer(LinkType::Ethernet, &frame).unwrap();
        assert_eq!(proto, ETHERTYPE_IPV4);
        assert_eq!(rest, &[0x45, 0x00]);
    }

    #[rstest]
    #[case(&[ETHERTYPE_VLAN])]
    #[case(&[ETHERTYPE_QINQ, ETHERTYPE_VLAN])]
    #[case(&[ETHERTYPE_QINQ_LEGACY, ETHERTYPE_VLAN, ETHERTYPE_VLAN])]
    fn test_vlan_tags_are_skipped(#[case] tags: &[u16]) {
        let mut frame = ethernet_header(tags[0]);
        for next in tags.iter().skip(1).chain(core::iter::once(&ETHERTYPE_IPV4)) {
            // TCI with VLAN id 42
            frame.extend_from_slice(&[0x00, 0x2A]);
            frame.extend_from_slice(&next.to_be_bytes());
        }
        frame.push(0x45);

        let (proto, rest) = strip_link_layer(LinkType::Ethernet, &frame).unwrap();
        assert_eq!(proto, ETHERTYPE_IPV4);
        assert_eq!(rest, &[0x45]);
    }

    #[test]
    fn test_pppoe_session() {
        let mut frame = ethernet_header(ETHERTYPE_PPPOE_SESSION);
        // ver/type, code, session id, payload length, PPP protocol
        frame.extend_from_slice(&[0x11, 0x00, 0x12, 0x34, 0x00, 0x30, 0x00, 0x21]);
        frame.push(0x45);

        let (proto, rest) = strip_link_layer(LinkType::Ethernet, &frame).unwrap();
        assert_eq!(proto, ETHERTYPE_IPV4);
        assert_eq!(rest, &[0x45]);
    }

    #[test]
    fn test_pppoe_non_ip_is_dropped() {
        let mut frame = ethernet_header(ETHERTYPE_PPPOE_SESSION);
        frame.extend_from_slice(&[0x11, 0x00, 0x12, 0x34, 0x00, 0x30, 0xC0, 0x21]);

        assert_eq!(
            strip_link_layer(LinkType::Ethernet, &frame),
            Err(FrameDecodeError::UnsupportedNetwork(0xC021))
        );
    }

    #[test]
    fn test_linux_sll() {
        let mut frame = vec![0u8; 16];
        frame[0..2].copy_from_slice(&[0x00, 0x04]); // sent by us
        frame[2..4].copy_from_slice(&[0x00, 0x01]); // ARPHRD_ETHER
        frame[14..16].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        frame.extend_from_slice(b"ip");

        let (proto, rest) = strip_link_layer(LinkType::LinuxSll, &frame).unwrap();
        assert_eq!(proto, ETHERTYPE_IPV4);
        assert_eq!(rest, b"ip");
    }

    #[rstest]
    #[case([2, 0, 0, 0], ETHERTYPE_IPV4)]
    #[case([0, 0, 0, 2], ETHERTYPE_IPV4)]
    #[case([30, 0, 0, 0], ETHERTYPE_IPV6)]
    #[case([0, 0, 0, 24], ETHERTYPE_IPV6)]
    fn test_null_family_byte_order(#[case] prefix: [u8; 4], #[case] expected: u16) {
        let mut frame = prefix.to_vec();
        frame.push(0x45);

        let (proto, rest) = strip_link_layer(LinkType::Null, &frame).unwrap();
        assert_eq!(proto, expected);
        assert_eq!(rest, &[0x45]);
    }

    #[rstest]
    #[case(LinkType::Raw, &[0x45, 0x00], ETHERTYPE_IPV4)]
    #[case(LinkType::Raw, &[0x60, 0x00], ETHERTYPE_IPV6)]
    #[case(LinkType::Ipv4, &[0x45, 0x00], ETHERTYPE_IPV4)]
    fn test_raw_ip_has_no_header(
        #[case] link_type: LinkType,
        #[case] frame: &[u8],
        #[case] expected: u16,
    ) {
        let (proto, rest) = strip_link_layer(link_type, frame).unwrap();
        assert_eq!(proto, expected);
        assert_eq!(rest, frame);
    }

    #[test]
    fn test_invalid_frames() {
        assert_eq!(
            strip_link_layer(LinkType::Ethernet, &[0u8; 10]),
            Err(FrameDecodeError::Truncated {
                layer: "ethernet",
                needed: 14,
                have: 10
            })
        );
        assert!(strip_link_layer(LinkType::Ethernet, &ethernet_header(ETHERTYPE_VLAN)).is_err());
        assert!(strip_link_layer(LinkType::LinuxSll, &[0u8; 15]).is_err());
        assert!(strip_link_layer(LinkType::Null, &[7, 0, 0, 0]).is_err());
        assert_eq!(
            strip_link_layer(LinkType::Other(147), &[0u8; 64]),
            Err(FrameDecodeError::UnsupportedLinkType(147))
        );
        assert_eq!(
            strip_link_layer(LinkType::Raw, &[0x20, 0x00]),
            Err(FrameDecodeError::UnsupportedNetwork(2))
        );
        assert!(strip_link_layer(LinkType::Raw, &[]).is_err());
    }
}
