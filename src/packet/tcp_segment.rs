//! IPv4/TCP decoding.
//!
//! A [`TcpSegment`] is everything the reassembler needs from one frame: the two
//! endpoints, the control flags, both sequence numbers and the payload. The
//! payload is cut at the IPv4 total length so trailing Ethernet padding never
//! leaks into the stream, and at the captured length so snapped frames still
//! decode.

use super::link::{ETHERTYPE_IPV4, ETHERTYPE_IPV6, strip_link_layer};
use crate::capture::{CaptureRecord, LinkType};
use crate::error::FrameDecodeError;
use core::fmt;
use core::net::{Ipv4Addr, SocketAddrV4};

const IPPROTO_TCP: u8 = 6;
const IPV4_MIN_HEADER_LEN: usize = 20;
const TCP_MIN_HEADER_LEN: usize = 20;
const IPV4_FRAGMENT_OFFSET_MASK: u16 = 0x1FFF;

/// TCP control bits that drive connection tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
}

impl TcpFlags {
    pub const fn from_bits(bits: u8) -> Self {
        Self {
            fin: bits & 0x01 != 0,
            syn: bits & 0x02 != 0,
            rst: bits & 0x04 != 0,
            psh: bits & 0x08 != 0,
            ack: bits & 0x10 != 0,
        }
    }

    pub const fn bits(self) -> u8 {
        (self.fin as u8)
            | (self.syn as u8) << 1
            | (self.rst as u8) << 2
            | (self.psh as u8) << 3
            | (self.ack as u8) << 4
    }
}

/// One decoded TCP segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub flags: TcpFlags,
    pub seq: u32,
    pub ack_seq: u32,
    pub payload: Vec<u8>,
    pub timestamp_ms: u64,
}

impl TcpSegment {
    /// Decode a capture record.
    pub fn from_record(record: &CaptureRecord) -> Result<Self, FrameDecodeError> {
        Self::from_frame(record.link_type, &record.frame, record.timestamp_ms)
    }

    /// Decode a link-layer frame of the given type.
    pub fn from_frame(
        link_type: LinkType,
        frame: &[u8],
        timestamp_ms: u64,
    ) -> Result<Self, FrameDecodeError> {
        let (network, packet) = strip_link_layer(link_type, frame)?;
        match network {
            ETHERTYPE_IPV4 => Self::from_ipv4_packet(packet, timestamp_ms),
            ETHERTYPE_IPV6 => Err(FrameDecodeError::Ipv6),
            other => Err(FrameDecodeError::UnsupportedNetwork(other)),
        }
    }

    /// Decode a raw IPv4 packet (no link header).
    pub fn from_ipv4_packet(packet: &[u8], timestamp_ms: u64) -> Result<Self, FrameDecodeError> {
        if packet.len() < IPV4_MIN_HEADER_LEN {
            return Err(FrameDecodeError::Truncated {
                layer: "ipv4",
                needed: IPV4_MIN_HEADER_LEN,
                have: packet.len(),
            });
        }

        // IHL field in first byte, lower 4 bits, in 32-bit words
        let ihl = (packet[0] & 0x0F) as usize * 4;
        if ihl < IPV4_MIN_HEADER_LEN {
            return Err(FrameDecodeError::BadHeaderLength {
                layer: "ipv4",
                len: ihl,
            });
        }
        if packet.len() < ihl {
            return Err(FrameDecodeError::Truncated {
                layer: "ipv4 options",
                needed: ihl,
                have: packet.len(),
            });
        }

        let protocol = packet[9];
        if protocol != IPPROTO_TCP {
            return Err(FrameDecodeError::NotTcp(protocol));
        }

        let fragment_offset = u16::from_be_bytes([packet[6], packet[7]]) & IPV4_FRAGMENT_OFFSET_MASK;
        if fragment_offset != 0 {
            return Err(FrameDecodeError::Fragment);
        }

        let total_len = u16::from_be_bytes([packet[2], packet[3]]) as usize;
        if total_len < ihl {
            return Err(FrameDecodeError::BadHeaderLength {
                layer: "ipv4 total length",
                len: total_len,
            });
        }
        let end = total_len.min(packet.len());

        let src_ip = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
        let dst_ip = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);

        let tcp = &packet[ihl..end];
        if tcp.len() < TCP_MIN_HEADER_LEN {
            return Err(FrameDecodeError::Truncated {
                layer: "tcp",
                needed: TCP_MIN_HEADER_LEN,
                have: tcp.len(),
            });
        }

        // Data offset: high nibble of the 13th byte, in 32-bit words
        let data_offset = (tcp[12] >> 4) as usize * 4;
        if data_offset < TCP_MIN_HEADER_LEN {
            return Err(FrameDecodeError::BadHeaderLength {
                layer: "tcp",
                len: data_offset,
            });
        }
        if tcp.len() < data_offset {
            return Err(FrameDecodeError::Truncated {
                layer: "tcp options",
                needed: data_offset,
                have: tcp.len(),
            });
        }

        let src_port = u16::from_be_bytes([tcp[0], tcp[1]]);
        let dst_port = u16::from_be_bytes([tcp[2], tcp[3]]);
        let seq = u32::from_be_bytes([tcp[4], tcp[5], tcp[6], tcp[7]]);
        let ack_seq = u32::from_be_bytes([tcp[8], tcp[9], tcp[10], tcp[11]]);

        Ok(Self {
            src: SocketAddrV4::new(src_ip, src_port),
            dst: SocketAddrV4::new(dst_ip, dst_port),
            flags: TcpFlags::from_bits(tcp[13]),
            seq,
            ack_seq,
            payload: tcp[data_offset..].to_vec(),
            timestamp_ms,
        })
    }
}

impl fmt::Display for TcpSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} seq={} ack={} len={} flags=0x{:02x}",
            self.src,
            self.dst,
            self.seq,
            self.ack_seq,
            self.payload.len(),
            self.flags.bits()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ethernet + IPv4 (20 bytes) + TCP (20 bytes) carrying `payload`.
    fn build_frame(payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0u8; 54];

        // EtherType: IPv4 (0x0800)
        packet[12..14].copy_from_slice(&[0x08, 0x00]);

        // IPv4 header (starts at byte 14)
        packet[14] = 0x45; // Version 4, IHL 5
        let total_len = (40 + payload.len()) as u16;
        packet[16..18].copy_from_slice(&total_len.to_be_bytes());
        packet[23] = 6; // Protocol: TCP

        // Source IP: 172.16.0.1
        packet[26..30].copy_from_slice(&[172, 16, 0, 1]);
        // Destination IP: 8.8.8.8
        packet[30..34].copy_from_slice(&[8, 8, 8, 8]);

        // TCP header (starts at byte 34)
        // Source port: 54321 (0xD431)
        packet[34..36].copy_from_slice(&[0xD4, 0x31]);
        // Destination port: 80 (0x0050)
        packet[36..38].copy_from_slice(&[0x00, 0x50]);
        packet[38..42].copy_from_slice(&1000u32.to_be_bytes());
        packet[42..46].copy_from_slice(&2000u32.to_be_bytes());
        packet[46] = 0x50; // data offset 5
        packet[47] = 0x18; // PSH, ACK

        packet.extend_from_slice(payload);
        packet
    }

    #[test]
    fn test_segment_from_ethernet_frame() {
        let frame = build_frame(b"GET / HTTP/1.1\r\n");
        let segment = TcpSegment::from_frame(LinkType::Ethernet, &frame, 42).unwrap();

        assert_eq!(segment.src, "172.16.0.1:54321".parse().unwrap());
        assert_eq!(segment.dst, "8.8.8.8:80".parse().unwrap());
        assert_eq!(segment.seq, 1000);
        assert_eq!(segment.ack_seq, 2000);
        assert!(segment.flags.ack && segment.flags.psh);
        assert!(!segment.flags.syn && !segment.flags.fin && !segment.flags.rst);
        assert_eq!(segment.payload, b"GET / HTTP/1.1\r\n");
        assert_eq!(segment.timestamp_ms, 42);
    }

    #[test]
    fn test_ethernet_padding_is_cut_at_ip_total_length() {
        // A bare SYN is shorter than the Ethernet minimum and gets padded.
        let mut frame = build_frame(b"");
        frame.extend_from_slice(&[0u8; 6]);

        let segment = TcpSegment::from_frame(LinkType::Ethernet, &frame, 0).unwrap();
        assert!(segment.payload.is_empty());
    }

    #[test]
    fn test_snapped_frame_keeps_captured_bytes() {
        let mut frame = build_frame(b"HTTP/1.1 200 OK\r\n");
        frame.truncate(54 + 8);

        let segment = TcpSegment::from_frame(LinkType::Ethernet, &frame, 0).unwrap();
        assert_eq!(segment.payload, b"HTTP/1.1");
    }

    #[test]
    fn test_ip_and_tcp_options_are_skipped() {
        let mut frame = build_frame(b"");
        // Grow the IPv4 header to 24 bytes with one NOP/EOL option word.
        frame[14] = 0x46;
        frame.splice(34..34, [1, 1, 1, 0]);
        // Grow the TCP header to 24 bytes.
        frame[38 + 12] = 0x60;
        frame.extend_from_slice(&[1, 1, 1, 0]);
        frame.extend_from_slice(b"data");
        let total_len = (frame.len() - 14) as u16;
        frame[16..18].copy_from_slice(&total_len.to_be_bytes());

        let segment = TcpSegment::from_frame(LinkType::Ethernet, &frame, 0).unwrap();
        assert_eq!(segment.src.port(), 54321);
        assert_eq!(segment.payload, b"data");
    }

    #[test]
    fn test_flag_bits() {
        let flags = TcpFlags::from_bits(0x02);
        assert!(flags.syn && !flags.ack);
        let flags = TcpFlags::from_bits(0x11);
        assert!(flags.fin && flags.ack);
        let flags = TcpFlags::from_bits(0x14);
        assert!(flags.rst && flags.ack);
        assert_eq!(TcpFlags::from_bits(0x1F).bits(), 0x1F);
    }

    #[test]
    fn test_invalid_packets() {
        // UDP packet (not TCP)
        let mut udp = build_frame(b"");
        udp[23] = 17;
        assert_eq!(
            TcpSegment::from_frame(LinkType::Ethernet, &udp, 0),
            Err(FrameDecodeError::NotTcp(17))
        );

        // Non-initial fragment
        let mut fragment = build_frame(b"abc");
        fragment[20..22].copy_from_slice(&[0x00, 0x10]);
        assert_eq!(
            TcpSegment::from_frame(LinkType::Ethernet, &fragment, 0),
            Err(FrameDecodeError::Fragment)
        );

        // IPv6 EtherType
        let mut v6 = build_frame(b"");
        v6[12..14].copy_from_slice(&[0x86, 0xDD]);
        assert_eq!(
            TcpSegment::from_frame(LinkType::Ethernet, &v6, 0),
            Err(FrameDecodeError::Ipv6)
        );

        // ARP
        let mut arp = build_frame(b"");
        arp[12..14].copy_from_slice(&[0x08, 0x06]);
        assert_eq!(
            TcpSegment::from_frame(LinkType::Ethernet, &arp, 0),
            Err(FrameDecodeError::UnsupportedNetwork(0x0806))
        );

        // IHL below the minimum
        let mut short_ihl = build_frame(b"");
        short_ihl[14] = 0x44;
        assert!(matches!(
            TcpSegment::from_frame(LinkType::Ethernet, &short_ihl, 0),
            Err(FrameDecodeError::BadHeaderLength { layer: "ipv4", len: 16 })
        ));

        // TCP data offset past the captured bytes
        let mut long_offset = build_frame(b"");
        long_offset[46] = 0xF0;
        assert!(matches!(
            TcpSegment::from_frame(LinkType::Ethernet, &long_offset, 0),
            Err(FrameDecodeError::Truncated { layer: "tcp options", .. })
        ));

        // Too short packet
        assert!(TcpSegment::from_ipv4_packet(&[0x45; 10], 0).is_err());
    }

    #[test]
    fn test_segment_from_raw_ip_frame() {
        let frame = build_frame(b"hello");
        let ethernet = TcpSegment::from_frame(LinkType::Ethernet, &frame, 7).unwrap();
        for link_type in [LinkType::Raw, LinkType::Ipv4] {
            let raw = TcpSegment::from_frame(link_type, &frame[14..], 7).unwrap();
            assert_eq!(raw, ethernet, "{link_type:?}");
        }
    }

    #[test]
    fn test_display() {
        let segment = TcpSegment::from_frame(LinkType::Ethernet, &build_frame(b"hi"), 0).unwrap();
        assert_eq!(
            segment.to_string(),
            "172.16.0.1:54321 -> 8.8.8.8:80 seq=1000 ack=2000 len=2 flags=0x18"
        );
    }
}
