//! Classic libpcap file format.
//!
//! A 24-byte global header (magic, version, snaplen, link type) followed by
//! records, each a 16-byte header and `captured_len` bytes of frame data.

use super::{ByteOrder, CaptureRecord, Fill, LinkType, MAX_RECORD_LEN, fill, read_header};
use crate::error::FormatError;
use std::io::Read;
use tracing::{debug, warn};

const MAGIC_MICROS: u32 = 0xA1B2_C3D4;
const MAGIC_MICROS_SWAPPED: u32 = 0xD4C3_B2A1;
const MAGIC_NANOS: u32 = 0xA1B2_3C4D;
const MAGIC_NANOS_SWAPPED: u32 = 0x4D3C_B2A1;

const GLOBAL_HEADER_LEN: usize = 24;
const RECORD_HEADER_LEN: usize = 16;

/// Reader for classic pcap files.
pub struct PcapReader<R> {
    reader: R,
    order: ByteOrder,
    nanos: bool,
    link_type: LinkType,
    finished: bool,
}

impl<R: Read> PcapReader<R> {
    /// Continue reading a pcap file whose 4-byte magic has already been consumed.
    ///
    /// The magic is interpreted little-endian: `0xA1B2C3D4` means every later
    /// field is little-endian, `0xD4C3B2A1` means big-endian.
    pub fn from_magic(mut reader: R, magic: [u8; 4]) -> Result<Self, FormatError> {
        let (order, nanos) = match u32::from_le_bytes(magic) {
            MAGIC_MICROS => (ByteOrder::Little, false),
            MAGIC_MICROS_SWAPPED => (ByteOrder::Big, false),
            MAGIC_NANOS => (ByteOrder::Little, true),
            MAGIC_NANOS_SWAPPED => (ByteOrder::Big, true),
            other => return Err(FormatError::UnknownMagic(other)),
        };

        let mut header = [0u8; GLOBAL_HEADER_LEN];
        header[..4].copy_from_slice(&magic);
        read_header(&mut reader, &mut header[4..], "pcap global header")?;

        let version_major = order.u16_at(&header, 4);
        let version_minor = order.u16_at(&header, 6);
        let snaplen = order.u32_at(&header, 16);
        // The upper 16 bits carry FCS information, not the link type.
        let link_type = LinkType::from_raw(order.u32_at(&header, 20) & 0xFFFF);
        debug!(
            ?order,
            nanos, version_major, version_minor, snaplen, ?link_type, "Opened pcap capture"
        );

        Ok(Self {
            reader,
            order,
            nanos,
            link_type,
            finished: false,
        })
    }

    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    fn read_record(&mut self) -> Option<CaptureRecord> {
        let mut header = [0u8; RECORD_HEADER_LEN];
        match fill(&mut self.reader, &mut header) {
            Ok(Fill::Full) => {}
            Ok(Fill::Empty) => return None,
            Ok(Fill::Partial(n)) => {
                warn!(have = n, "Truncated pcap record header at end of capture");
                return None;
            }
            Err(e) => {
                warn!("Error reading pcap record header: {e}");
                return None;
            }
        }

        let ts_sec = u64::from(self.order.u32_at(&header, 0));
        let ts_frac = u64::from(self.order.u32_at(&header, 4));
        let captured_len = self.order.u32_at(&header, 8) as usize;

        if captured_len > MAX_RECORD_LEN {
            warn!(captured_len, "Implausible pcap record length, stopping");
            return None;
        }

        let mut frame = vec![0u8; captured_len];
        match fill(&mut self.reader, &mut frame) {
            Ok(Fill::Full) => {}
            Ok(Fill::Empty | Fill::Partial(_)) => {
                warn!(captured_len, "Truncated pcap record at end of capture");
                return None;
            }
            Err(e) => {
                warn!("Error reading pcap record: {e}");
                return None;
            }
        }

        let frac_per_ms = if self.nanos { 1_000_000 } else { 1_000 };
        Some(CaptureRecord {
            link_type: self.link_type,
            timestamp_ms: ts_sec * 1000 + ts_frac / frac_per_ms,
            frame,
        })
    }
}

impl<R: Read> Iterator for PcapReader<R> {
    type Item = CaptureRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let record = self.read_record();
        if record.is_none() {
            self.finished = true;
        }
        record
    }
}
