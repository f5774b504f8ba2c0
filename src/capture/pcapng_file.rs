//! pcapng block reader.
//!
//! A pcapng file is a sequence of self-describing blocks laid out as
//! `type(4) + length(4) + body + length(4)`. Section Header Blocks set the byte
//! order for everything that follows them, Interface Description Blocks declare
//! link types, and packet blocks carry the frames. Unknown blocks are skipped
//! by their declared length.

use super::{ByteOrder, CaptureRecord, Fill, LinkType, MAX_RECORD_LEN, fill, read_header};
use crate::error::FormatError;
use std::io::Read;
use tracing::{debug, trace, warn};

const BLOCK_SECTION_HEADER: [u8; 4] = [0x0A, 0x0D, 0x0D, 0x0A];
const BLOCK_INTERFACE_DESCRIPTION: u32 = 0x0000_0001;
const BLOCK_SIMPLE_PACKET: u32 = 0x0000_0003;
const BLOCK_ENHANCED_PACKET: u32 = 0x0000_0006;

const BYTE_ORDER_MAGIC: u32 = 0x1A2B_3C4D;
const BYTE_ORDER_MAGIC_SWAPPED: u32 = 0x4D3C_2B1A;

const OPT_ENDOFOPT: u16 = 0;
const OPT_IF_TSRESOL: u16 = 9;

/// type + length + byte-order magic + version + section length + trailing length
const MIN_SECTION_HEADER_LEN: usize = 28;
const MIN_BLOCK_LEN: usize = 12;
const MICROS_PER_SEC: u64 = 1_000_000;

#[derive(Debug, Clone, Copy)]
struct Interface {
    link_type: LinkType,
    /// Timestamp units per second, from `if_tsresol`.
    units_per_sec: u64,
}

impl Interface {
    fn timestamp_ms(self, ticks: u64) -> u64 {
        let ms = u128::from(ticks) * 1000 / u128::from(self.units_per_sec);
        u64::try_from(ms).unwrap_or(u64::MAX)
    }
}

/// Outcome of reading one block.
enum Step {
    Record(CaptureRecord),
    Skip,
    End,
}

/// Reader for pcapng files.
pub struct PcapngReader<R> {
    reader: R,
    order: ByteOrder,
    interfaces: Vec<Interface>,
    finished: bool,
}

impl<R: Read> PcapngReader<R> {
    /// Continue reading a pcapng file whose 4-byte magic (the type of its first
    /// Section Header Block) has already been consumed.
    pub fn from_magic(mut reader: R, magic: [u8; 4]) -> Result<Self, FormatError> {
        debug_assert_eq!(magic, BLOCK_SECTION_HEADER);

        let mut head = [0u8; 8];
        read_header(&mut reader, &mut head, "pcapng section header")?;
        let order = byte_order(&head[4..]).ok_or_else(|| {
            FormatError::BadByteOrderMagic(u32::from_be_bytes([head[4], head[5], head[6], head[7]]))
        })?;

        let block_len = order.u32_at(&head, 0) as usize;
        if !(MIN_SECTION_HEADER_LEN..=MAX_RECORD_LEN).contains(&block_len) {
            return Err(FormatError::TruncatedHeader {
                what: "pcapng section header",
            });
        }
        let mut rest = vec![0u8; block_len - 12];
        read_header(&mut reader, &mut rest, "pcapng section header")?;

        let this = Self {
            reader,
            order,
            interfaces: Vec::new(),
            finished: false,
        };
        this.check_trailer(block_len, &rest);
        this.log_section(&rest);
        Ok(this)
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    fn log_section(&self, body: &[u8]) {
        let major = self.order.u16_at(body, 0);
        let minor = self.order.u16_at(body, 2);
        debug!(order = ?self.order, major, minor, "Opened pcapng section");
    }

    /// Compare the trailing block length (last four bytes of `rest`) with the leading one.
    fn check_trailer(&self, block_len: usize, rest: &[u8]) {
        let trailer = self.order.u32_at(rest, rest.len() - 4) as usize;
        if trailer != block_len {
            warn!(
                leading = block_len,
                trailing = trailer,
                "pcapng block length mismatch"
            );
        }
    }

    /// Read the rest of a block after its 8-byte head. Returns the body without
    /// the trailing length, or `None` if the capture ends inside the block.
    fn read_body(&mut self, block_len: usize, consumed: usize) -> Option<Vec<u8>> {
        let mut rest = vec![0u8; block_len - consumed];
        match fill(&mut self.reader, &mut rest) {
            Ok(Fill::Full) => {}
            Ok(Fill::Empty | Fill::Partial(_)) => {
                warn!(block_len, "Truncated pcapng block at end of capture");
                return None;
            }
            Err(e) => {
                warn!("Error reading pcapng block: {e}");
                return None;
            }
        }
        self.check_trailer(block_len, &rest);
        rest.truncate(rest.len() - 4);
        Some(rest)
    }

    fn read_block(&mut self) -> Step {
        let mut head = [0u8; 8];
        match fill(&mut self.reader, &mut head) {
            Ok(Fill::Full) => {}
            Ok(Fill::Empty) => return Step::End,
            Ok(Fill::Partial(n)) => {
                warn!(have = n, "Truncated pcapng block header at end of capture");
                return Step::End;
            }
            Err(e) => {
                warn!("Error reading pcapng block header: {e}");
                return Step::End;
            }
        }

        if head[..4] == BLOCK_SECTION_HEADER {
            return self.read_section_header(&head);
        }

        let block_type = self.order.u32_at(&head, 0);
        let block_len = self.order.u32_at(&head, 4) as usize;
        if block_len < MIN_BLOCK_LEN || block_len % 4 != 0 || block_len > MAX_RECORD_LEN {
            warn!(block_type, block_len, "Implausible pcapng block length, stopping");
            return Step::End;
        }
        let Some(body) = self.read_body(block_len, 8) else {
            return Step::End;
        };

        let record = match block_type {
            BLOCK_INTERFACE_DESCRIPTION => {
                self.add_interface(&body);
                None
            }
            BLOCK_ENHANCED_PACKET => self.enhanced_packet(&body),
            BLOCK_SIMPLE_PACKET => self.simple_packet(&body),
            other => {
                trace!(block_type = other, block_len, "Skipping pcapng block");
                None
            }
        };
        record.map_or(Step::Skip, Step::Record)
    }

    /// A new section restarts byte order detection and forgets all interfaces.
    fn read_section_header(&mut self, head: &[u8; 8]) -> Step {
        let mut bom = [0u8; 4];
        if fill(&mut self.reader, &mut bom).ok() != Some(Fill::Full) {
            warn!("Truncated pcapng section header at end of capture");
            return Step::End;
        }
        let Some(order) = byte_order(&bom) else {
            warn!(magic = ?bom, "Invalid pcapng byte-order magic, stopping");
            return Step::End;
        };
        self.order = order;
        self.interfaces.clear();

        let block_len = order.u32_at(head, 4) as usize;
        if !(MIN_SECTION_HEADER_LEN..=MAX_RECORD_LEN).contains(&block_len) || block_len % 4 != 0 {
            warn!(block_len, "Implausible pcapng section length, stopping");
            return Step::End;
        }
        let Some(body) = self.read_body(block_len, 12) else {
            return Step::End;
        };
        self.log_section(&body);
        Step::Skip
    }

    fn add_interface(&mut self, body: &[u8]) {
        if body.len() < 8 {
            warn!(len = body.len(), "Short pcapng interface description block");
            return;
        }
        let link_type = LinkType::from_raw(u32::from(self.order.u16_at(body, 0)));
        let units_per_sec = self.tsresol(&body[8..]).unwrap_or(MICROS_PER_SEC);
        debug!(
            interface = self.interfaces.len(),
            ?link_type,
            units_per_sec,
            "pcapng interface"
        );
        self.interfaces.push(Interface {
            link_type,
            units_per_sec,
        });
    }

    /// Find the `if_tsresol` option: high bit clear means 10^-n seconds, set means 2^-n.
    fn tsresol(&self, mut options: &[u8]) -> Option<u64> {
        while options.len() >= 4 {
            let code = self.order.u16_at(options, 0);
            let len = usize::from(self.order.u16_at(options, 2));
            if code == OPT_ENDOFOPT {
                return None;
            }
            let padded = len.div_ceil(4) * 4;
            if options.len() < 4 + padded {
                return None;
            }
            if code == OPT_IF_TSRESOL && len >= 1 {
                let value = options[4];
                let exp = u32::from(value & 0x7F);
                return if value & 0x80 == 0 {
                    10u64.checked_pow(exp)
                } else {
                    1u64.checked_shl(exp)
                }
                .filter(|units| *units > 0);
            }
            options = &options[4 + padded..];
        }
        None
    }

    fn enhanced_packet(&self, body: &[u8]) -> Option<CaptureRecord> {
        if body.len() < 20 {
            warn!(len = body.len(), "Short pcapng enhanced packet block");
            return None;
        }
        let interface_id = self.order.u32_at(body, 0) as usize;
        let ts_high = u64::from(self.order.u32_at(body, 4));
        let ts_low = u64::from(self.order.u32_at(body, 8));
        let captured_len = self.order.u32_at(body, 12) as usize;

        let Some(interface) = self.interfaces.get(interface_id).copied() else {
            warn!(interface_id, "Enhanced packet for undeclared interface");
            return None;
        };
        let Some(frame) = body.get(20..20 + captured_len) else {
            warn!(captured_len, "Enhanced packet overruns its block");
            return None;
        };

        Some(CaptureRecord {
            link_type: interface.link_type,
            timestamp_ms: interface.timestamp_ms((ts_high << 32) | ts_low),
            frame: frame.to_vec(),
        })
    }

    fn simple_packet(&self, body: &[u8]) -> Option<CaptureRecord> {
        if body.len() < 4 {
            return None;
        }
        let Some(interface) = self.interfaces.first() else {
            warn!("Simple packet before any interface description");
            return None;
        };
        let original_len = self.order.u32_at(body, 0) as usize;
        let data = &body[4..];
        Some(CaptureRecord {
            link_type: interface.link_type,
            timestamp_ms: 0,
            frame: data[..original_len.min(data.len())].to_vec(),
        })
    }
}

fn byte_order(bom: &[u8]) -> Option<ByteOrder> {
    match u32::from_be_bytes([bom[0], bom[1], bom[2], bom[3]]) {
        BYTE_ORDER_MAGIC => Some(ByteOrder::Big),
        BYTE_ORDER_MAGIC_SWAPPED => Some(ByteOrder::Little),
        _ => None,
    }
}

impl<R: Read> Iterator for PcapngReader<R> {
    type Item = CaptureRecord;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            match self.read_block() {
                Step::Record(record) => return Some(record),
                Step::Skip => {}
                Step::End => self.finished = true,
            }
        }
        None
    }
}
