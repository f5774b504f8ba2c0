//! Capture container decoding.
//!
//! This module turns a pcap or pcapng byte source into a lazy sequence of
//! [`CaptureRecord`]s. The container format is detected from the first four
//! bytes. Live capture (feature `live`) yields records of the same shape, so
//! the rest of the pipeline never knows where its frames came from. It also
//! reports read timeouts so idle connections can be evicted between frames.

#[cfg(all(feature = "live", target_os = "linux"))]
mod live;
mod pcap_file;
mod pcapng_file;

use crate::error::FormatError;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

#[cfg(all(feature = "live", target_os = "linux"))]
pub use live::{LiveCapture, LiveEvent};
pub use pcap_file::PcapReader;
pub use pcapng_file::PcapngReader;

const PCAPNG_MAGIC: u32 = 0x0A0D_0D0A;

/// Upper bound for a single record or block. Anything larger is a corrupt length field.
pub(crate) const MAX_RECORD_LEN: usize = 256 * 1024 * 1024;

/// Link-layer framing of a captured frame (see tcpdump.org/linktypes.html).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    /// BSD loopback encapsulation
    Null,
    Ethernet,
    /// Linux "cooked" capture
    LinuxSll,
    /// Bare IP packet, version taken from the first nibble
    Raw,
    /// Bare IPv4 packet
    Ipv4,
    Other(u32),
}

impl LinkType {
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Null,
            1 => Self::Ethernet,
            101 => Self::Raw,
            113 => Self::LinuxSll,
            228 => Self::Ipv4,
            other => Self::Other(other),
        }
    }

    pub const fn raw(self) -> u32 {
        match self {
            Self::Null => 0,
            Self::Ethernet => 1,
            Self::Raw => 101,
            Self::LinuxSll => 113,
            Self::Ipv4 => 228,
            Self::Other(other) => other,
        }
    }
}

/// One captured frame, as produced by a file reader or a live capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRecord {
    pub link_type: LinkType,
    pub timestamp_ms: u64,
    pub frame: Vec<u8>,
}

/// Byte order of the multi-byte fields in a capture file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub(crate) fn u16_at(self, buf: &[u8], at: usize) -> u16 {
        let bytes = [buf[at], buf[at + 1]];
        match self {
            Self::Little => u16::from_le_bytes(bytes),
            Self::Big => u16::from_be_bytes(bytes),
        }
    }

    pub(crate) fn u32_at(self, buf: &[u8], at: usize) -> u32 {
        let bytes = [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]];
        match self {
            Self::Little => u32::from_le_bytes(bytes),
            Self::Big => u32::from_be_bytes(bytes),
        }
    }
}

/// A capture file of either supported container format.
pub enum CaptureReader<R: Read> {
    Pcap(PcapReader<R>),
    Pcapng(PcapngReader<R>),
}

impl<R: Read> CaptureReader<R> {
    /// Detect the container format from the magic number and read its header.
    ///
    /// Fails only when the magic is unknown or the global/section header is
    /// truncated; problems further into the file end the record sequence early
    /// with a warning instead.
    pub fn open(mut reader: R) -> Result<Self, FormatError> {
        let mut magic = [0u8; 4];
        read_header(&mut reader, &mut magic, "capture magic")?;

        if u32::from_le_bytes(magic) == PCAPNG_MAGIC {
            PcapngReader::from_magic(reader, magic).map(Self::Pcapng)
        } else {
            PcapReader::from_magic(reader, magic).map(Self::Pcap)
        }
    }
}

impl CaptureReader<BufReader<File>> {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let file = File::open(path)?;
        Self::open(BufReader::new(file))
    }
}

impl<R: Read> Iterator for CaptureReader<R> {
    type Item = CaptureRecord;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Pcap(reader) => reader.next(),
            Self::Pcapng(reader) => reader.next(),
        }
    }
}

/// How much of a buffer could be filled before the source ran dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fill {
    Full,
    Empty,
    Partial(usize),
}

pub(crate) fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<Fill> {
    if buf.is_empty() {
        return Ok(Fill::Full);
    }
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(match filled {
        0 => Fill::Empty,
        n if n == buf.len() => Fill::Full,
        n => Fill::Partial(n),
    })
}

/// Read a header that must be present in full.
pub(crate) fn read_header(
    reader: &mut impl Read,
    buf: &mut [u8],
    what: &'static str,
) -> Result<(), FormatError> {
    match fill(reader, buf)? {
        Fill::Full => Ok(()),
        Fill::Empty | Fill::Partial(_) => Err(FormatError::TruncatedHeader { what }),
    }
}
