//! Error taxonomy for the capture pipeline.
//!
//! Only [`FormatError`] ever reaches the caller: it means the capture container
//! itself cannot be read. Every other kind is contained where it happens, a bad
//! frame is dropped and a bad HTTP stream stops being tracked, so one corrupted
//! connection never affects its neighbours.

use thiserror::Error;

/// Fatal problems with the capture container. Aborts the run.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("unrecognized capture magic 0x{0:08x}")]
    UnknownMagic(u32),

    #[error("truncated {what}")]
    TruncatedHeader { what: &'static str },

    #[error("invalid pcapng byte-order magic 0x{0:08x}")]
    BadByteOrderMagic(u32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single frame could not be turned into a TCP segment. The frame is dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameDecodeError {
    #[error("unsupported link type {0}")]
    UnsupportedLinkType(u32),

    #[error("{layer}: truncated (need {needed} bytes, have {have})")]
    Truncated {
        layer: &'static str,
        needed: usize,
        have: usize,
    },

    #[error("unsupported network protocol 0x{0:04x}")]
    UnsupportedNetwork(u16),

    #[error("IPv6 is not supported")]
    Ipv6,

    #[error("not TCP (ip protocol {0})")]
    NotTcp(u8),

    #[error("non-initial IPv4 fragment")]
    Fragment,

    #[error("{layer}: invalid header length {len}")]
    BadHeaderLength { layer: &'static str, len: usize },
}

/// The byte stream of a connection is not HTTP. Tracking stops for that connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpParseError {
    #[error("unparseable request line: {0:?}")]
    BadRequestLine(String),

    #[error("unparseable status line: {0:?}")]
    BadStatusLine(String),
}

/// A chunked body could not be decoded any further. The partial body is kept.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkDecodeError {
    #[error("invalid chunk size line: {0:?}")]
    BadChunkSize(String),
}

/// Invalid filter or output settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid status range {0:?}")]
    InvalidStatusRange(String),

    #[error("invalid detail level {0:?} (expected url, header, text or all)")]
    InvalidDetailLevel(String),

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}
