//! Frame decoding.
//!
//! This module strips link-layer, IPv4 and TCP headers from captured frames
//! and produces [`TcpSegment`]s. Anything that is not IPv4/TCP is rejected with
//! a [`FrameDecodeError`](crate::error::FrameDecodeError) and the frame is
//! dropped by the caller.

mod link;
mod tcp_segment;

pub use tcp_segment::{TcpFlags, TcpSegment};
