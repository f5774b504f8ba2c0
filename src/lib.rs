#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![deny(unreachable_pub)]
#![deny(clippy::correctness)]
#![deny(clippy::suspicious)]
#![deny(clippy::style)]
#![deny(clippy::complexity)]
#![deny(clippy::perf)]
#![deny(clippy::pedantic)]
#![deny(clippy::std_instead_of_core)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

//! Reconstruct HTTP/1.x conversations from packet captures.
//!
//! Frames from a pcap/pcapng file ([`capture::CaptureReader`]) or a live
//! device are decoded into TCP segments ([`packet::TcpSegment`]), reassembled
//! per connection ([`stream::ConnectionTable`]) and parsed into HTTP messages
//! ([`http::HttpParser`]) that are handed to a [`sink::Sink`].

pub mod capture;
pub mod config;
pub mod error;
pub mod http;
pub mod packet;
pub mod printer;
pub mod sink;
pub mod stream;
mod worker;
