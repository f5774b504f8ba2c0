//! TCP connection tracking and stream reassembly.
//!
//! Segments are routed to a [`Connection`] by their unordered endpoint pair.
//! Each direction buffers payload in a [`Stream`] until the peer's
//! acknowledgment releases it, in sequence order and deduplicated, to the
//! connection's HTTP parser.

mod buffer;
mod connection;
mod seq;
mod table;

pub use buffer::Stream;
pub use connection::{Connection, ConnectionKey, ConnectionStatus};
pub use seq::seq_compare;
pub use table::{ConnectionTable, TableStats};
