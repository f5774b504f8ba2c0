//! Where decoded HTTP messages go.

use crate::http::{RequestHeader, ResponseHeader};
use core::net::SocketAddrV4;

/// Receives the messages of one connection, in the order they were framed.
///
/// Bodies are passed exactly as captured: chunked framing is removed, but
/// content encodings and charsets are left for the sink to deal with.
pub trait Sink {
    fn on_http_request(&mut self, header: &RequestHeader, body: &[u8]);

    fn on_http_response(&mut self, header: &ResponseHeader, body: &[u8]);

    /// Called once, after the last message of the connection.
    fn on_connection_finished(&mut self) {}
}

/// Creates one [`Sink`] per tracked connection.
pub trait SinkFactory {
    fn create(&mut self, client: SocketAddrV4, server: SocketAddrV4) -> Box<dyn Sink + Send>;
}

impl<F> SinkFactory for F
where
    F: FnMut(SocketAddrV4, SocketAddrV4) -> Box<dyn Sink + Send>,
{
    fn create(&mut self, client: SocketAddrV4, server: SocketAddrV4) -> Box<dyn Sink + Send> {
        self(client, server)
    }
}
