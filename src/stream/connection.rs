//! A tracked TCP connection.

use super::buffer::Stream;
use crate::http::{Direction, is_request_line};
use crate::packet::TcpSegment;
use crate::worker::Pipeline;
use core::fmt;
use core::net::SocketAddrV4;
use tracing::debug;

/// Unordered pair of endpoints. Both directions of a connection map to the
/// same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey {
    low: SocketAddrV4,
    high: SocketAddrV4,
}

impl ConnectionKey {
    pub fn new(a: SocketAddrV4, b: SocketAddrV4) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn endpoints(&self) -> (SocketAddrV4, SocketAddrV4) {
        (self.low, self.high)
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.low, self.high)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Open,
    /// One direction has sent FIN or RST.
    HalfClosed,
    Closed,
}

pub struct Connection {
    key: ConnectionKey,
    client: SocketAddrV4,
    server: SocketAddrV4,
    /// Client to server.
    up: Stream,
    /// Server to client.
    down: Stream,
    /// Decided by the first payload seen in either direction.
    is_http: Option<bool>,
    last_activity_ms: u64,
    pipeline: Pipeline,
    finalized: bool,
}

impl Connection {
    /// Start tracking with `first` as the opening segment. Its sender is
    /// taken to be the client.
    pub(crate) fn new(first: &TcpSegment, pipeline: Pipeline) -> Self {
        Self {
            key: ConnectionKey::new(first.src, first.dst),
            client: first.src,
            server: first.dst,
            up: Stream::new(),
            down: Stream::new(),
            is_http: None,
            last_activity_ms: first.timestamp_ms,
            pipeline,
            finalized: false,
        }
    }

    /// Route one segment: its payload is buffered on the sending direction and
    /// its acknowledgment releases data buffered on the opposite direction.
    pub(crate) fn on_segment(&mut self, segment: &TcpSegment) {
        self.last_activity_ms = self.last_activity_ms.max(segment.timestamp_ms);

        if self.is_http.is_none() && !segment.payload.is_empty() {
            let http = is_request_line(&segment.payload);
            if !http {
                debug!(key = %self.key, "First payload is not an HTTP request, ignoring connection payload");
            }
            self.is_http = Some(http);
        }

        let from_client = segment.src == self.client;
        let (sending, confirming, released) = if from_client {
            (&mut self.up, &mut self.down, Direction::Response)
        } else {
            (&mut self.down, &mut self.up, Direction::Request)
        };

        if self.is_http == Some(true) {
            if !segment.payload.is_empty() {
                sending.append(segment.seq, &segment.payload);
            }
            if segment.flags.ack {
                for chunk in confirming.retrieve(segment.ack_seq) {
                    self.pipeline.feed(released, chunk);
                }
            }
        }

        if segment.flags.fin || segment.flags.rst {
            sending.close();
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        match (self.up.is_closed(), self.down.is_closed()) {
            (true, true) => ConnectionStatus::Closed,
            (false, false) => ConnectionStatus::Open,
            _ => ConnectionStatus::HalfClosed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status() == ConnectionStatus::Closed
    }

    /// Flush the parser and notify the sink. Blocks until a threaded parser
    /// has drained its queue. Only the first call has an effect.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        debug!(
            key = %self.key,
            status = ?self.status(),
            pending_up = self.up.pending_segments(),
            pending_down = self.down.pending_segments(),
            "Finalizing connection"
        );
        self.pipeline.finish();
    }

    pub fn key(&self) -> ConnectionKey {
        self.key
    }

    pub fn client(&self) -> SocketAddrV4 {
        self.client
    }

    pub fn server(&self) -> SocketAddrV4 {
        self.server
    }

    /// `None` until the first payload has been seen.
    pub fn is_http(&self) -> Option<bool> {
        self.is_http
    }

    /// Capture timestamp of the latest segment.
    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.finalize();
    }
}
