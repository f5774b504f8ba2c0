//! HTTP/1.x message framing over reassembled streams.
//!
//! Released bytes of each direction are pushed into an [`HttpParser`], which
//! frames them into request/response headers and bodies and hands each
//! message to a [`Sink`](crate::sink::Sink). Bodies keep their declared
//! content encoding; only chunked transfer framing is removed.

mod body;
mod header;
mod mime;
mod parser;
mod reader;

pub use header::{
    Compression, Headers, METHODS, RequestHeader, ResponseHeader, is_request_line, is_status_line,
};
pub use mime::{MimeCategory, classify, parse_content_type};
pub use parser::{Direction, HttpParser, ParserState};
pub use reader::{ChunkReader, Pull};
