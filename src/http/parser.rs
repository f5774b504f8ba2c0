//! Per-connection HTTP/1.x framing.
//!
//! The parser owns one [`ChunkReader`] per direction and walks the exchange
//! state machine:
//!
//! ```text
//! AwaitRequestLine -> RequestHeaders -> RequestBody -> [AwaitContinue]
//!     -> ResponseHeaders -> ResponseBody -> AwaitRequestLine
//! ```
//!
//! Every state can stop when its reader runs dry and resume on the next
//! [`feed`](HttpParser::feed). A start line that is not HTTP moves the parser
//! to the terminal `NotHttp` state, after which all input is dropped.

use super::body::{BodyReader, Framing};
use super::header::{HeaderBlock, RequestHeader, ResponseHeader, is_request_line, is_status_line};
use super::reader::{ChunkReader, Pull};
use crate::config::FilterConfig;
use crate::error::HttpParseError;
use crate::sink::Sink;
use std::sync::Arc;
use tracing::debug;

/// Which side of the connection a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server.
    Request,
    /// Server to client.
    Response,
}

/// Observable parser position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    AwaitRequestLine,
    RequestHeaders,
    RequestBody,
    /// Waiting for the server to answer `Expect: 100-continue`.
    AwaitContinue,
    ResponseHeaders,
    ResponseBody,
    NotHttp,
    /// Input exhausted or framing lost; nothing more will be emitted.
    Done,
}

enum State {
    RequestLine,
    RequestHeaders(HeaderBlock),
    RequestBody(RequestHeader, BodyReader),
    ResponseLine,
    ResponseHeaders(HeaderBlock),
    ResponseBody {
        header: ResponseHeader,
        body: BodyReader,
        deliver: bool,
    },
    NotHttp,
    Done,
}

enum Flow {
    Next(State),
    Wait(State),
}

/// Bookkeeping that spans the request and response half of one exchange.
#[derive(Default)]
struct Exchange {
    /// Request sent with `Expect: 100-continue` whose body has not been read.
    deferred: Option<RequestHeader>,
    /// `100 Continue` for the deferred request, delivered right after it.
    interim: Option<ResponseHeader>,
    /// Body the client may still send for a deferred request the server
    /// answered without `100 Continue`. Dropped before the next request line.
    orphan_body: Option<Orphan>,
    filtered: bool,
    head: bool,
    /// Request framing was lost; stop after the current response.
    requests_broken: bool,
}

enum Orphan {
    /// Not known yet whether the client sends the body or moves on.
    Unchecked(BodyReader),
    Draining(BodyReader),
}

pub struct HttpParser {
    requests: ChunkReader,
    responses: ChunkReader,
    state: State,
    exchange: Exchange,
    filter: Arc<FilterConfig>,
    sink: Box<dyn Sink + Send>,
    finished: bool,
}

impl HttpParser {
    pub fn new(filter: Arc<FilterConfig>, sink: Box<dyn Sink + Send>) -> Self {
        Self {
            requests: ChunkReader::new(),
            responses: ChunkReader::new(),
            state: State::RequestLine,
            exchange: Exchange::default(),
            filter,
            sink,
            finished: false,
        }
    }

    /// Push released bytes for one direction and parse as far as they allow.
    pub fn feed(&mut self, direction: Direction, chunk: Vec<u8>) {
        if self.is_terminal() {
            return;
        }
        match direction {
            Direction::Request => self.requests.push(chunk),
            Direction::Response => self.responses.push(chunk),
        }
        self.advance();
    }

    /// End both directions, flush what can still be framed and notify the
    /// sink. Calling it again does nothing.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.requests.end();
        self.responses.end();
        self.advance();
        if !self.is_terminal() {
            self.state = self.stop();
        }
        self.sink.on_connection_finished();
    }

    pub fn state(&self) -> ParserState {
        match &self.state {
            State::RequestLine => ParserState::AwaitRequestLine,
            State::RequestHeaders(_) => ParserState::RequestHeaders,
            State::RequestBody(..) => ParserState::RequestBody,
            State::ResponseLine | State::ResponseHeaders(_) if self.exchange.deferred.is_some() => {
                ParserState::AwaitContinue
            }
            State::ResponseLine | State::ResponseHeaders(_) => ParserState::ResponseHeaders,
            State::ResponseBody { .. } => ParserState::ResponseBody,
            State::NotHttp => ParserState::NotHttp,
            State::Done => ParserState::Done,
        }
    }

    pub fn is_http(&self) -> bool {
        !matches!(self.state, State::NotHttp)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn is_terminal(&self) -> bool {
        matches!(self.state, State::NotHttp | State::Done)
    }

    fn advance(&mut self) {
        loop {
            let state = core::mem::replace(&mut self.state, State::Done);
            match self.step(state) {
                Flow::Next(next) => self.state = next,
                Flow::Wait(next) => {
                    self.state = next;
                    break;
                }
            }
        }
    }

    fn step(&mut self, state: State) -> Flow {
        match state {
            State::RequestLine => self.request_line(),
            State::RequestHeaders(block) => self.request_headers(block),
            State::RequestBody(header, body) => self.request_body(header, body),
            State::ResponseLine => self.response_line(),
            State::ResponseHeaders(block) => self.response_headers(block),
            State::ResponseBody {
                header,
                body,
                deliver,
            } => self.response_body(header, body, deliver),
            terminal @ (State::NotHttp | State::Done) => {
                let _ = self.requests.skip_to_end();
                let _ = self.responses.skip_to_end();
                Flow::Wait(terminal)
            }
        }
    }

    fn request_line(&mut self) -> Flow {
        if let Some(orphan) = self.exchange.orphan_body.take()
            && !self.drain_orphan(orphan)
        {
            return Flow::Wait(State::RequestLine);
        }
        if self.exchange.requests_broken {
            return Flow::Next(self.stop());
        }

        match self.requests.read_line() {
            Pull::Pending => Flow::Wait(State::RequestLine),
            Pull::Ended => Flow::Next(self.stop()),
            Pull::Ready(line) if line.trim_ascii().is_empty() => Flow::Next(State::RequestLine),
            Pull::Ready(line) if is_request_line(&line) => {
                Flow::Next(State::RequestHeaders(HeaderBlock::new(&line)))
            }
            Pull::Ready(line) => self.not_http(HttpParseError::BadRequestLine(lossy(&line))),
        }
    }

    fn request_headers(&mut self, mut block: HeaderBlock) -> Flow {
        loop {
            match self.requests.read_line() {
                Pull::Pending => return Flow::Wait(State::RequestHeaders(block)),
                Pull::Ended => break,
                Pull::Ready(line) => {
                    if block.push_line(&line) {
                        break;
                    }
                }
            }
        }
        let header = match RequestHeader::from_block(block) {
            Ok(header) => header,
            Err(e) => return self.not_http(e),
        };

        self.exchange.filtered = !self.filter.by_request(&header.host, &header.uri);
        self.exchange.head = header.method == "HEAD";
        if header.expect_continue {
            self.exchange.deferred = Some(header);
            return Flow::Next(State::ResponseLine);
        }
        let body = BodyReader::new(request_framing(&header), self.exchange.filtered);
        Flow::Next(State::RequestBody(header, body))
    }

    fn request_body(&mut self, header: RequestHeader, mut body: BodyReader) -> Flow {
        let Some(bytes) = body.poll(&mut self.requests) else {
            return Flow::Wait(State::RequestBody(header, body));
        };
        if body.error().is_some() {
            self.exchange.requests_broken = true;
        }
        self.deliver_request(&header, &bytes);
        if let Some(interim) = self.exchange.interim.take()
            && !self.exchange.filtered
        {
            self.sink.on_http_response(&interim, &[]);
        }
        Flow::Next(State::ResponseLine)
    }

    fn response_line(&mut self) -> Flow {
        match self.responses.read_line() {
            Pull::Pending => Flow::Wait(State::ResponseLine),
            Pull::Ended => Flow::Next(self.stop()),
            Pull::Ready(line) if line.trim_ascii().is_empty() => Flow::Next(State::ResponseLine),
            Pull::Ready(line) if is_status_line(&line) => {
                Flow::Next(State::ResponseHeaders(HeaderBlock::new(&line)))
            }
            Pull::Ready(line) => self.not_http(HttpParseError::BadStatusLine(lossy(&line))),
        }
    }

    fn response_headers(&mut self, mut block: HeaderBlock) -> Flow {
        loop {
            match self.responses.read_line() {
                Pull::Pending => return Flow::Wait(State::ResponseHeaders(block)),
                Pull::Ended => break,
                Pull::Ready(line) => {
                    if block.push_line(&line) {
                        break;
                    }
                }
            }
        }
        let header = match ResponseHeader::from_block(block) {
            Ok(header) => header,
            Err(e) => return self.not_http(e),
        };

        match self.exchange.deferred.take() {
            Some(request) => self.answer_expectation(request, header),
            None => self.final_response(header),
        }
    }

    /// The first response after an `Expect: 100-continue` request decides
    /// what happens to the request body.
    fn answer_expectation(&mut self, request: RequestHeader, response: ResponseHeader) -> Flow {
        match response.status {
            100 => {
                let body = BodyReader::new(request_framing(&request), self.exchange.filtered);
                self.exchange.interim = Some(response);
                Flow::Next(State::RequestBody(request, body))
            }
            417 => {
                self.deliver_request(&request, &[]);
                self.final_response(response)
            }
            status => {
                // The client gave up waiting and the server answered directly.
                debug!(status, "Expectation answered without 100 Continue");
                self.deliver_request(&request, &[]);
                self.exchange.orphan_body = Some(Orphan::Unchecked(BodyReader::new(
                    request_framing(&request),
                    true,
                )));
                self.final_response(response)
            }
        }
    }

    fn final_response(&mut self, header: ResponseHeader) -> Flow {
        let deliver = !self.exchange.filtered && self.filter.by_status(header.status);
        let body = BodyReader::new(response_framing(&header, self.exchange.head), !deliver);
        Flow::Next(State::ResponseBody {
            header,
            body,
            deliver,
        })
    }

    fn response_body(&mut self, header: ResponseHeader, mut body: BodyReader, deliver: bool) -> Flow {
        let Some(bytes) = body.poll(&mut self.responses) else {
            return Flow::Wait(State::ResponseBody {
                header,
                body,
                deliver,
            });
        };
        if deliver {
            self.sink.on_http_response(&header, &bytes);
        }

        match header.status {
            // Switching protocols: whatever follows is not HTTP/1.x.
            101 => Flow::Next(self.stop()),
            // Informational; the final response for the same request follows.
            100..=199 => Flow::Next(State::ResponseLine),
            _ if body.error().is_some() => Flow::Next(self.stop()),
            _ => Flow::Next(State::RequestLine),
        }
    }

    /// Skip a late body for an answered expectation. A client that gave up on
    /// the body starts its next request instead, which is left alone. Returns
    /// false while more input is needed.
    fn drain_orphan(&mut self, orphan: Orphan) -> bool {
        let mut body = match orphan {
            Orphan::Unchecked(body) => match self.requests.peek_line() {
                Pull::Pending => {
                    self.exchange.orphan_body = Some(Orphan::Unchecked(body));
                    return false;
                }
                Pull::Ended => return true,
                Pull::Ready(line) if is_request_line(&line) => {
                    debug!("Client dropped the deferred request body");
                    return true;
                }
                Pull::Ready(_) => body,
            },
            Orphan::Draining(body) => body,
        };
        if body.poll(&mut self.requests).is_none() {
            self.exchange.orphan_body = Some(Orphan::Draining(body));
            return false;
        }
        true
    }

    fn deliver_request(&mut self, header: &RequestHeader, body: &[u8]) {
        if !self.exchange.filtered {
            self.sink.on_http_request(header, body);
        }
    }

    /// Leave the exchange loop. A request still waiting on its expectation is
    /// delivered without a body.
    fn stop(&mut self) -> State {
        if let Some(request) = self.exchange.deferred.take() {
            self.deliver_request(&request, &[]);
        }
        State::Done
    }

    fn not_http(&mut self, err: HttpParseError) -> Flow {
        debug!("HTTP tracking disabled: {err}");
        let _ = self.requests.skip_to_end();
        let _ = self.responses.skip_to_end();
        Flow::Next(State::NotHttp)
    }
}

/// Body length policy for requests: chunked, then `Content-Length`, then read
/// to the end on `Connection: close`, otherwise no body.
fn request_framing(header: &RequestHeader) -> Framing {
    if header.chunked {
        Framing::Chunked
    } else if let Some(len) = header.content_length {
        Framing::Length(len)
    } else if header.connection_close {
        Framing::ToEnd
    } else {
        Framing::Empty
    }
}

/// Body length policy for responses. Without chunking or `Content-Length` the
/// body runs to the end of the stream.
fn response_framing(header: &ResponseHeader, head_request: bool) -> Framing {
    if head_request || header.forbids_body() {
        Framing::Empty
    } else if header.chunked {
        Framing::Chunked
    } else if let Some(len) = header.content_length {
        Framing::Length(len)
    } else {
        Framing::ToEnd
    }
}

fn lossy(line: &[u8]) -> String {
    String::from_utf8_lossy(line).trim_end().to_owned()
}
