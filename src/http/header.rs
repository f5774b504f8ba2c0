//! HTTP start lines and header blocks.
//!
//! Header blocks are accumulated one line at a time so the parser can stop at
//! any point and resume when more bytes are released. Keys are case-folded and
//! a repeated key replaces the earlier value instead of being comma-joined.

use crate::error::HttpParseError;
use core::fmt;

/// Request methods that start an HTTP request line.
pub const METHODS: [&str; 9] = [
    "GET", "POST", "PUT", "DELETE", "HEAD", "TRACE", "OPTIONS", "PATCH", "CONNECT",
];

/// Whether `data` begins with a known method token followed by a space.
pub fn is_request_line(data: &[u8]) -> bool {
    let Some(space) = memchr::memchr(b' ', data) else {
        return false;
    };
    METHODS.iter().any(|m| m.as_bytes() == &data[..space])
}

pub fn is_status_line(data: &[u8]) -> bool {
    data.starts_with(b"HTTP/")
}

/// Header fields in first-seen order. Keys are stored lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
    /// Entry set by the most recent `insert`, where a folded line continues.
    last_set: Option<usize>,
}

impl Headers {
    /// Insert a field. A key that is already present keeps its position and
    /// takes the new value.
    pub fn insert(&mut self, key: &str, value: &str) {
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().to_owned();
        match self.entries.iter().position(|(k, _)| *k == key) {
            Some(index) => {
                self.entries[index].1 = value;
                self.last_set = Some(index);
            }
            None => {
                self.last_set = Some(self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Obsolete line folding: a line starting with whitespace continues the
    /// value of the previous field.
    fn continue_last(&mut self, more: &str) {
        if let Some((_, value)) = self.last_set.and_then(|i| self.entries.get_mut(i)) {
            value.push(' ');
            value.push_str(more.trim());
        }
    }

    /// Whether a comma-separated header contains `token`, ignoring case.
    fn has_token(&self, key: &str, token: &str) -> bool {
        self.get(key).is_some_and(|v| {
            v.split(',')
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        })
    }
}

/// Declared `Content-Encoding`. Bodies are passed through undecoded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    Identity,
    Gzip,
    Deflate,
    Other(String),
}

impl Compression {
    pub fn from_header(value: Option<&str>) -> Self {
        let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Self::Identity;
        };
        match value.to_ascii_lowercase().as_str() {
            "identity" => Self::Identity,
            "gzip" | "x-gzip" => Self::Gzip,
            "deflate" => Self::Deflate,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::Identity
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => f.write_str("identity"),
            Self::Gzip => f.write_str("gzip"),
            Self::Deflate => f.write_str("deflate"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// A header block being read line by line.
#[derive(Debug, Default)]
pub(crate) struct HeaderBlock {
    raw: Vec<u8>,
    start_line: Option<String>,
    headers: Headers,
}

impl HeaderBlock {
    /// Start a block with its start line.
    pub(crate) fn new(start_line: &[u8]) -> Self {
        let mut block = Self::default();
        block.raw.extend_from_slice(start_line);
        block.start_line = Some(trim_line(start_line));
        block
    }

    /// Feed the next header line. Returns true once the terminating blank line
    /// has been seen.
    pub(crate) fn push_line(&mut self, line: &[u8]) -> bool {
        self.raw.extend_from_slice(line);
        let text = trim_line(line);
        if text.is_empty() {
            return true;
        }
        if line.first().is_some_and(|b| *b == b' ' || *b == b'\t') {
            self.headers.continue_last(&text);
        } else if let Some((key, value)) = text.split_once(':') {
            self.headers.insert(key, value);
        }
        // Lines without a colon are ignored.
        false
    }

    fn into_parts(self) -> (String, Headers, Vec<u8>) {
        (self.start_line.unwrap_or_default(), self.headers, self.raw)
    }
}

fn trim_line(line: &[u8]) -> String {
    String::from_utf8_lossy(line)
        .trim_end_matches(['\r', '\n'])
        .to_owned()
}

fn parse_content_length(headers: &Headers) -> Option<u64> {
    headers.get("content-length").and_then(|v| v.trim().parse().ok())
}

/// Parsed request header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub method: String,
    pub uri: String,
    pub version: String,
    pub host: String,
    pub content_length: Option<u64>,
    pub chunked: bool,
    pub content_type: Option<String>,
    pub content_encoding: Compression,
    pub expect_continue: bool,
    pub connection_close: bool,
    pub headers: Headers,
    /// Header block as captured, start line through the blank line.
    pub raw: Vec<u8>,
}

impl RequestHeader {
    pub(crate) fn from_block(block: HeaderBlock) -> Result<Self, HttpParseError> {
        let (start_line, headers, raw) = block.into_parts();
        if !is_request_line(start_line.as_bytes()) {
            return Err(HttpParseError::BadRequestLine(start_line));
        }
        let mut parts = start_line.splitn(3, ' ');
        let method = parts.next().unwrap_or_default().to_owned();
        let uri = parts.next().unwrap_or_default().to_owned();
        let version = parts.next().unwrap_or_default().trim().to_owned();

        Ok(Self {
            method,
            uri,
            version,
            host: headers.get("host").unwrap_or_default().to_owned(),
            content_length: parse_content_length(&headers),
            chunked: headers.has_token("transfer-encoding", "chunked"),
            content_type: headers.get("content-type").map(str::to_owned),
            content_encoding: Compression::from_header(headers.get("content-encoding")),
            expect_continue: headers.has_token("expect", "100-continue"),
            connection_close: headers.has_token("connection", "close"),
            headers,
            raw,
        })
    }

    /// Absolute URL of the request: proxy-style URIs are kept as they are,
    /// origin-form URIs are joined with the `Host` header.
    pub fn full_url(&self) -> String {
        if self.uri.starts_with("http://") || self.uri.starts_with("https://") {
            return self.uri.clone();
        }
        if self.uri.starts_with('/') {
            format!("http://{}{}", self.host, self.uri)
        } else {
            format!("http://{}/{}", self.host, self.uri)
        }
    }
}

/// Parsed response header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub status_line: String,
    pub content_length: Option<u64>,
    pub chunked: bool,
    pub content_type: Option<String>,
    pub content_encoding: Compression,
    pub connection_close: bool,
    pub headers: Headers,
    /// Header block as captured, status line through the blank line.
    pub raw: Vec<u8>,
}

impl ResponseHeader {
    pub(crate) fn from_block(block: HeaderBlock) -> Result<Self, HttpParseError> {
        let (status_line, headers, raw) = block.into_parts();
        if !is_status_line(status_line.as_bytes()) {
            return Err(HttpParseError::BadStatusLine(status_line));
        }
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default().to_owned();
        let Some(status) = parts.next().and_then(|s| s.trim().parse::<u16>().ok()) else {
            return Err(HttpParseError::BadStatusLine(status_line));
        };
        let reason = parts.next().unwrap_or_default().trim().to_owned();

        Ok(Self {
            version,
            status,
            reason,
            content_length: parse_content_length(&headers),
            chunked: headers.has_token("transfer-encoding", "chunked"),
            content_type: headers.get("content-type").map(str::to_owned),
            content_encoding: Compression::from_header(headers.get("content-encoding")),
            connection_close: headers.has_token("connection", "close"),
            status_line,
            headers,
            raw,
        })
    }

    /// 1xx, 204 and 304 responses never carry a body.
    pub fn forbids_body(&self) -> bool {
        (100..200).contains(&self.status) || self.status == 204 || self.status == 304
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn block(text: &str) -> HeaderBlock {
        let mut lines = text.split_inclusive('\n');
        let mut block = HeaderBlock::new(lines.next().unwrap().as_bytes());
        for line in lines {
            if block.push_line(line.as_bytes()) {
                break;
            }
        }
        block
    }

    #[rstest]
    #[case(b"GET / HTTP/1.1", true)]
    #[case(b"CONNECT a.com:443 HTTP/1.1", true)]
    #[case(b"PATCH /x HTTP/1.1", true)]
    #[case(b"GETX / HTTP/1.1", false)]
    #[case(b"get / HTTP/1.1", false)]
    #[case(b"GET", false)]
    #[case(b"\x16\x03\x01\x02\x00", false)]
    fn test_is_request_line(#[case] data: &[u8], #[case] expected: bool) {
        assert_eq!(is_request_line(data), expected);
    }

    #[test]
    fn test_request_header() {
        let header = RequestHeader::from_block(block(
            "POST /upload?a=1 HTTP/1.1\r\nHost: a.com\r\nContent-Length: 12\r\n\
             Content-Type: text/plain; charset=utf-8\r\nContent-Encoding: gzip\r\n\
             Expect: 100-continue\r\n\r\n",
        ))
        .unwrap();

        assert_eq!(header.method, "POST");
        assert_eq!(header.uri, "/upload?a=1");
        assert_eq!(header.version, "HTTP/1.1");
        assert_eq!(header.host, "a.com");
        assert_eq!(header.content_length, Some(12));
        assert!(!header.chunked);
        assert_eq!(header.content_type.as_deref(), Some("text/plain; charset=utf-8"));
        assert_eq!(header.content_encoding, Compression::Gzip);
        assert!(header.expect_continue);
        assert!(!header.connection_close);
        assert_eq!(header.full_url(), "http://a.com/upload?a=1");
        assert!(header.raw.starts_with(b"POST /upload"));
        assert!(header.raw.ends_with(b"\r\n\r\n"));
    }

    #[test]
    fn test_duplicate_header_last_value_wins() {
        let header = RequestHeader::from_block(block(
            "GET / HTTP/1.1\r\nHost: first.com\r\nX-Id: 1\r\nhost: second.com\r\n\r\n",
        ))
        .unwrap();

        assert_eq!(header.host, "second.com");
        assert_eq!(header.headers.len(), 2);
        let keys: Vec<_> = header.headers.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["host", "x-id"]);
    }

    #[test]
    fn test_folded_header_value() {
        let header = RequestHeader::from_block(block(
            "GET / HTTP/1.1\r\nX-Custom-Header: value1\r\n\tvalue2\r\nno colon here\r\n\r\n",
        ))
        .unwrap();
        assert_eq!(header.headers.get("x-custom-header"), Some("value1 value2"));
        assert_eq!(header.headers.len(), 1);
    }

    #[test]
    fn test_fold_continues_replaced_header() {
        let header = RequestHeader::from_block(block(
            "GET / HTTP/1.1\r\nHost: a\r\nX: 1\r\nhost: b\r\n\tmore\r\n\r\n",
        ))
        .unwrap();
        assert_eq!(header.headers.get("host"), Some("b more"));
        assert_eq!(header.headers.get("x"), Some("1"));
    }

    #[test]
    fn test_proxy_style_uri() {
        let header =
            RequestHeader::from_block(block("GET http://b.com/x HTTP/1.1\r\nHost: b.com\r\n\r\n"))
                .unwrap();
        assert_eq!(header.full_url(), "http://b.com/x");
    }

    #[test]
    fn test_response_header() {
        let header = ResponseHeader::from_block(block(
            "HTTP/1.1 404 Not Found\r\nTransfer-Encoding: gzip, Chunked\r\nConnection: close\r\n\r\n",
        ))
        .unwrap();

        assert_eq!(header.version, "HTTP/1.1");
        assert_eq!(header.status, 404);
        assert_eq!(header.reason, "Not Found");
        assert_eq!(header.status_line, "HTTP/1.1 404 Not Found");
        assert!(header.chunked);
        assert!(header.connection_close);
        assert_eq!(header.content_length, None);
        assert!(!header.forbids_body());
    }

    #[rstest]
    #[case("HTTP/1.1 100 Continue", true)]
    #[case("HTTP/1.1 204 No Content", true)]
    #[case("HTTP/1.1 304 Not Modified", true)]
    #[case("HTTP/1.1 200 OK", false)]
    fn test_forbids_body(#[case] line: &str, #[case] expected: bool) {
        let header = ResponseHeader::from_block(block(&format!("{line}\r\n\r\n"))).unwrap();
        assert_eq!(header.forbids_body(), expected);
    }

    #[test]
    fn test_bad_start_lines() {
        assert!(matches!(
            RequestHeader::from_block(block("HELLO world\r\n\r\n")),
            Err(HttpParseError::BadRequestLine(line)) if line == "HELLO world"
        ));
        assert!(matches!(
            ResponseHeader::from_block(block("HTTP/1.1 abc\r\n\r\n")),
            Err(HttpParseError::BadStatusLine(_))
        ));
        assert!(ResponseHeader::from_block(block("SSH-2.0-OpenSSH\r\n\r\n")).is_err());
    }

    #[rstest]
    #[case(None, Compression::Identity)]
    #[case(Some(""), Compression::Identity)]
    #[case(Some(" GZIP "), Compression::Gzip)]
    #[case(Some("deflate"), Compression::Deflate)]
    #[case(Some("br"), Compression::Other("br".to_owned()))]
    fn test_compression(#[case] value: Option<&str>, #[case] expected: Compression) {
        assert_eq!(Compression::from_header(value), expected);
    }
}
