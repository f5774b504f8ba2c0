//! Human-readable and JSON output of decoded messages.

use crate::config::{DetailLevel, ParseConfig};
use crate::http::{Compression, MimeCategory, RequestHeader, ResponseHeader, classify, parse_content_type};
use crate::sink::Sink;
use core::fmt::Write as _;
use core::net::SocketAddrV4;
use serde::Serialize;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Output shared by every connection's printer.
pub type SharedOutput = Arc<Mutex<Box<dyn Write + Send>>>;

/// How a body is shown.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Body {
    None,
    Text(String),
    /// One-line description instead of the content.
    Summary(String),
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record<'a> {
    Request {
        client: String,
        server: String,
        method: &'a str,
        url: String,
        version: &'a str,
        headers: Vec<(&'a str, &'a str)>,
        body_len: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<&'a str>,
    },
    Response {
        client: String,
        server: String,
        status: u16,
        reason: &'a str,
        version: &'a str,
        headers: Vec<(&'a str, &'a str)>,
        body_len: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<&'a str>,
    },
}

/// Prints one connection. Everything is buffered and written in one piece
/// when the connection finishes, so concurrent connections never interleave.
pub struct Printer {
    config: Arc<ParseConfig>,
    json: bool,
    client: SocketAddrV4,
    server: SocketAddrV4,
    buffer: String,
    output: SharedOutput,
}

impl Printer {
    pub fn new(
        config: Arc<ParseConfig>,
        json: bool,
        client: SocketAddrV4,
        server: SocketAddrV4,
        output: SharedOutput,
    ) -> Self {
        Self {
            config,
            json,
            client,
            server,
            buffer: String::new(),
            output,
        }
    }

    fn body(&self, content_type: Option<&str>, encoding: &Compression, body: &[u8]) -> Body {
        if body.is_empty() {
            return Body::None;
        }
        let len = body.len();
        if self.config.detail_level < DetailLevel::TextBody {
            return Body::Summary(format!("{{body size: {len}, set level to text or all to display it}}"));
        }
        if !encoding.is_identity() {
            return Body::Summary(format!("{{{encoding} compressed body, len: {len}}}"));
        }

        let category = classify(content_type);
        let printable = match category {
            MimeCategory::Text => true,
            MimeCategory::Unknown => self.config.detail_level == DetailLevel::AllBody,
            MimeCategory::Binary => false,
        };
        if !printable {
            let content_type = content_type.unwrap_or("unknown");
            return Body::Summary(format!("{{non-text body, content-type: {content_type}, len: {len}}}"));
        }

        let (mime, charset) = content_type.map(parse_content_type).unwrap_or_default();
        let charset = charset.or_else(|| self.config.encoding.clone());
        let Some(text) = decode(body, charset.as_deref()) else {
            let charset = charset.unwrap_or_default();
            return Body::Summary(format!("{{body in charset {charset}, len: {len}}}"));
        };

        if self.config.pretty && (mime.ends_with("json") || looks_like_json(&text))
            && let Ok(value) = serde_json::from_str::<serde_json::Value>(&text)
            && let Ok(pretty) = serde_json::to_string_pretty(&value)
        {
            return Body::Text(pretty);
        }
        Body::Text(text)
    }

    fn write_body(&mut self, body: Body) {
        match body {
            Body::None => {}
            Body::Text(text) | Body::Summary(text) => {
                let _ = writeln!(self.buffer, "\n{text}");
            }
        }
    }

    fn push_json(&mut self, record: &Record<'_>) {
        match serde_json::to_string(record) {
            Ok(line) => {
                self.buffer.push_str(&line);
                self.buffer.push('\n');
            }
            Err(e) => warn!("Failed to serialize message: {e}"),
        }
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let Ok(mut output) = self.output.lock() else {
            warn!("Output lock poisoned, dropping connection output");
            return;
        };
        if let Err(e) = output
            .write_all(self.buffer.as_bytes())
            .and_then(|()| output.flush())
        {
            warn!("Failed to write output: {e}");
        }
        self.buffer.clear();
    }
}

impl Sink for Printer {
    fn on_http_request(&mut self, header: &RequestHeader, body: &[u8]) {
        let shown = self.body(header.content_type.as_deref(), &header.content_encoding, body);

        if self.json {
            let body_text = match &shown {
                Body::Text(text) => Some(text.as_str()),
                Body::None | Body::Summary(_) => None,
            };
            self.push_json(&Record::Request {
                client: self.client.to_string(),
                server: self.server.to_string(),
                method: &header.method,
                url: header.full_url(),
                version: &header.version,
                headers: header.headers.iter().collect(),
                body_len: body.len(),
                body: body_text,
            });
            return;
        }

        if self.config.detail_level == DetailLevel::Url {
            let _ = writeln!(self.buffer, "{} {}", header.method, header.full_url());
            return;
        }
        let _ = writeln!(
            self.buffer,
            "\n{stars} {} -----> {} {stars}",
            self.client,
            self.server,
            stars = "*".repeat(10)
        );
        self.buffer.push_str(String::from_utf8_lossy(&header.raw).trim_end());
        self.buffer.push('\n');
        self.write_body(shown);
    }

    fn on_http_response(&mut self, header: &ResponseHeader, body: &[u8]) {
        let shown = self.body(header.content_type.as_deref(), &header.content_encoding, body);

        if self.json {
            let body_text = match &shown {
                Body::Text(text) => Some(text.as_str()),
                Body::None | Body::Summary(_) => None,
            };
            self.push_json(&Record::Response {
                client: self.client.to_string(),
                server: self.server.to_string(),
                status: header.status,
                reason: &header.reason,
                version: &header.version,
                headers: header.headers.iter().collect(),
                body_len: body.len(),
                body: body_text,
            });
            return;
        }

        if self.config.detail_level == DetailLevel::Url {
            let _ = writeln!(self.buffer, "    {}", header.status_line);
            return;
        }
        self.buffer.push('\n');
        self.buffer.push_str(String::from_utf8_lossy(&header.raw).trim_end());
        self.buffer.push('\n');
        self.write_body(shown);
    }

    fn on_connection_finished(&mut self) {
        self.flush();
    }
}

impl Drop for Printer {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Decode `body` in `charset`, defaulting to UTF-8. Returns `None` for
/// charsets that are not decoded here.
fn decode(body: &[u8], charset: Option<&str>) -> Option<String> {
    match charset.map(str::to_ascii_lowercase).as_deref() {
        None | Some("utf-8" | "utf8" | "us-ascii" | "ascii") => {
            Some(String::from_utf8_lossy(body).into_owned())
        }
        Some("iso-8859-1" | "latin1" | "latin-1") => Some(body.iter().map(|&b| char::from(b)).collect()),
        Some(_) => None,
    }
}

fn looks_like_json(text: &str) -> bool {
    let text = text.trim();
    (text.starts_with('{') && text.ends_with('}')) || (text.starts_with('[') && text.ends_with(']'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use crate::http::{Direction, HttpParser};
    use rstest::rstest;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn render(config: ParseConfig, json: bool, request: &[u8], response: &[u8]) -> String {
        let captured = Captured::default();
        let output: SharedOutput = Arc::new(Mutex::new(Box::new(captured.clone())));
        let printer = Printer::new(
            Arc::new(config),
            json,
            "10.0.0.1:4000".parse().unwrap(),
            "10.0.0.2:80".parse().unwrap(),
            output,
        );
        let mut parser = HttpParser::new(Arc::new(FilterConfig::default()), Box::new(printer));
        parser.feed(Direction::Request, request.to_vec());
        parser.feed(Direction::Response, response.to_vec());
        parser.finish();
        String::from_utf8(captured.0.lock().unwrap().clone()).unwrap()
    }

    fn level(detail_level: DetailLevel) -> ParseConfig {
        ParseConfig {
            detail_level,
            ..ParseConfig::default()
        }
    }

    const REQUEST: &[u8] = b"GET /index HTTP/1.1\r\nHost: example.com\r\n\r\n";
    const JSON_RESPONSE: &[u8] =
        b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 7\r\n\r\n{\"a\":1}";

    #[test]
    fn test_url_level() {
        let out = render(level(DetailLevel::Url), false, REQUEST, JSON_RESPONSE);
        assert_eq!(out, "GET http://example.com/index\n    HTTP/1.1 200 OK\n");
    }

    #[test]
    fn test_header_level_summarises_body() {
        let out = render(level(DetailLevel::Header), false, REQUEST, JSON_RESPONSE);
        assert!(out.contains("********** 10.0.0.1:4000 -----> 10.0.0.2:80 **********"));
        assert!(out.contains("GET /index HTTP/1.1\r\nHost: example.com\n"));
        assert!(out.contains("Content-Length: 7\n\n{body size: 7,"));
        assert!(!out.contains("{\"a\":1}"));
    }

    #[test]
    fn test_text_level_prints_and_prettifies_json() {
        let config = ParseConfig {
            detail_level: DetailLevel::TextBody,
            pretty: true,
            encoding: None,
        };
        let out = render(config, false, REQUEST, JSON_RESPONSE);
        assert!(out.ends_with("\n{\n  \"a\": 1\n}\n"), "{out}");
    }

    #[rstest]
    #[case::binary("image/png", DetailLevel::AllBody, "{non-text body, content-type: image/png, len: 4}")]
    #[case::unknown_at_text("application/foo", DetailLevel::TextBody, "{non-text body")]
    #[case::unknown_at_all("application/foo", DetailLevel::AllBody, "\nbody\n")]
    #[case::other_charset("text/plain; charset=gbk", DetailLevel::AllBody, "{body in charset gbk, len: 4}")]
    fn test_body_rendering(#[case] content_type: &str, #[case] detail: DetailLevel, #[case] expected: &str) {
        let response = format!("HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: 4\r\n\r\nbody");
        let out = render(level(detail), false, REQUEST, response.as_bytes());
        assert!(out.contains(expected), "{out}");
    }

    #[test]
    fn test_compressed_body_is_summarised() {
        let response =
            b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Encoding: gzip\r\nContent-Length: 3\r\n\r\n\x1f\x8b\x08";
        let out = render(level(DetailLevel::AllBody), false, REQUEST, response);
        assert!(out.contains("{gzip compressed body, len: 3}"), "{out}");
    }

    #[test]
    fn test_latin1_body_is_decoded() {
        let response = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=ISO-8859-1\r\nContent-Length: 4\r\n\r\ncaf\xe9";
        let out = render(level(DetailLevel::TextBody), false, REQUEST, response);
        assert!(out.contains("\ncaf\u{e9}\n"), "{out}");
    }

    #[test]
    fn test_json_output_is_one_object_per_message() {
        let out = render(level(DetailLevel::TextBody), true, REQUEST, JSON_RESPONSE);
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "request");
        assert_eq!(lines[0]["url"], "http://example.com/index");
        assert_eq!(lines[0]["client"], "10.0.0.1:4000");
        assert!(lines[0].get("body").is_none());
        assert_eq!(lines[1]["kind"], "response");
        assert_eq!(lines[1]["status"], 200);
        assert_eq!(lines[1]["body"], "{\"a\":1}");
        assert_eq!(lines[1]["headers"][0][0], "content-type");
    }
}
