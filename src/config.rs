//! Filter, output and connection-tracking settings.
//!
//! These are built once by the command line layer and passed by value into the
//! constructors that need them. Nothing here is global.

use crate::error::ConfigError;
use core::fmt;
use core::net::Ipv4Addr;
use core::ops::RangeInclusive;
use core::str::FromStr;
use core::time::Duration;
use regex::Regex;

/// Which segments and messages reach the sink.
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    /// Keep segments whose source OR destination address matches.
    pub ip: Option<Ipv4Addr>,
    /// Keep segments whose source OR destination port matches.
    pub port: Option<u16>,
    /// Wildcard over the request `Host` header.
    pub domain_pattern: Option<Wildcard>,
    /// Wildcard over the request URI.
    pub uri_pattern: Option<Wildcard>,
    /// Response status codes to deliver.
    pub status: Option<StatusSet>,
}

impl FilterConfig {
    pub fn by_endpoints(&self, src: (Ipv4Addr, u16), dst: (Ipv4Addr, u16)) -> bool {
        let ip_ok = self.ip.is_none_or(|ip| src.0 == ip || dst.0 == ip);
        let port_ok = self.port.is_none_or(|port| src.1 == port || dst.1 == port);
        ip_ok && port_ok
    }

    pub fn by_request(&self, host: &str, uri: &str) -> bool {
        let domain_ok = self.domain_pattern.as_ref().is_none_or(|p| p.is_match(host));
        let uri_ok = self.uri_pattern.as_ref().is_none_or(|p| p.is_match(uri));
        domain_ok && uri_ok
    }

    pub fn by_status(&self, status: u16) -> bool {
        self.status.as_ref().is_none_or(|set| set.contains(status))
    }

    /// BPF expression equivalent to the ip/port part of this filter.
    pub fn bpf_expression(&self) -> String {
        let mut expr = String::from("tcp");
        if let Some(port) = self.port {
            expr = format!("{expr} port {port}");
        }
        if let Some(ip) = self.ip {
            expr = format!("host {ip} and {expr}");
        }
        expr
    }
}

/// Shell-style pattern (`*` any run of characters, `?` any one character)
/// matched against the whole input.
#[derive(Debug, Clone)]
pub struct Wildcard {
    pattern: String,
    regex: Regex,
}

impl Wildcard {
    pub fn new(pattern: &str, case_insensitive: bool) -> Result<Self, ConfigError> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        if case_insensitive {
            expr.push_str("(?i)");
        }
        expr.push('^');
        let mut literal = [0u8; 4];
        for c in pattern.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                c => expr.push_str(&regex::escape(c.encode_utf8(&mut literal))),
            }
        }
        expr.push('$');

        Ok(Self {
            pattern: pattern.to_owned(),
            regex: Regex::new(&expr)?,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

/// Set of inclusive status-code ranges, written `200`, `200-299` or `200:300-399`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSet {
    ranges: Vec<RangeInclusive<u16>>,
}

impl StatusSet {
    pub fn contains(&self, status: u16) -> bool {
        self.ranges.iter().any(|r| r.contains(&status))
    }
}

impl FromStr for StatusSet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidStatusRange(s.to_owned());
        let ranges = s
            .split(':')
            .map(|item| {
                let (start, end) = item.split_once('-').unwrap_or((item, item));
                let start: u16 = start.trim().parse().map_err(|_| invalid())?;
                let end: u16 = end.trim().parse().map_err(|_| invalid())?;
                if start > end {
                    return Err(invalid());
                }
                Ok(start..=end)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { ranges })
    }
}

impl fmt::Display for StatusSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            if range.start() == range.end() {
                write!(f, "{}", range.start())?;
            } else {
                write!(f, "{}-{}", range.start(), range.end())?;
            }
        }
        Ok(())
    }
}

/// How much of each message the sink prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DetailLevel {
    /// Request line with full URL, and the response status line.
    Url,
    /// Raw headers.
    #[default]
    Header,
    /// Headers plus bodies that look like text.
    TextBody,
    /// Headers plus every body that is not known to be binary.
    AllBody,
}

impl FromStr for DetailLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "url" => Ok(Self::Url),
            "header" => Ok(Self::Header),
            "text" => Ok(Self::TextBody),
            "all" => Ok(Self::AllBody),
            _ => Err(ConfigError::InvalidDetailLevel(s.to_owned())),
        }
    }
}

/// Output settings. Only the sink looks at these.
#[derive(Debug, Clone, Default)]
pub struct ParseConfig {
    pub detail_level: DetailLevel,
    /// Re-indent JSON bodies.
    pub pretty: bool,
    /// Charset to assume when a message does not declare one.
    pub encoding: Option<String>,
}

/// Connection tracking settings.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Connections idle for longer than this (in capture time) are evicted.
    pub idle_timeout: Duration,
    /// Run the idle scan once every this many segments.
    pub scan_interval: u32,
    /// Parse each connection on its own worker thread.
    pub threaded: bool,
    /// Chunks buffered per connection queue in threaded mode.
    pub queue_depth: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(4 * 60),
            scan_interval: 100,
            threaded: false,
            queue_depth: 256,
        }
    }
}
