//! SSDP datagram framing.
//!
//! An SSDP datagram is an HTTP-like start line followed by `NAME: value`
//! header lines. [`SsdpMessage::parse`] splits that apart without judging
//! the content; [`SsdpMessage::is_valid`] applies the quick sanity checks
//! the receive loop uses to drop junk before dispatch.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use upnp_core::{HttpHeader, HttpMethod};

use crate::error::{DiscoveryError, Result};

pub const SSDP_PORT: u16 = 1900;
pub const SSDP_IPV4_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const SSDP_IPV6_LINK_LOCAL: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xc);
pub const SSDP_IPV6_SITE_LOCAL: Ipv6Addr = Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0, 0xc);

/// HOST header values accepted on multicast requests.
const MULTICAST_HOSTS: [&str; 3] = ["239.255.255.250:1900", "[FF02::C]:1900", "[FF05::C]:1900"];

pub const NTS_ALIVE: &str = "ssdp:alive";
pub const NTS_BYEBYE: &str = "ssdp:byebye";
pub const MAN_DISCOVER: &str = "\"ssdp:discover\"";

/// First line of an SSDP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    Request { method: HttpMethod, target: String },
    Response { status: u16 },
}

/// A parsed SSDP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpMessage {
    pub start: StartLine,
    /// Keyed by upper-cased header name
    headers: BTreeMap<String, String>,
}

impl SsdpMessage {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(buf)
            .map_err(|e| DiscoveryError::Parse(format!("datagram is not UTF-8: {}", e)))?;
        let mut lines = text.lines();
        let first = lines
            .next()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .ok_or_else(|| DiscoveryError::Parse("empty datagram".to_string()))?;

        let start = parse_start_line(first)?;

        let mut headers = BTreeMap::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.insert(key.trim().to_ascii_uppercase(), value.trim().to_string());
            }
        }

        Ok(Self { start, headers })
    }

    pub fn header(&self, name: HttpHeader) -> Option<&str> {
        self.headers.get(name.as_str()).map(String::as_str)
    }

    /// Look up a header outside the known-header table, e.g. `BOOTID.UPNP.ORG`.
    pub fn header_named(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_uppercase())
            .map(String::as_str)
    }

    pub fn method(&self) -> Option<HttpMethod> {
        match &self.start {
            StartLine::Request { method, .. } => Some(*method),
            StartLine::Response { .. } => None,
        }
    }

    pub fn is_notify(&self) -> bool {
        self.method() == Some(HttpMethod::Notify)
    }

    pub fn is_search(&self) -> bool {
        self.method() == Some(HttpMethod::MSearch)
    }

    pub fn is_search_response(&self) -> bool {
        matches!(self.start, StartLine::Response { status: 200 })
    }

    /// Quick checks applied before dispatch.
    ///
    /// Only NOTIFY, M-SEARCH and replies to M-SEARCH are accepted. Requests
    /// must address `*` and carry one of the multicast HOST values.
    pub fn is_valid(&self) -> bool {
        match &self.start {
            StartLine::Response { .. } => self.is_search_response(),
            StartLine::Request { method, target } => {
                if !matches!(method, HttpMethod::Notify | HttpMethod::MSearch) {
                    return false;
                }
                if target != "*" {
                    return false;
                }
                self.header(HttpHeader::Host).is_some_and(|host| {
                    MULTICAST_HOSTS
                        .iter()
                        .any(|candidate| candidate.eq_ignore_ascii_case(host))
                })
            }
        }
    }

    /// `max-age` from CACHE-CONTROL, tolerating spaces around `=`.
    pub fn max_age(&self) -> Option<u32> {
        self.header(HttpHeader::CacheControl)
            .and_then(parse_max_age)
    }

    pub fn mx(&self) -> Option<u32> {
        self.header(HttpHeader::Mx)?.trim().parse().ok()
    }
}

fn parse_start_line(line: &str) -> Result<StartLine> {
    let mut parts = line.split_whitespace();
    let first = parts
        .next()
        .ok_or_else(|| DiscoveryError::Parse("empty start line".to_string()))?;

    if first.starts_with("HTTP/") {
        let status = parts
            .next()
            .and_then(|code| code.parse().ok())
            .ok_or_else(|| DiscoveryError::Parse(format!("bad status line: {}", line)))?;
        return Ok(StartLine::Response { status });
    }

    let method = HttpMethod::parse(first.as_bytes())
        .ok_or_else(|| DiscoveryError::Parse(format!("unknown method: {}", first)))?;
    let target = parts
        .next()
        .ok_or_else(|| DiscoveryError::Parse(format!("missing request target: {}", line)))?;
    match parts.next() {
        Some(version) if version.starts_with("HTTP/") => {}
        _ => return Err(DiscoveryError::Parse(format!("bad request line: {}", line))),
    }
    Ok(StartLine::Request {
        method,
        target: target.to_string(),
    })
}

pub(crate) fn parse_max_age(cache_control: &str) -> Option<u32> {
    let lower = cache_control.to_ascii_lowercase();
    let start = lower.find("max-age")? + "max-age".len();
    let rest = lower[start..].trim_start().strip_prefix('=')?.trim_start();
    let digits: &str = &rest[..rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len())];
    digits.parse().ok()
}

/// HOST header value for a multicast destination.
pub fn host_header(dest: &SocketAddr) -> String {
    match dest.ip() {
        IpAddr::V4(ip) => format!("{}:{}", ip, dest.port()),
        IpAddr::V6(ip) if ip == SSDP_IPV6_LINK_LOCAL => format!("[FF02::C]:{}", dest.port()),
        IpAddr::V6(ip) if ip == SSDP_IPV6_SITE_LOCAL => format!("[FF05::C]:{}", dest.port()),
        IpAddr::V6(ip) => format!("[{}]:{}", ip, dest.port()),
    }
}

pub fn build_search(dest: &SocketAddr, mx: u32, search_target: &str, user_agent: &str) -> String {
    let mut out = String::with_capacity(256);
    let _ = write!(
        out,
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: {}\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         USER-AGENT: {}\r\n\
         \r\n",
        host_header(dest),
        MAN_DISCOVER,
        mx,
        search_target,
        user_agent
    );
    out
}

pub fn build_alive(
    dest: &SocketAddr,
    max_age: u32,
    location: &str,
    notification_type: &str,
    usn: &str,
    server: &str,
) -> String {
    format!(
        "NOTIFY * HTTP/1.1\r\n\
         HOST: {}\r\n\
         CACHE-CONTROL: max-age={}\r\n\
         LOCATION: {}\r\n\
         NT: {}\r\n\
         NTS: {}\r\n\
         SERVER: {}\r\n\
         USN: {}\r\n\
         \r\n",
        host_header(dest),
        max_age,
        location,
        notification_type,
        NTS_ALIVE,
        server,
        usn
    )
}

pub fn build_byebye(dest: &SocketAddr, notification_type: &str, usn: &str) -> String {
    format!(
        "NOTIFY * HTTP/1.1\r\n\
         HOST: {}\r\n\
         NT: {}\r\n\
         NTS: {}\r\n\
         USN: {}\r\n\
         \r\n",
        host_header(dest),
        notification_type,
        NTS_BYEBYE,
        usn
    )
}

pub fn build_response(
    max_age: u32,
    date: &str,
    location: &str,
    server: &str,
    search_target: &str,
    usn: &str,
) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         CACHE-CONTROL: max-age={}\r\n\
         DATE: {}\r\n\
         EXT:\r\n\
         LOCATION: {}\r\n\
         SERVER: {}\r\n\
         ST: {}\r\n\
         USN: {}\r\n\
         \r\n",
        max_age, date, location, server, search_target, usn
    )
}

/// RFC 1123 date for the DATE header.
pub fn http_date(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
