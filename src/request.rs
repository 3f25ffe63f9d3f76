//! Reading and parsing the single request a client sends.
//!
//! Parsing works on the text the client sent, split on literal CRLF, with the
//! request line split on single spaces. Forwarding keeps the raw bytes so
//! header lines reach the origin byte for byte.

use crate::error::ProxyError;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

const DEFAULT_PORT: u16 = 80;
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const READ_CHUNK_SIZE: usize = 4096;

/// A plain HTTP request reduced to what the relay needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    /// The request-target exactly as the client sent it.
    pub target_url: String,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl ParsedRequest {
    pub fn parse(request: &str) -> Result<Self, ProxyError> {
        let lines: Vec<&str> = request.split("\r\n").collect();
        let first_line: Vec<&str> = lines[0].split(' ').collect();
        if first_line.len() < 3 {
            return Err(ProxyError::InvalidRequest("incomplete request line".to_string()));
        }

        let method = first_line[0];
        let target_url = first_line[1];
        if method.is_empty() || target_url.is_empty() {
            return Err(ProxyError::InvalidRequest("empty method or target".to_string()));
        }

        let (authority, path) = match target_url.strip_prefix("http://") {
            Some(rest) => match rest.find('/') {
                Some(idx) => (Some(&rest[..idx]), &rest[idx..]),
                None => (Some(rest), "/"),
            },
            None => {
                let host_header = lines
                    .iter()
                    .find_map(|line| line.strip_prefix("Host:"))
                    .map(str::trim);
                (host_header, target_url)
            }
        };

        let authority = authority.ok_or_else(|| ProxyError::InvalidRequest("missing Host header".to_string()))?;
        let (host, port) = split_authority(authority);
        if host.is_empty() {
            return Err(ProxyError::InvalidRequest("empty host".to_string()));
        }

        Ok(Self {
            method: method.to_string(),
            target_url: target_url.to_string(),
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }
}

/// Destination of a CONNECT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
}

impl ConnectTarget {
    /// Parses `CONNECT host:port VERSION`. Both parts of the authority are
    /// required.
    pub fn parse(request: &str) -> Result<Self, ProxyError> {
        let first_line = request.split("\r\n").next().unwrap_or_default();
        let target = first_line
            .split(' ')
            .nth(1)
            .ok_or_else(|| ProxyError::InvalidRequest("missing CONNECT target".to_string()))?;

        let parts: Vec<&str> = target.split(':').collect();
        if parts.len() != 2 {
            return Err(ProxyError::InvalidRequest(format!("malformed CONNECT target: {}", target)));
        }
        let port = parts[1]
            .parse::<u16>()
            .map_err(|_| ProxyError::InvalidRequest(format!("bad CONNECT port: {}", parts[1])))?;
        if parts[0].is_empty() {
            return Err(ProxyError::InvalidRequest("empty CONNECT host".to_string()));
        }

        Ok(Self {
            host: parts[0].to_string(),
            port,
        })
    }
}

impl std::fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

pub fn is_connect(request: &str) -> bool {
    request.starts_with("CONNECT")
}

// A port that does not parse falls back to 80; the host is still cut at the colon.
fn split_authority(authority: &str) -> (&str, u16) {
    match authority.find(':') {
        Some(idx) => {
            let port = authority[idx + 1..].parse::<u16>().unwrap_or(DEFAULT_PORT);
            (&authority[..idx], port)
        }
        None => (authority, DEFAULT_PORT),
    }
}

/// Replaces the request line with `METHOD path HTTP/1.1` and keeps every
/// following byte untouched.
pub fn rewrite_request(raw: &[u8], method: &str, path: &str) -> Vec<u8> {
    let request_line = format!("{} {} HTTP/1.1", method, path);
    let rest = find(raw, b"\r\n").map(|idx| &raw[idx..]).unwrap_or_default();

    let mut rewritten = Vec::with_capacity(request_line.len() + rest.len());
    rewritten.extend_from_slice(request_line.as_bytes());
    rewritten.extend_from_slice(rest);
    rewritten
}

/// Accumulates the client's request.
///
/// Each read waits at most `read_timeout`. A timeout, EOF or read error ends
/// accumulation and whatever arrived so far is returned. Reading also stops
/// once the headers and any `Content-Length` body are complete, or after
/// `max_size` bytes. Body bytes past `max_size` stay in the stream; see
/// [`pending_body_len`].
pub async fn read_request<R>(reader: &mut R, read_timeout: Duration, max_size: usize) -> BytesMut
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(READ_CHUNK_SIZE);
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    while buffer.len() < max_size {
        let want = READ_CHUNK_SIZE.min(max_size - buffer.len());
        match timeout(read_timeout, reader.read(&mut chunk[..want])).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => buffer.extend_from_slice(&chunk[..n]),
        }
        if is_complete(&buffer) {
            break;
        }
    }

    buffer
}

/// True once the blank line ending the header block has been received.
pub fn has_complete_head(raw: &[u8]) -> bool {
    find(raw, HEADER_TERMINATOR).is_some()
}

/// Body bytes announced by `Content-Length` that are not in `raw` yet.
/// Zero when the head is incomplete or carries no usable length.
pub fn pending_body_len(raw: &[u8]) -> usize {
    let Some(header_end) = find(raw, HEADER_TERMINATOR) else {
        return 0;
    };
    let received = raw.len() - header_end - HEADER_TERMINATOR.len();
    content_length(&raw[..header_end]).saturating_sub(received)
}

fn is_complete(buffer: &[u8]) -> bool {
    let Some(header_end) = find(buffer, HEADER_TERMINATOR) else {
        return false;
    };
    // the length is client-controlled and may be anything up to usize::MAX
    let expected = header_end
        .saturating_add(HEADER_TERMINATOR.len())
        .saturating_add(content_length(&buffer[..header_end]));
    buffer.len() >= expected
}

fn content_length(head: &[u8]) -> usize {
    String::from_utf8_lossy(head)
        .split("\r\n")
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}
