//! Response-head decoding (§4.5).
//!
//! Grounded on the teacher's `parse_status_line` / header-reading loop (old
//! `response.rs`), rebuilt on top of [`BufferedConnection::read_line`]
//! instead of a bespoke byte-at-a-time reader, and extended with obsolete
//! line folding (leading whitespace continuation), which the teacher's old
//! parser didn't handle.

use crate::conn::BufferedConnection;
use crate::header::{Header, HeaderList};
use crate::Error;

/// The default cap on cumulative header bytes (§4.5 `OverlongHeaders`).
pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug)]
pub struct ResponseHead {
    pub http_minor_version: u8,
    pub status: u16,
    pub reason: String,
    pub headers: HeaderList,
}

impl ResponseHead {
    /// HTTP version ≥ 1.1, used by the reusability check (§4.5).
    pub fn is_http_1_1_or_later(&self) -> bool {
        self.http_minor_version >= 1
    }
}

/// Reads the status line and header block off `conn` (§4.5).
pub fn decode_response_head(
    conn: &mut BufferedConnection,
    max_header_bytes: usize,
) -> Result<ResponseHead, Error> {
    let status_line = conn.read_line(max_header_bytes)?;
    let (http_minor_version, status, reason) = parse_status_line(&status_line)?;

    let mut headers = HeaderList::new();
    let mut budget = max_header_bytes.saturating_sub(status_line.len());
    let mut pending: Option<String> = None;

    loop {
        let line = conn.read_line(budget)?;
        budget = budget.saturating_sub(line.len());

        let is_continuation = line.starts_with(' ') || line.starts_with('\t');
        if is_continuation {
            if let Some(prev) = pending.as_mut() {
                prev.push(' ');
                prev.push_str(line.trim());
            }
            continue;
        }

        if let Some(prev) = pending.take() {
            push_header_line(&mut headers, &prev)?;
        }

        if line.is_empty() {
            break;
        }
        pending = Some(line);
    }

    Ok(ResponseHead {
        http_minor_version,
        status,
        reason,
        headers,
    })
}

fn push_header_line(headers: &mut HeaderList, line: &str) -> Result<(), Error> {
    let header: Header = line.parse()?;
    headers.set(header, true);
    Ok(())
}

fn parse_status_line(line: &str) -> Result<(u8, u16, String), Error> {
    let mut parts = line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| Error::InvalidStatusLine(line.to_string()))?;
    let status = parts
        .next()
        .ok_or_else(|| Error::InvalidStatusLine(line.to_string()))?;
    let reason = parts.next().unwrap_or("").to_string();

    let minor = match version {
        "HTTP/1.0" => 0,
        "HTTP/1.1" => 1,
        _ => return Err(Error::InvalidStatusLine(line.to_string())),
    };

    let status: u16 = status
        .parse()
        .map_err(|_| Error::InvalidStatusLine(line.to_string()))?;
    if !(100..=599).contains(&status) {
        return Err(Error::InvalidStatusLine(line.to_string()));
    }

    Ok((minor, status, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::test_fake::FakeConnection;

    fn decode(bytes: &[u8]) -> ResponseHead {
        let (fake, _) = FakeConnection::new(bytes.to_vec());
        let mut conn = BufferedConnection::new(Box::new(fake));
        decode_response_head(&mut conn, DEFAULT_MAX_HEADER_BYTES).unwrap()
    }

    #[test]
    fn parses_status_and_headers() {
        let head = decode(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n");
        assert_eq!(head.status, 200);
        assert_eq!(head.reason, "OK");
        assert!(head.is_http_1_1_or_later());
        assert_eq!(head.headers.get("content-length"), Some("5"));
    }

    #[test]
    fn joins_obsolete_folded_header() {
        let head = decode(
            b"HTTP/1.1 200 OK\r\nX-Thing: first\r\n  continued\r\n\r\n",
        );
        assert_eq!(head.headers.get("x-thing"), Some("first continued"));
    }

    #[test]
    fn rejects_malformed_status_line() {
        let (fake, _) = FakeConnection::new(b"not a status line\r\n\r\n".to_vec());
        let mut conn = BufferedConnection::new(Box::new(fake));
        assert!(matches!(
            decode_response_head(&mut conn, DEFAULT_MAX_HEADER_BYTES),
            Err(Error::InvalidStatusLine(_))
        ));
    }

    #[test]
    fn http_1_0_is_not_reusable_by_version() {
        let head = decode(b"HTTP/1.0 200 OK\r\n\r\n");
        assert!(!head.is_http_1_1_or_later());
    }
}
