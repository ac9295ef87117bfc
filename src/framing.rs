//! Response body framing (§4.6): picks chunked / content-length / EOF
//! framing off the decoded headers, and determines connection reusability.
//!
//! Grounded on the teacher's `LimitedRead` (old `response.rs`) for the
//! content-length case and `chunked.rs` (this crate's own port of the
//! teacher's chunked decoder) for the chunked case.

use std::cell::RefCell;
use std::io::{self, Read};
use std::rc::Rc;

use crate::chunked::ChunkedDecoder;
use crate::conn::BufferedConnection;
use crate::header::HeaderList;
use crate::time::Deadline;
use crate::wire::ResponseHead;
use crate::Error;

/// A handle to a connection shared between the body reader and whoever holds
/// onto it to eventually reclaim it for the pool (§C2 `release`). Mirrors the
/// `ReusabilityFlag` pattern: both need to outlive the `Box<dyn Read>` the
/// caller drives to completion.
pub type SharedConnection = Rc<RefCell<BufferedConnection>>;

/// Re-arms the connection's read timeout from `deadline` before every body
/// read, so a slow-drip response can't hold the connection open past its
/// request's timeout budget (§4.2) even though the body is read well after
/// the header decode's own deadline check.
struct ConnReader(SharedConnection, Deadline);

impl Read for ConnReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut conn = self.0.borrow_mut();
        conn.apply_deadline(&self.1)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        conn.read(buf)
    }
}

#[cfg(feature = "gzip")]
use crate::gzip::{translate_gzip_io_error, GzipDecoder};

/// Shared with the driver so the body reader can report back, once it
/// reaches EOF, whether the connection may be reused (§4.5 reusability
/// rule, §4.6 "MUST mark the connection as reusable").
///
/// `allowed` is the §4.5 ceiling (HTTP ≥ 1.1, no `Connection: close`, framed
/// not EOF-delimited) fixed at construction time; `drained` is whatever the
/// body framing itself decides once the caller finishes reading. The
/// reported value is their conjunction, so a `Connection: close` response
/// is never reusable even if its body happens to be framed and fully read.
#[derive(Clone)]
pub struct ReusabilityFlag(Rc<RefCell<(bool, bool)>>);

impl ReusabilityFlag {
    pub fn new(initially: bool) -> Self {
        ReusabilityFlag(Rc::new(RefCell::new((initially, true))))
    }

    /// As `new`, but capped by whether §4.5's keep-alive preconditions hold
    /// at all for this response.
    pub fn capped(initially: bool, allowed: bool) -> Self {
        ReusabilityFlag(Rc::new(RefCell::new((initially, allowed))))
    }

    pub fn get(&self) -> bool {
        let (drained, allowed) = *self.0.borrow();
        drained && allowed
    }

    fn set(&self, value: bool) {
        self.0.borrow_mut().0 = value;
    }
}

/// Limits a reader to exactly `limit` bytes, failing `ResponseBodyTooShort`
/// if the underlying stream runs dry first.
struct ContentLengthReader<R> {
    inner: R,
    total: u64,
    remaining: u64,
    received: u64,
    reusable: ReusabilityFlag,
}

impl<R: Read> Read for ContentLengthReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            self.reusable.set(true);
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.remaining) as usize;
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                Error::ResponseBodyTooShort {
                    expected: self.total,
                    received: self.received,
                },
            ));
        }
        self.remaining -= n as u64;
        self.received += n as u64;
        if self.remaining == 0 {
            self.reusable.set(true);
        }
        Ok(n)
    }
}

/// A chunked reader that flags reusability once the terminating chunk and
/// its trailers are consumed.
struct ChunkedReusableReader<R: Read> {
    inner: ChunkedDecoder<R>,
    reusable: ReusabilityFlag,
}

impl<R: Read> Read for ChunkedReusableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 {
            self.reusable.set(true);
        }
        Ok(n)
    }
}

/// EOF-framed reader: the connection is never reusable after this body
/// (§4.6 "Neither: deliver bytes until EOF; connection is not reusable").
struct EofReader<R> {
    inner: R,
}

impl<R: Read> Read for EofReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Builds the body reader for a decoded response head, and a flag the
/// driver/response wrapper can poll after the caller drains the body.
///
/// `gunzip` must already reflect `needs_gunzip(req, &head.headers)`. The
/// returned flag is capped by [`is_framed_and_keep_alive`] so a
/// `Connection: close` or HTTP/1.0 response is never reported reusable
/// regardless of how its body happens to be framed. `deadline` is re-applied
/// to the connection's read timeout before every chunk the body reader
/// pulls, so a slow-drip body can't outlast the request's timeout budget.
pub fn body_reader(
    head: &ResponseHead,
    conn: SharedConnection,
    gunzip: bool,
    deadline: Deadline,
) -> (Box<dyn Read>, ReusabilityFlag) {
    let keep_alive_allowed = is_framed_and_keep_alive(head, &head.headers);

    let transfer_encoding_chunked = head
        .headers
        .get("transfer-encoding")
        .map(|v| v.eq_ignore_ascii_case("chunked"))
        .unwrap_or(false);

    let content_length = head
        .headers
        .get("content-length")
        .and_then(|v| v.parse::<u64>().ok());

    let (raw, reusable): (Box<dyn Read>, ReusabilityFlag) = if transfer_encoding_chunked {
        let reusable = ReusabilityFlag::capped(false, keep_alive_allowed);
        let reader: Box<dyn Read> = Box::new(ChunkedReusableReader {
            inner: ChunkedDecoder::new(ConnReader(conn, deadline)),
            reusable: reusable.clone(),
        });
        (reader, reusable)
    } else if let Some(len) = content_length {
        let reusable = ReusabilityFlag::capped(len == 0, keep_alive_allowed);
        let reader: Box<dyn Read> = Box::new(ContentLengthReader {
            inner: ConnReader(conn, deadline),
            total: len,
            remaining: len,
            received: 0,
            reusable: reusable.clone(),
        });
        (reader, reusable)
    } else {
        // EOF framing is never reusable, regardless of the ceiling.
        let reusable = ReusabilityFlag::capped(false, false);
        let reader: Box<dyn Read> = Box::new(EofReader { inner: ConnReader(conn, deadline) });
        (reader, reusable)
    };

    finish(raw, reusable, gunzip)
}

fn finish(raw: Box<dyn Read>, reusable: ReusabilityFlag, gunzip: bool) -> (Box<dyn Read>, ReusabilityFlag) {
    if gunzip {
        #[cfg(feature = "gzip")]
        {
            return (Box::new(GzipTranslating(GzipDecoder::new(raw))), reusable);
        }
        #[cfg(not(feature = "gzip"))]
        {
            let _ = gunzip;
        }
    }
    (raw, reusable)
}

#[cfg(feature = "gzip")]
struct GzipTranslating<R>(GzipDecoder<R>);

#[cfg(feature = "gzip")]
impl<R: Read> Read for GzipTranslating<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf).map_err(|e| {
            let translated = translate_gzip_io_error(e);
            io::Error::new(io::ErrorKind::InvalidData, translated)
        })
    }
}

/// Whether a response may be pooled after the caller fully drains its body
/// (§4.5): HTTP ≥ 1.1, no `Connection: close`, and framed (not EOF-delimited).
pub fn is_framed_and_keep_alive(head: &ResponseHead, headers: &HeaderList) -> bool {
    if !head.is_http_1_1_or_later() {
        return false;
    }
    let close_requested = headers
        .get("connection")
        .map(|v| v.eq_ignore_ascii_case("close"))
        .unwrap_or(false);
    if close_requested {
        return false;
    }
    let chunked = headers
        .get("transfer-encoding")
        .map(|v| v.eq_ignore_ascii_case("chunked"))
        .unwrap_or(false);
    let has_length = headers.has("content-length");
    chunked || has_length
}
