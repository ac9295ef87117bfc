//! The error taxonomy for the whole crate (§7 of the spec).

use std::fmt;
use std::io;

use crate::cookies::CookieJar;
use crate::header::HeaderList;

/// Everything that can go wrong making a request through this crate.
#[derive(Debug)]
pub enum Error {
    /// `parse_url` / `set_uri` were given something that isn't a valid,
    /// supported URL.
    InvalidUrl(String, &'static str),
    /// DNS, TCP connect, or TLS handshake failed.
    ConnectionFailure(String),
    /// The manager has been closed; no further connections can be acquired.
    ManagerClosed,
    /// The stale-connection retry also failed.
    TooManyRetries,
    /// The response status line could not be parsed.
    InvalidStatusLine(String),
    /// A response header line could not be parsed.
    InvalidHeaderLine(String),
    /// The cumulative header bytes exceeded the configured cap.
    OverlongHeaders,
    /// The connection closed before the header block finished.
    IncompleteHeaders,
    /// A `Content-Length`-framed body ended before `expected` bytes were received.
    ResponseBodyTooShort { expected: u64, received: u64 },
    /// A chunk-size line didn't parse as hex, or the chunk framing was malformed.
    InvalidChunkHeader,
    /// The gzip stream was malformed.
    InvalidCompression,
    /// The request's deadline elapsed during a blocking operation.
    ResponseTimeout,
    /// `check_status` rejected the response.
    StatusCodeException {
        status: u16,
        headers: HeaderList,
        jar: CookieJar,
    },
    /// `redirect_count` reached zero.
    TooManyRedirects,
    /// A CONNECT proxy refused the tunnel.
    ProxyConnectException { host: String, port: u16, status: u16 },
    /// Any other transport failure not covered above.
    InternalIo(io::Error),
}

impl Error {
    /// Whether this error occurred before any byte of the response was
    /// observed, making a pooled connection eligible for the driver's
    /// one-shot retry (§4.2, §7).
    pub(crate) fn is_retriable_before_response(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailure(_) | Error::InternalIo(_) | Error::IncompleteHeaders
        )
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        // A socket read/write timing out (§4.2's per-call read timeout,
        // derived from the request's remaining deadline budget) surfaces as
        // `WouldBlock`/`TimedOut` from the OS; report it as the same
        // `ResponseTimeout` a pre-flight deadline check would have raised,
        // rather than an opaque `InternalIo`.
        // `BufferedConnection::apply_deadline` embeds the original `Error`
        // (e.g. a deadline that had already elapsed) inside the `io::Error`
        // it returns from a `Read` impl; unwrap that first so the specific
        // cause survives, the same `io::Error::downcast` trick
        // `translate_gzip_io_error` uses for framing errors riding through
        // `flate2`.
        let carries_error = err.get_ref().map(|b| b.is::<Error>()).unwrap_or(false);
        if carries_error {
            return match err.into_inner().and_then(|b| b.downcast::<Error>().ok()) {
                Some(inner) => *inner,
                None => Error::ResponseTimeout,
            };
        }
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::ResponseTimeout,
            _ => Error::InternalIo(err),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidUrl(url, reason) => write!(f, "invalid url {:?}: {}", url, reason),
            Error::ConnectionFailure(cause) => write!(f, "connection failed: {}", cause),
            Error::ManagerClosed => write!(f, "connection manager is closed"),
            Error::TooManyRetries => write!(f, "exhausted stale-connection retry"),
            Error::InvalidStatusLine(line) => write!(f, "invalid status line: {:?}", line),
            Error::InvalidHeaderLine(line) => write!(f, "invalid header line: {:?}", line),
            Error::OverlongHeaders => write!(f, "response headers exceeded the configured cap"),
            Error::IncompleteHeaders => write!(f, "connection closed before headers completed"),
            Error::ResponseBodyTooShort { expected, received } => write!(
                f,
                "response body too short: expected {} bytes, got {}",
                expected, received
            ),
            Error::InvalidChunkHeader => write!(f, "invalid chunked transfer-encoding framing"),
            Error::InvalidCompression => write!(f, "malformed gzip stream"),
            Error::ResponseTimeout => write!(f, "timed out waiting for the response"),
            Error::StatusCodeException { status, .. } => {
                write!(f, "server responded with status code {}", status)
            }
            Error::TooManyRedirects => write!(f, "too many redirects"),
            Error::ProxyConnectException { host, port, status } => write!(
                f,
                "proxy refused CONNECT to {}:{} (status {})",
                host, port, status
            ),
            Error::InternalIo(cause) => write!(f, "i/o error: {}", cause),
        }
    }
}

impl std::error::Error for Error {}
