//! The four `RequestBody` variants (§3) a caller can attach to a `Request`.
//!
//! Grounded on ureq's `SizedReader`/`Payload` split (the old `body.rs` +
//! `unit.rs::send_body` pairing retrieved alongside this crate's teacher):
//! a request body is either known-length (framed by `Content-Length`) or
//! not (framed by chunked transfer-encoding), and either the bytes are
//! already in memory or they come from a `Read` the driver pulls from while
//! writing the wire format.

use std::fmt;
use std::io::{self, Read, Write};

/// A request body. Consumed at most once: sending a request moves the body
/// out of the `Request`, so the type system enforces the single-use rule.
pub enum RequestBody {
    /// No body at all (the common case for GET/HEAD).
    Empty,
    /// (a) Eager bytes of known length, already in memory.
    Bytes(Vec<u8>),
    /// (b) A builder callback with a caller-declared length. Invoked once,
    /// writing directly onto the wire.
    Builder {
        len: u64,
        write: Box<dyn FnOnce(&mut dyn Write) -> io::Result<()> + Send>,
    },
    /// (c) A streaming producer with a known length; framed by
    /// `Content-Length`.
    Streaming { len: u64, reader: Box<dyn Read + Send> },
    /// (d) A streaming producer of unknown length; framed by chunked
    /// transfer-encoding.
    Chunked(Box<dyn Read + Send>),
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RequestBody::Empty => write!(f, "RequestBody::Empty"),
            RequestBody::Bytes(b) => write!(f, "RequestBody::Bytes({} bytes)", b.len()),
            RequestBody::Builder { len, .. } => {
                write!(f, "RequestBody::Builder(len={})", len)
            }
            RequestBody::Streaming { len, .. } => {
                write!(f, "RequestBody::Streaming(len={})", len)
            }
            RequestBody::Chunked(_) => write!(f, "RequestBody::Chunked"),
        }
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        RequestBody::Empty
    }
}

impl RequestBody {
    /// The length to advertise via `Content-Length`, if this body has a
    /// known length (i.e. is not chunked).
    pub fn known_length(&self) -> Option<u64> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Bytes(b) => Some(b.len() as u64),
            RequestBody::Builder { len, .. } => Some(*len),
            RequestBody::Streaming { len, .. } => Some(*len),
            RequestBody::Chunked(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Bytes(bytes)
    }
}

impl From<&[u8]> for RequestBody {
    fn from(bytes: &[u8]) -> Self {
        RequestBody::Bytes(bytes.to_vec())
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Bytes(s.into_bytes())
    }
}
