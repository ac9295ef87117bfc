//! The connection contract (§C1): a byte-oriented transport plus the small
//! amount of line/length buffering the wire codec needs.
//!
//! Grounded on the teacher's old `stream.rs` `Stream` enum (`Http` / `Https`
//! / `Cursor` / `Test`), generalized to a trait object so manager, TLS, and
//! test fakes can each live in their own module instead of one `enum` with a
//! branch per transport.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration as StdDuration;

use crate::Error;

/// A live byte stream to a single destination. `close()` is separate from
/// `Drop` so the manager can distinguish "caller is done with this, maybe
/// pool it" from "this is actually being torn down".
///
/// `set_read_timeout` lets [`BufferedConnection::apply_deadline`] re-arm the
/// socket's own blocking-read timeout before each header line or body chunk,
/// so a request's deadline budget (§4.2) is enforced during I/O, not just at
/// the moments the driver happens to check it between calls.
pub trait Connection: Read + Write + Send {
    fn close(&mut self) -> io::Result<()>;
    fn set_read_timeout(&mut self, timeout: Option<StdDuration>) -> io::Result<()>;
}

impl Connection for TcpStream {
    fn close(&mut self) -> io::Result<()> {
        self.shutdown(std::net::Shutdown::Both)
    }

    fn set_read_timeout(&mut self, timeout: Option<StdDuration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

#[cfg(feature = "rustls")]
impl Connection for rustls::StreamOwned<rustls::ClientConnection, TcpStream> {
    fn close(&mut self) -> io::Result<()> {
        self.sock.shutdown(std::net::Shutdown::Both)
    }

    fn set_read_timeout(&mut self, timeout: Option<StdDuration>) -> io::Result<()> {
        self.sock.set_read_timeout(timeout)
    }
}

#[cfg(feature = "native-tls")]
impl Connection for native_tls::TlsStream<TcpStream> {
    fn close(&mut self) -> io::Result<()> {
        // native_tls has no raw shutdown; dropping the stream closes the socket.
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<StdDuration>) -> io::Result<()> {
        self.get_ref().set_read_timeout(timeout)
    }
}

/// A boxed [`Connection`], with the small read-ahead buffer the wire codec
/// needs for line-at-a-time status/header parsing (§C1, §C5).
///
/// Grounded on the teacher's `read_next_line` (old `response.rs`), lifted
/// out of the response parser so it can be reused for both the status line
/// and each header line, and capped so a server can't force unbounded
/// buffering (`Error::OverlongHeaders`).
pub struct BufferedConnection {
    inner: Box<dyn Connection>,
    buf: Vec<u8>,
    pos: usize,
}

impl BufferedConnection {
    pub fn new(inner: Box<dyn Connection>) -> Self {
        BufferedConnection {
            inner,
            buf: Vec::new(),
            pos: 0,
        }
    }

    fn fill_more(&mut self) -> io::Result<usize> {
        if self.pos > 0 && self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        }
        let mut chunk = [0u8; 4096];
        let n = self.inner.read(&mut chunk)?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Reads one CRLF-terminated line (the CRLF stripped), enforcing
    /// `max_line_len` on the accumulated line length. Also tolerates a bare
    /// `LF` terminator, matching the teacher's leniency.
    pub fn read_line(&mut self, max_line_len: usize) -> Result<String, Error> {
        let mut line = Vec::new();
        loop {
            while self.pos < self.buf.len() {
                let byte = self.buf[self.pos];
                self.pos += 1;
                if byte == b'\n' {
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    return String::from_utf8(line)
                        .map_err(|_| Error::InvalidHeaderLine("non-utf8 line".to_string()));
                }
                line.push(byte);
                if line.len() > max_line_len {
                    return Err(Error::OverlongHeaders);
                }
            }
            let n = self.fill_more()?;
            if n == 0 {
                return Err(Error::IncompleteHeaders);
            }
        }
    }

    /// Reads exactly `n` bytes, first draining whatever is already buffered.
    pub fn read_exactly(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            if self.pos < self.buf.len() {
                let take = (self.buf.len() - self.pos).min(n - out.len());
                out.extend_from_slice(&self.buf[self.pos..self.pos + take]);
                self.pos += take;
                continue;
            }
            let want = n - out.len();
            let mut chunk = vec![0u8; want];
            let got = self.inner.read(&mut chunk)?;
            if got == 0 {
                return Err(Error::ResponseBodyTooShort {
                    expected: n as u64,
                    received: out.len() as u64,
                });
            }
            out.extend_from_slice(&chunk[..got]);
        }
        Ok(out)
    }

    /// Arms (or disarms) the underlying socket's read timeout from what
    /// remains of `deadline`, so the next blocking read can't outlast the
    /// request's timeout budget (§4.2). Raises `ResponseTimeout` immediately
    /// if the deadline has already elapsed, without ever touching the
    /// socket.
    pub fn apply_deadline(&mut self, deadline: &crate::time::Deadline) -> Result<(), Error> {
        let remaining = deadline.remaining()?;
        let timeout = match remaining {
            crate::time::Duration::NotHappening => None,
            crate::time::Duration::Exact(d) => Some(d),
        };
        self.inner
            .set_read_timeout(timeout)
            .map_err(|e| Error::ConnectionFailure(format!("setting read timeout failed: {e}")))
    }

    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }

    /// Hands back the underlying connection, discarding any leftover
    /// read-ahead buffer. Used by the response wrapper to return a drained,
    /// reusable connection to the manager (§C2 `release`).
    pub fn into_inner(self) -> Box<dyn Connection> {
        self.inner
    }
}

/// Reads the remainder of whatever's left buffered, then falls through to
/// the underlying connection. Used to hand the body-framing reader
/// (`framing.rs`) a single `Read` that starts exactly where header parsing
/// left off.
impl Read for BufferedConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.buf.len() {
            let take = (self.buf.len() - self.pos).min(buf.len());
            buf[..take].copy_from_slice(&self.buf[self.pos..self.pos + take]);
            self.pos += take;
            return Ok(take);
        }
        self.inner.read(buf)
    }
}

impl fmt::Debug for BufferedConnection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferedConnection")
            .field("buffered", &(self.buf.len() - self.pos))
            .finish()
    }
}

#[cfg(any(test, feature = "_test"))]
pub mod test_fake {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    /// A connection fake over a pre-canned response, recording whatever was
    /// written to it into a handle the test keeps hold of (the fake itself
    /// gets boxed and moved into a `BufferedConnection`). Grounded on the
    /// teacher's `Stream::Test` variant plus its `to_write_vec()` escape
    /// hatch for inspecting what a test sent.
    pub struct FakeConnection {
        read_from: Cursor<Vec<u8>>,
        written: Arc<Mutex<Vec<u8>>>,
        pub closed: bool,
    }

    impl FakeConnection {
        /// Returns the fake plus a handle to the bytes it will receive.
        pub fn new(scripted_response: Vec<u8>) -> (Self, Arc<Mutex<Vec<u8>>>) {
            let written = Arc::new(Mutex::new(Vec::new()));
            let fake = FakeConnection {
                read_from: Cursor::new(scripted_response),
                written: written.clone(),
                closed: false,
            };
            (fake, written)
        }
    }

    impl Read for FakeConnection {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.read_from.read(buf)
        }
    }

    impl Write for FakeConnection {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Connection for FakeConnection {
        fn close(&mut self) -> io::Result<()> {
            self.closed = true;
            Ok(())
        }

        fn set_read_timeout(&mut self, _timeout: Option<std::time::Duration>) -> io::Result<()> {
            // No real socket behind a fake; nothing to arm.
            Ok(())
        }
    }
}
