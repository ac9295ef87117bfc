//! Streaming gzip inflation for response bodies (§4.6, §6 collaborator
//! interface).
//!
//! Grounded on the teacher's `body/gzip.rs` (`GzipDecoder` over
//! `flate2::read::MultiGzDecoder`), feature-gated the same way.

#![cfg(feature = "gzip")]

use std::io::{self, Read};

use crate::Error;

/// Wraps a raw body reader in a gzip inflater. Malformed input surfaces as
/// `InvalidCompression` (translated from the underlying `io::Error`) rather
/// than masking a `ResponseBodyTooShort` that occurred upstream, since that
/// error is preserved verbatim through `io::Error::downcast`.
pub struct GzipDecoder<R> {
    inner: flate2::read::MultiGzDecoder<R>,
}

impl<R: Read> GzipDecoder<R> {
    pub fn new(inner: R) -> Self {
        GzipDecoder {
            inner: flate2::read::MultiGzDecoder::new(inner),
        }
    }
}

impl<R: Read> Read for GzipDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Translates an `io::Error` surfaced while reading a gzip stream into the
/// crate's error taxonomy. A framing error (e.g. `ResponseBodyTooShort`)
/// raised by the underlying body reader rides through `flate2` inside the
/// `io::Error`'s source and is unwrapped here instead of being reported as
/// corrupt gzip.
pub fn translate_gzip_io_error(err: io::Error) -> Error {
    match err.into_inner().and_then(|b| b.downcast::<Error>().ok()) {
        Some(inner) => *inner,
        None => Error::InvalidCompression,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn gzip_bytes(data: &[u8]) -> Vec<u8> {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn inflates_a_gzip_stream() {
        let compressed = gzip_bytes(b"abc");
        let mut decoder = GzipDecoder::new(Cursor::new(compressed));
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
    }

    #[test]
    fn malformed_gzip_errors_on_read() {
        let mut decoder = GzipDecoder::new(Cursor::new(b"not gzip".to_vec()));
        let mut out = Vec::new();
        assert!(decoder.read_to_end(&mut out).is_err());
    }
}
