//! Chunked transfer-encoding decoder (§C6).
//!
//! Ported near-verbatim from the teacher's `chunked/decoder.rs` (itself a
//! fork of `rust-chunked-transfer`), generalized to drain and expose trailer
//! headers after the terminating zero-size chunk instead of silently
//! swallowing them.

use std::io::{Read, Result as IoResult};

use crate::Error;

/// Reads HTTP/1.1 chunked-encoded data off `source`, producing the
/// reassembled body bytes. After `read()` returns `Ok(0)`, `trailers()`
/// holds any trailer header lines the terminating chunk carried.
pub struct ChunkedDecoder<R> {
    source: R,
    remaining_chunk_size: Option<usize>,
    trailers: Vec<String>,
    done: bool,
}

impl<R> ChunkedDecoder<R>
where
    R: Read,
{
    pub fn new(source: R) -> Self {
        ChunkedDecoder {
            source,
            remaining_chunk_size: None,
            trailers: Vec::new(),
            done: false,
        }
    }

    pub fn trailers(&self) -> &[String] {
        &self.trailers
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    fn read_byte(&mut self) -> IoResult<u8> {
        let mut buf = [0u8; 1];
        self.source.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_line_feed(&mut self) -> IoResult<()> {
        let b = self.read_byte()?;
        if b != b'\n' {
            return Err(chunk_error());
        }
        Ok(())
    }

    fn read_carriage_return(&mut self) -> IoResult<()> {
        let b = self.read_byte()?;
        if b != b'\r' {
            return Err(chunk_error());
        }
        Ok(())
    }

    fn read_chunk_size(&mut self) -> IoResult<usize> {
        let mut size_bytes = Vec::new();
        loop {
            let byte = self.read_byte()?;
            if byte == b'\r' {
                break;
            }
            if byte == b';' {
                // chunk extensions: consume and ignore up to CR
                loop {
                    if self.read_byte()? == b'\r' {
                        break;
                    }
                }
                break;
            }
            size_bytes.push(byte);
        }
        self.read_line_feed()?;

        let as_str = String::from_utf8(size_bytes).map_err(|_| chunk_error())?;
        usize::from_str_radix(as_str.trim(), 16).map_err(|_| chunk_error())
    }

    /// Reads trailer header lines up to the blank line that ends them,
    /// accumulating each into `self.trailers`.
    fn read_trailers(&mut self) -> IoResult<()> {
        loop {
            let mut line = Vec::new();
            loop {
                let byte = self.read_byte()?;
                if byte == b'\n' {
                    break;
                }
                if byte != b'\r' {
                    line.push(byte);
                }
            }
            if line.is_empty() {
                break;
            }
            if let Ok(text) = String::from_utf8(line) {
                self.trailers.push(text);
            }
        }
        Ok(())
    }
}

fn chunk_error() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, Error::InvalidChunkHeader)
}

impl<R> Read for ChunkedDecoder<R>
where
    R: Read,
{
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        if self.done {
            return Ok(0);
        }

        let remaining = match self.remaining_chunk_size {
            Some(c) => c,
            None => {
                let size = self.read_chunk_size()?;
                if size == 0 {
                    self.read_trailers()?;
                    self.done = true;
                    return Ok(0);
                }
                size
            }
        };

        if buf.is_empty() {
            self.remaining_chunk_size = Some(remaining);
            return Ok(0);
        }

        let to_read = remaining.min(buf.len());
        let read = self.source.read(&mut buf[..to_read])?;
        if read == 0 {
            return Err(chunk_error());
        }
        let left = remaining - read;

        self.remaining_chunk_size = if left == 0 {
            self.read_carriage_return()?;
            self.read_line_feed()?;
            None
        } else {
            Some(left)
        };

        Ok(read)
    }
}
