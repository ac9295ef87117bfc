//! Request-side wire encoding (§4.4).
//!
//! Grounded on `other_examples`' old `unit.rs::send_prelude` (request-line +
//! header emission) and the teacher's `connect.rs`/old `conn.rs` prelude
//! building, generalized to the four `RequestBody` variants and the
//! proxy/absolute-form request-target rule.

use std::io::{self, Read, Write};

use crate::body::RequestBody;
use crate::conn::BufferedConnection;
use crate::request::Request;
use crate::Error;

const CHUNK_COPY_BUF: usize = 64 * 1024;

/// Writes the request line, headers, and body onto `conn`, in the order
/// fixed by §4.4.
pub fn encode_request(req: &mut Request, conn: &mut BufferedConnection) -> Result<(), Error> {
    let target = request_target(req);
    let mut head = format!("{} {} HTTP/1.1\r\n", req.method, target);

    if !req.headers.has("host") {
        head.push_str(&format!("Host: {}\r\n", host_header_value(req)));
    }

    let body_is_chunked = matches!(req.body, RequestBody::Chunked(_));
    let known_len = req.body.known_length();

    for header in req.headers.iter() {
        // An empty caller-supplied `Accept-Encoding` suppresses the header
        // entirely rather than being sent as a blank value (§9 open question).
        if header.is_name("accept-encoding") && header.value().is_empty() {
            continue;
        }
        head.push_str(&format!("{}: {}\r\n", header.name(), header.value()));
    }

    if body_is_chunked {
        if !req.headers.has("transfer-encoding") {
            head.push_str("Transfer-Encoding: chunked\r\n");
        }
    } else if let Some(n) = known_len {
        let suppress = n == 0 && matches!(req.method.as_str(), "GET" | "HEAD");
        if !suppress && !req.headers.has("content-length") {
            head.push_str(&format!("Content-Length: {}\r\n", n));
        }
    }

    if !req.headers.has("accept-encoding") {
        head.push_str("Accept-Encoding: gzip\r\n");
    }

    head.push_str("\r\n");
    conn.write_all(head.as_bytes())?;

    write_body(req, conn)?;
    conn.flush()?;
    Ok(())
}

fn host_header_value(req: &Request) -> String {
    let is_default_port = (req.secure && req.port == 443) || (!req.secure && req.port == 80);
    if is_default_port {
        req.host.clone()
    } else {
        format!("{}:{}", req.host, req.port)
    }
}

fn request_target(req: &Request) -> String {
    let origin_form = {
        let path = if req.path.starts_with('/') {
            req.path.clone()
        } else {
            format!("/{}", req.path)
        };
        if req.query_string.is_empty() {
            path
        } else {
            format!("{}?{}", path, req.query_string)
        }
    };

    let via_plaintext_proxy = req.proxy.is_some() && !req.secure;
    if via_plaintext_proxy {
        format!(
            "http://{}{}",
            host_header_value(req),
            origin_form
        )
    } else {
        origin_form
    }
}

fn write_body(req: &mut Request, conn: &mut BufferedConnection) -> Result<(), Error> {
    match std::mem::replace(&mut req.body, RequestBody::Empty) {
        RequestBody::Empty => {}
        RequestBody::Bytes(bytes) => conn.write_all(&bytes)?,
        RequestBody::Builder { write, .. } => {
            let mut sink = ConnSink(conn);
            write(&mut sink).map_err(Error::InternalIo)?;
        }
        RequestBody::Streaming { mut reader, .. } => {
            copy_raw(&mut reader, conn)?;
        }
        RequestBody::Chunked(mut reader) => {
            copy_chunked(&mut reader, conn)?;
        }
    }
    Ok(())
}

struct ConnSink<'a>(&'a mut BufferedConnection);

impl<'a> Write for ConnSink<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write_all(buf)?;
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

fn copy_raw(reader: &mut dyn Read, conn: &mut BufferedConnection) -> Result<(), Error> {
    let mut buf = [0u8; CHUNK_COPY_BUF];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        conn.write_all(&buf[..n])?;
    }
    Ok(())
}

fn copy_chunked(reader: &mut dyn Read, conn: &mut BufferedConnection) -> Result<(), Error> {
    let mut buf = [0u8; CHUNK_COPY_BUF];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        conn.write_all(format!("{:x}\r\n", n).as_bytes())?;
        conn.write_all(&buf[..n])?;
        conn.write_all(b"\r\n")?;
    }
    conn.write_all(b"0\r\n\r\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::test_fake::FakeConnection;
    use crate::header::Header;

    fn encode_to_string(req: &mut Request) -> String {
        let (fake, written) = FakeConnection::new(Vec::new());
        let mut conn = BufferedConnection::new(Box::new(fake));
        encode_request(req, &mut conn).unwrap();
        String::from_utf8(written.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn get_omits_content_length_header() {
        let mut req = Request::new();
        req.host = "example.com".to_string();
        let wire = encode_to_string(&mut req);
        assert!(wire.starts_with("GET / HTTP/1.1\r\n"));
        assert!(wire.contains("Host: example.com\r\n"));
        assert!(!wire.contains("Content-Length"));
        assert!(wire.contains("Accept-Encoding: gzip\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn post_with_bytes_body_emits_content_length() {
        let mut req = Request::new();
        req.host = "example.com".to_string();
        req.method = "POST".to_string();
        req.body = RequestBody::Bytes(b"hi".to_vec());
        req.headers.set(Header::new("X-Test", "1"), false);
        let wire = encode_to_string(&mut req);
        assert!(wire.contains("Content-Length: 2\r\n"));
        assert!(wire.contains("X-Test: 1\r\n"));
        assert!(wire.ends_with("hi"));
    }

    #[test]
    fn chunked_body_terminates_with_zero_chunk() {
        let mut req = Request::new();
        req.host = "example.com".to_string();
        req.method = "POST".to_string();
        req.body = RequestBody::Chunked(Box::new(std::io::Cursor::new(b"abc".to_vec())));
        let wire = encode_to_string(&mut req);
        assert!(wire.contains("Transfer-Encoding: chunked\r\n"));
        assert!(wire.ends_with("3\r\nabc\r\n0\r\n\r\n"));
    }

    #[test]
    fn empty_accept_encoding_suppresses_header() {
        let mut req = Request::new();
        req.host = "example.com".to_string();
        req.headers.set(Header::new("Accept-Encoding", ""), false);
        let wire = encode_to_string(&mut req);
        assert!(!wire.contains("Accept-Encoding: gzip"));
    }

    #[test]
    fn plaintext_proxy_uses_absolute_form_target() {
        let mut req = Request::new();
        req.host = "example.com".to_string();
        req.path = "/a".to_string();
        req.proxy = Some(crate::proxy::Proxy::new("proxy.local", 8080));
        let wire = encode_to_string(&mut req);
        assert!(wire.starts_with("GET http://example.com/a HTTP/1.1\r\n"));
    }
}
