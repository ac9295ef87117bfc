//! `Request`: the record a caller builds and hands to the driver (§3, §4.3).

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::body::RequestBody;
use crate::cookies::CookieJar;
use crate::header::{Header, HeaderList};
use crate::proxy::Proxy;
use crate::time::Timeout;
use crate::Error;

/// `application/x-www-form-urlencoded` escapes everything outside of the
/// unreserved set; this is the query-string-safe subset used for form
/// encoding (grounded on ureq's query-string handling in the old
/// `request.rs`/`combine_query`, generalized to use `percent_encoding`
/// instead of a bespoke escaper).
const FORM_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'&')
    .add(b'=')
    .add(b'+');

/// A function deciding whether a given `Content-Type` should be
/// gzip-decompressed (§4.3 `needs_gunzip`).
pub type DecompressPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Validates a response and optionally rejects it with an error, given its
/// status, headers, and the cookie jar as it stands after this response
/// (§3 `check_status`).
pub type CheckStatus =
    Arc<dyn Fn(u16, &HeaderList, &CookieJar) -> Option<Error> + Send + Sync>;

fn default_decompress_predicate() -> DecompressPredicate {
    Arc::new(|_content_type| true)
}

/// A single HTTP/1.1 request, not yet sent.
///
/// Owned by the caller until handed to `http_lbs` / `with_response`; during a
/// redirect loop the driver produces successive internal copies (§3
/// Lifecycle / ownership).
pub struct Request {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub method: String,
    pub path: String,
    pub query_string: String,
    pub headers: HeaderList,
    pub body: RequestBody,
    pub proxy: Option<Proxy>,
    pub host_address: Option<SocketAddr>,
    pub raw_body: bool,
    pub decompress_predicate: DecompressPredicate,
    pub redirect_count: u32,
    pub check_status: Option<CheckStatus>,
    pub response_timeout: Timeout,
    pub cookie_jar: Option<CookieJar>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("path", &self.path)
            .field("query_string", &self.query_string)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("redirect_count", &self.redirect_count)
            .finish()
    }
}

impl Default for Request {
    fn default() -> Self {
        Request {
            host: String::new(),
            port: 80,
            secure: false,
            method: "GET".to_string(),
            path: "/".to_string(),
            query_string: String::new(),
            headers: HeaderList::new(),
            body: RequestBody::Empty,
            proxy: None,
            host_address: None,
            raw_body: false,
            decompress_predicate: default_decompress_predicate(),
            redirect_count: 10,
            check_status: None,
            response_timeout: Timeout::Inherit,
            cookie_jar: None,
        }
    }
}

impl Request {
    pub fn new() -> Self {
        Request::default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.has(name)
    }

    /// Set a header, replacing any previous header of the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.set(Header::new(name, value), false);
        self
    }

    /// Add a header without removing same-named ones already present (used
    /// for `Cookie`, `Authorization`, and other headers the spec documents
    /// as legitimately repeatable).
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.set(Header::new(name, value), true);
        self
    }

    /// Appends a key/value pair to the query string, percent-encoding as
    /// needed (mirrors `application/x-www-form-urlencoded` escaping).
    pub fn query(&mut self, name: &str, value: &str) -> &mut Self {
        let encoded_name = utf8_percent_encode(name, FORM_ENCODE_SET);
        let encoded_value = utf8_percent_encode(value, FORM_ENCODE_SET);
        if !self.query_string.is_empty() {
            self.query_string.push('&');
        }
        self.query_string
            .push_str(&format!("{}={}", encoded_name, encoded_value));
        self
    }
}

/// `apply_basic_auth(user, pass, req)`: prepends an `Authorization: Basic
/// <b64(user:pass)>` header. Applying this twice yields two `Authorization`
/// headers — documented behavior, not deduplicated (§8 idempotence law).
pub fn apply_basic_auth(user: &str, pass: &str, req: &mut Request) -> &mut Request {
    let creds = format!("{}:{}", user, pass);
    let encoded = BASE64.encode(creds.as_bytes());
    req.add_header("Authorization", format!("Basic {}", encoded));
    req
}

/// `add_proxy(host, port, req)`: sets the proxy destination.
pub fn add_proxy(host: impl Into<String>, port: u16, req: &mut Request) -> &mut Request {
    req.proxy = Some(Proxy::new(host, port));
    req
}

/// `url_encoded_body(pairs, req)`: sets the body to the percent-encoded
/// `application/x-www-form-urlencoded` payload, forces `method = POST`, and
/// replaces any existing `Content-Type` exactly once (even if called
/// repeatedly — §8 idempotence law).
pub fn url_encoded_body(pairs: &[(&str, &str)], req: &mut Request) -> &mut Request {
    let mut body = String::new();
    for (i, (k, v)) in pairs.iter().enumerate() {
        if i > 0 {
            body.push('&');
        }
        body.push_str(&utf8_percent_encode(k, FORM_ENCODE_SET).to_string());
        body.push('=');
        body.push_str(&utf8_percent_encode(v, FORM_ENCODE_SET).to_string());
    }
    req.method = "POST".to_string();
    req.set_header("Content-Type", "application/x-www-form-urlencoded");
    req.body = RequestBody::Bytes(body.into_bytes());
    req
}

/// `needs_gunzip(req, response_headers)`: true iff `raw_body` is false,
/// `Content-Encoding: gzip` is present, and `decompress_predicate` accepts
/// the response's content-type.
pub fn needs_gunzip(req: &Request, response_headers: &HeaderList) -> bool {
    if req.raw_body {
        return false;
    }
    let is_gzip = response_headers
        .get("content-encoding")
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);
    if !is_gzip {
        return false;
    }
    let content_type = response_headers
        .get("content-type")
        .map(|v| v.split(';').next().unwrap_or(v).trim())
        .unwrap_or("");
    (req.decompress_predicate)(content_type)
}
