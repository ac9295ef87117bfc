//! The cookie jar (§C7, §3 `Request.cookie_jar`).
//!
//! Grounded on the teacher's `CookieTin` (old `cookies.rs`), generalized from
//! a thin `RwLock<CookieStore>` wrapper into the full jar the spec demands:
//! send-time filtering in path-length-desc / creation-time-asc order, and
//! `Set-Cookie` ingestion that prunes expired cookies as it goes.

use std::fmt;
use std::sync::{Arc, RwLock};

use cookie_store::CookieStore;
use url::Url;

/// A thread-shared cookie jar, cloned cheaply (an `Arc` around the actual
/// store) so that a `StatusCodeException` can carry a snapshot of it without
/// requiring the jar to implement `Clone` on the expensive inner store.
#[derive(Clone)]
pub struct CookieJar {
    inner: Arc<RwLock<CookieStore>>,
}

impl Default for CookieJar {
    fn default() -> Self {
        CookieJar {
            inner: Arc::new(RwLock::new(CookieStore::default())),
        }
    }
}

impl fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let store = self.inner.read().unwrap();
        f.debug_struct("CookieJar")
            .field("len", &store.iter_any().count())
            .finish()
    }
}

impl CookieJar {
    pub fn new() -> Self {
        CookieJar::default()
    }

    /// The `Cookie:` header value to send for `url`, or `None` if the jar
    /// has nothing matching. `cookie_store::CookieStore::get_request_cookies`
    /// already orders longer-path-first, then by ascending creation time,
    /// per RFC 6265 §5.4, and prunes anything expired as it goes — same as
    /// the teacher's own `CookieTin::get_request_cookies`.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let store = self.inner.read().unwrap();
        let mut matches = store.get_request_cookies(url).peekable();
        matches.peek()?;
        let rendered = matches
            .map(|c| format!("{}={}", c.name(), c.value()))
            .collect::<Vec<_>>()
            .join("; ");
        Some(rendered)
    }

    /// Ingests every `Set-Cookie` header value present in `set_cookie_lines`,
    /// rejecting any that fail the public-suffix / domain-match check
    /// (handled internally by `cookie_store`) and pruning expired cookies.
    /// Mirrors the teacher's own `CookieTin::store_response_cookies`.
    pub fn store_response_cookies<'a, I>(&self, set_cookie_lines: I, url: &Url)
    where
        I: Iterator<Item = &'a str>,
    {
        let mut store = self.inner.write().unwrap();
        let parsed = set_cookie_lines
            .filter_map(|line| cookie::Cookie::parse(line.to_string()).ok());
        store.store_response_cookies(parsed, url);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().iter_any().count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn stores_and_returns_a_cookie() {
        let jar = CookieJar::new();
        let u = url("http://example.com/a/b");
        jar.store_response_cookies(["session=abc; Path=/"].into_iter(), &u);
        assert_eq!(jar.header_for(&u), Some("session=abc".to_string()));
    }

    #[test]
    fn empty_jar_has_no_header() {
        let jar = CookieJar::new();
        assert_eq!(jar.header_for(&url("http://example.com/")), None);
    }

    #[test]
    fn longer_path_cookie_sorts_first() {
        let jar = CookieJar::new();
        let u = url("http://example.com/a/b");
        jar.store_response_cookies(["short=1; Path=/".to_string().as_str()].into_iter(), &u);
        jar.store_response_cookies(["long=2; Path=/a/b".to_string().as_str()].into_iter(), &u);
        let header = jar.header_for(&u).unwrap();
        assert!(header.starts_with("long=2"));
    }
}
