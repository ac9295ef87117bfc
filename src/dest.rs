//! The pool key a request resolves to before a connection is acquired (§C2
//! `dest_key`): proxy, host, port, and scheme all participate, since a
//! connection is only interchangeable with another one that agrees on all
//! four.

use crate::proxy::Proxy;
use crate::request::Request;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestKey {
    proxy: Option<Proxy>,
    host: String,
    port: u16,
    secure: bool,
}

impl DestKey {
    pub fn new(proxy: Option<&Proxy>, host: &str, port: u16, secure: bool) -> Self {
        DestKey {
            proxy: proxy.cloned(),
            host: host.to_string(),
            port,
            secure,
        }
    }

    pub fn for_request(req: &Request) -> Self {
        DestKey::new(req.proxy.as_ref(), &req.host, req.port, req.secure)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    /// Whether the proxy (if any) is used in plaintext forward-proxy mode,
    /// i.e. not tunneled via CONNECT (§4.4).
    pub fn via_plaintext_proxy(&self) -> bool {
        self.proxy.is_some() && !self.secure
    }

    /// The host/port a raw TCP dial should target: the proxy's, if this
    /// destination is routed through one, otherwise the origin's.
    pub fn dial_target(&self) -> (&str, u16) {
        match &self.proxy {
            Some(proxy) => (proxy.host(), proxy.port()),
            None => (&self.host, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_ports_are_distinct_destinations() {
        let a = DestKey::new(None, "example.com", 80, false);
        let b = DestKey::new(None, "example.com", 8080, false);
        assert_ne!(a, b);
    }

    #[test]
    fn dial_target_prefers_the_proxy() {
        let proxy = Proxy::new("proxy.local", 3128);
        let dest = DestKey::new(Some(&proxy), "example.com", 80, false);
        assert_eq!(dest.dial_target(), ("proxy.local", 3128));
    }
}
