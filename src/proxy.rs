//! Proxy destination (§3 `Request.proxy`, §4.4 wire-format proxy handling).

use std::fmt;

/// An HTTP CONNECT / plaintext-forward proxy destination.
///
/// For a `secure: false` request routed through a proxy, the wire encoder
/// emits the absolute-form request-target (`http://host[:port]path?query`)
/// per §4.4. For a `secure: true` request, the driver is expected to first
/// establish a CONNECT tunnel through the proxy (`ProxyConnectException` on
/// refusal) and then proceed as if talking directly to the origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Proxy {
    host: String,
    port: u16,
}

impl Proxy {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Proxy {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
