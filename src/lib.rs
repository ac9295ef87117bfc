#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(missing_docs)]
//! A low-level, blocking HTTP/1.1 client engine: connection pooling, the
//! wire protocol, response body framing, a cookie jar, and a request driver
//! that follows redirects. No async runtime, no HTTP/2 — this is the layer
//! an `Agent`-style ergonomic API would be built on top of, exposed
//! directly.
//!
//! # Example
//!
//! ```no_run
//! let manager = httpcore::new_manager(httpcore::ManagerConfig::default());
//! let req = httpcore::parse_url("http://example.com/").unwrap();
//! let response = httpcore::http_lbs(req, &manager).unwrap();
//! println!("{} {}", response.status.0, response.status.1);
//! ```
//!
//! See the module docs for each component: [`manager`] for pooling,
//! [`wire`] for the request/response encoding, [`framing`] for body
//! delimiting, [`cookies`] for the jar, and [`driver`] for how they're
//! stitched into a single `http_lbs` call.

mod body;
mod chunked;
mod conn;
mod connect;
mod cookies;
mod dest;
mod driver;
mod error;
mod framing;
mod gzip;
mod header;
mod manager;
mod proxy;
mod request;
mod response;
mod time;
mod tls;
mod urlparse;
mod wire;

pub use body::RequestBody;
pub use conn::Connection;
pub use connect::{DefaultResolver, Resolver};
pub use cookies::CookieJar;
pub use dest::DestKey;
pub use driver::{http_lbs, with_response};
pub use error::Error;
pub use header::{Header, HeaderList};
pub use manager::{new_manager, Manager, ManagerConfig};
pub use proxy::Proxy;
pub use request::{
    add_proxy, apply_basic_auth, needs_gunzip, url_encoded_body, CheckStatus,
    DecompressPredicate, Request,
};
pub use response::Response;
pub use time::{Deadline, Duration, Timeout};
pub use tls::TlsConnector;
#[cfg(feature = "native-tls")]
pub use tls::NativeTlsConnector;
#[cfg(feature = "rustls")]
pub use tls::RustlsConnector;
pub use urlparse::{get_uri, parse_url, set_uri, set_uri_relative};

use std::sync::OnceLock;

/// The process-wide default [`Manager`] the free functions below (`get`,
/// `post`, ...) share, built lazily on first use with
/// [`ManagerConfig::default`] — mirrors the teacher's own
/// `Agent::new_with_defaults` + `mk_method!` convenience layer, just backed
/// by a `Manager` instead of an `Agent`.
fn default_manager() -> &'static Manager {
    static MANAGER: OnceLock<Manager> = OnceLock::new();
    MANAGER.get_or_init(|| new_manager(ManagerConfig::default()))
}

macro_rules! mk_method {
    ($(($method:ident, $verb:expr)),* $(,)?) => {
        $(
            #[doc = concat!("Parses `url`, sets the method to `", $verb, "`, and runs it to completion against the default manager.")]
            pub fn $method(url: &str) -> Result<Response, Error> {
                let mut req = parse_url(url)?;
                req.method = $verb.to_string();
                http_lbs(req, default_manager())
            }
        )*
    };
}

mk_method! {
    (get, "GET"),
    (post, "POST"),
    (put, "PUT"),
    (delete, "DELETE"),
    (head, "HEAD"),
    (patch, "PATCH"),
    (options, "OPTIONS"),
}
