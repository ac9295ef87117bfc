//! TLS wrapping, pluggable per §6.
//!
//! Grounded on the teacher's `tls/rustls.rs`, trimmed down from its
//! typestate `ClientConfig` builder (client certs, disabled verification,
//! SNI toggle) to the one thing this crate's config surface needs: wrap a
//! connected `TcpStream` in a `ClientConnection` using either the platform's
//! webpki roots or `rustls-native-certs`-style system roots.

use std::fmt::Debug;
use std::net::TcpStream;
use std::sync::Arc;

use log::trace;

use crate::conn::Connection;
use crate::Error;

/// Wraps an already-connected TCP stream in TLS for `host`.
pub trait TlsConnector: Debug + Send + Sync {
    fn wrap(&self, host: &str, stream: TcpStream) -> Result<Box<dyn Connection>, Error>;
}

#[cfg(feature = "rustls")]
pub struct RustlsConnector {
    config: Arc<rustls::ClientConfig>,
}

#[cfg(feature = "rustls")]
impl RustlsConnector {
    pub fn new() -> Self {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(rustls::ALL_VERSIONS)
            .expect("supported rustls protocol versions")
            .with_root_certificates(root_store)
            .with_no_client_auth();

        RustlsConnector {
            config: Arc::new(config),
        }
    }
}

#[cfg(feature = "rustls")]
impl Default for RustlsConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "rustls")]
impl Debug for RustlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RustlsConnector").finish()
    }
}

#[cfg(feature = "rustls")]
impl TlsConnector for RustlsConnector {
    fn wrap(&self, host: &str, stream: TcpStream) -> Result<Box<dyn Connection>, Error> {
        trace!("starting rustls handshake with {}", host);
        let name: rustls_pki_types::ServerName<'static> = host
            .to_string()
            .try_into()
            .map_err(|_| Error::ConnectionFailure(format!("invalid TLS server name: {}", host)))?;

        let conn = rustls::ClientConnection::new(self.config.clone(), name)
            .map_err(|e| Error::ConnectionFailure(format!("tls handshake setup failed: {}", e)))?;

        let stream_owned = rustls::StreamOwned { conn, sock: stream };
        Ok(Box::new(stream_owned))
    }
}

#[cfg(feature = "native-tls")]
pub struct NativeTlsConnector {
    inner: native_tls::TlsConnector,
}

#[cfg(feature = "native-tls")]
impl NativeTlsConnector {
    pub fn new() -> Result<Self, Error> {
        let inner = native_tls::TlsConnector::new()
            .map_err(|e| Error::ConnectionFailure(format!("native-tls init failed: {}", e)))?;
        Ok(NativeTlsConnector { inner })
    }
}

#[cfg(feature = "native-tls")]
impl Debug for NativeTlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("NativeTlsConnector").finish()
    }
}

#[cfg(feature = "native-tls")]
impl TlsConnector for NativeTlsConnector {
    fn wrap(&self, host: &str, stream: TcpStream) -> Result<Box<dyn Connection>, Error> {
        let stream = self
            .inner
            .connect(host, stream)
            .map_err(|e| Error::ConnectionFailure(format!("tls handshake failed: {}", e)))?;
        Ok(Box::new(stream))
    }
}
