//! Plain TCP dialing and the pluggable DNS resolver (§6 collaborators).
//!
//! Grounded on the teacher's old `connect_host` (retrieved in both the old
//! `stream.rs` and `conn.rs`) and the modern `Resolver` trait (`resolver.rs`),
//! simplified to the synchronous, no-timeout-thread shape the old code used
//! since this crate threads its own `Deadline` budget instead.

use std::fmt::Debug;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::time;
use crate::Error;

/// Resolves a hostname to a socket address. Pluggable so callers can bypass
/// DNS entirely (fixed address maps, test doubles).
pub trait Resolver: Debug + Send + Sync {
    fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr, Error>;
}

/// The default resolver: `std::net::ToSocketAddrs`, first address wins.
#[derive(Debug, Default)]
pub struct DefaultResolver;

impl Resolver for DefaultResolver {
    fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr, Error> {
        (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::ConnectionFailure(format!("dns lookup for {} failed: {}", host, e)))?
            .next()
            .ok_or_else(|| Error::ConnectionFailure(format!("no address found for {}", host)))
    }
}

/// Dials a plain TCP connection to `addr`, honoring whatever remains of
/// `deadline` as the connect timeout.
pub fn dial_tcp(addr: SocketAddr, deadline: &time::Deadline) -> Result<TcpStream, Error> {
    let remaining = deadline.remaining()?;
    let stream = match remaining {
        time::Duration::NotHappening => TcpStream::connect(addr)?,
        time::Duration::Exact(d) => {
            let d = if d.is_zero() { Duration::from_millis(1) } else { d };
            TcpStream::connect_timeout(&addr, d)?
        }
    };
    stream.set_nodelay(true).ok();
    Ok(stream)
}
