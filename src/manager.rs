//! Connection pooling (§C2).
//!
//! Grounded on the teacher's old `pool.rs` (`ConnectionPool`/`PoolKey`): that
//! pool kept exactly one idle connection per host in a plain `HashMap` and
//! had no capacity limit or eviction because it never needed one. This
//! generalizes the same map-of-destinations shape to a bounded idle list per
//! `DestKey`, oldest-first eviction, a background reaper for `idle_timeout`,
//! and the dial-or-reuse decision `acquire` has to make that the teacher's
//! `try_get_connection` didn't (it only ever served from the pool; dialing
//! lived separately in `Unit::send_request`).

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::{Read as _, Write as _};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration as StdDuration, Instant as StdInstant};

use log::{debug, trace};

use crate::conn::Connection;
use crate::connect::{dial_tcp, DefaultResolver, Resolver};
use crate::dest::DestKey;
use crate::time::{Deadline, Duration};
use crate::tls::TlsConnector;
use crate::Error;

/// Tunables for a [`Manager`] (§C2, §6 `ManagerConfig`).
pub struct ManagerConfig {
    /// The single per-host limit named in §3/§4.2: caps both how many
    /// connections (idle + checked out) a destination may have before
    /// `acquire` blocks waiting for one to free up, and how many idle
    /// connections `release` will retain before evicting the oldest (§8
    /// scenario 5).
    pub max_conns_per_host: usize,
    /// How long an idle connection may sit in the pool before the reaper
    /// closes it.
    pub idle_timeout: StdDuration,
    /// How often the reaper sweeps for expired idle connections. Per §C2
    /// this must be ≤ `idle_timeout`.
    pub reap_interval: StdDuration,
    pub resolver: Arc<dyn Resolver>,
    pub tls_connector: Option<Arc<dyn TlsConnector>>,
    /// What a [`crate::time::Timeout::Inherit`] resolves to when a request
    /// doesn't set its own `response_timeout` (§3, §4.2).
    pub response_timeout_default: StdDuration,
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("max_conns_per_host", &self.max_conns_per_host)
            .field("idle_timeout", &self.idle_timeout)
            .field("reap_interval", &self.reap_interval)
            .finish()
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            max_conns_per_host: 100,
            idle_timeout: StdDuration::from_secs(90),
            reap_interval: StdDuration::from_secs(10),
            resolver: Arc::new(DefaultResolver),
            tls_connector: default_tls_connector(),
            response_timeout_default: StdDuration::from_secs(30),
        }
    }
}

/// The TLS connector a `ManagerConfig::default()` wires up for `https://`
/// destinations, mirroring the crate's own default feature set: `rustls`
/// with the bundled webpki roots if enabled, else `native-tls`, else none
/// (an https request then fails with `ConnectionFailure` rather than
/// silently falling back to plaintext).
fn default_tls_connector() -> Option<Arc<dyn TlsConnector>> {
    #[cfg(feature = "rustls")]
    {
        return Some(Arc::new(crate::tls::RustlsConnector::new()));
    }
    #[cfg(all(not(feature = "rustls"), feature = "native-tls"))]
    {
        return crate::tls::NativeTlsConnector::new()
            .ok()
            .map(|c| Arc::new(c) as Arc<dyn TlsConnector>);
    }
    #[cfg(not(any(feature = "rustls", feature = "native-tls")))]
    {
        None
    }
}

impl Manager {
    /// The micros `Timeout::Inherit` resolves against when a request leaves
    /// `response_timeout` at its default (§3).
    pub(crate) fn response_timeout_default_micros(&self) -> u64 {
        self.inner.config.response_timeout_default.as_micros() as u64
    }
}

struct IdleEntry {
    conn: Box<dyn Connection>,
    idle_since: StdInstant,
}

#[derive(Default)]
struct State {
    idle: HashMap<DestKey, VecDeque<IdleEntry>>,
    /// Connections currently checked out, keyed by the id `acquire` handed
    /// out. Used to make `release` idempotent (§C2 "MUST NOT double-insert").
    checked_out: HashMap<u64, DestKey>,
    active_counts: HashMap<DestKey, usize>,
    closed: bool,
}

impl State {
    fn total_for(&self, dest: &DestKey) -> usize {
        let idle = self.idle.get(dest).map(VecDeque::len).unwrap_or(0);
        let active = self.active_counts.get(dest).copied().unwrap_or(0);
        idle + active
    }
}

/// A connection handed out by [`Manager::acquire`]. Carries enough identity
/// for [`Manager::release`] to find its place back in the idle list.
pub struct ManagedConnection {
    id: u64,
    dest: DestKey,
    pub conn: Box<dyn Connection>,
    /// Whether this connection was popped from the idle pool rather than
    /// freshly dialed. The driver's one-shot stale-connection retry (§4.2,
    /// §7) only applies to reused connections — a freshly dialed connection
    /// that fails isn't a "half-open socket", so retrying it would just
    /// repeat the same failure.
    pub from_pool: bool,
}

impl ManagedConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dest(&self) -> &DestKey {
        &self.dest
    }

    /// Rebuilds a `ManagedConnection` for `release`, after the driver has
    /// finished with the wire-level connection it originally handed out
    /// (§C1 `BufferedConnection::into_inner`). The rebuilt value is never
    /// itself eligible for the stale-connection retry, since it is only
    /// ever passed to `release`.
    pub(crate) fn from_parts(id: u64, dest: DestKey, conn: Box<dyn Connection>) -> Self {
        ManagedConnection { id, dest, conn, from_pool: false }
    }
}

impl fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("id", &self.id)
            .field("dest", &self.dest)
            .field("from_pool", &self.from_pool)
            .finish()
    }
}

/// The connection pool (§C2). Cheap to clone; all instances share the same
/// underlying state and reaper thread.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    freed: Condvar,
    config: ManagerConfig,
    next_id: AtomicU64,
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Manager").field("config", &self.inner.config).finish()
    }
}

/// Initializes pool structures and arms the idle reaper (§C2 `new_manager`).
pub fn new_manager(config: ManagerConfig) -> Manager {
    let reap_interval = config.reap_interval;
    let inner = Arc::new(Inner {
        state: Mutex::new(State::default()),
        freed: Condvar::new(),
        config,
        next_id: AtomicU64::new(1),
    });

    let weak: Weak<Inner> = Arc::downgrade(&inner);
    thread::Builder::new()
        .name("conn-pool-reaper".into())
        .spawn(move || reaper_loop(weak, reap_interval))
        .expect("spawn idle reaper thread");

    Manager { inner }
}

fn reaper_loop(inner: Weak<Inner>, interval: StdDuration) {
    loop {
        thread::sleep(interval);
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut expired = Vec::new();
        {
            let mut state = inner.state.lock().unwrap();
            if state.closed {
                return;
            }
            let idle_timeout = inner.config.idle_timeout;
            let now = StdInstant::now();
            for entries in state.idle.values_mut() {
                while let Some(front) = entries.front() {
                    if now.duration_since(front.idle_since) < idle_timeout {
                        break;
                    }
                    expired.push(entries.pop_front().unwrap());
                }
            }
        }
        // Closed outside the lock, per §C2 "evicted connections are closed
        // outside any hot lock".
        if !expired.is_empty() {
            trace!("idle reaper closing {} expired connection(s)", expired.len());
        }
        for mut entry in expired {
            let _ = entry.conn.close();
        }
    }
}

impl Manager {
    /// As [`Self::acquire`], but prefers a caller-supplied, pre-resolved
    /// address over the configured [`Resolver`] when dialing fresh (§3
    /// `Request::host_address`). Has no effect on a connection served from
    /// the idle pool, since that connection is already established.
    pub fn acquire_with_address(
        &self,
        dest: &DestKey,
        deadline: &Deadline,
        host_address: Option<SocketAddr>,
    ) -> Result<ManagedConnection, Error> {
        self.acquire_inner(dest, deadline, host_address)
    }

    /// Computes the destination's pool key and returns either a pooled idle
    /// connection or a freshly dialed one, subject to capacity (§C2
    /// `acquire`).
    pub fn acquire(&self, dest: &DestKey, deadline: &Deadline) -> Result<ManagedConnection, Error> {
        self.acquire_inner(dest, deadline, None)
    }

    fn acquire_inner(
        &self,
        dest: &DestKey,
        deadline: &Deadline,
        host_address: Option<SocketAddr>,
    ) -> Result<ManagedConnection, Error> {
        loop {
            let mut state = self.inner.state.lock().unwrap();
            if state.closed {
                return Err(Error::ManagerClosed);
            }

            if let Some(entries) = state.idle.get_mut(dest) {
                if let Some(entry) = entries.pop_back() {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    state.checked_out.insert(id, dest.clone());
                    *state.active_counts.entry(dest.clone()).or_insert(0) += 1;
                    trace!("reusing pooled connection {} for {:?}", id, dest);
                    return Ok(ManagedConnection {
                        id,
                        dest: dest.clone(),
                        conn: entry.conn,
                        from_pool: true,
                    });
                }
            }

            if state.total_for(dest) < self.inner.config.max_conns_per_host {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                state.checked_out.insert(id, dest.clone());
                *state.active_counts.entry(dest.clone()).or_insert(0) += 1;
                drop(state);
                debug!("dialing a fresh connection {} for {:?}", id, dest);
                let conn = match self.dial(dest, deadline, host_address) {
                    Ok(conn) => conn,
                    Err(e) => {
                        debug!("dial for {:?} failed: {}", dest, e);
                        self.abandon(id, dest);
                        return Err(e);
                    }
                };
                return Ok(ManagedConnection { id, dest: dest.clone(), conn, from_pool: false });
            }

            // Per-host capacity is exhausted and nothing is idle: wait for a
            // `release` to free up a slot, bounded by the remaining deadline.
            let remaining = deadline.remaining()?;
            let wait_for = match remaining {
                Duration::NotHappening => StdDuration::from_secs(1),
                Duration::Exact(d) => d.min(StdDuration::from_secs(1)),
            };
            // Dropping the guard happens automatically when this goes out of
            // scope; the next loop iteration re-checks the deadline, which
            // raises `ResponseTimeout` itself once it has actually elapsed.
            let _ = self.inner.freed.wait_timeout(state, wait_for).unwrap();
        }
    }

    fn dial(
        &self,
        dest: &DestKey,
        deadline: &Deadline,
        host_address: Option<SocketAddr>,
    ) -> Result<Box<dyn Connection>, Error> {
        let (dial_host, dial_port) = dest.dial_target();
        let addr = match host_address {
            Some(addr) => addr,
            None => self.inner.config.resolver.resolve(dial_host, dial_port)?,
        };
        let mut stream = dial_tcp(addr, deadline)?;

        // A secure destination reached through a proxy needs a CONNECT
        // tunnel established on the raw TCP stream before any TLS handshake
        // can begin; the proxy itself never sees the origin's certificate.
        if dest.secure() && dest.proxy().is_some() {
            connect_tunnel(&mut stream, dest.host(), dest.port())?;
        }

        let wants_tls = dest.secure() && !dest.via_plaintext_proxy();
        if wants_tls {
            let tls = self.inner.config.tls_connector.as_ref().ok_or_else(|| {
                Error::ConnectionFailure("TLS requested but no TlsConnector configured".into())
            })?;
            tls.wrap(dest.host(), stream)
        } else {
            Ok(Box::new(stream))
        }
    }

    /// Drops a checked-out slot that never turned into a live connection
    /// (dial failed), so it doesn't leak into the per-host count forever.
    fn abandon(&self, id: u64, dest: &DestKey) {
        let mut state = self.inner.state.lock().unwrap();
        if state.checked_out.remove(&id).is_some() {
            if let Some(count) = state.active_counts.get_mut(dest) {
                *count = count.saturating_sub(1);
            }
        }
        drop(state);
        self.inner.freed.notify_one();
    }

    /// Returns a connection to the pool if `reusable`, the manager isn't
    /// closed, and the per-host idle list has room; otherwise closes it.
    /// Idempotent: a connection already released (or never acquired from
    /// this manager) is a no-op (§C2 `release`).
    pub fn release(&self, mut conn: ManagedConnection, reusable: bool) {
        let mut state = self.inner.state.lock().unwrap();
        if state.checked_out.remove(&conn.id).is_none() {
            // Already released once, or foreign to this manager.
            return;
        }
        if let Some(count) = state.active_counts.get_mut(&conn.dest) {
            *count = count.saturating_sub(1);
        }

        let should_pool = reusable && !state.closed;
        let mut evicted = None;
        if should_pool {
            let entries = state.idle.entry(conn.dest.clone()).or_default();
            if entries.len() >= self.inner.config.max_conns_per_host {
                evicted = entries.pop_front();
            }
            entries.push_back(IdleEntry {
                conn: conn.conn,
                idle_since: StdInstant::now(),
            });
        }
        drop(state);
        self.inner.freed.notify_one();

        if !should_pool {
            trace!("closing connection {} for {:?} (reusable={})", conn.id, conn.dest, reusable);
            let _ = conn.conn.close();
        } else {
            trace!("pooled connection {} for {:?}", conn.id, conn.dest);
        }
        if let Some(mut evicted) = evicted {
            debug!("evicting oldest idle connection to make room");
            let _ = evicted.conn.close();
        }
    }

    /// Marks the manager closed and closes every idle connection. After
    /// this, `acquire` fails with `ManagerClosed` (§C2 `close`).
    pub fn close(&self) {
        let mut idle_conns: Vec<IdleEntry> = Vec::new();
        {
            let mut state = self.inner.state.lock().unwrap();
            state.closed = true;
            for (_, mut entries) in state.idle.drain() {
                idle_conns.extend(entries.drain(..));
            }
        }
        debug!("manager closed, draining {} idle connections", idle_conns.len());
        self.inner.freed.notify_all();
        for mut entry in idle_conns {
            let _ = entry.conn.close();
        }
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self, dest: &DestKey) -> usize {
        let state = self.inner.state.lock().unwrap();
        state.idle.get(dest).map(VecDeque::len).unwrap_or(0)
    }

    /// Seeds the idle pool directly, bypassing `acquire`/`release`
    /// bookkeeping. Lets other modules' tests (`driver.rs`) exercise a
    /// connection coming from the pool without dialing anything for real.
    #[cfg(test)]
    pub(crate) fn seed_idle(&self, dest: &DestKey, conn: Box<dyn Connection>) {
        let mut state = self.inner.state.lock().unwrap();
        state
            .idle
            .entry(dest.clone())
            .or_default()
            .push_back(IdleEntry {
                conn,
                idle_since: StdInstant::now(),
            });
    }
}

/// Issues an HTTP CONNECT request over `stream` and reads the proxy's
/// response status line, leaving `stream` positioned right after the blank
/// line that terminates the proxy's own response headers so the subsequent
/// TLS handshake sees only origin-server bytes (§4.4 "a secure destination
/// routed through a proxy is first tunneled via CONNECT").
fn connect_tunnel(stream: &mut TcpStream, host: &str, port: u16) -> Result<(), Error> {
    let authority = format!("{host}:{port}");
    let request = format!(
        "CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n"
    );
    stream
        .write_all(request.as_bytes())
        .map_err(|e| Error::ProxyConnectException {
            host: host.to_string(),
            port,
            status: status_from_io_error(&e),
        })?;

    // Read byte-by-byte rather than through a `BufReader`: a `TcpStream`
    // handed to a TLS handshake right after must not have had any bytes
    // read ahead into a buffer that then gets dropped along with it.
    let status_line = read_line_unbuffered(stream)
        .map_err(|_| Error::ProxyConnectException { host: host.to_string(), port, status: 0 })?;
    let status = parse_connect_status(&status_line)
        .ok_or_else(|| Error::ProxyConnectException { host: host.to_string(), port, status: 0 })?;

    loop {
        let line = read_line_unbuffered(stream)
            .map_err(|_| Error::ProxyConnectException { host: host.to_string(), port, status })?;
        if line.is_empty() || line == "\r\n" || line == "\n" {
            break;
        }
    }

    if !(200..300).contains(&status) {
        return Err(Error::ProxyConnectException { host: host.to_string(), port, status });
    }
    Ok(())
}

fn read_line_unbuffered(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte)?;
        if n == 0 {
            break;
        }
        line.push(byte[0]);
        if byte[0] == b'\n' {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

fn parse_connect_status(line: &str) -> Option<u16> {
    line.split_whitespace().nth(1)?.parse().ok()
}

fn status_from_io_error(_e: &std::io::Error) -> u16 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::test_fake::FakeConnection;

    fn test_config() -> ManagerConfig {
        ManagerConfig {
            max_conns_per_host: 1,
            idle_timeout: StdDuration::from_secs(60),
            reap_interval: StdDuration::from_secs(3600),
            resolver: Arc::new(DefaultResolver),
            tls_connector: None,
            response_timeout_default: StdDuration::from_secs(30),
        }
    }

    /// Builds a fake `ManagedConnection` and marks it checked-out against
    /// `manager`'s own bookkeeping, the way a real `acquire` would — so that
    /// a direct `manager.release(...)` call below isn't mistaken by
    /// `release`'s idempotency guard for a foreign or already-released
    /// connection.
    fn fake_managed(manager: &Manager, id: u64, dest: &DestKey) -> ManagedConnection {
        let (fake, _) = FakeConnection::new(Vec::new());
        let mut state = manager.inner.state.lock().unwrap();
        state.checked_out.insert(id, dest.clone());
        *state.active_counts.entry(dest.clone()).or_insert(0) += 1;
        drop(state);
        ManagedConnection { id, dest: dest.clone(), conn: Box::new(fake), from_pool: false }
    }

    #[test]
    fn release_then_acquire_reuses_the_same_connection() {
        let manager = new_manager(test_config());
        let dest = DestKey::new(None, "example.com", 80, false);
        let conn = fake_managed(&manager, 1, &dest);
        manager.release(conn, true);
        assert_eq!(manager.idle_count(&dest), 1);
    }

    #[test]
    fn release_is_idempotent() {
        let manager = new_manager(test_config());
        let dest = DestKey::new(None, "example.com", 80, false);
        let conn = fake_managed(&manager, 7, &dest);
        manager.release(conn, true);
        assert_eq!(manager.idle_count(&dest), 1);

        let conn_again = fake_managed(&manager, 7, &dest);
        manager.release(conn_again, true);
        // The second release for the same id must not double-insert.
        assert_eq!(manager.idle_count(&dest), 1);
    }

    #[test]
    fn non_reusable_connection_is_closed_not_pooled() {
        let manager = new_manager(test_config());
        let dest = DestKey::new(None, "example.com", 80, false);
        let conn = fake_managed(&manager, 2, &dest);
        manager.release(conn, false);
        assert_eq!(manager.idle_count(&dest), 0);
    }

    #[test]
    fn close_drains_idle_connections_and_rejects_further_acquires() {
        let manager = new_manager(test_config());
        let dest = DestKey::new(None, "example.com", 80, false);
        let conn = fake_managed(&manager, 3, &dest);
        manager.release(conn, true);
        assert_eq!(manager.idle_count(&dest), 1);

        manager.close();
        assert_eq!(manager.idle_count(&dest), 0);

        let err = manager.acquire(&dest, &Deadline::none());
        assert!(matches!(err, Err(Error::ManagerClosed)));
    }

    #[test]
    fn full_idle_list_evicts_the_oldest_entry() {
        // test_config()'s max_conns_per_host is already 1, the same knob
        // that governs both acquire-blocking capacity and idle retention
        // (§8 scenario 5).
        let manager = new_manager(test_config());
        let dest = DestKey::new(None, "example.com", 80, false);
        let c1 = fake_managed(&manager, 4, &dest);
        let c2 = fake_managed(&manager, 5, &dest);
        manager.release(c1, true);
        manager.release(c2, true);
        // Capacity is 1: the first entry is evicted, only the newest remains.
        assert_eq!(manager.idle_count(&dest), 1);
    }

    #[test]
    fn idle_retention_honors_max_conns_per_host_from_the_spec_scenario() {
        // §8 scenario 5, literal config: max_conns_per_host = 2, release
        // three drained connections to the same key — the pool retains two,
        // the third is closed.
        let mut config = test_config();
        config.max_conns_per_host = 2;
        let manager = new_manager(config);
        let dest = DestKey::new(None, "example.com", 80, false);

        let c1 = fake_managed(&manager, 10, &dest);
        let c2 = fake_managed(&manager, 11, &dest);
        let c3 = fake_managed(&manager, 12, &dest);
        manager.release(c1, true);
        manager.release(c2, true);
        manager.release(c3, true);

        assert_eq!(manager.idle_count(&dest), 2);
    }

    #[test]
    fn dial_failure_does_not_leak_the_checked_out_slot() {
        struct FailingResolver;
        impl fmt::Debug for FailingResolver {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "FailingResolver")
            }
        }
        impl Resolver for FailingResolver {
            fn resolve(&self, _host: &str, _port: u16) -> Result<std::net::SocketAddr, Error> {
                Err(Error::ConnectionFailure("no dns".into()))
            }
        }

        let mut config = test_config();
        config.resolver = Arc::new(FailingResolver);
        let manager = new_manager(config);
        let dest = DestKey::new(None, "example.com", 80, false);

        assert!(manager.acquire(&dest, &Deadline::none()).is_err());
        // The failed dial must not have left a phantom checked-out slot
        // behind: a second acquire attempt should be allowed to dial again
        // rather than being rejected for being "at capacity".
        assert!(manager.acquire(&dest, &Deadline::none()).is_err());
        let state = manager.inner.state.lock().unwrap();
        assert_eq!(state.active_counts.get(&dest).copied().unwrap_or(0), 0);
    }
}
