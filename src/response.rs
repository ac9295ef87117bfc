//! `Response`: what the driver (§C8) hands back to the caller (§3).
//!
//! Grounded on the teacher's old `Response` (ascii status line + `Stream`),
//! generalized so the body is a lazy single-pass `Read` and the connection's
//! fate (pool it or close it) is expressed as Rust's own scoped-release
//! idiom — `Drop` — rather than the source's explicit closure field. This is
//! the same "host ecosystem idiom over magic field" trade the spec's design
//! notes make for `Timeout` and for throwing-vs-`Result` URL parsing.

use std::fmt;
use std::io::Read;
use std::rc::Rc;

use crate::conn::BufferedConnection;
use crate::cookies::CookieJar;
use crate::dest::DestKey;
use crate::framing::{ReusabilityFlag, SharedConnection};
use crate::header::HeaderList;
use crate::manager::{ManagedConnection, Manager};

/// A decoded HTTP/1.1 response (§3 `Response`).
///
/// `body` is a lazy, single-pass byte stream. Dropping the `Response` (or
/// letting it go out of scope, e.g. at the end of a [`with_response`]
/// consumer closure) is the "scoped release" the spec describes: it returns
/// the underlying connection to the manager if the body was fully drained
/// under a reusable framing, or closes it otherwise.
///
/// [`with_response`]: crate::driver::with_response
pub struct Response {
    pub status: (u16, String),
    pub http_minor_version: u8,
    pub headers: HeaderList,
    pub body: Box<dyn Read>,
    pub cookie_jar: CookieJar,
    // Declared after `body`: struct fields drop in declaration order, so the
    // body reader's `Rc` clone of the shared connection is released before
    // `release` tries to reclaim sole ownership of it.
    release: Option<ReleaseGuard>,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish()
    }
}

impl Response {
    pub(crate) fn new(
        status: (u16, String),
        http_minor_version: u8,
        headers: HeaderList,
        body: Box<dyn Read>,
        cookie_jar: CookieJar,
        manager: Manager,
        id: u64,
        dest: DestKey,
        conn: SharedConnection,
        reusable: ReusabilityFlag,
    ) -> Self {
        Response {
            status,
            http_minor_version,
            headers,
            body,
            cookie_jar,
            release: Some(ReleaseGuard {
                manager,
                id,
                dest,
                conn: Some(conn),
                reusable,
            }),
        }
    }

    /// A response with no connection to release — used for responses
    /// synthesized entirely in memory (e.g. wrapping an `http_lbs` result a
    /// second time in tests).
    #[cfg(test)]
    pub(crate) fn detached(
        status: (u16, String),
        headers: HeaderList,
        body: Vec<u8>,
        cookie_jar: CookieJar,
    ) -> Self {
        Response {
            status,
            http_minor_version: 1,
            headers,
            body: Box::new(std::io::Cursor::new(body)),
            cookie_jar,
            release: None,
        }
    }

    pub fn is_http_1_1_or_later(&self) -> bool {
        self.http_minor_version >= 1
    }
}

struct ReleaseGuard {
    manager: Manager,
    id: u64,
    dest: DestKey,
    conn: Option<SharedConnection>,
    reusable: ReusabilityFlag,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some(shared) = self.conn.take() else {
            return;
        };
        let reusable = self.reusable.get();
        match Rc::try_unwrap(shared) {
            Ok(cell) => {
                let buffered: BufferedConnection = cell.into_inner();
                let conn = buffered.into_inner();
                let managed = ManagedConnection::from_parts(self.id, self.dest.clone(), conn);
                self.manager.release(managed, reusable);
            }
            Err(_) => {
                // The caller kept a clone of the body reader alive past the
                // `Response`'s own lifetime (e.g. leaked a `Box<dyn Read>`
                // taken out of `body`). We can't safely reclaim the
                // connection in that case; it closes once the last `Rc`
                // clone drops, same as it would if we force-closed it here.
            }
        }
    }
}
