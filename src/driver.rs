//! The request driver (§C8): ties `Request`, `Manager`, the wire codec, and
//! body framing together into the redirect loop described in §4.8, and
//! exposes the two entry points callers actually use.
//!
//! Grounded on the teacher's `Agent::run`/`Unit::send_request` (old
//! `unit.rs`/`agent.rs`): that loop also acquired a connection, sent, decoded
//! headers, and followed redirects in-place on a mutable request. This
//! generalizes it onto `Manager`/`Deadline` and makes the stale-connection
//! retry and cookie handling explicit rather than folded into `Unit`'s own
//! bookkeeping.

use std::cell::RefCell;
use std::io::Read;
use std::rc::Rc;

use log::{debug, trace};

use crate::body::RequestBody;
use crate::conn::BufferedConnection;
use crate::cookies::CookieJar;
use crate::dest::DestKey;
use crate::framing::{self, ReusabilityFlag, SharedConnection};
use crate::manager::{ManagedConnection, Manager};
use crate::request::{self, Request};
use crate::response::Response;
use crate::time::Deadline;
use crate::urlparse;
use crate::wire::{decode_response_head, encode_request, ResponseHead, DEFAULT_MAX_HEADER_BYTES};
use crate::Error;

/// Runs `req` to completion and reads the whole body into memory before
/// returning (§6 `http_lbs`).
pub fn http_lbs(req: Request, manager: &Manager) -> Result<Response, Error> {
    let mut response = drive(req, manager)?;
    let mut buf = Vec::new();
    response.body.read_to_end(&mut buf)?;
    response.body = Box::new(std::io::Cursor::new(buf));
    Ok(response)
}

/// Runs `req` to completion and hands the live response (with its body
/// stream still open) to `consumer`. The connection is released when the
/// response — and whatever the consumer did with its body — is dropped
/// (§6 `with_response`).
pub fn with_response<T>(
    req: Request,
    manager: &Manager,
    consumer: impl FnOnce(&mut Response) -> T,
) -> Result<T, Error> {
    let mut response = drive(req, manager)?;
    Ok(consumer(&mut response))
}

/// The §4.8 protocol: acquire, send, decode, check status, follow redirects.
fn drive(mut req: Request, manager: &Manager) -> Result<Response, Error> {
    let mut jar = req.cookie_jar.take().unwrap_or_default();
    let default_micros = manager.response_timeout_default_micros();

    loop {
        let deadline = Deadline::new(req.response_timeout.resolve(default_micros));

        apply_cookie_header(&mut req, &jar);

        let dest = DestKey::for_request(&req);
        let body_snapshot = match &req.body {
            RequestBody::Bytes(bytes) => Some(bytes.clone()),
            _ => None,
        };

        trace!("{} {:?}", req.method, urlparse::get_url(&req));

        let (head, shared_conn, conn_id) =
            send_and_receive(&mut req, manager, &dest, &deadline, &body_snapshot)?;
        deadline.checkpoint()?;
        debug!("{} {} {}", req.method, head.status, req.host);

        let current_url = urlparse::get_url(&req);
        jar.store_response_cookies(head.headers.get_all("set-cookie"), &current_url);

        if let Some(check) = req.check_status.clone() {
            if let Some(err) = check(head.status, &head.headers, &jar) {
                drop_and_close(manager, conn_id, &dest, shared_conn);
                return Err(err);
            }
        }

        let location = head.headers.get("location").map(str::to_string);
        let is_redirect = (300..400).contains(&head.status) && location.is_some();

        let gunzip = request::needs_gunzip(&req, &head.headers);
        let (body, reusable) = framing::body_reader(&head, shared_conn.clone(), gunzip, deadline);

        if is_redirect && req.redirect_count > 0 {
            drain_and_release(manager, conn_id, &dest, shared_conn, body, reusable);

            let location = location.expect("is_redirect implies a Location header");
            debug!("redirecting ({}) to {} ({} left)", head.status, location, req.redirect_count - 1);
            let old_host = req.host.clone();
            urlparse::set_uri_relative(&mut req, &location)?;
            if req.host != old_host {
                req.host_address = None;
            }

            if preserves_method(head.status) {
                req.body = match body_snapshot {
                    Some(bytes) => RequestBody::Bytes(bytes),
                    None => RequestBody::Empty,
                };
            } else {
                req.method = redirected_method(&req.method, head.status);
                req.body = RequestBody::Empty;
            }

            req.redirect_count -= 1;
            continue;
        }

        return Ok(Response::new(
            (head.status, head.reason),
            head.http_minor_version,
            head.headers,
            body,
            jar,
            manager.clone(),
            conn_id,
            dest,
            shared_conn,
            reusable,
        ));
    }
}

/// Applies the jar's `Cookie:` header for `req`'s current location, or
/// removes a stale one if the jar has nothing to send (§4.8 step 2).
fn apply_cookie_header(req: &mut Request, jar: &CookieJar) {
    let url = urlparse::get_url(req);
    match jar.header_for(&url) {
        Some(header) => {
            req.set_header("Cookie", header);
        }
        None => req.headers.remove("cookie"),
    }
}

/// Sends the request and decodes the response head, retrying once on a
/// stale pooled connection (§4.2, §4.8 step 4).
fn send_and_receive(
    req: &mut Request,
    manager: &Manager,
    dest: &DestKey,
    deadline: &Deadline,
    body_snapshot: &Option<Vec<u8>>,
) -> Result<(ResponseHead, SharedConnection, u64), Error> {
    // A streamed body is consumed by the first attempt and can't be
    // replayed, so a connection failure on those is never retried.
    let retryable_body = !matches!(
        req.body,
        RequestBody::Streaming { .. } | RequestBody::Chunked(_) | RequestBody::Builder { .. }
    );
    let mut retry_used = false;

    loop {
        let managed = manager.acquire_with_address(dest, deadline, req.host_address)?;
        deadline.checkpoint()?;
        let from_pool = managed.from_pool;
        let id = managed.id();
        let mut buffered = BufferedConnection::new(managed.conn);

        if let Some(bytes) = body_snapshot {
            req.body = RequestBody::Bytes(bytes.clone());
        }

        let outcome = encode_request(req, &mut buffered).and_then(|_| {
            deadline.checkpoint()?;
            buffered.apply_deadline(deadline)?;
            decode_response_head(&mut buffered, DEFAULT_MAX_HEADER_BYTES)
        });

        match outcome {
            Ok(head) => return Ok((head, Rc::new(RefCell::new(buffered)), id)),
            Err(err) => {
                let broken = ManagedConnection::from_parts(id, dest.clone(), buffered.into_inner());
                manager.release(broken, false);

                let can_retry =
                    from_pool && retryable_body && !retry_used && err.is_retriable_before_response();
                if can_retry {
                    debug!("pooled connection to {:?} was stale ({}), retrying fresh", dest, err);
                    retry_used = true;
                    continue;
                }
                return Err(err);
            }
        }
    }
}

/// RFC 7231 redirect method conversion (§4.8 step 6, §9 design notes):
/// 307/308 preserve the method; 301/302/303 downgrade to GET unless the
/// original method was already GET or HEAD.
fn redirected_method(original: &str, status: u16) -> String {
    if preserves_method(status) {
        return original.to_string();
    }
    if matches!(original, "GET" | "HEAD") {
        original.to_string()
    } else {
        "GET".to_string()
    }
}

fn preserves_method(status: u16) -> bool {
    matches!(status, 307 | 308)
}

/// Drains a reusable-candidate body so its framing can flip the reusability
/// flag, then releases the connection accordingly (§4.8 step 6 "drain the
/// body to enable connection reuse").
fn drain_and_release(
    manager: &Manager,
    id: u64,
    dest: &DestKey,
    shared_conn: SharedConnection,
    mut body: Box<dyn Read>,
    reusable: ReusabilityFlag,
) {
    let mut sink = [0u8; 8192];
    while matches!(body.read(&mut sink), Ok(n) if n > 0) {}
    drop(body);
    release_shared(manager, id, dest, shared_conn, reusable.get());
}

/// `check_status` rejected the response: close the connection outright
/// rather than draining it (§7 "arranging that the body is either consumed
/// or the connection closed").
fn drop_and_close(manager: &Manager, id: u64, dest: &DestKey, shared_conn: SharedConnection) {
    release_shared(manager, id, dest, shared_conn, false);
}

fn release_shared(
    manager: &Manager,
    id: u64,
    dest: &DestKey,
    shared_conn: SharedConnection,
    reusable: bool,
) {
    if let Ok(cell) = Rc::try_unwrap(shared_conn) {
        let buffered: BufferedConnection = cell.into_inner();
        let managed = ManagedConnection::from_parts(id, dest.clone(), buffered.into_inner());
        manager.release(managed, reusable);
    }
}
