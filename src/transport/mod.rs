//! Transport adapters: per-wire framing and HTTP/WS lifecycle (§4.6).
//!
//! Every transport shares the same request lifecycle ([`run_lifecycle`]) and
//! differs only in its static flags and how it pumps messages. Three shapes
//! cover all nine wire variants:
//!
//! - [`send`] — writing-only (XHR-send, JSONP-send): decode a POST body,
//!   dispatch to the session.
//! - [`polling`] and [`streaming`] — sending-only: race a message producer
//!   against a connection-watcher (§5).
//! - [`websocket`] — full duplex: race a poll loop against a put loop.
//!
//! Status codes and headers are each transport's own business — `do_open`
//! and `process_request` call [`HttpHandler::start_response`] themselves,
//! since the right status varies (200 with an `o` frame, 204 for an XHR
//! send, `ok` for a JSONP send, 500 for a malformed payload). The shared
//! lifecycle only commits a response itself for the one case every
//! transport handles identically: a session-lock failure becomes a `c[...]`
//! close frame on an otherwise ordinary 200.

pub mod http;
pub mod polling;
pub mod send;
pub mod streaming;
pub mod websocket;

use std::sync::Arc;

use crate::error::{Result, SockJsError};
use crate::session::{Session, TransportOwner};
use http::{HttpHandler, ResponseShape};

/// Static flags every transport declares (§4.6).
#[derive(Debug, Clone, Copy)]
pub struct TransportFlags {
    pub readable: bool,
    pub writable: bool,
    /// Whether the pump keeps the response open across many frames
    /// (streaming HTTP transports, and full-duplex sockets) rather than
    /// completing after a single write.
    pub streaming: bool,
    pub shape: ResponseShape,
}

/// Per-wire-variant behaviour layered on top of the uniform lifecycle in
/// [`run_lifecycle`].
///
/// Implementors also implement [`TransportOwner`] so they can be installed
/// as a session's read/write owner — the session stores only a `Weak`
/// handle to it (§4.2, §9).
pub trait BaseTransport: TransportOwner {
    fn flags(&self) -> TransportFlags;
    fn content_type(&self) -> Option<&'static str> {
        Some("text/plain")
    }
    fn http_methods(&self) -> &'static [&'static str];
    fn session(&self) -> &Arc<Session>;

    /// Build this transport's standard response headers (content type, CORS,
    /// cache, sticky cookie) for whatever status it's about to send.
    fn response_headers(&self, handler: &dyn HttpHandler) -> Vec<(String, String)> {
        http::response_headers(handler, self.content_type(), self.flags().shape)
    }

    /// Subclass hook run before the session lock is acquired (e.g. JSONP
    /// transports validate the `callback` query parameter here).
    fn prepare_request(&self, _handler: &mut dyn HttpHandler) -> Result<()> {
        Ok(())
    }

    /// Start the response and write the `o` frame (and any
    /// transport-specific preamble). Skipped entirely for transports that
    /// never see a new session (writing-only transports never reach here,
    /// since a write-only session resolution never yields a `new` session).
    async fn do_open(&self, handler: &mut dyn HttpHandler) -> std::io::Result<()>;

    /// The per-shape pump: decode+dispatch for writing-only transports,
    /// producer/watcher race for sending-only, poll/put race for sockets.
    /// Responsible for its own `start_response` call when `do_open` wasn't
    /// invoked first.
    async fn process_request(&self, handler: &mut dyn HttpHandler) -> Result<()>;

    /// Subclass hook run after the session lock has been released,
    /// regardless of how `process_request` completed.
    async fn finalize_request(&self, _handler: &mut dyn HttpHandler) {}
}

/// Run the uniform transport request lifecycle (§4.6):
///
/// 1. OPTIONS preflight.
/// 2. `prepare_request`.
/// 3. Acquire the session lock; a `SessionUnavailable` failure writes a
///    close frame on a plain 200 and returns cleanly rather than
///    propagating.
/// 4. If the session was brand new: `do_open`, then `session.open()`.
///    Non-streaming transports stop here — the client polls again for data.
/// 5. `process_request` — skipped only in the case above.
/// 6. Release the lock unconditionally.
/// 7. `finalize_request`.
///
/// A socket error during the pump is logged and interrupts the session
/// rather than propagating; any other error is re-raised (§4.6, §7).
pub async fn run_lifecycle<T>(transport: &Arc<T>, handler: &mut dyn HttpHandler) -> Result<()>
where
    T: BaseTransport + 'static,
{
    if http::handle_options(handler, transport.http_methods()).await {
        return Ok(());
    }

    let flags = transport.flags();
    transport.prepare_request(handler)?;

    let owner: Arc<dyn TransportOwner> = transport.clone();
    let session = transport.session();

    if let Err(err) = session.lock(&owner, flags.readable, flags.writable) {
        if let Some((code, reason)) = err.close_frame_parts() {
            let headers = transport.response_headers(&*handler);
            handler.start_response(200, headers);
            let _ = handler
                .write(&crate::protocol::close_frame(code, reason))
                .await;
            return Ok(());
        }
        return Err(err);
    }

    let was_new = session.is_new();

    let result: Result<()> = async {
        if was_new {
            transport.do_open(handler).await.map_err(SockJsError::from)?;
            session.open();
            if !flags.streaming {
                return Ok(());
            }
        }
        transport.process_request(handler).await
    }
    .await;

    session.unlock(&owner, flags.readable, flags.writable);
    transport.finalize_request(handler).await;

    match result {
        Err(SockJsError::Socket(e)) => {
            tracing::debug!(error = %e, "client disconnected mid-request");
            session.interrupt();
            Ok(())
        }
        other => other,
    }
}
