//! Writing-only transports: `xhr_send` and `jsonp_send` (§4.3, §4.6).
//!
//! Neither ever sees a `new` session — [`Endpoint::get_session_for_transport`](crate::endpoint::Endpoint::get_session_for_transport)
//! resolves a write-only request against the pool only, returning `None`
//! (a 404) when the session doesn't already exist. So `do_open` here is
//! unreachable in practice; it's implemented only to satisfy the trait.

use std::sync::Arc;

use crate::error::{Result, SockJsError};
use crate::session::{Session, TransportOwner};

use super::http::{HttpHandler, ResponseShape};
use super::{BaseTransport, TransportFlags};

/// Pull the JSON payload out of a POST body.
///
/// A form-encoded body (the shape a `<form>`-submitted JSONP send arrives
/// in) carries the payload in its `d` field; anything else is used as-is,
/// matching a plain XHR send.
fn extract_payload(handler: &dyn HttpHandler, body: &str) -> Result<String> {
    let is_form = handler
        .header("Content-Type")
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

    if !is_form {
        return Ok(body.to_string());
    }

    for pair in body.split('&') {
        if let Some(value) = pair.strip_prefix("d=") {
            return Ok(form_urldecode(value));
        }
    }

    Err(SockJsError::Transport(
        "payload expected in \"d\" parameter".to_string(),
    ))
}

fn form_urldecode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut bytes = value.bytes();
    while let Some(b) = bytes.next() {
        match b {
            b'+' => out.push(' '),
            b'%' => {
                let hi = bytes.next();
                let lo = bytes.next();
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    let hex = [hi, lo];
                    if let Ok(hex) = std::str::from_utf8(&hex) {
                        if let Ok(byte) = u8::from_str_radix(hex, 16) {
                            out.push(byte as char);
                            continue;
                        }
                    }
                }
                out.push('%');
            }
            other => out.push(other as char),
        }
    }
    out
}

async fn handle_send<T: BaseTransport>(
    transport: &T,
    handler: &mut dyn HttpHandler,
    session: &Session,
    success_status: u16,
    success_body: &str,
) -> Result<()> {
    let body = handler.read_body().await?;
    let payload = match extract_payload(&*handler, &body) {
        Ok(payload) => payload,
        Err(e) => {
            let headers = transport.response_headers(&*handler);
            handler.start_response(500, headers);
            handler.write(&e.to_string()).await?;
            return Ok(());
        }
    };

    match crate::protocol::decode_messages(&payload) {
        Ok(messages) => {
            session.dispatch(messages);
            let headers = transport.response_headers(&*handler);
            handler.start_response(success_status, headers);
            if !success_body.is_empty() {
                handler.write(success_body).await?;
            }
            Ok(())
        }
        Err(e) => {
            let headers = transport.response_headers(&*handler);
            handler.start_response(500, headers);
            handler.write(&e.to_string()).await?;
            Ok(())
        }
    }
}

/// `xhr_send`: a bare POST of a JSON array, answered with an empty 204.
pub struct XhrSend {
    session: Arc<Session>,
}

impl XhrSend {
    pub fn new(session: Arc<Session>) -> Arc<Self> {
        Arc::new(XhrSend { session })
    }
}

impl TransportOwner for XhrSend {
    fn send_heartbeat(&self) -> Result<()> {
        // Writing-only transports are never a read owner; nothing to do.
        Ok(())
    }
}

impl BaseTransport for XhrSend {
    fn flags(&self) -> TransportFlags {
        TransportFlags {
            readable: false,
            writable: true,
            streaming: false,
            shape: ResponseShape {
                cache: false,
                cors: true,
                cookie: true,
            },
        }
    }

    fn content_type(&self) -> Option<&'static str> {
        None
    }

    fn http_methods(&self) -> &'static [&'static str] {
        &["OPTIONS", "POST"]
    }

    fn session(&self) -> &Arc<Session> {
        &self.session
    }

    async fn do_open(&self, _handler: &mut dyn HttpHandler) -> std::io::Result<()> {
        unreachable!("xhr_send never resolves to a new session")
    }

    async fn process_request(&self, handler: &mut dyn HttpHandler) -> Result<()> {
        handle_send(self, handler, &self.session, 204, "").await
    }
}

/// `jsonp_send`: a form- or body-posted JSON array, answered with the
/// literal text `ok` (no CORS headers — JSONP doesn't need them).
pub struct JsonpSend {
    session: Arc<Session>,
}

impl JsonpSend {
    pub fn new(session: Arc<Session>) -> Arc<Self> {
        Arc::new(JsonpSend { session })
    }
}

impl TransportOwner for JsonpSend {
    fn send_heartbeat(&self) -> Result<()> {
        Ok(())
    }
}

impl BaseTransport for JsonpSend {
    fn flags(&self) -> TransportFlags {
        TransportFlags {
            readable: false,
            writable: true,
            streaming: false,
            shape: ResponseShape {
                cache: false,
                cors: false,
                cookie: true,
            },
        }
    }

    fn content_type(&self) -> Option<&'static str> {
        Some("text/plain")
    }

    fn http_methods(&self) -> &'static [&'static str] {
        &["OPTIONS", "POST"]
    }

    fn session(&self) -> &Arc<Session> {
        &self.session
    }

    async fn do_open(&self, _handler: &mut dyn HttpHandler) -> std::io::Result<()> {
        unreachable!("jsonp_send never resolves to a new session")
    }

    async fn process_request(&self, handler: &mut dyn HttpHandler) -> Result<()> {
        handle_send(self, handler, &self.session, 200, "ok").await
    }
}
