//! Sending-only, single-shot transports: `xhr` (polling) and `jsonp`
//! (§4.3, §4.6, §5).
//!
//! Both answer exactly one HTTP request with exactly one frame: either
//! whatever was already queued, or whatever arrives before `poll_timeout`
//! elapses, or a heartbeat if nothing arrives in time. The request's
//! underlying connection is raced against message arrival so a client that
//! disconnects mid-poll doesn't pin the session's read lock (§5).

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, SockJsError};
use crate::session::{Session, TransportOwner};

use super::http::{HttpHandler, ResponseShape};
use super::{BaseTransport, TransportFlags};

async fn write_and_finish(
    handler: &mut dyn HttpHandler,
    frame: &str,
    suffix: &str,
) -> Result<()> {
    handler.write(frame).await?;
    if !suffix.is_empty() {
        handler.write(suffix).await?;
    }
    Ok(())
}

fn jsonp_wrap(callback: &str, frame: &str) -> String {
    let payload = frame.trim_end_matches('\n');
    format!("{callback}({});\r\n", serde_json::to_string(payload).unwrap())
}

/// `xhr`: long-polling over a regular XHR POST.
pub struct XhrPolling {
    session: Arc<Session>,
    poll_timeout: Duration,
}

impl XhrPolling {
    pub fn new(session: Arc<Session>, poll_timeout: Duration) -> Arc<Self> {
        Arc::new(XhrPolling { session, poll_timeout })
    }
}

impl TransportOwner for XhrPolling {
    fn send_heartbeat(&self) -> Result<()> {
        // Single-shot transport: no connection to push a heartbeat down
        // between requests. The poll timeout itself yields a heartbeat
        // frame when nothing else arrives.
        Ok(())
    }
}

impl BaseTransport for XhrPolling {
    fn flags(&self) -> TransportFlags {
        TransportFlags {
            readable: true,
            writable: false,
            streaming: false,
            shape: ResponseShape {
                cache: false,
                cors: true,
                cookie: true,
            },
        }
    }

    fn http_methods(&self) -> &'static [&'static str] {
        &["OPTIONS", "POST"]
    }

    fn session(&self) -> &Arc<Session> {
        &self.session
    }

    async fn do_open(&self, handler: &mut dyn HttpHandler) -> std::io::Result<()> {
        let headers = self.response_headers(&*handler);
        handler.start_response(200, headers);
        handler.write(&crate::protocol::open_frame()).await
    }

    async fn process_request(&self, handler: &mut dyn HttpHandler) -> Result<()> {
        let headers = self.response_headers(&*handler);
        handler.start_response(200, headers);

        tokio::select! {
            messages = self.session.get_messages(self.poll_timeout) => {
                let frame = if messages.is_empty() {
                    crate::protocol::heartbeat_frame()
                } else {
                    crate::protocol::message_frame(&messages)
                };
                write_and_finish(handler, frame.trim_end_matches('\n'), "\n").await
            }
            _ = handler.wait_until_disconnected() => Ok(()),
        }
    }
}

/// `jsonp`: the same long-poll, wrapped as a `<script>`-friendly callback
/// invocation so it can be loaded cross-origin without CORS (§4.3).
pub struct JsonPolling {
    session: Arc<Session>,
    poll_timeout: Duration,
    callback: String,
}

impl JsonPolling {
    /// `callback` must already have been validated by the caller (the
    /// `c`/`callback` query parameter is required — see
    /// [`prepare_request`](BaseTransport::prepare_request)).
    pub fn new(session: Arc<Session>, poll_timeout: Duration, callback: String) -> Arc<Self> {
        Arc::new(JsonPolling {
            session,
            poll_timeout,
            callback,
        })
    }

    /// Extract and validate the callback query parameter ahead of
    /// construction. Returns the `Transport` error the lifecycle surfaces
    /// as a 500 when neither `c` nor `callback` is present.
    pub fn callback_param(handler: &dyn HttpHandler) -> Result<String> {
        handler
            .query_param("c")
            .or_else(|| handler.query_param("callback"))
            .map(str::to_string)
            .ok_or_else(|| SockJsError::Transport("\"callback\" parameter required".to_string()))
    }
}

impl TransportOwner for JsonPolling {
    fn send_heartbeat(&self) -> Result<()> {
        Ok(())
    }
}

impl BaseTransport for JsonPolling {
    fn flags(&self) -> TransportFlags {
        TransportFlags {
            readable: true,
            writable: false,
            streaming: false,
            shape: ResponseShape {
                cache: false,
                cors: false,
                cookie: true,
            },
        }
    }

    fn content_type(&self) -> Option<&'static str> {
        Some("application/javascript; charset=UTF-8")
    }

    fn http_methods(&self) -> &'static [&'static str] {
        &["OPTIONS", "GET"]
    }

    fn session(&self) -> &Arc<Session> {
        &self.session
    }

    async fn do_open(&self, handler: &mut dyn HttpHandler) -> std::io::Result<()> {
        let headers = self.response_headers(&*handler);
        handler.start_response(200, headers);
        handler
            .write(&jsonp_wrap(&self.callback, &crate::protocol::open_frame()))
            .await
    }

    async fn process_request(&self, handler: &mut dyn HttpHandler) -> Result<()> {
        let headers = self.response_headers(&*handler);
        handler.start_response(200, headers);

        tokio::select! {
            messages = self.session.get_messages(self.poll_timeout) => {
                let frame = if messages.is_empty() {
                    crate::protocol::heartbeat_frame()
                } else {
                    crate::protocol::message_frame(&messages)
                };
                handler.write(&jsonp_wrap(&self.callback, &frame)).await?;
                Ok(())
            }
            _ = handler.wait_until_disconnected() => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;

    struct FakeHandler {
        query: HashMap<String, String>,
        written: String,
        status: Option<u16>,
    }

    impl FakeHandler {
        fn new() -> Self {
            FakeHandler {
                query: HashMap::new(),
                written: String::new(),
                status: None,
            }
        }
    }

    #[async_trait]
    impl HttpHandler for FakeHandler {
        fn method(&self) -> &str {
            "GET"
        }
        fn header(&self, _name: &str) -> Option<&str> {
            None
        }
        fn query_param(&self, name: &str) -> Option<&str> {
            self.query.get(name).map(String::as_str)
        }
        async fn read_body(&mut self) -> std::io::Result<String> {
            Ok(String::new())
        }
        fn start_response(&mut self, status: u16, _headers: Vec<(String, String)>) {
            self.status = Some(status);
        }
        async fn write(&mut self, data: &str) -> std::io::Result<()> {
            self.written.push_str(data);
            Ok(())
        }
        fn bytes_written(&self) -> usize {
            self.written.len()
        }
        async fn wait_until_disconnected(&mut self) {
            std::future::pending::<()>().await;
        }
    }

    fn session() -> Arc<Session> {
        Session::new("s1", Duration::from_secs(5), Duration::from_secs(25))
    }

    #[tokio::test]
    async fn xhr_polling_returns_queued_message() {
        let s = session();
        s.add_messages([json!("hi")]);
        let transport = XhrPolling::new(s, Duration::from_millis(50));
        let mut h = FakeHandler::new();
        transport.process_request(&mut h).await.unwrap();
        assert_eq!(h.written, "a[\"hi\"]\n");
    }

    #[tokio::test]
    async fn xhr_polling_times_out_to_heartbeat() {
        let transport = XhrPolling::new(session(), Duration::from_millis(20));
        let mut h = FakeHandler::new();
        transport.process_request(&mut h).await.unwrap();
        assert_eq!(h.written, "h\n");
    }

    #[test]
    fn jsonp_callback_param_accepts_either_name() {
        let mut h = FakeHandler::new();
        h.query.insert("callback".to_string(), "cb".to_string());
        assert_eq!(JsonPolling::callback_param(&h).unwrap(), "cb");
    }

    #[test]
    fn jsonp_callback_param_missing_is_error() {
        let h = FakeHandler::new();
        assert!(JsonPolling::callback_param(&h).is_err());
    }

    #[tokio::test]
    async fn jsonp_wraps_frame_in_callback() {
        let s = session();
        s.add_messages([json!("hi")]);
        let transport = JsonPolling::new(s, Duration::from_millis(50), "cb".to_string());
        let mut h = FakeHandler::new();
        transport.process_request(&mut h).await.unwrap();
        assert_eq!(h.written, "cb(\"a[\\\"hi\\\"]\");\r\n");
    }
}
