//! Streaming transports: `xhr_streaming`, `htmlfile`, `eventsource`
//! (§4.3, §4.6, §5).
//!
//! All three keep one HTTP response open and push frames down it as they
//! arrive, until either the client disconnects or the response has carried
//! `response_limit` bytes — at which point the client is expected to
//! reconnect (a fresh request against the same, still-open session, which
//! skips `do_open` the second time since the session is no longer `new`).
//!
//! Heartbeats are delivered two ways: the generic per-request timeout on
//! [`Session::get_messages`] (same as the polling transports), and the
//! session's own background heartbeat task (§4.2), which wakes the pump via
//! a [`Notify`] rather than writing anything itself — only the transport
//! holding the response can do I/O on it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::Result;
use crate::session::{Session, TransportOwner};

use super::http::{HttpHandler, ResponseShape};
use super::{BaseTransport, TransportFlags};

const DEFAULT_RESPONSE_LIMIT: usize = 128 * 1024;
/// How long the pump waits for either a message or a heartbeat signal
/// before looping again to recheck `response_limit` and disconnection.
const IDLE_POLL: Duration = Duration::from_secs(5);

/// Drive the shared streaming pump until `response_limit` is hit or the
/// session leaves the open state, wrapping every frame with `wrap`.
async fn stream_pump(
    handler: &mut dyn HttpHandler,
    session: &Session,
    heartbeat: &Notify,
    response_limit: usize,
    wrap: impl Fn(&str) -> String,
) -> Result<()> {
    loop {
        if handler.bytes_written() >= response_limit || !session.is_open() {
            break;
        }

        tokio::select! {
            messages = session.get_messages(IDLE_POLL) => {
                let frame = if messages.is_empty() {
                    crate::protocol::heartbeat_frame()
                } else {
                    crate::protocol::message_frame(&messages)
                };
                handler.write(&wrap(&frame)).await?;
            }
            _ = heartbeat.notified() => {
                handler.write(&wrap(&crate::protocol::heartbeat_frame())).await?;
            }
            _ = handler.wait_until_disconnected() => return Ok(()),
        }

        if !session.is_open() {
            break;
        }
    }

    if let Some((code, reason)) = terminal_close_frame(session) {
        handler.write(&wrap(&crate::protocol::close_frame(code, reason))).await?;
    }

    Ok(())
}

/// The close frame parts to write once the pump stops because the session
/// left the open state, or `None` if it's still open (disconnect, not a
/// session-state change).
fn terminal_close_frame(session: &Session) -> Option<(u16, &'static str)> {
    if session.is_closed() {
        Some(crate::error::close_codes::GO_AWAY)
    } else if session.is_interrupted() {
        Some(crate::error::close_codes::CONN_INTERRUPTED)
    } else {
        None
    }
}

fn xhr_wrap(frame: &str) -> String {
    format!("{}\n", frame.trim_end_matches('\n'))
}

/// `xhr_streaming`: a 2049-byte `h`-padded prelude (forces older browsers
/// to stop buffering the response), then `\n`-terminated frames.
pub struct XhrStreaming {
    session: Arc<Session>,
    heartbeat: Arc<Notify>,
    response_limit: usize,
}

impl XhrStreaming {
    pub fn new(session: Arc<Session>) -> Arc<Self> {
        Arc::new(XhrStreaming {
            session,
            heartbeat: Arc::new(Notify::new()),
            response_limit: DEFAULT_RESPONSE_LIMIT,
        })
    }
}

impl TransportOwner for XhrStreaming {
    fn send_heartbeat(&self) -> Result<()> {
        self.heartbeat.notify_one();
        Ok(())
    }
}

impl BaseTransport for XhrStreaming {
    fn flags(&self) -> TransportFlags {
        TransportFlags {
            readable: true,
            writable: false,
            streaming: true,
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
        handler.write(&"h".repeat(2048)).await?;
        handler.write("\n").await?;
        handler.write(&xhr_wrap(&crate::protocol::open_frame())).await?;
        self.session.start_heartbeat();
        Ok(())
    }

    async fn process_request(&self, handler: &mut dyn HttpHandler) -> Result<()> {
        stream_pump(
            handler,
            &self.session,
            &self.heartbeat,
            self.response_limit,
            xhr_wrap,
        )
        .await
    }
}

fn htmlfile_prelude(callback: &str) -> String {
    let head = format!(
        "<!doctype html>\n<html><head>\n  \
         <meta http-equiv=\"X-UA-Compatible\" content=\"IE=edge\" />\n  \
         <script>\n    \
         document.domain = document.domain;\n    \
         var c = parent.{callback};\n    \
         c.start();\n    \
         function p(d) {{c.message(d);}};\n    \
         window.onload = function() {{c.stop();}};\n  \
         </script>\n"
    );
    let padding = " ".repeat(1024usize.saturating_sub(head.len()));
    format!("{head}{padding}\r\n\r\n")
}

fn htmlfile_wrap(frame: &str) -> String {
    format!(
        "<script>\np({});\n</script>\r\n",
        serde_json::to_string(frame.trim_end_matches('\n')).unwrap()
    )
}

/// `htmlfile`: an `<iframe>`-hosted document that calls back into a
/// `window`-scoped callback via inline `<script>` tags.
pub struct HtmlFile {
    session: Arc<Session>,
    heartbeat: Arc<Notify>,
    response_limit: usize,
    callback: String,
}

impl HtmlFile {
    pub fn new(session: Arc<Session>, callback: String) -> Arc<Self> {
        Arc::new(HtmlFile {
            session,
            heartbeat: Arc::new(Notify::new()),
            response_limit: DEFAULT_RESPONSE_LIMIT,
            callback,
        })
    }

    /// Same callback requirement as JSONP (§4.3) — validated before the
    /// transport is constructed.
    pub fn callback_param(handler: &dyn HttpHandler) -> Result<String> {
        super::polling::JsonPolling::callback_param(handler)
    }
}

impl TransportOwner for HtmlFile {
    fn send_heartbeat(&self) -> Result<()> {
        self.heartbeat.notify_one();
        Ok(())
    }
}

impl BaseTransport for HtmlFile {
    fn flags(&self) -> TransportFlags {
        TransportFlags {
            readable: true,
            writable: false,
            streaming: true,
            shape: ResponseShape {
                cache: false,
                cors: false,
                cookie: true,
            },
        }
    }

    fn content_type(&self) -> Option<&'static str> {
        Some("text/html; charset=UTF-8")
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
        handler.write(&htmlfile_prelude(&self.callback)).await?;
        handler
            .write(&htmlfile_wrap(&crate::protocol::open_frame()))
            .await?;
        self.session.start_heartbeat();
        Ok(())
    }

    async fn process_request(&self, handler: &mut dyn HttpHandler) -> Result<()> {
        stream_pump(
            handler,
            &self.session,
            &self.heartbeat,
            self.response_limit,
            htmlfile_wrap,
        )
        .await
    }
}

fn event_source_wrap(frame: &str) -> String {
    format!("data: {}\r\n\r\n", frame.trim_end_matches('\n'))
}

/// `eventsource`: plain `text/event-stream` framing, no prelude.
pub struct EventSource {
    session: Arc<Session>,
    heartbeat: Arc<Notify>,
    response_limit: usize,
}

impl EventSource {
    pub fn new(session: Arc<Session>) -> Arc<Self> {
        Arc::new(EventSource {
            session,
            heartbeat: Arc::new(Notify::new()),
            response_limit: DEFAULT_RESPONSE_LIMIT,
        })
    }
}

impl TransportOwner for EventSource {
    fn send_heartbeat(&self) -> Result<()> {
        self.heartbeat.notify_one();
        Ok(())
    }
}

impl BaseTransport for EventSource {
    fn flags(&self) -> TransportFlags {
        TransportFlags {
            readable: true,
            writable: false,
            streaming: true,
            shape: ResponseShape {
                cache: false,
                cors: true,
                cookie: true,
            },
        }
    }

    fn content_type(&self) -> Option<&'static str> {
        Some("text/event-stream; charset=UTF-8")
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
            .write(&event_source_wrap(&crate::protocol::open_frame()))
            .await?;
        self.session.start_heartbeat();
        Ok(())
    }

    async fn process_request(&self, handler: &mut dyn HttpHandler) -> Result<()> {
        stream_pump(
            handler,
            &self.session,
            &self.heartbeat,
            self.response_limit,
            event_source_wrap,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct FakeHandler {
        written: String,
        status: Option<u16>,
        disconnected: bool,
    }

    impl FakeHandler {
        fn new() -> Self {
            FakeHandler {
                written: String::new(),
                status: None,
                disconnected: false,
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
        fn query_param(&self, _name: &str) -> Option<&str> {
            None
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
            if self.disconnected {
                return;
            }
            std::future::pending::<()>().await;
        }
    }

    fn session() -> Arc<Session> {
        Session::new("s1", Duration::from_secs(5), Duration::from_secs(25))
    }

    #[tokio::test]
    async fn xhr_streaming_prelude_is_2049_bytes() {
        let transport = XhrStreaming::new(session());
        let mut h = FakeHandler::new();
        transport.do_open(&mut h).await.unwrap();
        assert_eq!(h.written.len(), 2048 + 1 + "o\n".len());
        assert!(h.written.starts_with(&"h".repeat(2048)));
    }

    #[tokio::test]
    async fn htmlfile_prelude_is_at_least_1024_bytes() {
        let transport = HtmlFile::new(session(), "cb".to_string());
        let mut h = FakeHandler::new();
        transport.do_open(&mut h).await.unwrap();
        assert!(h.written.len() >= 1024);
        assert!(h.written.contains("parent.cb"));
    }

    #[tokio::test]
    async fn eventsource_wraps_open_frame() {
        let transport = EventSource::new(session());
        let mut h = FakeHandler::new();
        transport.do_open(&mut h).await.unwrap();
        assert!(h.written.ends_with("data: o\r\n\r\n"));
    }

    #[tokio::test]
    async fn pump_stops_and_emits_close_frame_once_session_closes() {
        let s = session();
        s.close(crate::session::SessionState::Closed);
        let mut h = FakeHandler::new();
        stream_pump(&mut h, &s, &Notify::new(), DEFAULT_RESPONSE_LIMIT, xhr_wrap)
            .await
            .unwrap();
        assert_eq!(h.written, "c[3000,\"Go away!\"]\n");
    }

    #[tokio::test]
    async fn pump_emits_interrupted_frame_when_session_is_interrupted() {
        let s = session();
        s.close(crate::session::SessionState::Interrupted);
        let mut h = FakeHandler::new();
        stream_pump(&mut h, &s, &Notify::new(), DEFAULT_RESPONSE_LIMIT, xhr_wrap)
            .await
            .unwrap();
        assert_eq!(h.written, "c[1002,\"Connection interrupted\"]\n");
    }

    #[tokio::test]
    async fn pump_delivers_queued_message_then_limit_stops_it() {
        let s = session();
        s.add_messages([json!("hi")]);
        let mut h = FakeHandler::new();
        stream_pump(&mut h, &s, &Notify::new(), 1, xhr_wrap).await.unwrap();
        assert_eq!(h.written, "a[\"hi\"]\n");
    }
}
