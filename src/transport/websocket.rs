//! Socket transports: `websocket` (SockJS-framed) and the bare `/websocket`
//! raw endpoint (§4.3, §4.6, §5).
//!
//! Both are full duplex: unlike the HTTP transports, a single connection
//! carries both directions, so the pump races an incoming read against
//! outgoing message production and the heartbeat signal every iteration
//! (the same race the streaming transports run one-directionally).
//!
//! Socket sessions are never pooled — [`Endpoint::get_session_for_transport`](crate::endpoint::Endpoint::get_session_for_transport)
//! hands back a fresh, unpooled [`Session`] on every connection, so these
//! transports always see a `new` session and always run `do_open`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;

use crate::error::Result;
use crate::session::{Session, TransportOwner};

use super::http::{HttpHandler, ResponseShape};
use super::{BaseTransport, TransportFlags};

const IDLE_POLL: Duration = Duration::from_secs(5);

/// A JSON-framed incoming WebSocket payload is either an array of messages
/// or a single bare value standing in for a one-element array. Anything
/// else isn't valid SockJS framing.
fn parse_incoming(raw: &str) -> Option<Vec<Value>> {
    if let Ok(messages) = crate::protocol::decode_messages(raw) {
        return Some(messages);
    }
    serde_json::from_str::<Value>(raw).ok().map(|v| vec![v])
}

/// `websocket`: full SockJS framing (`o`/`a`/`h`/`c`) over a WebSocket.
pub struct WebSocket {
    session: Arc<Session>,
    heartbeat: Arc<Notify>,
}

impl WebSocket {
    pub fn new(session: Arc<Session>) -> Arc<Self> {
        Arc::new(WebSocket {
            session,
            heartbeat: Arc::new(Notify::new()),
        })
    }
}

impl TransportOwner for WebSocket {
    fn send_heartbeat(&self) -> Result<()> {
        self.heartbeat.notify_one();
        Ok(())
    }
}

impl BaseTransport for WebSocket {
    fn flags(&self) -> TransportFlags {
        TransportFlags {
            readable: true,
            writable: true,
            streaming: true,
            shape: ResponseShape {
                cache: false,
                cors: false,
                cookie: false,
            },
        }
    }

    fn content_type(&self) -> Option<&'static str> {
        None
    }

    fn http_methods(&self) -> &'static [&'static str] {
        &["GET"]
    }

    fn session(&self) -> &Arc<Session> {
        &self.session
    }

    async fn do_open(&self, handler: &mut dyn HttpHandler) -> std::io::Result<()> {
        let headers = self.response_headers(&*handler);
        handler.start_response(200, headers);
        handler.write(&crate::protocol::open_frame()).await?;
        self.session.start_heartbeat();
        Ok(())
    }

    async fn process_request(&self, handler: &mut dyn HttpHandler) -> Result<()> {
        loop {
            tokio::select! {
                incoming = handler.read_message() => {
                    match incoming? {
                        None => {
                            self.session.interrupt();
                            break;
                        }
                        Some(raw) => match parse_incoming(&raw) {
                            Some(messages) => self.session.dispatch(messages),
                            // Invalid JSON closes the connection without a
                            // close frame — there's nothing coherent to say.
                            None => break,
                        },
                    }
                }
                messages = self.session.get_messages(IDLE_POLL) => {
                    let frame = if messages.is_empty() {
                        crate::protocol::heartbeat_frame()
                    } else {
                        crate::protocol::message_frame(&messages)
                    };
                    handler.write(&frame).await?;
                }
                _ = self.heartbeat.notified() => {
                    handler.write(&crate::protocol::heartbeat_frame()).await?;
                }
                _ = handler.wait_until_disconnected() => {
                    self.session.interrupt();
                    break;
                }
            }

            if !self.session.is_open() {
                break;
            }
        }

        let close_frame = if self.session.is_closed() {
            Some(crate::error::close_codes::GO_AWAY)
        } else if self.session.is_interrupted() {
            Some(crate::error::close_codes::CONN_INTERRUPTED)
        } else {
            None
        };
        if let Some((code, reason)) = close_frame {
            let _ = handler.write(&crate::protocol::close_frame(code, reason)).await;
        }

        Ok(())
    }
}

/// The bare `/websocket` endpoint: opaque text messages, no SockJS framing
/// at all (no `o`/`a`/`c` frames — only `h` for heartbeats, per the
/// existing behaviour this variant preserves).
pub struct RawWebSocket {
    session: Arc<Session>,
    heartbeat: Arc<Notify>,
}

impl RawWebSocket {
    pub fn new(session: Arc<Session>) -> Arc<Self> {
        Arc::new(RawWebSocket {
            session,
            heartbeat: Arc::new(Notify::new()),
        })
    }
}

impl TransportOwner for RawWebSocket {
    fn send_heartbeat(&self) -> Result<()> {
        self.heartbeat.notify_one();
        Ok(())
    }
}

impl BaseTransport for RawWebSocket {
    fn flags(&self) -> TransportFlags {
        TransportFlags {
            readable: true,
            writable: true,
            streaming: true,
            shape: ResponseShape {
                cache: false,
                cors: false,
                cookie: false,
            },
        }
    }

    fn content_type(&self) -> Option<&'static str> {
        None
    }

    fn http_methods(&self) -> &'static [&'static str] {
        &["GET"]
    }

    fn session(&self) -> &Arc<Session> {
        &self.session
    }

    async fn do_open(&self, handler: &mut dyn HttpHandler) -> std::io::Result<()> {
        let headers = self.response_headers(&*handler);
        handler.start_response(200, headers);
        self.session.start_heartbeat();
        Ok(())
    }

    async fn process_request(&self, handler: &mut dyn HttpHandler) -> Result<()> {
        loop {
            tokio::select! {
                incoming = handler.read_message() => {
                    match incoming? {
                        None => {
                            self.session.interrupt();
                            break;
                        }
                        Some(raw) => self.session.dispatch([Value::String(raw)]),
                    }
                }
                messages = self.session.get_messages(IDLE_POLL) => {
                    for message in messages {
                        let text = match message {
                            Value::String(s) => s,
                            other => other.to_string(),
                        };
                        handler.write(&text).await?;
                    }
                }
                _ = self.heartbeat.notified() => {
                    handler.write(&crate::protocol::heartbeat_frame()).await?;
                }
                _ = handler.wait_until_disconnected() => {
                    self.session.interrupt();
                    break;
                }
            }

            if !self.session.is_open() {
                break;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;

    struct FakeHandler {
        incoming: VecDeque<String>,
        written: Vec<String>,
        status: Option<u16>,
    }

    impl FakeHandler {
        fn new(incoming: Vec<&str>) -> Self {
            FakeHandler {
                incoming: incoming.into_iter().map(String::from).collect(),
                written: Vec::new(),
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
            self.written.push(data.to_string());
            Ok(())
        }
        fn bytes_written(&self) -> usize {
            self.written.iter().map(|s| s.len()).sum()
        }
        async fn wait_until_disconnected(&mut self) {
            std::future::pending::<()>().await;
        }
        async fn read_message(&mut self) -> std::io::Result<Option<String>> {
            Ok(self.incoming.pop_front())
        }
    }

    fn session() -> Arc<Session> {
        Session::new("s1", Duration::from_secs(5), Duration::from_secs(25))
    }

    #[test]
    fn parses_array_and_bare_value() {
        assert_eq!(parse_incoming(r#"["a","b"]"#), Some(vec![json!("a"), json!("b")]));
        assert_eq!(parse_incoming(r#""hello""#), Some(vec![json!("hello")]));
        assert_eq!(parse_incoming("not json"), None);
    }

    #[tokio::test]
    async fn websocket_dispatches_incoming_then_closes_on_disconnect() {
        let s = session();
        let transport = WebSocket::new(s.clone());
        let mut h = FakeHandler::new(vec![r#"["hi"]"#]);
        transport.process_request(&mut h).await.unwrap();
        assert!(s.is_interrupted());
    }

    #[tokio::test]
    async fn websocket_closes_silently_on_invalid_json() {
        let s = session();
        let transport = WebSocket::new(s.clone());
        let mut h = FakeHandler::new(vec!["not json"]);
        transport.process_request(&mut h).await.unwrap();
    }

    #[tokio::test]
    async fn raw_websocket_forwards_opaque_text_both_ways() {
        let s = session();
        s.add_messages([json!("out")]);
        let transport = RawWebSocket::new(s.clone());
        let mut h = FakeHandler::new(vec!["in"]);
        transport.process_request(&mut h).await.unwrap();
        assert!(h.written.contains(&"out".to_string()));
    }
}
