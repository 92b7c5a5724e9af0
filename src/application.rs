//! Application: the top-level registry of [`Endpoint`]s and the router→
//! transport dispatch that ties routing, endpoints and transports together
//! (§4.7, §8).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use md5::{Digest, Md5};

use crate::connection::Handler;
use crate::endpoint::{Endpoint, EndpointOptions};
use crate::error::{Result, SockJsError};
use crate::router::RouteKind;
use crate::transport::http::HttpHandler;
use crate::transport::polling::JsonPolling;
use crate::transport::{self, BaseTransport};

/// The full set of [`Endpoint`]s an application serves, plus the
/// default [`EndpointOptions`] new endpoints inherit (§4.5).
///
/// Mirrors a registry of named mount points: endpoints are looked up by
/// name, a duplicate name is rejected outright, and starting/stopping the
/// application starts/stops every endpoint it holds.
pub struct Application {
    endpoints: RwLock<HashMap<String, Arc<Endpoint>>>,
    defaults: RwLock<EndpointOptions>,
    started: RwLock<bool>,
}

impl Application {
    pub fn new(defaults: EndpointOptions) -> Arc<Self> {
        Arc::new(Application {
            endpoints: RwLock::new(HashMap::new()),
            defaults: RwLock::new(defaults),
            started: RwLock::new(false),
        })
    }

    /// Register a new endpoint. Fails if `name` is already registered.
    /// If the application is already started, the new endpoint is started
    /// immediately so it's ready to accept sessions right away.
    pub fn add_endpoint(&self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Result<Arc<Endpoint>> {
        let name = name.into();
        let mut endpoints = self.endpoints.write();
        if endpoints.contains_key(&name) {
            return Err(SockJsError::DuplicateEndpoint(name));
        }

        let endpoint = Endpoint::new(name.clone(), handler, EndpointOptions::default());
        endpoint.inherit_defaults(&self.defaults.read());
        endpoints.insert(name.clone(), endpoint.clone());

        if *self.started.read() {
            endpoint.start();
        }

        tracing::info!(endpoint = %name, "endpoint registered");
        Ok(endpoint)
    }

    pub fn get_endpoint(&self, name: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.read().get(name).cloned()
    }

    /// Start every registered endpoint. Idempotent.
    pub fn start(&self) {
        let mut started = self.started.write();
        if *started {
            return;
        }
        for endpoint in self.endpoints.read().values() {
            endpoint.start();
        }
        *started = true;
        tracing::info!("application started");
    }

    /// Stop every registered endpoint, interrupting all of their live
    /// sessions. Idempotent.
    pub fn stop(&self) {
        let mut started = self.started.write();
        if !*started {
            return;
        }
        for endpoint in self.endpoints.read().values() {
            endpoint.stop();
        }
        *started = false;
        tracing::info!("application stopped");
    }

    /// Route one HTTP request end to end: classify the path, resolve the
    /// endpoint and session, build the matching transport, and run its
    /// lifecycle (§4.6, §4.7).
    ///
    /// Unlike [`transport::run_lifecycle`], this writes a response for
    /// every error path itself — by the time it returns, `handler` always
    /// has a committed status.
    pub async fn handle(&self, path: &str, handler: &mut dyn HttpHandler) -> Result<()> {
        let route = match crate::router::route(path) {
            Ok(route) => route,
            Err(_) => return not_found(handler, None).await,
        };

        let Some(endpoint_name) = route.endpoint.as_deref() else {
            return greeting(handler).await;
        };

        let Some(endpoint) = self.get_endpoint(endpoint_name) else {
            return not_found(handler, Some(&format!("Unknown endpoint {endpoint_name}"))).await;
        };

        match route.kind {
            RouteKind::Greeting => greeting(handler).await,
            RouteKind::Info => info_response(&endpoint, handler).await,
            RouteKind::Iframe => iframe_response(&endpoint, handler).await,
            RouteKind::RawWebSocket => {
                dispatch_websocket(&endpoint, None, handler, true).await
            }
            RouteKind::Transport {
                session_id,
                transport,
                ..
            } => dispatch_transport(&endpoint, &session_id, &transport, handler).await,
        }
    }
}

async fn not_found(handler: &mut dyn HttpHandler, message: Option<&str>) -> Result<()> {
    let body = message.unwrap_or("404 Error: Not Found");
    handler.start_response(404, vec![("Content-Type".to_string(), "text/plain".to_string())]);
    tracing::debug!(body, "no route matched");
    handler.write(body).await?;
    Ok(())
}

async fn greeting(handler: &mut dyn HttpHandler) -> Result<()> {
    let mut headers = vec![("Content-Type".to_string(), "text/plain".to_string())];
    headers.extend(crate::transport::http::cache_headers(true));
    handler.start_response(200, headers);
    handler.write("Welcome to SockJS!\n").await?;
    Ok(())
}

async fn info_response(endpoint: &Arc<Endpoint>, handler: &mut dyn HttpHandler) -> Result<()> {
    let body = serde_json::to_string(&endpoint.get_info()).expect("InfoResponse always serializes");
    let headers = vec![(
        "Content-Type".to_string(),
        "application/json; charset=UTF-8".to_string(),
    )];
    handler.start_response(200, headers);
    handler.write(&body).await?;
    Ok(())
}

async fn iframe_response(endpoint: &Arc<Endpoint>, handler: &mut dyn HttpHandler) -> Result<()> {
    let client_url = endpoint.options().client_url.unwrap_or_default();
    let body = format!(
        "<!doctype html>\n<html><head>\n  <meta charset=\"utf-8\">\n  \
         <script src=\"{client_url}\"></script>\n  \
         <script>\n    document.domain = document.domain;\n    \
         SockJS.bootstrap_iframe();\n  </script>\n</head><body></body></html>"
    );
    let etag = format!("\"{:x}\"", Md5::digest(body.as_bytes()));

    if handler.header("If-None-Match") == Some(etag.as_str()) {
        handler.start_response(304, crate::transport::http::cache_headers(true));
        return Ok(());
    }

    let mut headers = vec![("Content-Type".to_string(), "text/html; charset=UTF-8".to_string())];
    headers.extend(crate::transport::http::cache_headers(true));
    headers.push(("ETag".to_string(), etag));
    handler.start_response(200, headers);
    handler.write(&body).await?;
    Ok(())
}

async fn dispatch_transport(
    endpoint: &Arc<Endpoint>,
    session_id: &str,
    transport: &str,
    handler: &mut dyn HttpHandler,
) -> Result<()> {
    if !endpoint.transport_allowed(transport) {
        return not_found(handler, None).await;
    }

    let poll_timeout = Duration::from_secs(5);

    match transport {
        "websocket" => dispatch_websocket(endpoint, Some(session_id), handler, false).await,
        "xhr" => {
            let Some(session) = endpoint.get_session_for_transport(Some(session_id), true, false)? else {
                return not_found(handler, None).await;
            };
            let t = crate::transport::polling::XhrPolling::new(session, poll_timeout);
            transport::run_lifecycle(&t, handler).await
        }
        "xhr_send" => {
            let Some(session) = endpoint.get_session_for_transport(Some(session_id), false, true)? else {
                return not_found(handler, None).await;
            };
            let t = crate::transport::send::XhrSend::new(session);
            transport::run_lifecycle(&t, handler).await
        }
        "jsonp" => {
            let callback = match JsonPolling::callback_param(&*handler) {
                Ok(cb) => cb,
                Err(e) => return write_transport_error(handler, e).await,
            };
            let Some(session) = endpoint.get_session_for_transport(Some(session_id), true, false)? else {
                return not_found(handler, None).await;
            };
            let t = JsonPolling::new(session, poll_timeout, callback);
            transport::run_lifecycle(&t, handler).await
        }
        "jsonp_send" => {
            let Some(session) = endpoint.get_session_for_transport(Some(session_id), false, true)? else {
                return not_found(handler, None).await;
            };
            let t = crate::transport::send::JsonpSend::new(session);
            transport::run_lifecycle(&t, handler).await
        }
        "xhr_streaming" => {
            let Some(session) = endpoint.get_session_for_transport(Some(session_id), true, false)? else {
                return not_found(handler, None).await;
            };
            let t = crate::transport::streaming::XhrStreaming::new(session);
            transport::run_lifecycle(&t, handler).await
        }
        "htmlfile" => {
            let callback = match crate::transport::streaming::HtmlFile::callback_param(&*handler) {
                Ok(cb) => cb,
                Err(e) => return write_transport_error(handler, e).await,
            };
            let Some(session) = endpoint.get_session_for_transport(Some(session_id), true, false)? else {
                return not_found(handler, None).await;
            };
            let t = crate::transport::streaming::HtmlFile::new(session, callback);
            transport::run_lifecycle(&t, handler).await
        }
        "eventsource" => {
            let Some(session) = endpoint.get_session_for_transport(Some(session_id), true, false)? else {
                return not_found(handler, None).await;
            };
            let t = crate::transport::streaming::EventSource::new(session);
            transport::run_lifecycle(&t, handler).await
        }
        _ => not_found(handler, None).await,
    }
}

async fn dispatch_websocket(
    endpoint: &Arc<Endpoint>,
    session_id: Option<&str>,
    handler: &mut dyn HttpHandler,
    raw: bool,
) -> Result<()> {
    let Some(session) = endpoint.get_session_for_transport(session_id, true, true)? else {
        return not_found(handler, None).await;
    };

    if raw {
        let t = crate::transport::websocket::RawWebSocket::new(session);
        transport::run_lifecycle(&t, handler).await
    } else {
        let t = crate::transport::websocket::WebSocket::new(session);
        transport::run_lifecycle(&t, handler).await
    }
}

async fn write_transport_error(handler: &mut dyn HttpHandler, err: SockJsError) -> Result<()> {
    handler.start_response(500, vec![("Content-Type".to_string(), "text/plain".to_string())]);
    handler.write(&err.to_string()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NoopHandler;
    impl Handler for NoopHandler {}

    struct FakeHandler {
        status: Option<u16>,
        headers: Vec<(String, String)>,
        written: String,
        if_none_match: Option<String>,
    }

    impl FakeHandler {
        fn new() -> Self {
            FakeHandler {
                status: None,
                headers: Vec::new(),
                written: String::new(),
                if_none_match: None,
            }
        }
    }

    #[async_trait]
    impl HttpHandler for FakeHandler {
        fn method(&self) -> &str {
            "GET"
        }
        fn header(&self, name: &str) -> Option<&str> {
            if name == "If-None-Match" {
                self.if_none_match.as_deref()
            } else {
                None
            }
        }
        fn query_param(&self, _name: &str) -> Option<&str> {
            None
        }
        async fn read_body(&mut self) -> std::io::Result<String> {
            Ok(String::new())
        }
        fn start_response(&mut self, status: u16, headers: Vec<(String, String)>) {
            self.status = Some(status);
            self.headers = headers;
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

    #[tokio::test]
    async fn greeting_writes_body_and_cache_headers() {
        let mut h = FakeHandler::new();
        greeting(&mut h).await.unwrap();
        assert_eq!(h.status, Some(200));
        assert_eq!(h.written, "Welcome to SockJS!\n");
        assert!(h.headers.iter().any(|(k, _)| k == "Expires"));
    }

    #[tokio::test]
    async fn not_found_writes_default_body_when_no_message_given() {
        let mut h = FakeHandler::new();
        not_found(&mut h, None).await.unwrap();
        assert_eq!(h.status, Some(404));
        assert_eq!(h.written, "404 Error: Not Found");
    }

    #[tokio::test]
    async fn not_found_writes_specific_message_for_unknown_endpoint() {
        let mut h = FakeHandler::new();
        not_found(&mut h, Some("Unknown endpoint nope")).await.unwrap();
        assert_eq!(h.written, "Unknown endpoint nope");
    }

    fn echo_endpoint() -> Arc<Endpoint> {
        Endpoint::new("echo", Arc::new(NoopHandler), EndpointOptions::default())
    }

    #[tokio::test]
    async fn iframe_response_sets_md5_etag_and_is_revalidated_with_304() {
        let endpoint = echo_endpoint();

        let mut first = FakeHandler::new();
        iframe_response(&endpoint, &mut first).await.unwrap();
        assert_eq!(first.status, Some(200));
        assert!(!first.written.is_empty());
        let (_, etag) = first
            .headers
            .iter()
            .find(|(k, _)| k == "ETag")
            .expect("iframe response must set an ETag");
        // MD5 hex digests are 32 hex characters, quoted.
        assert_eq!(etag.len(), 34);

        let mut second = FakeHandler::new();
        second.if_none_match = Some(etag.clone());
        iframe_response(&endpoint, &mut second).await.unwrap();
        assert_eq!(second.status, Some(304));
        assert!(second.written.is_empty());
    }

    #[tokio::test]
    async fn iframe_etag_matches_raw_md5_digest() {
        let endpoint = echo_endpoint();
        let mut h = FakeHandler::new();
        iframe_response(&endpoint, &mut h).await.unwrap();
        let (_, etag) = h.headers.iter().find(|(k, _)| k == "ETag").unwrap();
        let expected = format!("\"{:x}\"", Md5::digest(h.written.as_bytes()));
        assert_eq!(*etag, expected);
    }
}
