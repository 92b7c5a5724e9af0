//! End-to-end scenarios driven straight through [`sockjs::Application::handle`],
//! standing in for an adapter wired to a real HTTP server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sockjs::connection::{Connection, Handler};
use sockjs::transport::http::HttpHandler;
use sockjs::{Application, EndpointOptions};

/// A request/response double good enough to drive [`Application::handle`]
/// without a real socket: body and query params are supplied up front, the
/// response is captured for assertions.
struct FakeHandler {
    method: String,
    query: HashMap<String, String>,
    body: String,
    if_none_match: Option<String>,
    status: Option<u16>,
    headers: Vec<(String, String)>,
    written: String,
}

impl FakeHandler {
    fn get(path_and_query: &str) -> Self {
        FakeHandler {
            method: "GET".to_string(),
            query: parse_query(path_and_query),
            body: String::new(),
            if_none_match: None,
            status: None,
            headers: Vec::new(),
            written: String::new(),
        }
    }

    fn post(body: &str) -> Self {
        FakeHandler {
            method: "POST".to_string(),
            query: HashMap::new(),
            body: body.to_string(),
            if_none_match: None,
            status: None,
            headers: Vec::new(),
            written: String::new(),
        }
    }

    /// `xhr` and `xhr_streaming` are polled with an empty-bodied POST, not a
    /// GET — matching the wire protocol every SockJS client speaks.
    fn poll() -> Self {
        FakeHandler::post("")
    }
}

fn parse_query(path_and_query: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let Some((_, query)) = path_and_query.split_once('?') {
        for pair in query.split('&') {
            if let Some((k, v)) = pair.split_once('=') {
                out.insert(k.to_string(), v.to_string());
            }
        }
    }
    out
}

#[async_trait]
impl HttpHandler for FakeHandler {
    fn method(&self) -> &str {
        &self.method
    }
    fn header(&self, name: &str) -> Option<&str> {
        if name == "Content-Type" && self.body.starts_with("d=") {
            Some("application/x-www-form-urlencoded")
        } else if name == "If-None-Match" {
            self.if_none_match.as_deref()
        } else {
            None
        }
    }
    fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
    async fn read_body(&mut self) -> std::io::Result<String> {
        Ok(self.body.clone())
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

struct Echo;
impl Handler for Echo {
    fn on_message(&self, conn: &Connection, message: serde_json::Value) {
        conn.send(message);
    }
}

fn echo_app(defaults: EndpointOptions) -> Arc<Application> {
    let app = Application::new(defaults);
    app.add_endpoint("echo", Arc::new(Echo)).unwrap();
    app.start();
    app
}

#[tokio::test]
async fn polling_round_trip_open_send_receive() {
    let app = echo_app(EndpointOptions::default());

    let mut open = FakeHandler::poll();
    app.handle("/echo/abc/xyz/xhr", &mut open).await.unwrap();
    assert_eq!(open.status, Some(200));
    assert_eq!(open.written, "o\n");

    let mut send = FakeHandler::post(r#"["hello"]"#);
    app.handle("/echo/abc/xyz/xhr_send", &mut send).await.unwrap();
    assert_eq!(send.status, Some(204));

    let mut poll = FakeHandler::poll();
    app.handle("/echo/abc/xyz/xhr", &mut poll).await.unwrap();
    assert_eq!(poll.status, Some(200));
    assert_eq!(poll.written, "a[\"hello\"]\n");
}

#[tokio::test]
async fn xhr_send_rejects_malformed_payload() {
    let app = echo_app(EndpointOptions::default());

    let mut open = FakeHandler::poll();
    app.handle("/echo/abc/xyz/xhr", &mut open).await.unwrap();

    let mut send = FakeHandler::post("not json");
    app.handle("/echo/abc/xyz/xhr_send", &mut send).await.unwrap();
    assert_eq!(send.status, Some(500));
    assert!(!send.written.is_empty());
}

#[tokio::test]
async fn xhr_send_against_unknown_session_is_404() {
    let app = echo_app(EndpointOptions::default());

    let mut send = FakeHandler::post(r#"["hi"]"#);
    app.handle("/echo/abc/never-opened/xhr_send", &mut send)
        .await
        .unwrap();
    assert_eq!(send.status, Some(404));
}

#[tokio::test]
async fn second_concurrent_reader_is_rejected_with_conflict_close_frame() {
    let app = echo_app(EndpointOptions::default());

    // First poll opens the session (returns "o" immediately, lock released).
    let mut open = FakeHandler::poll();
    app.handle("/echo/abc/xyz/xhr", &mut open).await.unwrap();
    assert_eq!(open.written, "o\n");

    // A long poll against the now-open session holds the read lock while it
    // waits for a message or its idle timeout.
    let app_bg = app.clone();
    let holder = tokio::spawn(async move {
        let mut h = FakeHandler::poll();
        let _ = app_bg.handle("/echo/abc/xyz/xhr", &mut h).await;
        h
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    // A second reader arriving while the first is still parked is rejected
    // outright, with the "already open" close frame.
    let mut conflict = FakeHandler::poll();
    app.handle("/echo/abc/xyz/xhr", &mut conflict).await.unwrap();
    assert_eq!(conflict.written, "c[2010,\"Another connection still open\"]\n");

    holder.abort();
}

#[tokio::test]
async fn expired_session_is_replaced_by_a_fresh_one() {
    let mut defaults = EndpointOptions::default();
    defaults.session_expiry = Duration::from_millis(20);
    defaults.gc_cycle = Duration::from_millis(10);
    let app = echo_app(defaults);

    let mut open = FakeHandler::poll();
    app.handle("/echo/abc/xyz/xhr", &mut open).await.unwrap();
    assert_eq!(open.written, "o\n");

    // Nobody reattaches before the session expires and gets swept.
    tokio::time::sleep(Duration::from_millis(80)).await;

    let mut reopened = FakeHandler::poll();
    app.handle("/echo/abc/xyz/xhr", &mut reopened).await.unwrap();
    assert_eq!(
        reopened.written, "o\n",
        "the old session should have been garbage collected, so this looks new again"
    );
}

#[tokio::test]
async fn stopping_the_application_interrupts_live_streams() {
    let app = echo_app(EndpointOptions::default());

    let app_bg = app.clone();
    let stream = tokio::spawn(async move {
        let mut h = FakeHandler::poll();
        app_bg
            .handle("/echo/abc/xyz/xhr_streaming", &mut h)
            .await
            .unwrap();
        h
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    app.stop();

    let h = stream.await.unwrap();
    assert!(
        h.written.ends_with("c[1002,\"Connection interrupted\"]\n"),
        "got: {:?}",
        h.written
    );
}

#[tokio::test]
async fn info_response_reports_endpoint_capabilities() {
    let app = echo_app(EndpointOptions::default());

    let mut h = FakeHandler::get("/echo/info");
    app.handle("/echo/info", &mut h).await.unwrap();
    assert_eq!(h.status, Some(200));
    let body: serde_json::Value = serde_json::from_str(&h.written).unwrap();
    assert_eq!(body["websocket"], true);
    assert_eq!(body["cookie_needed"], false);
}

#[tokio::test]
async fn iframe_page_is_cached_for_a_year() {
    let app = echo_app(EndpointOptions::default());

    let mut h = FakeHandler::get("/echo/iframe-0.1.2.html");
    app.handle("/echo/iframe-0.1.2.html", &mut h).await.unwrap();
    assert_eq!(h.status, Some(200));
    assert!(h.written.contains("SockJS.bootstrap_iframe()"));
    assert!(h
        .headers
        .iter()
        .any(|(k, v)| k == "Cache-Control" && v.contains("max-age=31536000")));
    assert!(h.headers.iter().any(|(k, _)| k == "Expires"));
}

#[tokio::test]
async fn iframe_page_is_revalidated_with_if_none_match() {
    let app = echo_app(EndpointOptions::default());

    let mut first = FakeHandler::get("/echo/iframe-0.1.2.html");
    app.handle("/echo/iframe-0.1.2.html", &mut first).await.unwrap();
    let (_, etag) = first.headers.iter().find(|(k, _)| k == "ETag").unwrap();

    let mut second = FakeHandler::get("/echo/iframe-0.1.2.html");
    second.if_none_match = Some(etag.clone());
    app.handle("/echo/iframe-0.1.2.html", &mut second).await.unwrap();
    assert_eq!(second.status, Some(304));
    assert!(second.written.is_empty());
}

#[tokio::test]
async fn malformed_paths_and_unknown_endpoints_are_404() {
    let app = echo_app(EndpointOptions::default());

    for path in [
        "/echo/bar.",
        "/echo/bar/baz.",
        "/echo/bar/baz/gak/",
        "/nope/info",
        "/echo/abc/xyz/not_a_transport",
    ] {
        let mut h = FakeHandler::get(path);
        app.handle(path, &mut h).await.unwrap();
        assert_eq!(h.status, Some(404), "expected 404 for {path}");
        assert!(!h.written.is_empty(), "expected a 404 body for {path}");
    }
}

#[tokio::test]
async fn unknown_endpoint_name_gets_a_specific_404_body() {
    let app = echo_app(EndpointOptions::default());

    let mut h = FakeHandler::get("/nope/info");
    app.handle("/nope/info", &mut h).await.unwrap();
    assert_eq!(h.status, Some(404));
    assert_eq!(h.written, "Unknown endpoint nope");
}

#[tokio::test]
async fn bare_root_is_the_greeting() {
    let app = echo_app(EndpointOptions::default());

    let mut h = FakeHandler::get("/");
    app.handle("/", &mut h).await.unwrap();
    assert_eq!(h.status, Some(200));
    assert_eq!(h.written, "Welcome to SockJS!\n");
    assert!(h.headers.iter().any(|(k, _)| k == "Expires"));
}
