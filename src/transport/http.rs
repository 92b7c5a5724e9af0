//! The HTTP surface transports are built against (§6).
//!
//! The HTTP server itself is explicitly out of scope for this crate (§1): an
//! adapter binds the core to whatever host server is in use by implementing
//! [`HttpHandler`]. Everything in this module is pure request/response
//! shaping — header construction, OPTIONS preflight, caching — that every
//! transport needs regardless of which host server it's wired to.

use async_trait::async_trait;

/// The adapter surface a host HTTP server implements to plug into this
/// crate. Roughly: `write`, `start_response`, `socket` (for connection-close
/// detection) and `environ`, per §6.
#[async_trait]
pub trait HttpHandler: Send + Sync {
    fn method(&self) -> &str;
    fn header(&self, name: &str) -> Option<&str>;
    fn query_param(&self, name: &str) -> Option<&str>;

    /// Read the full request body, if any.
    async fn read_body(&mut self) -> std::io::Result<String>;

    /// Begin the response with a status code and header list. Must be
    /// called at most once per request.
    fn start_response(&mut self, status: u16, headers: Vec<(String, String)>);

    /// Append bytes to the response body (after streaming or long-polling
    /// frames, this may be called more than once).
    async fn write(&mut self, data: &str) -> std::io::Result<()>;

    /// Total bytes written so far via [`write`](Self::write) — streaming
    /// transports use this to enforce `response_limit` (§4.6).
    fn bytes_written(&self) -> usize;

    /// Whether the underlying connection is still open. Sending-only
    /// transports race this against message production (§4.6, §5).
    async fn wait_until_disconnected(&mut self);

    /// Read one incoming message frame over a full-duplex connection
    /// (WebSocket). Returns `Ok(None)` once the peer has closed its end.
    ///
    /// HTTP-only adapters that never serve socket transports can leave the
    /// default in place — [`crate::transport::websocket`] only calls this on
    /// a handler it already knows backs a WebSocket upgrade.
    async fn read_message(&mut self) -> std::io::Result<Option<String>> {
        Ok(None)
    }
}

/// Static response-shaping flags a transport declares (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponseShape {
    pub cache: bool,
    pub cors: bool,
    pub cookie: bool,
}

fn cors_headers(handler: &dyn HttpHandler) -> Vec<(String, String)> {
    let mut headers = Vec::new();

    let origin = match handler.header("Origin") {
        None | Some("null") => "*".to_string(),
        Some(origin) => origin.to_string(),
    };

    if let Some(requested) = handler.header("Access-Control-Request-Headers") {
        headers.push((
            "Access-Control-Allow-Headers".to_string(),
            requested.to_string(),
        ));
    }

    headers.push(("Access-Control-Allow-Origin".to_string(), origin));
    headers.push((
        "Access-Control-Allow-Credentials".to_string(),
        "true".to_string(),
    ));

    headers
}

const ONE_YEAR_SECS: u64 = 365 * 24 * 60 * 60;

/// Cache-related headers for a response. Cacheable responses (greeting,
/// iframe) get a year-long `Cache-Control`/`Expires` pair; everything else
/// is marked explicitly non-cacheable (§6).
pub(crate) fn cache_headers(cache: bool) -> Vec<(String, String)> {
    if cache {
        let expires = (chrono::Utc::now() + chrono::Duration::seconds(ONE_YEAR_SECS as i64))
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();
        vec![
            (
                "Cache-Control".to_string(),
                format!("max-age={ONE_YEAR_SECS}, public"),
            ),
            ("Expires".to_string(), expires),
            ("Access-Control-Max-Age".to_string(), ONE_YEAR_SECS.to_string()),
        ]
    } else {
        vec![(
            "Cache-Control".to_string(),
            "no-store, no-cache, must-revalidate, max-age=0".to_string(),
        )]
    }
}

fn cookie_header(handler: &dyn HttpHandler) -> (String, String) {
    let existing = handler
        .header("Cookie")
        .and_then(|raw| {
            raw.split(';')
                .map(str::trim)
                .find_map(|kv| kv.strip_prefix("JSESSIONID="))
        })
        .unwrap_or("dummy");
    (
        "Set-Cookie".to_string(),
        format!("JSESSIONID={existing}; Path=/"),
    )
}

/// Build the full header set for a response: content type, CORS, cache and
/// sticky-cookie headers, following the combination rules in §6.
pub fn response_headers(
    handler: &dyn HttpHandler,
    content_type: Option<&str>,
    shape: ResponseShape,
) -> Vec<(String, String)> {
    let mut headers = Vec::new();

    if let Some(content_type) = content_type {
        headers.push(("Content-Type".to_string(), content_type.to_string()));
    }

    if shape.cors {
        headers.extend(cors_headers(handler));
    }

    headers.extend(cache_headers(shape.cache));

    if shape.cookie {
        headers.push(cookie_header(handler));
    }

    headers
}

/// OPTIONS preflight handling shared by every transport (§4.6 step 1).
///
/// Returns `true` once the request has been fully handled (either a 204
/// preflight response, or a 405 for a disallowed method) — the caller must
/// stop processing. Returns `false` only when the method is one of
/// `allowed` and normal processing should continue.
pub async fn handle_options(handler: &mut dyn HttpHandler, allowed: &'static [&'static str]) -> bool {
    let method = handler.method().to_string();

    if method != "OPTIONS" {
        if allowed.contains(&method.as_str()) {
            return false;
        }

        let mut headers = vec![("Allow".to_string(), allowed.join(", "))];
        headers.push(("Connection".to_string(), "close".to_string()));
        handler.start_response(405, headers);
        return true;
    }

    let mut headers = response_headers(
        handler,
        None,
        ResponseShape {
            cache: true,
            cors: true,
            cookie: true,
        },
    );
    let mut full_methods = vec!["OPTIONS"];
    full_methods.extend(allowed);
    headers.push(("Access-Control-Allow-Methods".to_string(), full_methods.join(", ")));
    handler.start_response(204, headers);
    true
}
