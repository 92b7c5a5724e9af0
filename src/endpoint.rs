//! Endpoint: per-URL configuration, session factory, and transport
//! allow-list (§3, §4.5).

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;

use crate::connection::{Connection, Handler};
use crate::error::Result;
use crate::session::pool::SessionPool;
use crate::session::Session;

/// Options inherited from the owning [`Application`](crate::application::Application),
/// with per-endpoint overrides.
///
/// All fields are overwritten by a more specific value except
/// `disabled_transports`, which is additive (§4.5) — applying a second set
/// of options only ever grows the disabled list.
#[derive(Debug, Clone)]
pub struct EndpointOptions {
    /// Whether to set a sticky `JSESSIONID` cookie on every response.
    pub use_cookie: bool,
    /// URL of the SockJS client library, referenced by the iframe transport.
    pub client_url: Option<String>,
    /// Transport names (e.g. `"websocket"`, `"xhr_streaming"`) this endpoint
    /// refuses to serve.
    pub disabled_transports: Vec<String>,
    /// Interval between heartbeat frames on sessions under this endpoint.
    pub heartbeat_interval: Duration,
    /// Session TTL used when a session has no active transport.
    pub session_expiry: Duration,
    /// Cadence of the owned session pool's GC pass.
    pub gc_cycle: Duration,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        EndpointOptions {
            use_cookie: false,
            client_url: Some(
                "https://d1fxtkz8shb9d2.cloudfront.net/sockjs-0.3.min.js".to_string(),
            ),
            disabled_transports: Vec::new(),
            heartbeat_interval: Duration::from_secs(crate::session::DEFAULT_HEARTBEAT_INTERVAL_SECS),
            session_expiry: Duration::from_secs(crate::session::DEFAULT_EXPIRY_SECS),
            gc_cycle: Duration::from_secs(crate::session::pool::DEFAULT_GC_CYCLE_SECS),
        }
    }
}

impl EndpointOptions {
    /// Merge `other` into `self`: scalar fields are overwritten, and
    /// `disabled_transports` is extended (§4.5).
    pub fn apply(&mut self, other: &EndpointOptions) {
        self.use_cookie = other.use_cookie;
        self.client_url = other.client_url.clone();
        self.heartbeat_interval = other.heartbeat_interval;
        self.session_expiry = other.session_expiry;
        self.gc_cycle = other.gc_cycle;
        self.disabled_transports
            .extend(other.disabled_transports.iter().cloned());
    }
}

/// The `/info` endpoint response body (§6).
#[derive(Debug, Clone, serde::Serialize)]
pub struct InfoResponse {
    pub cookie_needed: bool,
    pub websocket: bool,
    pub origins: Vec<String>,
    pub entropy: u32,
    pub server_heartbeat_interval: f64,
}

/// A named SockJS application mounted at one URL prefix, e.g. `/echo`.
///
/// Owns exactly one [`SessionPool`] while started, builds a fresh
/// [`Connection`] for each new session via its [`Handler`], and enforces the
/// session-resolution matrix described on [`get_session_for_transport`](Self::get_session_for_transport).
pub struct Endpoint {
    name: String,
    handler: Arc<dyn Handler>,
    options: RwLock<EndpointOptions>,
    pool: RwLock<Option<Arc<SessionPool>>>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, handler: Arc<dyn Handler>, options: EndpointOptions) -> Arc<Self> {
        Arc::new(Endpoint {
            name: name.into(),
            handler,
            options: RwLock::new(options),
            pool: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> EndpointOptions {
        self.options.read().clone()
    }

    /// Merge inherited application-level defaults (§4.5). Called by
    /// [`Application::add_endpoint`](crate::application::Application::add_endpoint).
    pub fn inherit_defaults(&self, defaults: &EndpointOptions) {
        let mut merged = defaults.clone();
        merged.apply(&self.options.read());
        *self.options.write() = merged;
    }

    pub fn transport_allowed(&self, transport: &str) -> bool {
        !self
            .options
            .read()
            .disabled_transports
            .iter()
            .any(|t| t == transport)
    }

    /// Build a fresh [`Connection`] wired to `session`, bind it to the
    /// session, and invoke its open hook is the caller's responsibility
    /// (mirrors §4.6 step 5: only `new` sessions get opened).
    pub fn make_connection(self: &Arc<Self>, session: Arc<Session>) -> Arc<Connection> {
        let conn = Connection::new(
            self.handler.clone(),
            session.clone(),
            Arc::downgrade(self),
        );
        session.bind(conn.clone());
        conn
    }

    /// Called by [`Connection::close`] once a connection has detached from
    /// its session. The pool itself is only pruned by the GC cycle or an
    /// explicit [`SessionPool::remove`] — this hook exists purely so
    /// endpoints can observe connection turnover (e.g. for logging/metrics).
    pub(crate) fn connection_closed(&self, session_id: &str) {
        tracing::debug!(endpoint = %self.name, session_id, "connection closed");
    }

    /// The session-resolution matrix (§4.5):
    ///
    /// | shape | known id? | behaviour |
    /// |---|---|---|
    /// | socket (read+write) | any | fresh session, not pooled |
    /// | read-only | in pool | return it |
    /// | read-only | not in pool | create + pool it |
    /// | write-only | in pool | return it |
    /// | write-only | not in pool | `None` (caller 404s) |
    pub fn get_session_for_transport(
        self: &Arc<Self>,
        session_id: Option<&str>,
        readable: bool,
        writable: bool,
    ) -> Result<Option<Arc<Session>>> {
        if readable && writable {
            let opts = self.options();
            let id = session_id
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let session = Session::new(id, opts.session_expiry, opts.heartbeat_interval);
            self.make_connection(session.clone());
            return Ok(Some(session));
        }

        let pool = self.pool.read().clone();
        let Some(pool) = pool else {
            return Err(crate::error::SockJsError::EndpointStopped);
        };
        let Some(session_id) = session_id else {
            return Ok(None);
        };

        if let Some(existing) = pool.get(session_id) {
            return Ok(Some(existing));
        }

        if !readable {
            // Writable-only transports never create a session.
            return Ok(None);
        }

        let opts = self.options();
        let session = Session::new(session_id.to_string(), opts.session_expiry, opts.heartbeat_interval);
        self.make_connection(session.clone());
        pool.add(session.clone())?;
        Ok(Some(session))
    }

    pub fn get_info(&self) -> InfoResponse {
        let opts = self.options();
        InfoResponse {
            cookie_needed: opts.use_cookie,
            websocket: self.transport_allowed("websocket"),
            origins: vec!["*:*".to_string()],
            entropy: rand::rng().random_range(1..=u32::MAX),
            server_heartbeat_interval: opts.heartbeat_interval.as_secs_f64(),
        }
    }

    /// Start the owned session pool. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut pool_slot = self.pool.write();
        if pool_slot.is_some() {
            return;
        }
        let pool = SessionPool::new(self.options().gc_cycle);
        pool.start();
        *pool_slot = Some(pool);
        tracing::info!(endpoint = %self.name, "endpoint started");
    }

    /// Stop the owned session pool, interrupting every live session.
    pub fn stop(&self) {
        if let Some(pool) = self.pool.write().take() {
            pool.stop();
        }
        tracing::info!(endpoint = %self.name, "endpoint stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;
    impl Handler for NoopHandler {}

    fn echo_endpoint() -> Arc<Endpoint> {
        Endpoint::new("echo", Arc::new(NoopHandler), EndpointOptions::default())
    }

    #[test]
    fn socket_shape_requests_without_an_id_get_distinct_fresh_sessions() {
        let endpoint = echo_endpoint();
        let a = endpoint.get_session_for_transport(None, true, true).unwrap().unwrap();
        let b = endpoint.get_session_for_transport(None, true, true).unwrap().unwrap();
        assert_ne!(a.id(), b.id());
    }
}
