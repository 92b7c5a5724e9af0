//! Connection: the bridge between [`Session`] events and application code
//! (§4.4).

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::Value;

use crate::endpoint::Endpoint;
use crate::session::Session;

/// User-implemented hooks for a single session's lifecycle.
///
/// Applications implement this trait once per endpoint and hand an `Arc` of
/// it to [`Endpoint::new`](crate::endpoint::Endpoint::new); the endpoint
/// wraps each new [`Session`] in its own [`Connection`], which forwards
/// here.
pub trait Handler: Send + Sync {
    /// Called once the session transitions `new -> open`.
    fn on_open(&self, conn: &Connection) {
        let _ = conn;
    }

    /// Called for each message decoded from the client, in order.
    fn on_message(&self, conn: &Connection, message: Value) {
        let _ = (conn, message);
    }

    /// Called once the session reaches a terminal state.
    fn on_close(&self, conn: &Connection) {
        let _ = conn;
    }
}

/// Binds one [`Handler`] instance to one [`Session`] and relays events both
/// ways.
///
/// Forms a reference cycle with `Session` by design (§9 design notes):
/// `Session` holds a strong [`Connection`], `Connection` holds a strong
/// `Session` that it clears on [`close`](Self::close). The cycle is broken
/// the moment either side closes — whichever happens first.
pub struct Connection {
    handler: Arc<dyn Handler>,
    session: RwLock<Option<Arc<Session>>>,
    endpoint: Weak<Endpoint>,
}

impl Connection {
    pub(crate) fn new(
        handler: Arc<dyn Handler>,
        session: Arc<Session>,
        endpoint: Weak<Endpoint>,
    ) -> Arc<Self> {
        Arc::new(Connection {
            handler,
            session: RwLock::new(Some(session)),
            endpoint,
        })
    }

    pub fn on_open(&self) {
        self.handler.on_open(self);
    }

    pub fn on_message(&self, message: Value) {
        self.handler.on_message(self, message);
    }

    pub fn on_close(&self) {
        self.handler.on_close(self);
    }

    /// Queue a message to be delivered to the client. No-op once the
    /// connection has been closed.
    pub fn send(&self, message: Value) {
        if let Some(session) = self.session.read().as_ref() {
            session.add_messages([message]);
        }
    }

    /// Detach from the session, close it, and notify the owning endpoint
    /// that this connection is finished. Idempotent.
    pub fn close(&self) {
        let Some(session) = self.session.write().take() else {
            return;
        };

        session.close(crate::session::SessionState::Closed);

        if let Some(endpoint) = self.endpoint.upgrade() {
            endpoint.connection_closed(session.id());
        }
    }
}
