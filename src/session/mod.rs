//! The Session: a lifetime-managed, lockable message broker.
//!
//! A `Session` is the one piece of state that survives across the several
//! short-lived HTTP requests (or the single long-lived WebSocket) that make
//! up one logical SockJS connection. It owns a FIFO message queue, a
//! lifecycle state machine, and the read/write "channel" locks that keep two
//! transports from fighting over the same connection.
//!
//! ## State machine
//!
//! ```text
//! new ──open()──▶ open ──close()──────▶ closed
//!               ╲ interrupt()/close(Interrupted) ─▶ interrupted
//! ```
//!
//! Terminal states reject `open()` and further state changes; they accept
//! idempotent close calls.

pub mod pool;

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::Notify;

use crate::connection::Connection;
use crate::error::{Result, SockJsError};

/// Default time a session survives with no transport attached (seconds).
pub const DEFAULT_EXPIRY_SECS: u64 = 5;
/// Default interval between heartbeat frames sent to the read owner.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 25;

/// Lifecycle state of a [`Session`] (§3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet opened.
    New,
    /// Opened and usable.
    Open,
    /// A transport operation failed mid-request; session is in an undefined
    /// state and must be torn down.
    Interrupted,
    /// Closed cleanly; ready for garbage collection.
    Closed,
}

/// Capability a transport exposes to the [`Session`] it is attached to.
///
/// Implemented by every concrete transport adapter in [`crate::transport`].
/// The session stores only a [`Weak`] reference to this trait object as its
/// read/write owner — see the module-level docs on [`Session::lock`] for why.
pub trait TransportOwner: Send + Sync {
    /// Push a heartbeat frame down to the client. Called from the session's
    /// background heartbeat task while this transport holds the read lock.
    fn send_heartbeat(&self) -> Result<()>;
}

fn conflicts(
    current: &Option<Weak<dyn TransportOwner>>,
    owner: &Arc<dyn TransportOwner>,
) -> bool {
    match current.as_ref().and_then(Weak::upgrade) {
        // Unowned, or the previous owner's Arc has already been dropped
        // (it crashed or exited without unlocking) — the weak reference
        // doesn't keep it pinned, so we treat this the same as unowned.
        None => false,
        Some(existing) => !Arc::ptr_eq(&existing, owner),
    }
}

/// A bidirectional, transport-agnostic message channel with a unique id and
/// lifecycle (§3, §4.2).
pub struct Session {
    id: String,
    state: RwLock<SessionState>,
    ttl: Duration,
    expires_at: RwLock<Option<Instant>>,
    queue: Mutex<VecDeque<Value>>,
    notify: Notify,
    read_owner: RwLock<Option<Weak<dyn TransportOwner>>>,
    write_owner: RwLock<Option<Weak<dyn TransportOwner>>>,
    connection: RwLock<Option<Arc<Connection>>>,
    heartbeat_interval: Duration,
}

impl Session {
    /// Build a new session in the `new` state, with `ttl` seconds of grace
    /// before an un-touched session expires.
    pub fn new(id: impl Into<String>, ttl: Duration, heartbeat_interval: Duration) -> Arc<Self> {
        let id = id.into();
        let session = Arc::new(Session {
            id: id.clone(),
            state: RwLock::new(SessionState::New),
            ttl,
            expires_at: RwLock::new(Some(Instant::now() + ttl)),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            read_owner: RwLock::new(None),
            write_owner: RwLock::new(None),
            connection: RwLock::new(None),
            heartbeat_interval,
        });
        tracing::debug!(session_id = %id, ttl_secs = ttl.as_secs(), "session created");
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_new(&self) -> bool {
        self.state() == SessionState::New
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    pub fn is_interrupted(&self) -> bool {
        self.state() == SessionState::Interrupted
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Attach the application-level [`Connection`] that will receive this
    /// session's open/message/close events.
    pub fn bind(&self, connection: Arc<Connection>) {
        *self.connection.write() = Some(connection);
    }

    /// Append messages to the tail of the queue, bump the TTL and wake any
    /// pending [`get_messages`](Self::get_messages) caller. No-op for an
    /// empty iterator.
    pub fn add_messages(&self, messages: impl IntoIterator<Item = Value>) {
        let mut added = false;
        {
            let mut queue = self.queue.lock();
            for message in messages {
                queue.push_back(message);
                added = true;
            }
        }
        if added {
            self.touch();
            self.notify.notify_one();
        }
    }

    /// Drain all immediately available messages; if none are queued, wait
    /// up to `timeout` for at least one to arrive. Bumps the TTL.
    pub async fn get_messages(&self, timeout: Duration) -> Vec<Value> {
        self.touch();

        if let Some(batch) = self.drain_queue() {
            return batch;
        }

        let wait_for_message = async {
            loop {
                let notified = self.notify.notified();
                if let Some(batch) = self.drain_queue() {
                    return batch;
                }
                notified.await;
                if let Some(batch) = self.drain_queue() {
                    return batch;
                }
                // Closed/interrupted with nothing queued: stop waiting so
                // the caller can notice the state change right away instead
                // of sitting out the rest of `timeout`.
                if !self.is_open() {
                    return Vec::new();
                }
            }
        };

        tokio::time::timeout(timeout, wait_for_message)
            .await
            .unwrap_or_default()
    }

    fn drain_queue(&self) -> Option<Vec<Value>> {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            None
        } else {
            Some(queue.drain(..).collect())
        }
    }

    /// Transition `new -> open` and invoke the bound connection's open hook.
    ///
    /// Panics if the session is not in the `new` state — this is a
    /// programmer error (a transport calling `open()` twice), not a
    /// recoverable runtime condition (§7).
    pub fn open(&self) {
        {
            let mut state = self.state.write();
            assert!(
                matches!(*state, SessionState::New),
                "session {} cannot be opened from state {:?}",
                self.id,
                *state
            );
            *state = SessionState::Open;
        }
        tracing::debug!(session_id = %self.id, "session opened");
        if let Some(conn) = self.connection.read().clone() {
            conn.on_open();
        }
    }

    /// Transition to a terminal state (`closed` or `interrupted`) and invoke
    /// the bound connection's close hook exactly once. Idempotent: once in a
    /// terminal state, further calls are no-ops.
    pub fn close(&self, reason: SessionState) {
        debug_assert!(matches!(
            reason,
            SessionState::Closed | SessionState::Interrupted
        ));

        {
            let mut state = self.state.write();
            if matches!(*state, SessionState::Closed | SessionState::Interrupted) {
                return;
            }
            *state = reason;
        }

        tracing::debug!(session_id = %self.id, ?reason, "session closed");

        // Wake anyone parked in get_messages so a pump blocked on a pooled
        // read immediately notices the state change instead of only finding
        // out once its idle timeout elapses.
        self.notify.notify_waiters();

        if let Some(conn) = self.connection.write().take() {
            conn.on_close();
        }
    }

    /// `close(Interrupted)`.
    pub fn interrupt(&self) {
        self.close(SessionState::Interrupted);
    }

    /// Forward messages to the bound connection's message hook, in order.
    /// Silently drops them if no connection is bound.
    pub fn dispatch(&self, messages: impl IntoIterator<Item = Value>) {
        let Some(conn) = self.connection.read().clone() else {
            return;
        };
        for message in messages {
            conn.on_message(message);
        }
    }

    /// Bump `expires_at` to `now + ttl`.
    pub fn touch(&self) {
        *self.expires_at.write() = Some(Instant::now() + self.ttl);
    }

    /// Set (or clear, with `None`) the absolute expiry.
    pub fn set_expiry(&self, expiry: Option<Instant>) {
        *self.expires_at.write() = expiry;
    }

    /// A session has expired once it's in a terminal state, or once
    /// `expires_at` (if any) has passed.
    pub fn has_expired(&self, now: Instant) -> bool {
        if self.is_closed() || self.is_interrupted() {
            return true;
        }
        match *self.expires_at.read() {
            None => false,
            Some(expires_at) => expires_at <= now,
        }
    }

    /// The channel-acquisition protocol (§4.2).
    ///
    /// Fails immediately if the session is terminal. Otherwise, for each
    /// requested channel: a different live owner fails the whole call
    /// (restoring both channels to their prior owners); the same owner
    /// re-acquiring is idempotent; an unowned or abandoned (dropped) channel
    /// is granted to `owner`.
    pub fn lock(
        &self,
        owner: &Arc<dyn TransportOwner>,
        want_read: bool,
        want_write: bool,
    ) -> Result<()> {
        match self.state() {
            SessionState::Interrupted => return Err(SockJsError::interrupted()),
            SessionState::Closed => return Err(SockJsError::go_away()),
            _ => {}
        }
        self.make_owner(Some(owner), want_read, want_write, owner)
    }

    /// Release channels currently held by `owner`. Never clears a different
    /// owner's lock.
    pub fn unlock(&self, owner: &Arc<dyn TransportOwner>, want_read: bool, want_write: bool) {
        let _ = self.make_owner(None, want_read, want_write, owner);
    }

    fn make_owner(
        &self,
        new_owner: Option<&Arc<dyn TransportOwner>>,
        want_read: bool,
        want_write: bool,
        compare: &Arc<dyn TransportOwner>,
    ) -> Result<()> {
        let mut read_owner = self.read_owner.write();
        let mut write_owner = self.write_owner.write();
        let orig_read = read_owner.clone();
        let orig_write = write_owner.clone();

        let mut failure = None;

        if want_read {
            if conflicts(&orig_read, compare) {
                failure = Some(SockJsError::already_open());
            } else {
                *read_owner = new_owner.map(Arc::downgrade);
            }
        }

        if failure.is_none() && want_write {
            if conflicts(&orig_write, compare) {
                failure = Some(SockJsError::already_open());
            } else {
                *write_owner = new_owner.map(Arc::downgrade);
            }
        }

        if let Some(err) = failure {
            *read_owner = orig_read;
            *write_owner = orig_write;
            return Err(err);
        }

        Ok(())
    }

    /// Spawn the cooperative heartbeat task. Every `heartbeat_interval` it
    /// pushes a heartbeat frame through the current read owner; it exits
    /// once the session is no longer open, the read owner is gone, or the
    /// send fails.
    pub fn start_heartbeat(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(session.heartbeat_interval).await;

                if !session.is_open() {
                    break;
                }

                let reader = session.read_owner.read().clone();
                let Some(reader) = reader.and_then(|w| w.upgrade()) else {
                    break;
                };

                if reader.send_heartbeat().is_err() {
                    break;
                }
            }
        })
    }
}
