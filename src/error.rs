//! Error types for the SockJS server core.

/// Known close code / reason pairs written into `c[code,"reason"]` frames.
pub mod close_codes {
    pub const CONN_INTERRUPTED: (u16, &str) = (1002, "Connection interrupted");
    pub const CONN_ALREADY_OPEN: (u16, &str) = (2010, "Another connection still open");
    pub const GO_AWAY: (u16, &str) = (3000, "Go away!");
}

/// Errors that can occur in the SockJS server core.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`InvalidPayload`](Self::InvalidPayload) — malformed message bodies.
/// - **Session**: [`SessionUnavailable`](Self::SessionUnavailable) — the lock
///   protocol rejected an acquisition attempt.
/// - **Transport**: [`Transport`](Self::Transport) — a required part of the
///   request (e.g. a JSONP callback) was missing.
/// - **Routing**: [`NotFound`](Self::NotFound), [`MethodNotAllowed`](Self::MethodNotAllowed).
/// - **Application**: [`DuplicateEndpoint`](Self::DuplicateEndpoint),
///   [`DuplicateSession`](Self::DuplicateSession), [`EndpointStopped`](Self::EndpointStopped) —
///   programmer errors, not expected to be handled by callers.
#[derive(Debug, thiserror::Error)]
pub enum SockJsError {
    /// The request body was not a well-formed JSON array of messages.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Raised by [`Session::lock`](crate::session::Session::lock) when the
    /// session is terminal or the requested channel is already owned by a
    /// different transport.
    #[error("{reason}")]
    SessionUnavailable { code: u16, reason: String },

    /// A transport-level precondition failed (missing body, missing JSONP
    /// callback, unsupported content type).
    #[error("transport error: {0}")]
    Transport(String),

    /// No route matched the request path.
    #[error("not found: {0}")]
    NotFound(String),

    /// The path matched a route but the HTTP method did not.
    #[error("method not allowed, expected one of: {0:?}")]
    MethodNotAllowed(Vec<&'static str>),

    /// [`Application::add_endpoint`](crate::application::Application::add_endpoint)
    /// was called with a name that is already registered.
    #[error("endpoint already registered: {0}")]
    DuplicateEndpoint(String),

    /// [`SessionPool::add`](crate::session::pool::SessionPool::add) was called
    /// with a session id already present, or a session not in the `new` state.
    #[error("duplicate or non-new session: {0}")]
    DuplicateSession(String),

    /// A session operation was attempted on an [`Endpoint`](crate::endpoint::Endpoint)
    /// whose pool has not been started (or has already been stopped).
    #[error("endpoint is not started")]
    EndpointStopped,

    /// The client went away mid-request. Logged, not surfaced to callers in
    /// most code paths — see [`crate::transport::BaseTransport::handle`].
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),
}

impl SockJsError {
    pub fn interrupted() -> Self {
        let (code, reason) = close_codes::CONN_INTERRUPTED;
        Self::SessionUnavailable {
            code,
            reason: reason.to_string(),
        }
    }

    pub fn already_open() -> Self {
        let (code, reason) = close_codes::CONN_ALREADY_OPEN;
        Self::SessionUnavailable {
            code,
            reason: reason.to_string(),
        }
    }

    pub fn go_away() -> Self {
        let (code, reason) = close_codes::GO_AWAY;
        Self::SessionUnavailable {
            code,
            reason: reason.to_string(),
        }
    }

    /// Close code/reason pair to write as a `c[...]` frame, if this is a
    /// [`SessionUnavailable`](Self::SessionUnavailable) error.
    pub fn close_frame_parts(&self) -> Option<(u16, &str)> {
        match self {
            Self::SessionUnavailable { code, reason } => Some((*code, reason.as_str())),
            _ => None,
        }
    }
}

/// Convenience alias for `Result<T, SockJsError>`.
pub type Result<T> = std::result::Result<T, SockJsError>;
