//! # sockjs — SockJS server-side protocol core
//!
//! A Rust implementation of the server side of the [SockJS
//! protocol](https://github.com/sockjs/sockjs-protocol): session lifecycle,
//! the nine wire transports, URL routing, and the HTTP surface concerns
//! (CORS, caching, the sticky session cookie) that every transport shares.
//!
//! The HTTP server itself is explicitly out of scope — embedding this crate
//! in a real service means implementing [`transport::http::HttpHandler`]
//! against whatever host server is in use, then calling
//! [`Application::handle`] once per request.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  Adapters (host HTTP server)              │
//! ├──────────────────────────────────────────┤
//! │  Application   — endpoint registry, route │
//! │  Endpoint      — per-URL config, sessions │
//! ├──────────────────────────────────────────┤
//! │  Router        — path grammar             │
//! │  Connection    — session ↔ app callbacks  │
//! │  Session/Pool  — lifecycle, lock, GC      │
//! ├──────────────────────────────────────────┤
//! │  Transport     — per-wire framing/pumps   │
//! │  Protocol      — frame encode/decode      │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sockjs::{Application, EndpointOptions};
//! use sockjs::connection::{Connection, Handler};
//!
//! struct Echo;
//! impl Handler for Echo {
//!     fn on_message(&self, conn: &Connection, message: serde_json::Value) {
//!         conn.send(message);
//!     }
//! }
//!
//! let app = Application::new(EndpointOptions::default());
//! app.add_endpoint("echo", Arc::new(Echo)).unwrap();
//! app.start();
//! ```
//!
//! ## Crate layout
//!
//! - [`application`] — [`Application`], the endpoint registry and request router.
//! - [`endpoint`] — [`endpoint::Endpoint`], per-URL options and session resolution.
//! - [`router`] — URL path grammar.
//! - [`connection`] — [`connection::Connection`] and the [`connection::Handler`] trait.
//! - [`session`] — [`session::Session`] state machine, lock protocol, and [`session::pool`].
//! - [`transport`] — Per-wire transports and the shared request lifecycle.
//! - [`protocol`] — Frame encode/decode.
//! - [`error`] — [`SockJsError`] and [`Result`].

pub mod application;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod router;
pub mod session;
pub mod transport;

pub use application::Application;
pub use endpoint::{Endpoint, EndpointOptions};
pub use error::{Result, SockJsError};
pub use session::Session;
