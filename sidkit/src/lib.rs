//! sidkit issues a session identifier to every client through a cookie,
//! keeps a small JSON document per session in a pluggable store, and hands
//! each request a [`Session`] handle for reading and writing that document.
//!
//! ## Pieces
//!
//! * [`store`] — the [`SessionStore`] (blocking) and [`AsyncSessionStore`]
//!   (future-returning) contracts, plus three implementations: an in-memory
//!   store, a SQLite store that blocks the caller, and a SQLite store whose
//!   connection lives on a dedicated worker thread.
//! * [`document`] — the JSON document kept per session and its stored form.
//! * [`middleware`] — the [`SessionLayer`] `tower` layer that resolves or
//!   creates the session id and manages the cookie.
//! * [`session`] — the per-request [`Session`] handle.
//! * [`config`] — cookie and store configuration, loadable from TOML.
//!
//! ## Example
//!
//! ```
//! use sidkit::config::SessionConfig;
//! use sidkit::store::memory::MemoryStore;
//! use sidkit::{Session, SessionLayer};
//! use tower::{Layer, ServiceExt, service_fn};
//!
//! # #[tokio::main]
//! # async fn main() -> sidkit::Result<()> {
//! let layer = SessionLayer::new(MemoryStore::new(), SessionConfig::default());
//! let service = layer.layer(service_fn(|request: http::Request<String>| async move {
//!     let session = Session::from_request(&request);
//!     session.set("name", "shantaram").await?;
//!     Ok::<_, sidkit::Error>(http::Response::new(String::new()))
//! }));
//!
//! let response = service.oneshot(http::Request::new(String::new())).await?;
//! assert!(response.headers().contains_key(http::header::SET_COOKIE));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs, rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod document;
mod error;
pub mod middleware;
mod serializers;
pub mod session;
pub mod store;

pub use document::Document;
pub use error::Error;
pub use middleware::{SessionLayer, SessionManager};
pub use session::Session;
pub use store::{AsyncSessionStore, SessionId, SessionStore};

/// A type alias for a result that can return a [`sidkit::Error`](Error).
pub type Result<T> = std::result::Result<T, Error>;
