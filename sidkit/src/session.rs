//! The per-request session handle.
//!
//! [`SessionLayer`](crate::SessionLayer) inserts a [`Session`] into the
//! extensions of every request it handles. Handlers get it back with
//! [`Session::from_request`], or, with the `axum` feature enabled, by taking a
//! [`Session`] argument.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//!
//! use sidkit::store::memory::MemoryStore;
//! use sidkit::{Session, SessionId};
//!
//! # #[tokio::main]
//! # async fn main() -> sidkit::Result<()> {
//! let session = Session::new(SessionId::generate(), Arc::new(MemoryStore::new()));
//!
//! session.set("user_name", "world").await?;
//! let name: String = session
//!     .get_as("user_name")
//!     .await?
//!     .expect("name was just added");
//! assert_eq!(name, "world");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use derive_more::Debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::document::Document;
use crate::store::{AsyncSessionStore, BoxSessionStore, SessionId};

/// A session bound to one client.
///
/// The handle keeps no copy of the session document: every call goes to the
/// store. Cloning is cheap, and clones share the same state.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    id: SessionId,
    #[debug("..")]
    store: Arc<dyn BoxSessionStore>,
    is_new: bool,
    destroyed: AtomicBool,
}

impl Session {
    /// Creates a handle for an existing session id backed by `store`.
    ///
    /// The session is not created in the store here; the first access does
    /// that, since fetching a missing session creates it.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use sidkit::store::memory::MemoryStore;
    /// use sidkit::{Session, SessionId};
    ///
    /// let session = Session::new(SessionId::generate(), Arc::new(MemoryStore::new()));
    /// assert!(!session.is_new());
    /// ```
    #[must_use]
    pub fn new<S: AsyncSessionStore>(id: SessionId, store: Arc<S>) -> Self {
        Self::with_store(id, store, false)
    }

    pub(crate) fn with_store(id: SessionId, store: Arc<dyn BoxSessionStore>, is_new: bool) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                store,
                is_new,
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the id of this session.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    /// Returns `true` if the session was created while handling the current
    /// request, in which case the response carries a new session cookie.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.inner.is_new
    }

    /// Returns the value stored under `key`.
    ///
    /// `None` means the key is absent; stored values such as `0`, `false`,
    /// `""` or `null` are returned as they are.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails.
    pub async fn get(&self, key: &str) -> crate::Result<Option<Value>> {
        Ok(self.inner.store.get(&self.inner.id, key).await?)
    }

    /// Returns the value stored under `key`, converted to `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails or the stored value
    /// cannot be converted to `T`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use sidkit::store::memory::MemoryStore;
    /// use sidkit::{Session, SessionId};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> sidkit::Result<()> {
    /// let session = Session::new(SessionId::generate(), Arc::new(MemoryStore::new()));
    /// session.set("visits", 3).await?;
    ///
    /// assert_eq!(session.get_as::<u32>("visits").await?, Some(3));
    /// assert_eq!(session.get_as::<u32>("missing").await?, None);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> crate::Result<Option<T>> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be converted to JSON or the
    /// session store fails.
    pub async fn set<V: Serialize>(&self, key: &str, value: V) -> crate::Result<()> {
        let value = serde_json::to_value(value)?;
        Ok(self.inner.store.set(&self.inner.id, key, value).await?)
    }

    /// Removes `key` from the session. Removing an absent key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails.
    pub async fn delete(&self, key: &str) -> crate::Result<()> {
        Ok(self.inner.store.delete(&self.inner.id, key).await?)
    }

    /// Removes every key from the session. The session itself is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails.
    pub async fn clear(&self) -> crate::Result<()> {
        Ok(self.inner.store.clear(&self.inner.id).await?)
    }

    /// Returns the whole session document.
    ///
    /// # Errors
    ///
    /// Returns an error if the session store fails.
    pub async fn document(&self) -> crate::Result<Document> {
        Ok(self.inner.store.get_session(&self.inner.id).await?)
    }

    /// Marks the session for destruction.
    ///
    /// Once the handler returns, the middleware sends a cookie that removes
    /// the session cookie from the client. Whether the stored document is
    /// deleted as well depends on
    /// [`SessionConfig::destroy_removes_session`](crate::config::SessionConfig::destroy_removes_session).
    pub fn destroy(&self) {
        self.inner.destroyed.store(true, Ordering::Release);
    }

    /// Returns `true` if [`destroy`](Self::destroy) has been called.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Get the session object from a request.
    ///
    /// # Panics
    ///
    /// Panics if the request has not passed through a
    /// [`SessionLayer`](crate::SessionLayer).
    ///
    /// # Examples
    ///
    /// ```
    /// use sidkit::Session;
    ///
    /// async fn my_handler(request: http::Request<String>) -> sidkit::Result<String> {
    ///     let session = Session::from_request(&request);
    ///     session.set("user_name", "world").await?;
    ///     Ok(String::from("stored"))
    /// }
    /// ```
    #[track_caller]
    #[must_use]
    pub fn from_request<B>(request: &http::Request<B>) -> &Self {
        Self::from_extensions(request.extensions())
    }

    /// Get the session object from request extensions.
    ///
    /// # Panics
    ///
    /// Panics if there is no session in the extensions.
    #[track_caller]
    #[must_use]
    pub fn from_extensions(extensions: &http::Extensions) -> &Self {
        Self::try_from_extensions(extensions)
            .expect("Session extension missing. Did you forget to add the SessionLayer?")
    }

    /// Get the session object from request extensions, if there is one.
    #[must_use]
    pub fn try_from_extensions(extensions: &http::Extensions) -> Option<&Self> {
        extensions.get::<Self>()
    }
}

/// The rejection returned by the [`Session`] extractor when the request did
/// not pass through a [`SessionLayer`](crate::SessionLayer).
#[cfg(feature = "axum")]
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("session extension missing; is the SessionLayer installed?")]
pub struct MissingSessionLayer;

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for MissingSessionLayer {
    fn into_response(self) -> axum::response::Response {
        (http::StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

#[cfg(feature = "axum")]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for Session {
    type Rejection = MissingSessionLayer;

    async fn from_request_parts(
        parts: &mut http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        Self::try_from_extensions(&parts.extensions)
            .cloned()
            .ok_or(MissingSessionLayer)
    }
}
