//! Session store contract.
//!
//! A session store keeps one [`Document`] per [`SessionId`]. The contract is
//! expressed twice: [`SessionStore`] for stores that block the caller for
//! the duration of each backend call, and [`AsyncSessionStore`] for stores
//! that return futures. Every [`SessionStore`] is also an
//! [`AsyncSessionStore`], so the middleware only ever deals with the latter.
//!
//! Implementations only provide four primitives: creating a session,
//! fetching a document (creating an empty one if the row is missing),
//! writing a whole document back, and removing a session. The per-key
//! operations ([`get`](SessionStore::get), [`set`](SessionStore::set),
//! [`delete`](SessionStore::delete) and [`clear`](SessionStore::clear)) are
//! provided on top of them as read-modify-write sequences.
//!
//! # Concurrency
//!
//! Read-modify-write is not atomic. Two concurrent `set` calls for the same
//! session can race, in which case the last write wins and the key written
//! by the other call is lost. Calls for different sessions never interfere.

pub mod memory;
pub mod sqlite;
pub mod worker;

use std::error::Error as StdError;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::document::Document;

pub(crate) const MAX_COLLISION_RETRIES: u32 = 32;
pub(crate) const ERROR_PREFIX: &str = "session store:";

/// Errors that can occur while interacting with a session store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The backend failed to execute an operation.
    #[error("{ERROR_PREFIX} backend error: {0}")]
    Backend(#[source] Box<dyn StdError + Send + Sync>),
    /// The stored document is not a valid JSON object.
    #[error("{ERROR_PREFIX} malformed session document: {0}")]
    MalformedDocument(#[source] Box<dyn StdError + Send + Sync>),
    /// The document could not be serialized.
    #[error("{ERROR_PREFIX} could not encode session document: {0}")]
    Encode(#[source] serde_json::Error),
    /// An operation was invoked before the store finished initializing.
    #[error("{ERROR_PREFIX} store is not initialized; call `init()` first")]
    NotInitialized,
    /// The worker owning the backend connection is no longer running.
    #[error("{ERROR_PREFIX} store worker is no longer running")]
    WorkerShutdown,
    /// A freshly generated session id collided too many times.
    #[error("{ERROR_PREFIX} session-id collision retried too many times ({0})")]
    TooManyIdCollisions(u32),
}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        StoreError::Backend(Box::new(error))
    }
}

/// Convenience alias for results returned by session store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// An opaque, unique session identifier.
///
/// Identifiers are random (version 4) UUIDs in their lowercase hyphenated
/// form. They are used both as the cookie value and as the key of the
/// stored session.
///
/// # Examples
///
/// ```
/// use sidkit::SessionId;
///
/// let id = SessionId::generate();
/// let parsed: SessionId = id.as_str().parse()?;
/// assert_eq!(id, parsed);
/// # Ok::<(), sidkit::store::InvalidSessionId>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generates a new random session id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    /// Returns the textual form of the id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionId {
    type Err = InvalidSessionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::try_parse(s)?;
        Ok(Self(uuid.hyphenated().to_string()))
    }
}

impl TryFrom<String> for SessionId {
    type Error = InvalidSessionId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionId> for String {
    fn from(value: SessionId) -> Self {
        value.0
    }
}

/// The error returned when a string is not a well-formed session id.
#[derive(Debug, Clone, Error)]
#[error("invalid session id: {0}")]
pub struct InvalidSessionId(#[from] uuid::Error);

/// A session store whose operations block the caller.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use sidkit::SessionStore;
/// use sidkit::store::memory::MemoryStore;
///
/// let store = MemoryStore::new();
/// let sid = store.create_session()?;
/// store.set(&sid, "name", json!("shantaram"))?;
/// assert_eq!(store.get(&sid, "name")?, Some(json!("shantaram")));
/// # Ok::<(), sidkit::store::StoreError>(())
/// ```
pub trait SessionStore: Send + Sync + 'static {
    /// Creates a new session holding an empty document and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails, or if freshly generated ids
    /// keep colliding with existing sessions.
    fn create_session(&self) -> StoreResult<SessionId>;

    /// Returns the document of the given session.
    ///
    /// If the session does not exist yet, it is created with an empty
    /// document, which is then returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or the stored document is
    /// malformed.
    fn get_session(&self, sid: &SessionId) -> StoreResult<Document>;

    /// Overwrites the whole document of the given session, creating the
    /// session if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or the document cannot be
    /// encoded.
    fn put_session(&self, sid: &SessionId, document: &Document) -> StoreResult<()>;

    /// Removes the session entirely. Removing a missing session succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn remove_session(&self, sid: &SessionId) -> StoreResult<()>;

    /// Returns the value stored under `key`, or `None` if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be fetched.
    fn get(&self, sid: &SessionId, key: &str) -> StoreResult<Option<Value>> {
        let mut document = self.get_session(sid)?;
        Ok(document.remove(key))
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be fetched or written back.
    fn set(&self, sid: &SessionId, key: &str, value: Value) -> StoreResult<()> {
        let mut document = self.get_session(sid)?;
        document.insert(key, value);
        self.put_session(sid, &document)
    }

    /// Removes `key` from the document. Removing an absent key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be fetched or written back.
    fn delete(&self, sid: &SessionId, key: &str) -> StoreResult<()> {
        let mut document = self.get_session(sid)?;
        document.remove(key);
        self.put_session(sid, &document)
    }

    /// Replaces the document with an empty one. The session itself is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    fn clear(&self, sid: &SessionId) -> StoreResult<()> {
        self.put_session(sid, &Document::new())
    }
}

/// A session store whose operations return futures.
///
/// This has the same contract as [`SessionStore`]; see there for the
/// semantics of each operation. Every [`SessionStore`] implements this trait
/// by running its blocking calls inside the returned future.
pub trait AsyncSessionStore: Send + Sync + 'static {
    /// Creates a new session holding an empty document and returns its id.
    ///
    /// # Errors
    ///
    /// See [`SessionStore::create_session`].
    fn create_session(&self) -> impl Future<Output = StoreResult<SessionId>> + Send;

    /// Returns the document of the given session, creating it if missing.
    ///
    /// # Errors
    ///
    /// See [`SessionStore::get_session`].
    fn get_session(&self, sid: &SessionId) -> impl Future<Output = StoreResult<Document>> + Send;

    /// Overwrites the whole document of the given session.
    ///
    /// # Errors
    ///
    /// See [`SessionStore::put_session`].
    fn put_session(
        &self,
        sid: &SessionId,
        document: &Document,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Removes the session entirely.
    ///
    /// # Errors
    ///
    /// See [`SessionStore::remove_session`].
    fn remove_session(&self, sid: &SessionId) -> impl Future<Output = StoreResult<()>> + Send;

    /// Returns the value stored under `key`, or `None` if the key is absent.
    ///
    /// # Errors
    ///
    /// See [`SessionStore::get`].
    fn get(
        &self,
        sid: &SessionId,
        key: &str,
    ) -> impl Future<Output = StoreResult<Option<Value>>> + Send {
        async move {
            let mut document = self.get_session(sid).await?;
            Ok(document.remove(key))
        }
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// See [`SessionStore::set`].
    fn set(
        &self,
        sid: &SessionId,
        key: &str,
        value: Value,
    ) -> impl Future<Output = StoreResult<()>> + Send {
        async move {
            let mut document = self.get_session(sid).await?;
            document.insert(key, value);
            self.put_session(sid, &document).await
        }
    }

    /// Removes `key` from the document. Removing an absent key is a no-op.
    ///
    /// # Errors
    ///
    /// See [`SessionStore::delete`].
    fn delete(&self, sid: &SessionId, key: &str) -> impl Future<Output = StoreResult<()>> + Send {
        async move {
            let mut document = self.get_session(sid).await?;
            document.remove(key);
            self.put_session(sid, &document).await
        }
    }

    /// Replaces the document with an empty one.
    ///
    /// # Errors
    ///
    /// See [`SessionStore::clear`].
    fn clear(&self, sid: &SessionId) -> impl Future<Output = StoreResult<()>> + Send {
        async move { self.put_session(sid, &Document::new()).await }
    }
}

impl<T: SessionStore> AsyncSessionStore for T {
    async fn create_session(&self) -> StoreResult<SessionId> {
        SessionStore::create_session(self)
    }

    async fn get_session(&self, sid: &SessionId) -> StoreResult<Document> {
        SessionStore::get_session(self, sid)
    }

    async fn put_session(&self, sid: &SessionId, document: &Document) -> StoreResult<()> {
        SessionStore::put_session(self, sid, document)
    }

    async fn remove_session(&self, sid: &SessionId) -> StoreResult<()> {
        SessionStore::remove_session(self, sid)
    }

    async fn get(&self, sid: &SessionId, key: &str) -> StoreResult<Option<Value>> {
        SessionStore::get(self, sid, key)
    }

    async fn set(&self, sid: &SessionId, key: &str, value: Value) -> StoreResult<()> {
        SessionStore::set(self, sid, key, value)
    }

    async fn delete(&self, sid: &SessionId, key: &str) -> StoreResult<()> {
        SessionStore::delete(self, sid, key)
    }

    async fn clear(&self, sid: &SessionId) -> StoreResult<()> {
        SessionStore::clear(self, sid)
    }
}

type BoxedFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Object-safe counterpart of [`AsyncSessionStore`], used to share a store
/// of any type between the middleware and the session handles.
pub(crate) trait BoxSessionStore: Send + Sync + 'static {
    fn create_session(&self) -> BoxedFuture<'_, SessionId>;

    fn get_session<'a>(&'a self, sid: &'a SessionId) -> BoxedFuture<'a, Document>;

    fn remove_session<'a>(&'a self, sid: &'a SessionId) -> BoxedFuture<'a, ()>;

    fn get<'a>(&'a self, sid: &'a SessionId, key: &'a str) -> BoxedFuture<'a, Option<Value>>;

    fn set<'a>(&'a self, sid: &'a SessionId, key: &'a str, value: Value) -> BoxedFuture<'a, ()>;

    fn delete<'a>(&'a self, sid: &'a SessionId, key: &'a str) -> BoxedFuture<'a, ()>;

    fn clear<'a>(&'a self, sid: &'a SessionId) -> BoxedFuture<'a, ()>;
}

impl<T: AsyncSessionStore> BoxSessionStore for T {
    fn create_session(&self) -> BoxedFuture<'_, SessionId> {
        Box::pin(async move { AsyncSessionStore::create_session(self).await })
    }

    fn get_session<'a>(&'a self, sid: &'a SessionId) -> BoxedFuture<'a, Document> {
        Box::pin(async move { AsyncSessionStore::get_session(self, sid).await })
    }

    fn remove_session<'a>(&'a self, sid: &'a SessionId) -> BoxedFuture<'a, ()> {
        Box::pin(async move { AsyncSessionStore::remove_session(self, sid).await })
    }

    fn get<'a>(&'a self, sid: &'a SessionId, key: &'a str) -> BoxedFuture<'a, Option<Value>> {
        Box::pin(async move { AsyncSessionStore::get(self, sid, key).await })
    }

    fn set<'a>(&'a self, sid: &'a SessionId, key: &'a str, value: Value) -> BoxedFuture<'a, ()> {
        Box::pin(async move { AsyncSessionStore::set(self, sid, key, value).await })
    }

    fn delete<'a>(&'a self, sid: &'a SessionId, key: &'a str) -> BoxedFuture<'a, ()> {
        Box::pin(async move { AsyncSessionStore::delete(self, sid, key).await })
    }

    fn clear<'a>(&'a self, sid: &'a SessionId) -> BoxedFuture<'a, ()> {
        Box::pin(async move { AsyncSessionStore::clear(self, sid).await })
    }
}
