//! Memory session store
//!
//! This module provides an implementation of an in-memory session store.
//!
//! # Examples
//!
//! ```
//! use sidkit::store::memory::MemoryStore;
//! let store = MemoryStore::new();
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use crate::document::{Document, EMPTY_DOCUMENT};
use crate::store::{SessionId, SessionStore, StoreError, StoreResult};

type SessionMap = HashMap<SessionId, String>;

/// An in-memory session store implementation.
///
/// This store keeps all sessions in memory using a thread-safe hashmap,
/// holding every document in its serialized form just like the database
/// stores do. It's primarily useful for development and testing
/// environments. Clones share the same sessions.
///
/// # Examples
///
/// ```
/// use sidkit::store::memory::MemoryStore;
/// let store = MemoryStore::new();
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryStore(Arc<Mutex<SessionMap>>);

impl MemoryStore {
    /// Creates a new, empty `MemoryStore` session store.
    ///
    /// # Examples
    ///
    /// ```
    /// use sidkit::store::memory::MemoryStore;
    /// let store = MemoryStore::new();
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> StoreResult<MutexGuard<'_, SessionMap>> {
        self.0
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }

    #[cfg(test)]
    fn insert_raw(&self, sid: SessionId, data: &str) {
        self.0.lock().unwrap().insert(sid, data.to_owned());
    }
}

impl SessionStore for MemoryStore {
    fn create_session(&self) -> StoreResult<SessionId> {
        let mut sessions = self.sessions()?;
        let mut sid = SessionId::generate();
        while sessions.contains_key(&sid) {
            // Session ID collision mitigation.
            sid = SessionId::generate();
        }
        sessions.insert(sid.clone(), EMPTY_DOCUMENT.to_owned());
        trace!(%sid, "Created session");
        Ok(sid)
    }

    fn get_session(&self, sid: &SessionId) -> StoreResult<Document> {
        let mut sessions = self.sessions()?;
        match sessions.get(sid) {
            Some(data) => Document::from_json(data),
            None => {
                sessions.insert(sid.clone(), EMPTY_DOCUMENT.to_owned());
                trace!(%sid, "Created missing session on fetch");
                Ok(Document::new())
            }
        }
    }

    fn put_session(&self, sid: &SessionId, document: &Document) -> StoreResult<()> {
        let data = document.to_json()?;
        self.sessions()?.insert(sid.clone(), data);
        Ok(())
    }

    fn remove_session(&self, sid: &SessionId) -> StoreResult<()> {
        self.sessions()?.remove(sid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_create() {
        let store = MemoryStore::default();
        let sid = store.create_session().unwrap();
        assert!(store.get_session(&sid).unwrap().is_empty());
    }

    #[test]
    fn test_set_and_get() {
        let store = MemoryStore::default();
        let sid = store.create_session().unwrap();
        store.set(&sid, "name", json!("shantaram")).unwrap();
        assert_eq!(store.get(&sid, "name").unwrap(), Some(json!("shantaram")));
    }

    #[test]
    fn test_remove_session() {
        let store = MemoryStore::default();
        let sid = store.create_session().unwrap();
        store.set(&sid, "name", json!("shantaram")).unwrap();

        store.remove_session(&sid).unwrap();
        assert!(store.sessions().unwrap().get(&sid).is_none());
        // removing again is fine
        store.remove_session(&sid).unwrap();
    }

    #[test]
    fn test_clones_share_sessions() {
        let store = MemoryStore::default();
        let clone = store.clone();
        let sid = store.create_session().unwrap();
        clone.set(&sid, "k", json!(1)).unwrap();
        assert_eq!(store.get(&sid, "k").unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_malformed_document() {
        let store = MemoryStore::default();
        let sid = SessionId::generate();
        store.insert_raw(sid.clone(), "not json");

        let error = store.get_session(&sid).unwrap_err();
        assert!(matches!(error, StoreError::MalformedDocument(_)));
        // the broken document is not replaced behind the caller's back
        assert!(store.set(&sid, "k", json!(1)).is_err());
    }
}
