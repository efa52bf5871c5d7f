//! SQLite session store.
//!
//! This module provides a session store that keeps sessions in a single
//! SQLite table and talks to the database directly, blocking the caller for
//! the duration of every query. All queries share one connection, so under
//! heavy concurrent load requests queue up on it; use
//! [`SqliteWorkerStore`](crate::store::worker::SqliteWorkerStore) to keep the
//! database off the async executor.
//!
//! The table looks like this:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS sessions (id TEXT NOT NULL UNIQUE, data TEXT NOT NULL)
//! ```
//!
//! # Examples
//!
//! ```
//! use sidkit::SessionStore;
//! use sidkit::store::sqlite::SqliteStore;
//!
//! let store = SqliteStore::open_in_memory()?;
//! let sid = store.create_session()?;
//! assert!(store.get_session(&sid)?.is_empty());
//! # Ok::<(), sidkit::store::StoreError>(())
//! ```

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::document::Document;
use crate::store::{SessionId, SessionStore, StoreError, StoreResult};

/// A session store backed by a SQLite database, with blocking calls.
///
/// # Examples
///
/// ```no_run
/// use sidkit::store::sqlite::SqliteStore;
///
/// let store = SqliteStore::open("sessions.sqlite3")?;
/// # Ok::<(), sidkit::store::StoreError>(())
/// ```
#[derive(Debug)]
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database file at `path` and makes sure the
    /// sessions table exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the database cannot be opened or
    /// the table cannot be created.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the database cannot be opened.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wraps an existing connection, creating the sessions table if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the table cannot be created.
    pub fn from_connection(connection: Connection) -> StoreResult<Self> {
        queries::create_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn connection(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| StoreError::Backend("session database lock poisoned".into()))
    }
}

impl SessionStore for SqliteStore {
    fn create_session(&self) -> StoreResult<SessionId> {
        queries::insert_session(&*self.connection()?, SessionId::generate)
    }

    fn get_session(&self, sid: &SessionId) -> StoreResult<Document> {
        queries::fetch_or_create(&*self.connection()?, sid)
    }

    fn put_session(&self, sid: &SessionId, document: &Document) -> StoreResult<()> {
        queries::write(&*self.connection()?, sid, document)
    }

    fn remove_session(&self, sid: &SessionId) -> StoreResult<()> {
        queries::remove(&*self.connection()?, sid)
    }
}

/// The queries behind both SQLite stores.
pub(crate) mod queries {
    use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
    use tracing::{debug, trace};

    use crate::document::{Document, EMPTY_DOCUMENT};
    use crate::store::{MAX_COLLISION_RETRIES, SessionId, StoreError, StoreResult};

    pub(crate) fn create_schema(connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (id TEXT NOT NULL UNIQUE, data TEXT NOT NULL)",
        )?;
        Ok(())
    }

    pub(crate) fn insert_session(
        connection: &Connection,
        mut next_id: impl FnMut() -> SessionId,
    ) -> StoreResult<SessionId> {
        for _ in 0..=MAX_COLLISION_RETRIES {
            let sid = next_id();
            let result = connection.execute(
                "INSERT INTO sessions (id, data) VALUES (?1, ?2)",
                params![sid.as_str(), EMPTY_DOCUMENT],
            );
            match result {
                Ok(_) => {
                    debug!(%sid, "Created session");
                    return Ok(sid);
                }
                Err(err) if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                    // Pick another ID and try again.
                    trace!(%sid, "Session id collision");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(StoreError::TooManyIdCollisions(MAX_COLLISION_RETRIES))
    }

    pub(crate) fn fetch_or_create(
        connection: &Connection,
        sid: &SessionId,
    ) -> StoreResult<Document> {
        let data: Option<String> = connection
            .query_row(
                "SELECT data FROM sessions WHERE id = ?1",
                params![sid.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(data) = data {
            return Document::from_json(&data);
        }

        connection.execute(
            "INSERT OR IGNORE INTO sessions (id, data) VALUES (?1, ?2)",
            params![sid.as_str(), EMPTY_DOCUMENT],
        )?;
        trace!(%sid, "Created missing session on fetch");
        Ok(Document::new())
    }

    pub(crate) fn write(
        connection: &Connection,
        sid: &SessionId,
        document: &Document,
    ) -> StoreResult<()> {
        let data = document.to_json()?;
        connection.execute(
            "INSERT INTO sessions (id, data) VALUES (?1, ?2) \
             ON CONFLICT (id) DO UPDATE SET data = excluded.data",
            params![sid.as_str(), data],
        )?;
        Ok(())
    }

    pub(crate) fn remove(connection: &Connection, sid: &SessionId) -> StoreResult<()> {
        connection.execute("DELETE FROM sessions WHERE id = ?1", params![sid.as_str()])?;
        trace!(%sid, "Removed session");
        Ok(())
    }
}
