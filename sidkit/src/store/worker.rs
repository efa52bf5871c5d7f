//! SQLite session store running on a worker thread.
//!
//! [`SqliteWorkerStore`] keeps its SQLite connection on a dedicated thread.
//! Every store operation is sent to that thread as a command over a channel
//! and answered through a one-shot reply channel, so the calling task is
//! only suspended, never blocked, while the query runs.
//!
//! The store has a two-phase lifecycle: constructing it is cheap and does not
//! touch the database, and [`SqliteWorkerStore::init`] starts the worker,
//! opens the database and creates the schema. Operations invoked before
//! `init` has completed fail with [`StoreError::NotInitialized`].
//!
//! # Examples
//!
//! ```
//! use sidkit::AsyncSessionStore;
//! use sidkit::store::worker::SqliteWorkerStore;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), sidkit::store::StoreError> {
//! let store = SqliteWorkerStore::in_memory();
//! store.init().await?;
//!
//! let sid = store.create_session().await?;
//! assert!(store.get_session(&sid).await?.is_empty());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::thread;

use rusqlite::Connection;
use tokio::sync::{OnceCell, mpsc, oneshot};
use tracing::{debug, trace};

use crate::document::Document;
use crate::store::sqlite::queries;
use crate::store::{AsyncSessionStore, SessionId, StoreError, StoreResult};

const COMMAND_BUFFER: usize = 64;
const IN_MEMORY: &str = ":memory:";

type Reply<T> = oneshot::Sender<StoreResult<T>>;

enum Command {
    Create {
        reply: Reply<SessionId>,
    },
    Fetch {
        sid: SessionId,
        reply: Reply<Document>,
    },
    Write {
        sid: SessionId,
        document: Document,
        reply: Reply<()>,
    },
    Remove {
        sid: SessionId,
        reply: Reply<()>,
    },
}

/// A SQLite session store whose connection is owned by a worker thread.
///
/// The worker stops once the store is dropped.
#[derive(Debug)]
pub struct SqliteWorkerStore {
    path: PathBuf,
    worker: OnceCell<mpsc::Sender<Command>>,
}

impl SqliteWorkerStore {
    /// Creates a store for the database file at `path`.
    ///
    /// The file is not opened until [`init`](Self::init) is called.
    ///
    /// # Examples
    ///
    /// ```
    /// use sidkit::store::worker::SqliteWorkerStore;
    ///
    /// let store = SqliteWorkerStore::new("sessions.sqlite3");
    /// assert!(!store.is_initialized());
    /// ```
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            worker: OnceCell::new(),
        }
    }

    /// Creates a store for a private in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY)
    }

    /// Returns `true` once [`init`](Self::init) has completed successfully.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.worker.initialized()
    }

    /// Starts the worker thread, opens the database and creates the
    /// sessions table.
    ///
    /// Calling `init` on an initialized store does nothing. If
    /// initialization fails, the store stays uninitialized and `init` can be
    /// retried.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the thread cannot be spawned or the
    /// database cannot be opened.
    pub async fn init(&self) -> StoreResult<()> {
        self.worker.get_or_try_init(|| self.spawn_worker()).await?;
        Ok(())
    }

    async fn spawn_worker(&self) -> StoreResult<mpsc::Sender<Command>> {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel();
        let path = self.path.clone();

        thread::Builder::new()
            .name("sidkit-sqlite".to_owned())
            .spawn(move || match open(&path) {
                Ok(connection) => {
                    let _ = ready_tx.send(Ok(()));
                    run(&connection, commands_rx);
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .map_err(|err| StoreError::Backend(Box::new(err)))?;

        ready_rx.await.map_err(|_| StoreError::WorkerShutdown)??;
        debug!(path = %self.path.display(), "Session store worker ready");
        Ok(commands_tx)
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> StoreResult<T> {
        let worker = self.worker.get().ok_or(StoreError::NotInitialized)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        worker
            .send(command(reply_tx))
            .await
            .map_err(|_| StoreError::WorkerShutdown)?;

        reply_rx.await.map_err(|_| StoreError::WorkerShutdown)?
    }
}

impl AsyncSessionStore for SqliteWorkerStore {
    async fn create_session(&self) -> StoreResult<SessionId> {
        self.request(|reply| Command::Create { reply }).await
    }

    async fn get_session(&self, sid: &SessionId) -> StoreResult<Document> {
        let sid = sid.clone();
        self.request(|reply| Command::Fetch { sid, reply }).await
    }

    async fn put_session(&self, sid: &SessionId, document: &Document) -> StoreResult<()> {
        let sid = sid.clone();
        let document = document.clone();
        self.request(|reply| Command::Write {
            sid,
            document,
            reply,
        })
        .await
    }

    async fn remove_session(&self, sid: &SessionId) -> StoreResult<()> {
        let sid = sid.clone();
        self.request(|reply| Command::Remove { sid, reply }).await
    }
}

fn open(path: &Path) -> StoreResult<Connection> {
    let connection = Connection::open(path)?;
    queries::create_schema(&connection)?;
    Ok(connection)
}

fn run(connection: &Connection, mut commands: mpsc::Receiver<Command>) {
    debug!("Session store worker started");
    while let Some(command) = commands.blocking_recv() {
        // A dropped reply receiver only means the caller stopped waiting.
        match command {
            Command::Create { reply } => {
                let _ = reply.send(queries::insert_session(connection, SessionId::generate));
            }
            Command::Fetch { sid, reply } => {
                let _ = reply.send(queries::fetch_or_create(connection, &sid));
            }
            Command::Write {
                sid,
                document,
                reply,
            } => {
                let _ = reply.send(queries::write(connection, &sid, &document));
            }
            Command::Remove { sid, reply } => {
                let _ = reply.send(queries::remove(connection, &sid));
            }
        }
        trace!("Session store command done");
    }
    debug!("Session store worker stopped");
}
