//! Session middleware.
//!
//! [`SessionLayer`] is a `tower` layer that gives every request a
//! [`Session`]. For each request, the wrapped service:
//!
//! 1. reads the session id from the session cookie, or creates a new session
//!    in the store if the cookie is missing or does not hold a valid id;
//! 2. inserts a [`Session`] handle into the request extensions and calls the
//!    inner service;
//! 3. attaches a `Set-Cookie` header to the response when the session is new,
//!    or a removal cookie when the handler called [`Session::destroy`].
//!
//! If the store fails while the session is resolved, the request is answered
//! with `500 Internal Server Error` and the inner service is not called.
//!
//! The decisions themselves are made by [`SessionManager`], which can also be
//! used directly by code that does not go through `tower`.

use std::fmt::Display;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use cookie::Cookie;
use derive_more::Debug;
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use time::OffsetDateTime;
use tower::{Layer, Service};
use tracing::{debug, error, trace, warn};

use crate::config::{SessionConfig, StoreConfig};
use crate::session::Session;
use crate::store::memory::MemoryStore;
use crate::store::sqlite::SqliteStore;
use crate::store::worker::SqliteWorkerStore;
use crate::store::{AsyncSessionStore, BoxSessionStore, SessionId};

/// Resolves session ids from requests and manages the session cookie.
///
/// Cloning a manager is cheap; clones share the same store and
/// configuration.
///
/// # Examples
///
/// ```
/// use sidkit::SessionManager;
/// use sidkit::config::SessionConfig;
/// use sidkit::store::memory::MemoryStore;
///
/// # #[tokio::main]
/// # async fn main() -> sidkit::Result<()> {
/// let manager = SessionManager::new(MemoryStore::new(), SessionConfig::default());
///
/// let (sid, is_new) = manager.resolve_or_create(&http::HeaderMap::new()).await?;
/// assert!(is_new);
///
/// let mut headers = http::HeaderMap::new();
/// headers.insert(http::header::COOKIE, format!("sid={sid}").parse().unwrap());
/// assert_eq!(manager.resolve_or_create(&headers).await?, (sid, false));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SessionManager {
    #[debug("..")]
    store: Arc<dyn BoxSessionStore>,
    config: Arc<SessionConfig>,
}

impl SessionManager {
    /// Creates a manager that keeps sessions in `store`.
    ///
    /// The [`store`](SessionConfig::store) part of `config` is ignored.
    #[must_use]
    pub fn new<S: AsyncSessionStore>(store: S, config: SessionConfig) -> Self {
        Self::with_shared_store(Arc::new(store), config)
    }

    /// Creates a manager sharing `store` with other parts of the
    /// application.
    #[must_use]
    pub fn with_shared_store<S: AsyncSessionStore>(store: Arc<S>, config: SessionConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    /// Creates a manager with the store described by
    /// [`SessionConfig::store`].
    ///
    /// SQLite stores are opened, and worker stores initialized, before this
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or initialized.
    ///
    /// # Examples
    ///
    /// ```
    /// use sidkit::SessionManager;
    /// use sidkit::config::{SessionConfig, StoreConfig};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> sidkit::Result<()> {
    /// let config = SessionConfig::builder()
    ///     .store(StoreConfig::SqliteWorker {
    ///         path: ":memory:".into(),
    ///     })
    ///     .build();
    /// let manager = SessionManager::from_config(config).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn from_config(config: SessionConfig) -> crate::Result<Self> {
        let manager = match config.store.clone() {
            StoreConfig::Memory => Self::new(MemoryStore::new(), config),
            StoreConfig::Sqlite { path } => {
                let store = SqliteStore::open(&path)?;
                Self::new(store, config)
            }
            StoreConfig::SqliteWorker { path } => {
                let store = SqliteWorkerStore::new(&path);
                store.init().await?;
                Self::new(store, config)
            }
        };
        debug!(store = ?manager.config.store, "Session manager ready");
        Ok(manager)
    }

    /// Returns the configuration of this manager.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the session id carried by the session cookie in `headers`.
    ///
    /// Cookies whose value is not a well-formed session id are skipped.
    #[must_use]
    pub fn session_id_from_headers(&self, headers: &HeaderMap) -> Option<SessionId> {
        let name = self.config.cookie.name.as_str();
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(Cookie::split_parse)
            .filter_map(Result::ok)
            .filter(|cookie| cookie.name() == name)
            .find_map(|cookie| match cookie.value().parse() {
                Ok(sid) => Some(sid),
                Err(error) => {
                    warn!(%error, "Ignoring malformed session cookie");
                    None
                }
            })
    }

    /// Returns the session id from the request cookie, or creates a new
    /// session if there is no valid one.
    ///
    /// The returned flag is `true` when the session was created.
    ///
    /// # Errors
    ///
    /// Returns an error if a new session cannot be created in the store.
    pub async fn resolve_or_create(&self, headers: &HeaderMap) -> crate::Result<(SessionId, bool)> {
        if let Some(sid) = self.session_id_from_headers(headers) {
            trace!(%sid, "Resolved session from cookie");
            return Ok((sid, false));
        }

        let sid = self.store.create_session().await?;
        debug!(%sid, "Started new session");
        Ok((sid, true))
    }

    /// Resolves the session for a request and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns an error if a new session cannot be created in the store.
    pub async fn session(&self, headers: &HeaderMap) -> crate::Result<Session> {
        let (sid, is_new) = self.resolve_or_create(headers).await?;
        Ok(Session::with_store(sid, Arc::clone(&self.store), is_new))
    }

    /// Builds the session cookie for `sid`.
    ///
    /// # Examples
    ///
    /// ```
    /// use sidkit::config::SessionConfig;
    /// use sidkit::store::memory::MemoryStore;
    /// use sidkit::{SessionId, SessionManager};
    ///
    /// let manager = SessionManager::new(MemoryStore::new(), SessionConfig::default());
    /// let sid = SessionId::generate();
    ///
    /// let cookie = manager.session_cookie(&sid);
    /// assert_eq!(cookie.name(), "sid");
    /// assert_eq!(cookie.value(), sid.as_str());
    /// assert_eq!(cookie.http_only(), Some(true));
    /// ```
    #[must_use]
    pub fn session_cookie(&self, sid: &SessionId) -> Cookie<'static> {
        let config = &self.config.cookie;
        let mut builder = Cookie::build((config.name.clone(), sid.to_string()))
            .path(config.path.clone())
            .http_only(config.http_only)
            .same_site(config.same_site.into())
            .secure(config.secure);
        if let Some(expires) = config.expiry.expires_at(OffsetDateTime::now_utc()) {
            builder = builder.expires(expires);
        }
        builder.build()
    }

    /// Builds a cookie that makes the client forget its session cookie.
    #[must_use]
    pub fn removal_cookie(&self) -> Cookie<'static> {
        let config = &self.config.cookie;
        let mut cookie = Cookie::build((config.name.clone(), ""))
            .path(config.path.clone())
            .http_only(config.http_only)
            .same_site(config.same_site.into())
            .secure(config.secure)
            .build();
        cookie.make_removal();
        cookie
    }

    /// Appends the session cookie for `sid` to the response headers.
    ///
    /// # Errors
    ///
    /// Returns an error if the cookie is not a valid header value, which can
    /// happen with a misconfigured cookie name or path.
    pub fn issue(&self, sid: &SessionId, headers: &mut HeaderMap) -> crate::Result<()> {
        append_cookie(headers, &self.session_cookie(sid))?;
        trace!(%sid, "Issued session cookie");
        Ok(())
    }

    /// Appends a removal cookie to the response headers and, if
    /// [`SessionConfig::destroy_removes_session`] is set, removes the
    /// session from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cookie is not a valid header value or
    /// the store fails to remove the session.
    pub async fn destroy(&self, sid: &SessionId, headers: &mut HeaderMap) -> crate::Result<()> {
        append_cookie(headers, &self.removal_cookie())?;
        if self.config.destroy_removes_session {
            self.store.remove_session(sid).await?;
        }
        debug!(%sid, removed = self.config.destroy_removes_session, "Destroyed session");
        Ok(())
    }

    async fn finish(&self, session: &Session, headers: &mut HeaderMap) -> crate::Result<()> {
        if session.is_destroyed() {
            self.destroy(session.id(), headers).await
        } else if session.is_new() {
            self.issue(session.id(), headers)
        } else {
            Ok(())
        }
    }
}

fn append_cookie(headers: &mut HeaderMap, cookie: &Cookie<'_>) -> crate::Result<()> {
    let value = HeaderValue::from_str(&cookie.to_string())?;
    headers.append(SET_COOKIE, value);
    Ok(())
}

/// A `tower` layer that adds session handling to a service.
///
/// # Examples
///
/// ```
/// use sidkit::SessionLayer;
/// use sidkit::config::SessionConfig;
/// use sidkit::store::memory::MemoryStore;
///
/// let layer = SessionLayer::new(MemoryStore::new(), SessionConfig::default());
/// let router: axum::Router = axum::Router::new().layer(layer);
/// ```
#[derive(Debug, Clone)]
pub struct SessionLayer {
    manager: SessionManager,
}

impl SessionLayer {
    /// Creates a layer that keeps sessions in `store`.
    #[must_use]
    pub fn new<S: AsyncSessionStore>(store: S, config: SessionConfig) -> Self {
        Self {
            manager: SessionManager::new(store, config),
        }
    }

    /// Creates a layer with the store described by
    /// [`SessionConfig::store`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or initialized.
    pub async fn from_config(config: SessionConfig) -> crate::Result<Self> {
        Ok(Self {
            manager: SessionManager::from_config(config).await?,
        })
    }

    /// Returns the session manager used by this layer.
    #[must_use]
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }
}

impl From<SessionManager> for SessionLayer {
    fn from(manager: SessionManager) -> Self {
        Self { manager }
    }
}

impl<S> Layer<S> for SessionLayer {
    type Service = SessionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionService {
            inner,
            manager: self.manager.clone(),
        }
    }
}

/// The service produced by [`SessionLayer`].
#[derive(Debug, Clone)]
pub struct SessionService<S> {
    inner: S,
    manager: SessionManager,
}

type BoxFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for SessionService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        // the clone might not be ready yet, so keep it and call the one that is
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let manager = self.manager.clone();

        Box::pin(async move {
            let session = match manager.session(request.headers()).await {
                Ok(session) => session,
                Err(error) => return Ok(internal_server_error("resolve", &error)),
            };
            request.extensions_mut().insert(session.clone());

            let mut response = inner.call(request).await?;
            if let Err(error) = manager.finish(&session, response.headers_mut()).await {
                return Ok(internal_server_error("finish", &error));
            }
            Ok(response)
        })
    }
}

fn internal_server_error<B: Default>(stage: &str, error: &impl Display) -> Response<B> {
    error!(%error, stage, "Session middleware failed");
    let mut response = Response::new(B::default());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
