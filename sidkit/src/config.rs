//! Configuration data for the session middleware.
//!
//! The main struct in this module is [`SessionConfig`], which holds the
//! cookie settings ([`CookieConfig`]), the store selection
//! ([`StoreConfig`]), and what destroying a session does. After creating an
//! instance using [`SessionConfig::from_toml`] or [`SessionConfigBuilder`],
//! it can be passed to [`SessionLayer`](crate::SessionLayer).

// most of the config structures might be extended with non-Copy types
// in the future, so to avoid breaking backwards compatibility, we're
// not implementing Copy for them
#![allow(missing_copy_implementations)]

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// How long session cookies live by default: 7 days.
pub const DEFAULT_COOKIE_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// The default session cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "sid";

/// The configuration for the session middleware.
///
/// # Examples
///
/// ```
/// use sidkit::config::{CookieConfig, SameSite, SessionConfig};
///
/// let config = SessionConfig::builder()
///     .cookie(CookieConfig::builder().same_site(SameSite::Lax).build())
///     .build();
/// assert_eq!(config.cookie.same_site, SameSite::Lax);
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(build_fn(skip, error = std::convert::Infallible))]
#[serde(default)]
pub struct SessionConfig {
    /// The configuration of the session cookie.
    pub cookie: CookieConfig,
    /// The store that keeps the session documents.
    ///
    /// Only used by [`SessionLayer::from_config`](crate::SessionLayer::from_config);
    /// [`SessionLayer::new`](crate::SessionLayer::new) takes the store
    /// directly.
    pub store: StoreConfig,
    /// Whether destroying a session also removes its document from the
    /// store.
    ///
    /// Destroying a session always clears the cookie. With this set to
    /// `false` (the default), the stored document is left in place.
    ///
    /// # Examples
    ///
    /// ```
    /// use sidkit::config::SessionConfig;
    ///
    /// let config = SessionConfig::from_toml(
    ///     r#"
    /// destroy_removes_session = true
    /// "#,
    /// )?;
    ///
    /// assert!(config.destroy_removes_session);
    /// # Ok::<(), sidkit::Error>(())
    /// ```
    pub destroy_removes_session: bool,
}

impl SessionConfig {
    /// Create a new [`SessionConfigBuilder`] to build a [`SessionConfig`].
    ///
    /// # Examples
    ///
    /// ```
    /// use sidkit::config::SessionConfig;
    ///
    /// let config = SessionConfig::builder().build();
    /// ```
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Create a new [`SessionConfig`] from a TOML string.
    ///
    /// # Errors
    ///
    /// This function will return an error if the TOML fails to parse as a
    /// [`SessionConfig`].
    ///
    /// # Examples
    ///
    /// ```
    /// use sidkit::config::{SameSite, SessionConfig};
    ///
    /// let toml_content = r#"
    ///     [cookie]
    ///     name = "session"
    ///     same_site = "lax"
    /// "#;
    /// let config = SessionConfig::from_toml(toml_content)?;
    ///
    /// assert_eq!(config.cookie.name, "session");
    /// assert_eq!(config.cookie.same_site, SameSite::Lax);
    /// # Ok::<(), sidkit::Error>(())
    /// ```
    pub fn from_toml(toml_content: &str) -> crate::Result<SessionConfig> {
        let config: SessionConfig = toml::from_str(toml_content)?;
        Ok(config)
    }
}

impl SessionConfigBuilder {
    /// Builds the session configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use sidkit::config::{SessionConfig, StoreConfig};
    ///
    /// let config = SessionConfig::builder()
    ///     .store(StoreConfig::Sqlite {
    ///         path: "sessions.sqlite3".into(),
    ///     })
    ///     .build();
    /// ```
    #[must_use]
    pub fn build(&self) -> SessionConfig {
        SessionConfig {
            cookie: self.cookie.clone().unwrap_or_default(),
            store: self.store.clone().unwrap_or_default(),
            destroy_removes_session: self.destroy_removes_session.unwrap_or_default(),
        }
    }
}

/// The configuration of the session cookie.
///
/// This is used as part of the [`SessionConfig`] struct.
///
/// # Examples
///
/// ```
/// use sidkit::config::CookieConfig;
///
/// let config = CookieConfig::builder().name("session").secure(true).build();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(build_fn(skip, error = std::convert::Infallible))]
#[serde(default)]
pub struct CookieConfig {
    /// The name of the cookie carrying the session id. Defaults to `sid`.
    #[builder(setter(into))]
    pub name: String,
    /// When the cookie expires.
    ///
    /// In TOML this is either a duration, such as `7days` or `12h` (please
    /// refer to the [`humantime::parse_duration`] documentation for the
    /// supported formats), an RFC 3339 timestamp, or `"on_browser_close"`.
    /// Defaults to 7 days after the cookie is issued.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use sidkit::config::{CookieExpiry, SessionConfig};
    ///
    /// let config = SessionConfig::from_toml(
    ///     r#"
    /// [cookie]
    /// expiry = "1h"
    /// "#,
    /// )?;
    ///
    /// assert_eq!(
    ///     config.cookie.expiry,
    ///     CookieExpiry::After(Duration::from_secs(3600))
    /// );
    /// # Ok::<(), sidkit::Error>(())
    /// ```
    #[serde(with = "crate::serializers::cookie_expiry")]
    pub expiry: CookieExpiry,
    /// Whether the cookie is hidden from client-side scripts. Defaults to
    /// `true`.
    pub http_only: bool,
    /// The cross-site policy of the cookie. Defaults to
    /// [`SameSite::Strict`].
    pub same_site: SameSite,
    /// Whether the cookie is only sent over HTTPS. Defaults to `false`.
    pub secure: bool,
    /// The path the cookie is scoped to. Defaults to `/`.
    #[builder(setter(into))]
    pub path: String,
}

impl Default for CookieConfig {
    fn default() -> Self {
        CookieConfig::builder().build()
    }
}

impl CookieConfig {
    /// Create a new [`CookieConfigBuilder`] to build a [`CookieConfig`].
    ///
    /// # Examples
    ///
    /// ```
    /// use sidkit::config::CookieConfig;
    ///
    /// let config = CookieConfig::builder().build();
    /// assert_eq!(config.name, "sid");
    /// assert!(config.http_only);
    /// ```
    #[must_use]
    pub fn builder() -> CookieConfigBuilder {
        CookieConfigBuilder::default()
    }
}

impl CookieConfigBuilder {
    /// Builds the cookie configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use sidkit::config::{CookieConfig, SameSite};
    ///
    /// let config = CookieConfig::builder().same_site(SameSite::None).build();
    /// ```
    #[must_use]
    pub fn build(&self) -> CookieConfig {
        CookieConfig {
            name: self
                .name
                .clone()
                .unwrap_or_else(|| DEFAULT_COOKIE_NAME.to_owned()),
            expiry: self.expiry.unwrap_or_default(),
            http_only: self.http_only.unwrap_or(true),
            same_site: self.same_site.unwrap_or_default(),
            secure: self.secure.unwrap_or(false),
            path: self.path.clone().unwrap_or_else(|| "/".to_owned()),
        }
    }
}

/// When a session cookie expires.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use sidkit::config::CookieExpiry;
///
/// let expiry = CookieExpiry::After(Duration::from_secs(3600));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieExpiry {
    /// The cookie has no `Expires` attribute and is dropped when the browser
    /// session ends.
    OnBrowserClose,
    /// The cookie expires this long after it is issued.
    After(Duration),
    /// The cookie expires at a fixed instant.
    At(DateTime<FixedOffset>),
}

impl Default for CookieExpiry {
    fn default() -> Self {
        Self::After(DEFAULT_COOKIE_EXPIRY)
    }
}

impl CookieExpiry {
    /// Returns the `Expires` instant for a cookie issued at `now`, or `None`
    /// for a browser-session cookie.
    ///
    /// Durations too large to represent saturate to the latest representable
    /// instant.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use sidkit::config::CookieExpiry;
    /// use time::OffsetDateTime;
    ///
    /// let now = OffsetDateTime::now_utc();
    /// let expiry = CookieExpiry::After(Duration::from_secs(60));
    /// assert_eq!(expiry.expires_at(now), Some(now + Duration::from_secs(60)));
    /// assert_eq!(CookieExpiry::OnBrowserClose.expires_at(now), None);
    /// ```
    #[must_use]
    pub fn expires_at(&self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        match self {
            Self::OnBrowserClose => None,
            Self::After(duration) => {
                let duration = time::Duration::try_from(*duration).unwrap_or(time::Duration::MAX);
                Some(now.saturating_add(duration))
            }
            Self::At(at) => OffsetDateTime::from_unix_timestamp(at.timestamp()).ok(),
        }
    }
}

/// The cross-site policy of the session cookie.
///
/// # Examples
///
/// ```
/// use sidkit::config::SameSite;
///
/// assert_eq!(SameSite::default(), SameSite::Strict);
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    /// The cookie is only sent with same-site requests.
    #[default]
    #[serde(alias = "Strict")]
    Strict,
    /// The cookie is also sent with top-level cross-site navigations.
    #[serde(alias = "Lax")]
    Lax,
    /// The cookie is sent with all requests.
    #[serde(alias = "None")]
    None,
}

impl From<SameSite> for cookie::SameSite {
    fn from(value: SameSite) -> Self {
        match value {
            SameSite::Strict => cookie::SameSite::Strict,
            SameSite::Lax => cookie::SameSite::Lax,
            SameSite::None => cookie::SameSite::None,
        }
    }
}

/// The session store to build in
/// [`SessionLayer::from_config`](crate::SessionLayer::from_config).
///
/// # Examples
///
/// ```
/// use sidkit::config::{SessionConfig, StoreConfig};
///
/// let config = SessionConfig::from_toml(
///     r#"
/// [store]
/// type = "sqlite_worker"
/// path = "sessions.sqlite3"
/// "#,
/// )?;
///
/// assert_eq!(
///     config.store,
///     StoreConfig::SqliteWorker {
///         path: "sessions.sqlite3".into()
///     }
/// );
/// # Ok::<(), sidkit::Error>(())
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Keep sessions in process memory; see
    /// [`MemoryStore`](crate::store::memory::MemoryStore).
    #[default]
    Memory,
    /// Keep sessions in a SQLite database, querying it on the calling task;
    /// see [`SqliteStore`](crate::store::sqlite::SqliteStore).
    Sqlite {
        /// The database file. `:memory:` opens a private in-memory database.
        path: PathBuf,
    },
    /// Keep sessions in a SQLite database owned by a worker thread; see
    /// [`SqliteWorkerStore`](crate::store::worker::SqliteWorkerStore).
    SqliteWorker {
        /// The database file. `:memory:` opens a private in-memory database.
        path: PathBuf,
    },
}
