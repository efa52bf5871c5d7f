use std::fmt::Display;

use thiserror::Error;

use crate::store::StoreError;

/// An error that can occur while using sidkit.
#[derive(Debug)]
pub struct Error {
    pub(crate) inner: ErrorRepr,
}

impl Error {
    #[must_use]
    pub(crate) fn new(inner: ErrorRepr) -> Self {
        Self { inner }
    }

    /// Create a new error with a custom error message or error type.
    ///
    /// # Examples
    ///
    /// ```
    /// use sidkit::Error;
    ///
    /// let error = Error::custom("An error occurred");
    /// let error = Error::custom(std::io::Error::other("An error occurred"));
    /// ```
    #[must_use]
    pub fn custom<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self::new(ErrorRepr::Custom(error.into()))
    }

    /// Returns the underlying store error, if this error was caused by a
    /// session store operation.
    ///
    /// # Examples
    ///
    /// ```
    /// use sidkit::Error;
    /// use sidkit::store::StoreError;
    ///
    /// let error = Error::from(StoreError::NotInitialized);
    /// assert!(matches!(error.store_error(), Some(StoreError::NotInitialized)));
    /// ```
    #[must_use]
    pub fn store_error(&self) -> Option<&StoreError> {
        match &self.inner {
            ErrorRepr::Store(error) => Some(error),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<ErrorRepr> for Error {
    fn from(value: ErrorRepr) -> Self {
        Self::new(value)
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        tracing::error!(error = %self, "Session handler failed");
        http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

macro_rules! impl_error_from_repr {
    ($ty:ty) => {
        impl From<$ty> for Error {
            fn from(value: $ty) -> Self {
                Error::from(ErrorRepr::from(value))
            }
        }
    };
}

impl_error_from_repr!(StoreError);
impl_error_from_repr!(toml::de::Error);
impl_error_from_repr!(serde_json::Error);
impl_error_from_repr!(http::header::InvalidHeaderValue);

#[derive(Debug, Error)]
#[non_exhaustive]
pub(crate) enum ErrorRepr {
    /// A custom user error occurred.
    #[error(transparent)]
    Custom(Box<dyn std::error::Error + Send + Sync>),
    /// A session store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An error occurred while trying to parse the config.
    #[error("Could not parse the session config: {source}")]
    ParseConfig {
        #[from]
        source: toml::de::Error,
    },
    /// A session value could not be converted to or from JSON.
    #[error("Could not convert the session value: {0}")]
    Json(#[from] serde_json::Error),
    /// The session cookie could not be turned into a header value.
    #[error("Could not build the session cookie header: {0}")]
    CookieHeader(#[from] http::header::InvalidHeaderValue),
}
