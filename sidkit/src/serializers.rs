pub(crate) mod cookie_expiry {
    use chrono::DateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::config::CookieExpiry;

    const ON_BROWSER_CLOSE: &str = "on_browser_close";

    pub(crate) fn serialize<S>(expiry: &CookieExpiry, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match expiry {
            CookieExpiry::OnBrowserClose => serializer.serialize_str(ON_BROWSER_CLOSE),
            CookieExpiry::After(duration) => {
                serializer.serialize_str(&humantime::format_duration(*duration).to_string())
            }
            CookieExpiry::At(time) => serializer.serialize_str(&time.to_rfc3339()),
        }
    }

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<CookieExpiry, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        match s.as_deref() {
            None | Some(ON_BROWSER_CLOSE) => Ok(CookieExpiry::OnBrowserClose),
            Some(value) => {
                humantime::parse_duration(value)
                    .map(CookieExpiry::After)
                    // On failure, fall back to RFC3339 format
                    .or_else(|_| {
                        DateTime::parse_from_rfc3339(value)
                            .map(CookieExpiry::At)
                            .map_err(|e| {
                                serde::de::Error::custom(format!(
                                    "expiry must be a humantime duration, an RFC3339 timestamp \
                                     or \"{ON_BROWSER_CLOSE}\"; got {value:?}: {e}"
                                ))
                            })
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::DateTime;
    use serde::{Deserialize, Serialize};

    use crate::config::CookieExpiry;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "super::cookie_expiry")]
        expiry: CookieExpiry,
    }

    #[test]
    fn duration_round_trip() {
        let parsed: Wrapper = serde_json::from_str(r#"{"expiry":"7days"}"#).unwrap();
        assert_eq!(
            parsed.expiry,
            CookieExpiry::After(Duration::from_secs(7 * 24 * 60 * 60))
        );

        let json = serde_json::to_string(&parsed).unwrap();
        assert_eq!(json, r#"{"expiry":"7days"}"#);
    }

    #[test]
    fn rfc3339_round_trip() {
        let parsed: Wrapper =
            serde_json::from_str(r#"{"expiry":"2030-01-01T00:00:00+00:00"}"#).unwrap();
        let expected = DateTime::parse_from_rfc3339("2030-01-01T00:00:00+00:00").unwrap();
        assert_eq!(parsed.expiry, CookieExpiry::At(expected));

        let json = serde_json::to_string(&parsed).unwrap();
        assert_eq!(json, r#"{"expiry":"2030-01-01T00:00:00+00:00"}"#);
    }

    #[test]
    fn browser_session_cookie() {
        let parsed: Wrapper = serde_json::from_str(r#"{"expiry":null}"#).unwrap();
        assert_eq!(parsed.expiry, CookieExpiry::OnBrowserClose);

        let parsed: Wrapper = serde_json::from_str(r#"{"expiry":"on_browser_close"}"#).unwrap();
        assert_eq!(parsed.expiry, CookieExpiry::OnBrowserClose);
        assert_eq!(
            serde_json::to_string(&parsed).unwrap(),
            r#"{"expiry":"on_browser_close"}"#
        );
    }

    #[test]
    fn invalid_expiry() {
        let error = serde_json::from_str::<Wrapper>(r#"{"expiry":"someday"}"#).unwrap_err();
        assert!(error.to_string().contains("someday"));
    }
}
