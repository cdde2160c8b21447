//! Admin API authentication
//!
//! The admin surface can evaluate arbitrary script code, so it can be locked
//! behind a shared secret sent in the `X-API-Key` header. Script-defined
//! endpoints are never subject to this check; they are public by construction
//! and a handler that wants protection inspects `request.headers` itself.
//!
//! Keys are compared in constant time. A missing or wrong key yields
//! [`ScriptgateError::Unauthorized`] (HTTP 401).
//!
//! ```
//! use scriptgate_common::auth::AuthConfig;
//!
//! let auth = AuthConfig::with_api_key("s3cret");
//! assert!(auth.authorize(Some("s3cret")).is_ok());
//! assert!(auth.authorize(Some("guess")).is_err());
//! assert!(AuthConfig::disabled().authorize(None).is_ok());
//! ```

use std::fmt;

use crate::protocol::{Result, ScriptgateError};

/// Header carrying the admin API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Environment variable consulted by [`AuthConfig::from_env`].
pub const API_KEY_ENV: &str = "SCRIPTGATE_API_KEY";

/// Authentication settings for the admin surface.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    api_key: Option<String>,
}

impl AuthConfig {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { api_key: None }
    }

    /// Picks the explicit key if given, else `SCRIPTGATE_API_KEY`, else disabled.
    ///
    /// Empty strings count as "not set".
    pub fn from_env(explicit: Option<String>) -> Self {
        explicit
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.is_empty())
            .map(Self::with_api_key)
            .unwrap_or_default()
    }

    pub fn requires_auth(&self) -> bool {
        self.api_key.is_some()
    }

    /// Checks the key presented in the `X-API-Key` header.
    pub fn authorize(&self, provided: Option<&str>) -> Result<()> {
        let Some(expected) = &self.api_key else {
            return Ok(());
        };

        match provided {
            Some(key) if constant_time_eq(expected, key) => Ok(()),
            Some(_) => Err(ScriptgateError::Unauthorized("invalid API key".into())),
            None => Err(ScriptgateError::Unauthorized(format!(
                "missing {} header",
                API_KEY_HEADER
            ))),
        }
    }
}

impl fmt::Display for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.api_key {
            Some(_) => write!(f, "ApiKey(*****)"),
            None => write!(f, "Disabled"),
        }
    }
}

/// Compares every byte regardless of where the first mismatch is.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_accepts_anything() {
        let auth = AuthConfig::disabled();
        assert!(!auth.requires_auth());
        assert!(auth.authorize(None).is_ok());
        assert!(auth.authorize(Some("whatever")).is_ok());
    }

    #[test]
    fn test_api_key_required() {
        let auth = AuthConfig::with_api_key("test-key");
        assert!(auth.requires_auth());
        assert!(auth.authorize(Some("test-key")).is_ok());

        let err = auth.authorize(Some("wrong-key")).unwrap_err();
        assert_eq!(err.status_code(), 401);

        let err = auth.authorize(None).unwrap_err();
        assert!(err.to_string().contains("x-api-key"));
    }

    #[test]
    fn test_from_env_prefers_explicit_key() {
        let auth = AuthConfig::from_env(Some("explicit".into()));
        assert!(auth.authorize(Some("explicit")).is_ok());
    }

    #[test]
    fn test_from_env_ignores_empty_key() {
        let auth = AuthConfig::from_env(Some(String::new()));
        assert!(!auth.requires_auth());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("same-key-123", "same-key-123"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("key1", "key2"));
        assert!(!constant_time_eq("short", "longer"));
    }

    #[test]
    fn test_display_masks_key() {
        assert_eq!(AuthConfig::with_api_key("secret").to_string(), "ApiKey(*****)");
        assert_eq!(AuthConfig::disabled().to_string(), "Disabled");
    }
}
